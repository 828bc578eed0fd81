// =============================================================================
// DATAGO — Token-bucket rate limiter
// =============================================================================
// One continuously refilling bucket per (tier, identifier). Refill + consume
// happen under the bucket's entry lock so each bucket is linearizable;
// distinct buckets never contend. checkLimit never fails — it always returns
// a decision.
// =============================================================================

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Violations older than this are pruned on access.
const VIOLATION_RETENTION_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Anonymous,
    Authenticated,
    Premium,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticated => "authenticated",
            Self::Premium => "premium",
        }
    }

    /// Per-window budget; the window is one hour for every tier.
    pub fn capacity(self) -> u64 {
        match self {
            Self::Anonymous => 100,
            Self::Authenticated => 1_000,
            Self::Premium => 10_000,
        }
    }

    pub const WINDOW_MS: u64 = 3_600_000;

    fn refill_per_ms(self) -> f64 {
        self.capacity() as f64 / Self::WINDOW_MS as f64
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_ms: f64,
    last_refill_ms: u64,
}

impl Bucket {
    fn full(tier: Tier, now_ms: u64) -> Self {
        Self {
            tokens: tier.capacity() as f64,
            capacity: tier.capacity() as f64,
            refill_per_ms: tier.refill_per_ms(),
            last_refill_ms: now_ms,
        }
    }

    fn refill(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms) as f64;
        self.tokens = (self.tokens + elapsed * self.refill_per_ms).min(self.capacity);
        self.last_refill_ms = now_ms;
    }

    /// Unix second at which the bucket would be full again.
    fn reset_secs(&self) -> u64 {
        let refill_ms = (self.capacity - self.tokens) / self.refill_per_ms;
        ((self.last_refill_ms as f64 + refill_ms) / 1000.0).ceil() as u64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Unix seconds at which the bucket is full again.
    pub reset: u64,
    pub limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub identifier: String,
    pub tier: Tier,
    pub at_ms: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub violations: u64,
    pub active_buckets: usize,
    /// Violations inside the trailing hour.
    pub recent_violations: usize,
    /// Percent of requests blocked; 0 before any request.
    pub block_rate: f64,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    violations: Mutex<Vec<Violation>>,
    total_requests: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    violation_count: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            violations: Mutex::new(Vec::new()),
            total_requests: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            violation_count: AtomicU64::new(0),
        }
    }

    fn bucket_key(identifier: &str, tier: Tier) -> String {
        format!("{}:{}", tier.as_str(), identifier)
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis() as u64
    }

    pub fn check_limit(&self, identifier: &str, tier: Tier) -> RateLimitDecision {
        self.check_limit_at(identifier, tier, Self::now_ms())
    }

    fn check_limit_at(&self, identifier: &str, tier: Tier, now_ms: u64) -> RateLimitDecision {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let key = Self::bucket_key(identifier, tier);
        let decision = {
            let mut bucket =
                self.buckets.entry(key).or_insert_with(|| Bucket::full(tier, now_ms));
            bucket.refill(now_ms);
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                RateLimitDecision {
                    allowed: true,
                    remaining: bucket.tokens.floor() as u64,
                    reset: bucket.reset_secs(),
                    limit: tier.capacity(),
                    retry_after: None,
                }
            } else {
                // Seconds until one whole token exists again.
                let retry_after = ((1.0 / bucket.refill_per_ms) / 1000.0).ceil() as u64;
                RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset: bucket.reset_secs(),
                    limit: tier.capacity(),
                    retry_after: Some(retry_after),
                }
            }
        };
        if decision.allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            self.violation_count.fetch_add(1, Ordering::Relaxed);
            self.record_violation(identifier, tier, now_ms);
        }
        decision
    }

    /// Same decision math without consuming a token or touching stats.
    pub fn get_status(&self, identifier: &str, tier: Tier) -> RateLimitDecision {
        self.get_status_at(identifier, tier, Self::now_ms())
    }

    fn get_status_at(&self, identifier: &str, tier: Tier, now_ms: u64) -> RateLimitDecision {
        let key = Self::bucket_key(identifier, tier);
        let (tokens, reset) = match self.buckets.get(&key) {
            Some(bucket) => {
                let elapsed = now_ms.saturating_sub(bucket.last_refill_ms) as f64;
                let tokens =
                    (bucket.tokens + elapsed * bucket.refill_per_ms).min(bucket.capacity);
                let refill_ms = (bucket.capacity - tokens) / bucket.refill_per_ms;
                (tokens, ((now_ms as f64 + refill_ms) / 1000.0).ceil() as u64)
            }
            None => (tier.capacity() as f64, (now_ms as f64 / 1000.0).ceil() as u64),
        };
        let allowed = tokens >= 1.0;
        RateLimitDecision {
            allowed,
            remaining: tokens.floor() as u64,
            reset,
            limit: tier.capacity(),
            retry_after: if allowed {
                None
            } else {
                Some(((Tier::WINDOW_MS as f64 / tier.capacity() as f64) / 1000.0).ceil() as u64)
            },
        }
    }

    fn record_violation(&self, identifier: &str, tier: Tier, now_ms: u64) {
        let mut log = self.violations.lock().expect("violation lock");
        log.retain(|v| now_ms.saturating_sub(v.at_ms) < VIOLATION_RETENTION_MS);
        log.push(Violation {
            identifier: identifier.to_string(),
            tier,
            at_ms: now_ms,
            limit: tier.capacity(),
        });
    }

    pub fn get_violations(&self, identifier: Option<&str>) -> Vec<Violation> {
        let now_ms = Self::now_ms();
        let mut log = self.violations.lock().expect("violation lock");
        log.retain(|v| now_ms.saturating_sub(v.at_ms) < VIOLATION_RETENTION_MS);
        log.iter()
            .filter(|v| identifier.map(|id| v.identifier == id).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn reset(&self, identifier: &str, tier: Tier) {
        self.buckets.remove(&Self::bucket_key(identifier, tier));
    }

    pub fn reset_all(&self) {
        self.buckets.clear();
    }

    pub fn stats(&self) -> RateLimiterStats {
        let total = self.total_requests.load(Ordering::Relaxed);
        let blocked = self.blocked.load(Ordering::Relaxed);
        RateLimiterStats {
            total_requests: total,
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked,
            violations: self.violation_count.load(Ordering::Relaxed),
            active_buckets: self.buckets.len(),
            recent_violations: self.get_violations(None).len(),
            block_rate: if total == 0 { 0.0 } else { blocked as f64 / total as f64 * 100.0 },
        }
    }

    pub fn reset_stats(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.allowed.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
        self.violation_count.store(0, Ordering::Relaxed);
        self.violations.lock().expect("violation lock").clear();
    }

    /// Drops buckets untouched for ≥ 2× window. A concurrent checkLimit may
    /// resurrect a bucket it just lost; that bucket starts full, which only
    /// reclaims idle state, never admits beyond capacity within a window.
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_stale_at(Self::now_ms())
    }

    fn cleanup_stale_at(&self, now_ms: u64) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now_ms.saturating_sub(b.last_refill_ms) < 2 * Tier::WINDOW_MS);
        before - self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000_000;

    #[test]
    fn test_new_bucket_starts_full_and_consumes_one() {
        let rl = RateLimiter::new();
        let d = rl.check_limit_at("10.0.0.1", Tier::Anonymous, T0);
        assert!(d.allowed);
        assert_eq!(d.limit, 100);
        assert_eq!(d.remaining, 99);
        assert!(d.retry_after.is_none());
    }

    #[test]
    fn test_capacity_plus_one_is_blocked() {
        let rl = RateLimiter::new();
        for i in 0..100 {
            let d = rl.check_limit_at("c", Tier::Anonymous, T0);
            assert!(d.allowed, "request {} of 100 must pass", i + 1);
        }
        let d = rl.check_limit_at("c", Tier::Anonymous, T0);
        assert!(!d.allowed, "101st request with no refill must be blocked");
        assert_eq!(d.remaining, 0);
        let retry = d.retry_after.expect("blocked decisions carry retry-after");
        assert_eq!(retry, 36, "one token takes window/capacity = 36 s at anonymous tier");
    }

    #[test]
    fn test_refill_is_continuous() {
        let rl = RateLimiter::new();
        for _ in 0..100 {
            rl.check_limit_at("r", Tier::Anonymous, T0);
        }
        // 36 s refills one token at 100/h; just under that stays blocked.
        assert!(!rl.check_limit_at("r", Tier::Anonymous, T0 + 35_999).allowed);
        // ~72 s refills two tokens, and only two.
        assert!(rl.check_limit_at("r", Tier::Anonymous, T0 + 72_036).allowed);
        assert!(rl.check_limit_at("r", Tier::Anonymous, T0 + 72_036).allowed);
        assert!(!rl.check_limit_at("r", Tier::Anonymous, T0 + 72_036).allowed);
    }

    #[test]
    fn test_blocked_stays_blocked_until_retry_after() {
        let rl = RateLimiter::new();
        for _ in 0..100 {
            rl.check_limit_at("m", Tier::Anonymous, T0);
        }
        let d = rl.check_limit_at("m", Tier::Anonymous, T0);
        let retry_ms = d.retry_after.unwrap() * 1000;
        for t in [1_000, retry_ms / 2, retry_ms - 1] {
            assert!(
                !rl.check_limit_at("m", Tier::Anonymous, T0 + t).allowed,
                "must stay blocked {} ms after the violation",
                t
            );
        }
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let rl = RateLimiter::new();
        rl.check_limit_at("idle", Tier::Anonymous, T0);
        // A week idle refills to capacity, not beyond.
        let d = rl.check_limit_at("idle", Tier::Anonymous, T0 + 7 * 24 * 3_600_000);
        assert_eq!(d.remaining, 99, "bucket caps at capacity after long idle");
    }

    #[test]
    fn test_tiers_have_isolated_buckets_and_budgets() {
        let rl = RateLimiter::new();
        for _ in 0..100 {
            rl.check_limit_at("same-id", Tier::Anonymous, T0);
        }
        assert!(!rl.check_limit_at("same-id", Tier::Anonymous, T0).allowed);
        let d = rl.check_limit_at("same-id", Tier::Authenticated, T0);
        assert!(d.allowed, "authenticated tier is a separate bucket");
        assert_eq!(d.limit, 1_000);
    }

    #[test]
    fn test_reset_computation_matches_refill_deficit() {
        let rl = RateLimiter::new();
        let d = rl.check_limit_at("reset", Tier::Anonymous, T0);
        // One token missing → full again in 36 s.
        assert_eq!(d.reset, (T0 + 36_000) / 1000);
    }

    #[test]
    fn test_get_status_does_not_consume() {
        let rl = RateLimiter::new();
        rl.check_limit_at("s", Tier::Anonymous, T0);
        let before = rl.get_status_at("s", Tier::Anonymous, T0);
        let after = rl.get_status_at("s", Tier::Anonymous, T0);
        assert_eq!(before.remaining, after.remaining, "status must be side-effect free");
        assert_eq!(rl.stats().total_requests, 1, "status is not counted as a request");
    }

    #[test]
    fn test_violations_recorded_and_filtered() {
        let rl = RateLimiter::new();
        for _ in 0..101 {
            rl.check_limit_at("va", Tier::Anonymous, T0);
        }
        for _ in 0..101 {
            rl.check_limit_at("vb", Tier::Anonymous, T0);
        }
        assert_eq!(rl.get_violations(None).len(), 2);
        let only_a = rl.get_violations(Some("va"));
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].tier, Tier::Anonymous);
        assert_eq!(only_a[0].limit, 100);
    }

    #[test]
    fn test_violation_retention_is_one_hour() {
        let rl = RateLimiter::new();
        for _ in 0..101 {
            rl.check_limit_at("old", Tier::Anonymous, T0);
        }
        // A violation an hour later prunes the first one on append.
        for _ in 0..101 {
            rl.check_limit_at("new", Tier::Anonymous, T0 + VIOLATION_RETENTION_MS + 1);
        }
        let log = rl.violations.lock().unwrap();
        assert_eq!(log.len(), 1, "hour-old violations are pruned");
        assert_eq!(log[0].identifier, "new");
    }

    #[test]
    fn test_stats_and_block_rate() {
        let rl = RateLimiter::new();
        assert_eq!(rl.stats().block_rate, 0.0, "no requests yet");
        for _ in 0..100 {
            rl.check_limit_at("st", Tier::Anonymous, T0);
        }
        for _ in 0..100 {
            rl.check_limit_at("st", Tier::Anonymous, T0);
        }
        let stats = rl.stats();
        assert_eq!(stats.total_requests, 200);
        assert_eq!(stats.allowed, 100);
        assert_eq!(stats.blocked, 100);
        assert_eq!(stats.active_buckets, 1);
        assert!((stats.block_rate - 50.0).abs() < f64::EPSILON);

        rl.reset_stats();
        let zeroed = rl.stats();
        assert_eq!(zeroed.total_requests, 0);
        assert_eq!(zeroed.recent_violations, 0);
        assert_eq!(zeroed.active_buckets, 1, "reset_stats keeps buckets");
    }

    #[test]
    fn test_reset_restores_full_bucket() {
        let rl = RateLimiter::new();
        for _ in 0..101 {
            rl.check_limit_at("rr", Tier::Anonymous, T0);
        }
        assert!(!rl.check_limit_at("rr", Tier::Anonymous, T0).allowed);
        rl.reset("rr", Tier::Anonymous);
        let d = rl.check_limit_at("rr", Tier::Anonymous, T0);
        assert!(d.allowed, "reset bucket starts full again");
        assert_eq!(d.remaining, 99);
    }

    #[test]
    fn test_cleanup_reclaims_only_idle_buckets() {
        let rl = RateLimiter::new();
        rl.check_limit_at("stale", Tier::Anonymous, T0);
        rl.check_limit_at("fresh", Tier::Anonymous, T0 + 2 * Tier::WINDOW_MS - 1);
        let removed = rl.cleanup_stale_at(T0 + 2 * Tier::WINDOW_MS);
        assert_eq!(removed, 1);
        assert_eq!(rl.stats().active_buckets, 1);
    }

    #[test]
    fn test_conservation_over_observation_window() {
        // allowed ≤ capacity + ⌊W × refillRate⌋ for a saturating caller.
        let rl = RateLimiter::new();
        let window_ms = 10 * 60_000u64; // 10 minutes observed
        let mut allowed = 0u64;
        for step in 0..(window_ms / 1_000) {
            if rl.check_limit_at("cons", Tier::Anonymous, T0 + step * 1_000).allowed {
                allowed += 1;
            }
        }
        let budget = 100 + (window_ms as f64 * (100.0 / Tier::WINDOW_MS as f64)) as u64;
        assert!(
            allowed <= budget,
            "conservation violated: {} allowed > {} budget",
            allowed,
            budget
        );
    }
}
