// =============================================================================
// DATAGO — Upstream portal client
// =============================================================================
// Credential-injecting GET client for the public-data portals: admission
// against the authenticated-tier bucket (keyed by provider tag, never by the
// secret), bounded retries with a linearly growing delay, taxonomy
// classification of every outcome, and a sorted-key caching adapter.
// =============================================================================

use crate::cache::{CacheType, GatewayCache};
use crate::config::UpstreamConfig;
use crate::envelope::ApiEnvelope;
use crate::error::GatewayError;
use crate::keys::{mask_params, KeyRegistry};
use crate::ratelimit::{RateLimiter, Tier};
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const UPSTREAM_ACCEPT: &str = "application/json, application/xml";

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cached_requests: u64,
    pub rate_limited_requests: u64,
    /// Percent of requests served from cache; 0 before any request.
    pub cache_hit_rate: f64,
    /// Percent of completed network calls that succeeded; 0 before any.
    pub success_rate: f64,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    cached: AtomicU64,
    rate_limited: AtomicU64,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
    keys: Arc<KeyRegistry>,
    limiter: Arc<RateLimiter>,
    cache: Arc<GatewayCache>,
    counters: Counters,
}

impl UpstreamClient {
    pub fn new(
        config: UpstreamConfig,
        keys: Arc<KeyRegistry>,
        limiter: Arc<RateLimiter>,
        cache: Arc<GatewayCache>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("http client: {}", e)))?;
        Ok(Self { http, config, keys, limiter, cache, counters: Counters::default() })
    }

    /// GET against the portal with serviceKey injection and bounded retries.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ApiEnvelope<Value>, GatewayError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let secret = self.keys.get(&self.config.provider).map_err(|e| {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            e
        })?;

        if self.config.enable_rate_limit {
            let decision = self.limiter.check_limit(&self.config.provider, Tier::Authenticated);
            if !decision.allowed {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(GatewayError::RateLimit {
                    message: format!("outbound budget exhausted for '{}'", self.config.provider),
                    limit: decision.limit,
                    retry_after_secs: decision.retry_after.unwrap_or(1),
                });
            }
        }

        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        let mut query: Vec<(String, String)> = params.to_vec();
        query.push(("serviceKey".to_string(), secret));
        info!(method = "GET", url = %url, params = ?mask_params(&query), "upstream_request");

        let mut attempt: u32 = 0;
        loop {
            let outcome = self.send_once(&url, &query).await;
            let err = match outcome {
                Ok(body) => {
                    self.counters.successful.fetch_add(1, Ordering::Relaxed);
                    return Ok(ApiEnvelope::success(body).with_cached(false));
                }
                Err(err) => err,
            };
            if attempt >= self.config.max_retries || !is_retry_class(&err) {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
            attempt += 1;
            let delay = self.config.retry_delay * attempt;
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                code = err.code(),
                "upstream_retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Value, GatewayError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header(ACCEPT, UPSTREAM_ACCEPT)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), self.config.retry_delay.as_secs()));
        }
        response.json::<Value>().await.map_err(|e| GatewayError::ExternalApi {
            message: format!("malformed upstream body: {}", e),
            status: None,
        })
    }

    fn classify_transport(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.config.timeout.as_millis() as u64)
        } else if err.is_connect() {
            GatewayError::ExternalApi { message: format!("connection failed: {}", err), status: None }
        } else {
            GatewayError::ExternalApi { message: format!("network error: {}", err), status: None }
        }
    }

    /// Cache-through variant; hits replay the stored envelope with
    /// metadata.cached flipped, misses dispatch and store only on success.
    pub async fn get_cached(
        &self,
        ty: CacheType,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<ApiEnvelope<Value>, GatewayError> {
        let key = cache_key(endpoint, params);
        if self.config.enable_cache {
            let lookup = self.cache.get(ty, &key);
            if lookup.hit {
                self.counters.total.fetch_add(1, Ordering::Relaxed);
                self.counters.cached.fetch_add(1, Ordering::Relaxed);
                let stored = lookup.value.expect("hits carry a value");
                let mut envelope: ApiEnvelope<Value> = serde_json::from_value(stored)
                    .map_err(|e| GatewayError::Cache(format!("stored envelope corrupt: {}", e)))?;
                envelope.metadata.cached = Some(true);
                return Ok(envelope);
            }
        }
        let envelope = self.get(endpoint, params).await?;
        if self.config.enable_cache {
            match serde_json::to_value(&envelope) {
                Ok(value) => self.cache.set(ty, &key, value, None),
                Err(e) => warn!(error = %e, "envelope_not_cacheable"),
            }
        }
        Ok(envelope)
    }

    pub fn invalidate_cache(&self, ty: Option<CacheType>) -> usize {
        match ty {
            Some(ty) => self.cache.delete_by_type(ty),
            None => {
                let count = self.cache.stats().size;
                self.cache.clear();
                count
            }
        }
    }

    pub fn stats(&self) -> UpstreamStats {
        let total = self.counters.total.load(Ordering::Relaxed);
        let successful = self.counters.successful.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        let cached = self.counters.cached.load(Ordering::Relaxed);
        let completed = successful + failed;
        UpstreamStats {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            cached_requests: cached,
            rate_limited_requests: self.counters.rate_limited.load(Ordering::Relaxed),
            cache_hit_rate: if total == 0 { 0.0 } else { cached as f64 / total as f64 * 100.0 },
            success_rate: if completed == 0 {
                0.0
            } else {
                successful as f64 / completed as f64 * 100.0
            },
        }
    }

    pub fn reset_stats(&self) {
        self.counters.total.store(0, Ordering::Relaxed);
        self.counters.successful.store(0, Ordering::Relaxed);
        self.counters.failed.store(0, Ordering::Relaxed);
        self.counters.cached.store(0, Ordering::Relaxed);
        self.counters.rate_limited.store(0, Ordering::Relaxed);
    }
}

/// "{endpoint}?{k=v&…}" with keys sorted lexicographically; bare endpoint
/// when there are no parameters.
pub fn cache_key(endpoint: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return endpoint.to_string();
    }
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", endpoint, query.join("&"))
}

fn classify_status(status: u16, base_delay_secs: u64) -> GatewayError {
    match status {
        429 => GatewayError::RateLimit {
            message: "upstream rate limit".to_string(),
            limit: 0,
            retry_after_secs: base_delay_secs.max(1),
        },
        500..=599 => GatewayError::ExternalApi {
            message: format!("upstream responded {}", status),
            status: Some(status),
        },
        _ => GatewayError::ExternalApi {
            message: format!("upstream rejected the request with {}", status),
            status: Some(status),
        },
    }
}

/// Which failures the retry loop is allowed to repeat: network-class errors,
/// upstream 429, and 5xx. Other 4xx short-circuit.
fn is_retry_class(err: &GatewayError) -> bool {
    match err {
        GatewayError::Timeout(_) => true,
        GatewayError::RateLimit { .. } => true,
        GatewayError::ExternalApi { status: None, .. } => true,
        GatewayError::ExternalApi { status: Some(code), .. } => *code >= 500,
        _ => false,
    }
}
