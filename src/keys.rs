// =============================================================================
// DATAGO — API-key registry
// =============================================================================
// Holds the credentials used against the public-data portals. Keys load once
// at process start from the environment; afterwards only last_used and the
// active→expired transition mutate. Secrets never reach a log sink unmasked.
// =============================================================================

use crate::error::GatewayError;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{error, warn};

/// Portal issues URL-encoded base64-ish keys; 20 chars is the shortest seen.
static API_KEY_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9%+/=]{20,}$").expect("key format regex"));

/// Per-service env overrides: PUBLIC_DATA_<SERVICE>_API_KEY.
pub const SERVICE_PROVIDERS: [&str; 6] =
    ["address", "business", "apartment", "realestate", "building", "subway"];

pub const PRIMARY_PROVIDER: &str = "primary";

const EXPIRY_WARNING_DAYS: i64 = 30;
const EXPIRY_URGENT_DAYS: i64 = 7;

/// Sentinel used when no expiry is configured.
fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 12, 31, 0, 0, 0).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Expired,
    Suspended,
}

#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub secret: String,
    pub provider: String,
    pub expires_at: DateTime<Utc>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl KeyRecord {
    fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStats {
    pub total_keys: usize,
    pub active_keys: usize,
    pub expired_keys: usize,
    /// Records with 0 < days-until-expiry ≤ 30.
    pub expiring_soon: usize,
}

#[derive(Debug)]
pub struct KeyRegistry {
    records: DashMap<String, KeyRecord>,
}

impl KeyRegistry {
    /// Builds the registry from explicit parameters. The primary secret is
    /// required and must match the portal key format; extra providers that
    /// fail the format check are skipped with a warning rather than aborting.
    pub fn new(
        primary_secret: &str,
        primary_expiry: Option<DateTime<Utc>>,
        extras: &[(String, String)],
    ) -> Result<Self, GatewayError> {
        if primary_secret.is_empty() {
            return Err(GatewayError::Configuration(
                "PUBLIC_DATA_API_KEY is required".into(),
            ));
        }
        if !API_KEY_FORMAT.is_match(primary_secret) {
            return Err(GatewayError::Configuration(
                "PUBLIC_DATA_API_KEY does not match the portal key format".into(),
            ));
        }

        let now = Utc::now();
        let records = DashMap::new();
        let expires_at = primary_expiry.unwrap_or_else(far_future);
        records.insert(
            PRIMARY_PROVIDER.to_string(),
            KeyRecord {
                secret: primary_secret.to_string(),
                provider: PRIMARY_PROVIDER.to_string(),
                expires_at,
                status: if expires_at > now { KeyStatus::Active } else { KeyStatus::Expired },
                created_at: now,
                last_used: None,
            },
        );

        for (provider, secret) in extras {
            if !API_KEY_FORMAT.is_match(secret) {
                warn!(provider = %provider, "service_key_malformed_skipped");
                continue;
            }
            records.insert(
                provider.clone(),
                KeyRecord {
                    secret: secret.clone(),
                    provider: provider.clone(),
                    expires_at,
                    status: if expires_at > now { KeyStatus::Active } else { KeyStatus::Expired },
                    created_at: now,
                    last_used: None,
                },
            );
        }

        Ok(Self { records })
    }

    pub fn from_env() -> Result<Self, GatewayError> {
        let primary = std::env::var("PUBLIC_DATA_API_KEY").map_err(|_| {
            GatewayError::Configuration("PUBLIC_DATA_API_KEY is required".into())
        })?;
        let expiry = std::env::var("API_KEY_EXPIRY").ok().and_then(|raw| {
            parse_expiry(&raw).or_else(|| {
                warn!(raw = %raw, "api_key_expiry_unparseable_ignored");
                None
            })
        });
        let mut extras = Vec::new();
        for service in SERVICE_PROVIDERS {
            let var = format!("PUBLIC_DATA_{}_API_KEY", service.to_ascii_uppercase());
            if let Ok(secret) = std::env::var(&var) {
                extras.push((service.to_string(), secret));
            }
        }
        Self::new(&primary, expiry, &extras)
    }

    /// Returns the active secret for a provider, falling back to the primary
    /// record for unknown providers. Marks expiry transitions as it goes.
    pub fn get(&self, provider: &str) -> Result<String, GatewayError> {
        let name = if self.records.contains_key(provider) { provider } else { PRIMARY_PROVIDER };
        let mut record = self
            .records
            .get_mut(name)
            .ok_or_else(|| GatewayError::ApiKey("no primary key configured".into()))?;

        let now = Utc::now();
        if record.status == KeyStatus::Active && record.expires_at <= now {
            record.status = KeyStatus::Expired;
            warn!(provider = %record.provider, "key_transitioned_to_expired");
        }
        if record.status != KeyStatus::Active {
            return Err(GatewayError::ApiKey(format!(
                "key for provider '{}' is {:?}",
                record.provider, record.status
            )));
        }
        record.last_used = Some(now);
        Ok(record.secret.clone())
    }

    pub fn key_info(&self, provider: &str) -> Option<KeyRecord> {
        self.records.get(provider).map(|r| r.clone())
    }

    pub fn stats(&self) -> KeyStats {
        let now = Utc::now();
        let mut stats = KeyStats { total_keys: 0, active_keys: 0, expired_keys: 0, expiring_soon: 0 };
        for record in self.records.iter() {
            stats.total_keys += 1;
            let effectively_expired =
                record.status == KeyStatus::Expired || record.expires_at <= now;
            if effectively_expired {
                stats.expired_keys += 1;
            } else if record.status == KeyStatus::Active {
                stats.active_keys += 1;
                let days = record.days_until_expiry(now);
                if days >= 0 && days <= EXPIRY_WARNING_DAYS {
                    stats.expiring_soon += 1;
                }
            }
        }
        stats
    }

    /// Advisory pass over every record; logs one band per key and mutates
    /// nothing.
    pub fn check_expiry(&self) {
        let now = Utc::now();
        for record in self.records.iter() {
            let days = record.days_until_expiry(now);
            let masked = mask_key(&record.secret);
            if record.expires_at <= now {
                error!(provider = %record.provider, key = %masked, "key_expired");
            } else if days <= EXPIRY_URGENT_DAYS {
                warn!(provider = %record.provider, key = %masked, days_left = days, "key_expiry_urgent");
            } else if days <= EXPIRY_WARNING_DAYS {
                warn!(provider = %record.provider, key = %masked, days_left = days, "key_expiry_warning");
            }
        }
    }
}

/// Keeps the first four characters; the rest becomes asterisks, capped at 8.
/// Secrets of four characters or fewer are masked whole so nothing of them
/// is exposed.
pub fn mask_key(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len().max(4));
    }
    let visible: String = chars[..4].iter().collect();
    let masked = (chars.len() - 4).min(8);
    format!("{}{}", visible, "*".repeat(masked))
}

/// Masks any credential-bearing parameter before it reaches a log sink.
pub fn mask_params(params: &[(String, String)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| {
            if k.eq_ignore_ascii_case("servicekey") {
                (k.clone(), mask_key(v))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Bare dates expire at midnight UTC.
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const GOOD_KEY: &str = "abcDEF1234567890%2Bxyz==";

    fn registry_with(expiry: Option<DateTime<Utc>>) -> KeyRegistry {
        KeyRegistry::new(GOOD_KEY, expiry, &[]).expect("valid registry")
    }

    #[test]
    fn test_missing_primary_is_fatal() {
        let err = KeyRegistry::new("", None, &[]).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_malformed_primary_is_fatal() {
        for bad in ["short", "has spaces in the secret!!", "tabs\tinside-0123456789"] {
            let err = KeyRegistry::new(bad, None, &[]).unwrap_err();
            assert_eq!(err.code(), "CONFIGURATION_ERROR", "accepted malformed key {:?}", bad);
        }
    }

    #[test]
    fn test_get_unknown_provider_falls_back_to_primary() {
        let reg = registry_with(None);
        assert_eq!(reg.get("no-such-provider").unwrap(), GOOD_KEY);
    }

    #[test]
    fn test_get_prefers_service_key() {
        let service_key = "serviceKEY9876543210==ABC".to_string();
        let reg = KeyRegistry::new(GOOD_KEY, None, &[("address".to_string(), service_key.clone())])
            .unwrap();
        assert_eq!(reg.get("address").unwrap(), service_key);
        assert_eq!(reg.get("subway").unwrap(), GOOD_KEY, "unknown service falls back");
    }

    #[test]
    fn test_expired_key_is_refused_and_transitions() {
        let reg = registry_with(Some(Utc::now() - Duration::days(1)));
        let err = reg.get("primary").unwrap_err();
        assert_eq!(err.code(), "API_KEY_ERROR");
        assert_eq!(reg.key_info("primary").unwrap().status, KeyStatus::Expired);
        // Transition is monotonic: a second get still refuses.
        assert_eq!(reg.get("primary").unwrap_err().code(), "API_KEY_ERROR");
    }

    #[test]
    fn test_expired_extras_are_expired_from_construction() {
        let service_key = "serviceKEY9876543210==ABC".to_string();
        let reg = KeyRegistry::new(
            GOOD_KEY,
            Some(Utc::now() - Duration::days(1)),
            &[("address".to_string(), service_key)],
        )
        .unwrap();
        // key_info must report the truth without a get() having run first.
        assert_eq!(reg.key_info("address").unwrap().status, KeyStatus::Expired);
        assert_eq!(reg.get("address").unwrap_err().code(), "API_KEY_ERROR");
        assert_eq!(reg.stats().active_keys, 0);
    }

    #[test]
    fn test_get_updates_last_used() {
        let reg = registry_with(None);
        assert!(reg.key_info("primary").unwrap().last_used.is_none());
        reg.get("primary").unwrap();
        assert!(reg.key_info("primary").unwrap().last_used.is_some());
    }

    #[test]
    fn test_stats_counts_expiring_soon() {
        let reg = registry_with(Some(Utc::now() + Duration::days(10)));
        let stats = reg.stats();
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.active_keys, 1);
        assert_eq!(stats.expired_keys, 0);
        assert_eq!(stats.expiring_soon, 1, "10 days out is inside the 30-day band");

        let far = registry_with(None);
        assert_eq!(far.stats().expiring_soon, 0);
    }

    #[test]
    fn test_mask_key_keeps_four_and_bounds_tail() {
        assert_eq!(mask_key("abcdefghij"), "abcd******");
        assert_eq!(mask_key(GOOD_KEY), format!("abcD{}", "*".repeat(8)));
        assert_eq!(mask_key("abc"), "****", "short secrets are fully masked");
        assert!(!mask_key(GOOD_KEY).contains(&GOOD_KEY[4..]));
    }

    #[test]
    fn test_mask_key_short_boundary() {
        // At most four chars: full mask, never a fully visible secret.
        assert_eq!(mask_key("abcd"), "****");
        // Five through seven chars keep the first four like any other secret.
        assert_eq!(mask_key("abcde"), "abcd*");
        assert_eq!(mask_key("abcdef"), "abcd**");
        assert_eq!(mask_key("abcdefg"), "abcd***");
        assert_eq!(mask_key("abcdefgh"), "abcd****");
    }

    #[test]
    fn test_mask_params_only_touches_service_key() {
        let params = vec![
            ("keyword".to_string(), "서울시청".to_string()),
            ("serviceKey".to_string(), GOOD_KEY.to_string()),
        ];
        let masked = mask_params(&params);
        assert_eq!(masked[0].1, "서울시청");
        assert!(masked[1].1.starts_with("abcD"));
        assert!(masked[1].1.contains('*'));
    }

    #[test]
    fn test_parse_expiry_accepts_dates_and_instants() {
        assert!(parse_expiry("2027-06-30").is_some());
        assert!(parse_expiry("2027-06-30T12:00:00Z").is_some());
        assert!(parse_expiry("not a date").is_none());
    }
}
