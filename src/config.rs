// =============================================================================
// DATAGO — Environment configuration
// =============================================================================

use std::time::Duration;

/// Default public-data portal root.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://apis.data.go.kr";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base delay; retry i waits i × retry_delay (the curve is a knob).
    pub retry_delay: Duration,
    pub enable_cache: bool,
    pub enable_rate_limit: bool,
    /// Provider tag used for credential selection and as the non-secret
    /// rate-limit identifier for outbound admission.
    pub provider: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            enable_cache: true,
            enable_rate_limit: true,
            provider: "primary".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    /// One of debug|info|warn|error; feeds the tracing EnvFilter.
    pub log_level: String,
    /// NODE_ENV == "production": internal error details are elided.
    pub production: bool,
    /// Anything but "false" keeps Korean-range warnings on.
    pub strict_korea_bounds: bool,
    pub upstream: UpstreamConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            production: false,
            strict_korea_bounds: true,
            upstream: UpstreamConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(p) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            cfg.port = p;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            let level = level.to_ascii_lowercase();
            if matches!(level.as_str(), "debug" | "info" | "warn" | "error") {
                cfg.log_level = level;
            }
        }
        cfg.production = std::env::var("NODE_ENV").map(|e| e == "production").unwrap_or(false);
        cfg.strict_korea_bounds =
            std::env::var("STRICT_KOREA_BOUNDS").map(|v| v != "false").unwrap_or(true);
        if let Ok(url) = std::env::var("UPSTREAM_BASE_URL") {
            if !url.is_empty() {
                cfg.upstream.base_url = url;
            }
        }
        cfg
    }
}
