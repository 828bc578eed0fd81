// =============================================================================
// DATAGO — Shared application state
// =============================================================================
// One value per core component, wired at startup and passed into the handler
// layer. No hidden globals: every collaborator is injected here.
// =============================================================================

use crate::cache::GatewayCache;
use crate::config::GatewayConfig;
use crate::coord::CoordEngine;
use crate::error::GatewayError;
use crate::keys::KeyRegistry;
use crate::ratelimit::RateLimiter;
use crate::upstream::UpstreamClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub keys: Arc<KeyRegistry>,
    pub cache: Arc<GatewayCache>,
    pub limiter: Arc<RateLimiter>,
    pub upstream: Arc<UpstreamClient>,
    pub engine: Arc<CoordEngine>,
}

impl AppState {
    pub fn new(config: GatewayConfig, keys: KeyRegistry) -> Result<Self, GatewayError> {
        let config = Arc::new(config);
        let keys = Arc::new(keys);
        let cache = Arc::new(GatewayCache::new());
        let limiter = Arc::new(RateLimiter::new());
        let upstream = Arc::new(UpstreamClient::new(
            config.upstream.clone(),
            keys.clone(),
            limiter.clone(),
            cache.clone(),
        )?);
        let engine = Arc::new(CoordEngine::new(config.strict_korea_bounds));
        Ok(Self { config, keys, cache, limiter, upstream, engine })
    }
}
