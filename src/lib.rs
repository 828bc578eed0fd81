// =============================================================================
// DATAGO — Korean public-data gateway (Rust/Axum/Tokio)
// =============================================================================
// Uniform HTTP/JSON front for the public-data portals:
//   - API-key registry with expiry tracking and masked logging
//   - per-(tier, identifier) token-bucket admission control
//   - bounded LRU response cache with per-type TTLs
//   - retrying, credential-injecting upstream client
//   - self-contained seven-system coordinate transformation engine
// =============================================================================

pub mod cache;
pub mod config;
pub mod coord;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod ratelimit;
pub mod state;
pub mod upstream;
