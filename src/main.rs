// =============================================================================
// DATAGO — gateway entry point
// =============================================================================

use datago_gateway::config::GatewayConfig;
use datago_gateway::handlers;
use datago_gateway::keys::KeyRegistry;
use datago_gateway::state::AppState;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = GatewayConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            format!("datago_gateway={},tower_http=info", config.log_level)
        }))
        .json()
        .init();
    info!(version = env!("CARGO_PKG_VERSION"), "DATAGO gateway starting");

    let registry = KeyRegistry::from_env().unwrap_or_else(|e| {
        eprintln!("\n[FATAL] {}", e);
        eprintln!("Set PUBLIC_DATA_API_KEY to the portal-issued service key.");
        eprintln!("Optional: API_KEY_EXPIRY=YYYY-MM-DD and per-service overrides");
        eprintln!("  (PUBLIC_DATA_ADDRESS_API_KEY, PUBLIC_DATA_SUBWAY_API_KEY, ...).\n");
        std::process::exit(1);
    });
    registry.check_expiry();

    let port = config.port;
    let state = AppState::new(config, registry).unwrap_or_else(|e| {
        eprintln!("[FATAL] component wiring failed: {}", e);
        std::process::exit(1);
    });
    info!(
        keys = state.keys.stats().total_keys,
        upstream = %state.config.upstream.base_url,
        "components ready"
    );

    tokio::spawn(housekeeping(state.clone()));

    let app = handlers::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("\n[FATAL] could not bind port {}: {}", port, e);
        eprintln!("Most likely another gateway instance is already running.");
        eprintln!("Stop it or pick a different port: PORT=8081 cargo run --release\n");
        std::process::exit(1);
    });
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown");
        })
        .await
        .unwrap_or_else(|e| {
            eprintln!("[FATAL] server error: {}", e);
            std::process::exit(1);
        });
}

/// Periodic reclamation: expired cache entries every minute, idle rate-limit
/// buckets every hour, and a daily key-expiry advisory pass.
async fn housekeeping(state: AppState) {
    let mut cache_sweep = tokio::time::interval(Duration::from_secs(60));
    let mut bucket_sweep = tokio::time::interval(Duration::from_secs(3_600));
    let mut key_advisory = tokio::time::interval(Duration::from_secs(86_400));
    loop {
        tokio::select! {
            _ = cache_sweep.tick() => {
                let removed = state.cache.sweep_expired();
                if removed > 0 {
                    info!(removed, remaining = state.cache.stats().size, "cache_sweep");
                }
            }
            _ = bucket_sweep.tick() => {
                let removed = state.limiter.cleanup_stale();
                if removed > 0 {
                    info!(removed, "stale_buckets_reclaimed");
                }
            }
            _ = key_advisory.tick() => {
                state.keys.check_expiry();
            }
        }
    }
}
