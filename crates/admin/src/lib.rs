pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, put};
use axum::Router;
use botsense_bot_detect::BotDetector;
use botsense_common::AppConfig;
use tower_http::cors::{Any, CorsLayer};

use crate::state::SharedState;

pub use state::{AppState, BotsenseMetrics, DecisionLogEntry, DECISION_LOG_CAPACITY};

/// Build the Axum router with all admin API routes and middleware.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/metrics", get(routes::metrics::get_metrics))
        .route("/api/config", get(routes::config::get_config))
        .route("/api/config/policy", put(routes::config::update_policy))
        .route("/api/decisions", get(routes::decisions::get_decisions))
        .route("/api/stats", get(routes::stats::get_stats))
        .with_state(state)
        .layer(cors)
}

/// Start the admin API server on the specified address.
///
/// This function will block until the server is shut down.
pub async fn run_admin_server(state: SharedState, listen_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("admin API server listening on {}", listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience function to create a SharedState from the config and engine.
pub fn new_shared_state(config: AppConfig, detector: Arc<BotDetector>) -> SharedState {
    Arc::new(AppState::new(config, detector))
}
