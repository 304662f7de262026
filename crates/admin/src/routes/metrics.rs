use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};

use crate::state::SharedState;

/// GET /api/metrics
///
/// Prometheus text exposition of every registered botsense metric.
pub async fn get_metrics(State(state): State<SharedState>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {e}"))
            .into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
