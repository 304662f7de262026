use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use botsense_common::PolicyConfig;
use serde_json::{json, Value};

use crate::state::SharedState;

/// GET /api/config
///
/// Returns the running configuration as JSON with the beacon secret redacted.
pub async fn get_config(State(state): State<SharedState>) -> impl IntoResponse {
    let config = state.config.read().expect("config lock poisoned");
    let mut value = serde_json::to_value(&*config).unwrap_or(json!({"error": "serialization failed"}));
    if let Some(beacon) = value.get_mut("js_beacon").and_then(Value::as_object_mut) {
        beacon.insert("secret".into(), json!("<redacted>"));
    }
    Json(value)
}

/// PUT /api/config/policy
///
/// Validates a replacement decision policy and installs it in the running
/// engine.
pub async fn update_policy(
    State(state): State<SharedState>,
    Json(policy): Json<PolicyConfig>,
) -> impl IntoResponse {
    // Held across both updates so the engine and the reported config agree.
    let mut config = state.config.write().expect("config lock poisoned");
    if let Err(e) = state.detector.set_policy(policy.clone()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "message": format!("validation failed: {}", e)
            })),
        );
    }
    config.policy = policy;
    drop(config);

    tracing::info!("decision policy updated via admin API");

    (StatusCode::OK, Json(json!({ "status": "updated" })))
}
