use axum::extract::State;
use axum::Json;
use botsense_bot_detect::Action;
use serde_json::{json, Value};

use crate::state::SharedState;

/// GET /api/stats
///
/// Decision totals per action, rate-limited requests, active sessions and
/// uptime.
pub async fn get_stats(State(state): State<SharedState>) -> Json<Value> {
    let metrics = &state.metrics;
    let uptime_secs = state.start_time.elapsed().as_secs();
    let total_requests = metrics.requests_total.get();

    let requests_per_second = if uptime_secs > 0 {
        total_requests as f64 / uptime_secs as f64
    } else {
        0.0
    };

    Json(json!({
        "total_requests": total_requests,
        "decisions": {
            "allow": metrics.decisions(Action::Allow),
            "challenge": metrics.decisions(Action::Challenge),
            "block": metrics.decisions(Action::Block),
        },
        "rate_limited_requests": metrics.rate_limited_total.get(),
        "events_collected": metrics.events_collected_total.get(),
        "beacons_verified": metrics.beacons_verified_total.get(),
        "active_sessions": state.detector.session_count(),
        "uptime_secs": uptime_secs,
        "requests_per_second": requests_per_second
    }))
}
