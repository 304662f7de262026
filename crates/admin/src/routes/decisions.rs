use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::SharedState;

/// Query parameters for the decision log endpoint.
#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    /// Maximum number of entries to return (default: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Only entries with this action (`allow`, `challenge`, `block`).
    pub action: Option<String>,
    /// Only entries where this rule fired.
    pub rule: Option<String>,
    pub session_key: Option<String>,
}

fn default_limit() -> usize {
    100
}

/// GET /api/decisions
///
/// Newest-first, optionally filtered page of the in-memory decision log.
pub async fn get_decisions(
    State(state): State<SharedState>,
    Query(params): Query<DecisionQuery>,
) -> Json<Value> {
    let log = state.decision_log.read().expect("decision_log lock poisoned");

    let filtered: Vec<_> = log
        .iter()
        .rev()
        .filter(|entry| {
            params.action.as_ref().map_or(true, |a| &entry.action == a)
                && params.rule.as_ref().map_or(true, |r| entry.rules.contains(r))
                && params
                    .session_key
                    .as_ref()
                    .map_or(true, |k| &entry.session_key == k)
        })
        .collect();

    let total = filtered.len();

    let page: Vec<_> = filtered
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .cloned()
        .collect();

    Json(json!({
        "total": total,
        "offset": params.offset,
        "limit": params.limit,
        "entries": page
    }))
}
