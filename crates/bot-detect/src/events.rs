use serde::{Deserialize, Serialize};

/// A single client-side interaction observation.
///
/// Timestamps are client milliseconds (e.g. `performance.now()`), only ever
/// compared with other timestamps from the same session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp_ms: f64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A named timing mark such as `page_load` or `submit`.
    Timing { label: String },
    PointerMove { x: f64, y: f64 },
    Scroll { offset: f64 },
    /// Milliseconds since the previous keystroke.
    Keystroke { interval_ms: f64 },
}

impl Event {
    pub fn timing(timestamp_ms: f64, label: &str) -> Self {
        Self {
            timestamp_ms,
            kind: EventKind::Timing {
                label: label.to_string(),
            },
        }
    }

    pub fn pointer(timestamp_ms: f64, x: f64, y: f64) -> Self {
        Self {
            timestamp_ms,
            kind: EventKind::PointerMove { x, y },
        }
    }

    pub fn scroll(timestamp_ms: f64, offset: f64) -> Self {
        Self {
            timestamp_ms,
            kind: EventKind::Scroll { offset },
        }
    }

    pub fn keystroke(timestamp_ms: f64, interval_ms: f64) -> Self {
        Self {
            timestamp_ms,
            kind: EventKind::Keystroke { interval_ms },
        }
    }

    /// All numeric fields are finite and intervals are non-negative.
    pub fn is_well_formed(&self) -> bool {
        if !self.timestamp_ms.is_finite() {
            return false;
        }
        match &self.kind {
            EventKind::Timing { .. } => true,
            EventKind::PointerMove { x, y } => x.is_finite() && y.is_finite(),
            EventKind::Scroll { offset } => offset.is_finite(),
            EventKind::Keystroke { interval_ms } => interval_ms.is_finite() && *interval_ms >= 0.0,
        }
    }
}
