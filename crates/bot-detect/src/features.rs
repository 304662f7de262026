//! Reduction of a session's event buffer into a [`FeatureVector`].
//!
//! Every statistic is `None` ("unknown") when its signal has too few events.
//! Unknown features contribute nothing to the risk score; they are never
//! coerced to zero.

use botsense_common::FeatureConfig;
use serde::Serialize;

use crate::events::{Event, EventKind};

/// Read-only numeric summary of one session's interactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureVector {
    pub event_count: usize,
    pub pointer_events: usize,
    pub scroll_events: usize,
    pub keystroke_events: usize,
    /// Span between the earliest and latest buffered event.
    pub interaction_duration_ms: Option<f64>,
    /// Direction of travel between consecutive pointer samples, in radians.
    pub pointer_angle_mean: Option<f64>,
    pub pointer_angle_stddev: Option<f64>,
    /// Mean scroll speed in pixels per millisecond.
    pub scroll_speed_mean: Option<f64>,
    /// Largest relative change between two consecutive scroll speeds, in
    /// `[0, 1]`. Near zero means the page scrolled at a constant rate.
    pub scroll_speed_max_delta: Option<f64>,
    pub keystroke_interval_mean_ms: Option<f64>,
    pub keystroke_interval_stddev_ms: Option<f64>,
}

/// Pure, deterministic feature extraction.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn extract<'a, I>(&self, events: I) -> FeatureVector
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut first_ts: Option<f64> = None;
        let mut last_ts: Option<f64> = None;
        let mut event_count = 0usize;
        let mut points: Vec<(f64, f64)> = Vec::new();
        let mut scrolls: Vec<(f64, f64)> = Vec::new();
        let mut intervals: Vec<f64> = Vec::new();

        for event in events {
            event_count += 1;
            first_ts = Some(first_ts.map_or(event.timestamp_ms, |t| t.min(event.timestamp_ms)));
            last_ts = Some(last_ts.map_or(event.timestamp_ms, |t| t.max(event.timestamp_ms)));

            match &event.kind {
                EventKind::Timing { .. } => {}
                EventKind::PointerMove { x, y } => points.push((*x, *y)),
                EventKind::Scroll { offset } => scrolls.push((event.timestamp_ms, *offset)),
                EventKind::Keystroke { interval_ms } => intervals.push(*interval_ms),
            }
        }

        let mut features = FeatureVector {
            event_count,
            pointer_events: points.len(),
            scroll_events: scrolls.len(),
            keystroke_events: intervals.len(),
            ..FeatureVector::default()
        };

        if event_count >= self.config.min_timing_events.max(2) {
            if let (Some(first), Some(last)) = (first_ts, last_ts) {
                features.interaction_duration_ms = finite(last - first);
            }
        }

        if points.len() >= self.config.min_pointer_events.max(2) {
            let angles: Vec<f64> = points
                .windows(2)
                .map(|pair| {
                    let (x0, y0) = pair[0];
                    let (x1, y1) = pair[1];
                    (y1 - y0).atan2(x1 - x0)
                })
                .collect();
            if let Some((mean, stddev)) = mean_and_stddev(&angles) {
                features.pointer_angle_mean = Some(mean);
                features.pointer_angle_stddev = Some(stddev);
            }
        }

        if scrolls.len() >= self.config.min_scroll_events.max(3) {
            let speeds: Vec<f64> = scrolls
                .windows(2)
                .filter_map(|pair| {
                    let (t0, o0) = pair[0];
                    let (t1, o1) = pair[1];
                    let dt = t1 - t0;
                    (dt > 0.0).then(|| (o1 - o0).abs() / dt)
                })
                .collect();
            if speeds.len() >= 2 {
                let max_delta = speeds
                    .windows(2)
                    .map(|pair| relative_change(pair[0], pair[1]))
                    .fold(0.0_f64, f64::max);
                features.scroll_speed_mean = mean_and_stddev(&speeds).map(|(mean, _)| mean);
                features.scroll_speed_max_delta = finite(max_delta);
            }
        }

        if intervals.len() >= self.config.min_keystroke_events.max(2) {
            if let Some((mean, stddev)) = mean_and_stddev(&intervals) {
                features.keystroke_interval_mean_ms = Some(mean);
                features.keystroke_interval_stddev_ms = Some(stddev);
            }
        }

        features
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Mean and population standard deviation (divides by N).
fn mean_and_stddev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((finite(mean)?, finite(variance.sqrt())?))
}

/// |b - a| relative to the larger magnitude; 0 when both are 0.
fn relative_change(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (b - a).abs() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(FeatureConfig::default())
    }

    #[test]
    fn empty_buffer_is_all_unknown() {
        let features = extractor().extract(&Vec::<Event>::new());
        assert_eq!(features.event_count, 0);
        assert_eq!(features.interaction_duration_ms, None);
        assert_eq!(features.pointer_angle_stddev, None);
        assert_eq!(features.scroll_speed_max_delta, None);
        assert_eq!(features.keystroke_interval_mean_ms, None);
    }

    #[test]
    fn single_pointer_event_is_unknown_not_zero() {
        let events = vec![Event::timing(0.0, "page_load"), Event::pointer(5.0, 1.0, 1.0)];
        let features = extractor().extract(&events);
        assert_eq!(features.pointer_events, 1);
        assert_eq!(features.pointer_angle_mean, None);
        assert_eq!(features.pointer_angle_stddev, None);
        assert_eq!(features.interaction_duration_ms, Some(5.0));
    }

    #[test]
    fn straight_line_has_zero_angle_spread() {
        let events: Vec<Event> = (0..5)
            .map(|i| Event::pointer(i as f64 * 10.0, i as f64, i as f64))
            .collect();
        let features = extractor().extract(&events);
        let mean = features.pointer_angle_mean.unwrap();
        assert!((mean - FRAC_PI_4).abs() < 1e-12);
        assert_eq!(features.pointer_angle_stddev, Some(0.0));
    }

    #[test]
    fn angle_stddev_is_population() {
        // Right, then up: angles 0 and pi/2, population stddev pi/4.
        let events = vec![
            Event::pointer(0.0, 0.0, 0.0),
            Event::pointer(1.0, 1.0, 0.0),
            Event::pointer(2.0, 1.0, 1.0),
        ];
        let features = extractor().extract(&events);
        let stddev = features.pointer_angle_stddev.unwrap();
        assert!((stddev - FRAC_PI_4).abs() < 1e-12);
    }

    #[test]
    fn constant_scroll_has_zero_delta() {
        let events: Vec<Event> = (0..4)
            .map(|i| Event::scroll(i as f64 * 100.0, i as f64 * 50.0))
            .collect();
        let features = extractor().extract(&events);
        assert_eq!(features.scroll_speed_mean, Some(0.5));
        assert_eq!(features.scroll_speed_max_delta, Some(0.0));
    }

    #[test]
    fn uneven_scroll_has_large_delta() {
        let events = vec![
            Event::scroll(0.0, 0.0),
            Event::scroll(100.0, 100.0),
            Event::scroll(200.0, 120.0),
        ];
        let features = extractor().extract(&events);
        // Speeds 1.0 then 0.2.
        assert!((features.scroll_speed_max_delta.unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn two_scrolls_are_not_enough() {
        let events = vec![Event::scroll(0.0, 0.0), Event::scroll(10.0, 10.0)];
        assert_eq!(extractor().extract(&events).scroll_speed_max_delta, None);
    }

    #[test]
    fn keystroke_statistics() {
        let events = vec![
            Event::keystroke(0.0, 100.0),
            Event::keystroke(200.0, 200.0),
            Event::keystroke(500.0, 300.0),
        ];
        let features = extractor().extract(&events);
        assert_eq!(features.keystroke_interval_mean_ms, Some(200.0));
        let stddev = features.keystroke_interval_stddev_ms.unwrap();
        assert!((stddev - (20_000.0_f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn extraction_is_idempotent() {
        let events = vec![
            Event::timing(0.0, "page_load"),
            Event::pointer(10.0, 3.0, 4.0),
            Event::pointer(20.0, 8.0, 1.0),
            Event::scroll(30.0, 0.0),
            Event::scroll(60.0, 90.0),
            Event::scroll(90.0, 200.0),
            Event::keystroke(120.0, 130.0),
            Event::keystroke(260.0, 140.0),
        ];
        let extractor = extractor();
        assert_eq!(extractor.extract(&events), extractor.extract(&events));
    }

    #[test]
    fn minimum_counts_are_configurable() {
        let extractor = FeatureExtractor::new(FeatureConfig {
            min_keystroke_events: 4,
            ..FeatureConfig::default()
        });
        let events: Vec<Event> = (0..3).map(|i| Event::keystroke(i as f64, 50.0)).collect();
        assert_eq!(extractor.extract(&events).keystroke_interval_mean_ms, None);
    }
}
