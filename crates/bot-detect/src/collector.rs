use std::collections::VecDeque;

use crate::events::Event;

/// Bounded, append-only event buffer owned by one session.
///
/// Beyond `capacity` the oldest events are evicted. Events that are not
/// well formed, or whose timestamp precedes the last recorded one, are
/// rejected so the buffer stays ordered.
#[derive(Debug, Clone)]
pub struct EventCollector {
    buffer: VecDeque<Event>,
    capacity: usize,
    evicted: u64,
    rejected: u64,
}

/// Outcome of appending a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub evicted: usize,
}

impl EventCollector {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
            rejected: 0,
        }
    }

    pub fn record(&mut self, event: Event) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();

        let in_order = self
            .buffer
            .back()
            .map_or(true, |last| event.timestamp_ms >= last.timestamp_ms);
        if !event.is_well_formed() || !in_order {
            self.rejected += 1;
            outcome.rejected = 1;
            return outcome;
        }

        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
            self.evicted += 1;
            outcome.evicted = 1;
        }
        self.buffer.push_back(event);
        outcome.accepted = 1;
        outcome
    }

    pub fn record_all<I>(&mut self, events: I) -> RecordOutcome
    where
        I: IntoIterator<Item = Event>,
    {
        events
            .into_iter()
            .fold(RecordOutcome::default(), |mut total, event| {
                let one = self.record(event);
                total.accepted += one.accepted;
                total.rejected += one.rejected;
                total.evicted += one.evicted;
                total
            })
    }

    pub fn events(&self) -> &VecDeque<Event> {
        &self.buffer
    }

    /// Contiguous copy of the buffer in recorded order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_evicted(&self) -> u64 {
        self.evicted
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut collector = EventCollector::new(3);
        let outcome = collector.record_all((0..5).map(|i| Event::scroll(i as f64, i as f64 * 10.0)));

        assert_eq!(outcome.accepted, 5);
        assert_eq!(outcome.evicted, 2);
        assert_eq!(collector.len(), 3);
        assert_eq!(collector.events()[0].timestamp_ms, 2.0);
        assert_eq!(collector.total_evicted(), 2);
    }

    #[test]
    fn rejects_out_of_order_and_malformed() {
        let mut collector = EventCollector::new(10);
        collector.record(Event::pointer(100.0, 1.0, 1.0));

        let outcome = collector.record_all(vec![
            Event::pointer(50.0, 2.0, 2.0),
            Event::pointer(f64::NAN, 2.0, 2.0),
            Event::pointer(100.0, 3.0, 3.0),
        ]);

        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.rejected, 2);
        assert_eq!(collector.len(), 2);
        assert_eq!(collector.total_rejected(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut collector = EventCollector::new(0);
        collector.record(Event::scroll(1.0, 1.0));
        collector.record(Event::scroll(2.0, 2.0));
        assert_eq!(collector.capacity(), 1);
        assert_eq!(collector.snapshot(), vec![Event::scroll(2.0, 2.0)]);
    }
}
