use std::time::Duration;

use tokio::time::Instant;

use crate::types::Record;

/// Records waiting to be delivered, grouped by stream.
///
/// Streams keep the order in which they were first seen and records keep the order in which
/// the tap emitted them.
#[derive(Debug, Default)]
pub struct RecordBatcher {
    streams: Vec<(String, Vec<Record>)>,
    len: usize,
    first_pending_at: Option<Instant>,
}

impl RecordBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stream: String, record: Record) {
        if self.first_pending_at.is_none() {
            self.first_pending_at = Some(Instant::now());
        }

        match self.streams.iter_mut().find(|(name, _)| *name == stream) {
            Some((_, records)) => records.push(record),
            None => self.streams.push((stream, vec![record])),
        }

        self.len += 1;
    }

    /// Total number of pending records across streams.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self, max_size: usize) -> bool {
        self.len >= max_size
    }

    /// Instant at which pending records have waited `max_fill`, `None` when nothing is pending.
    pub fn deadline(&self, max_fill: Duration) -> Option<Instant> {
        self.first_pending_at.map(|at| at + max_fill)
    }

    /// Takes every pending batch, leaving the batcher empty.
    pub fn drain(&mut self) -> Vec<(String, Vec<Record>)> {
        self.len = 0;
        self.first_pending_at = None;
        std::mem::take(&mut self.streams)
    }

    /// Drops every pending record, returning how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.len;
        self.drain();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn record(id: i64) -> Record {
        Record::from([("id".to_string(), Value::from(id))])
    }

    #[test]
    fn groups_by_stream_in_first_seen_order() {
        let mut batcher = RecordBatcher::new();
        batcher.push("orders".to_string(), record(1));
        batcher.push("customers".to_string(), record(10));
        batcher.push("orders".to_string(), record(2));

        assert_eq!(batcher.len(), 3);
        assert!(batcher.is_full(3));
        assert!(!batcher.is_full(4));

        let batches = batcher.drain();
        assert_eq!(
            batches,
            vec![
                ("orders".to_string(), vec![record(1), record(2)]),
                ("customers".to_string(), vec![record(10)]),
            ]
        );
        assert!(batcher.is_empty());
        assert_eq!(batcher.deadline(Duration::from_secs(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_follows_the_first_pending_record() {
        let mut batcher = RecordBatcher::new();
        assert_eq!(batcher.deadline(Duration::from_millis(100)), None);

        let start = Instant::now();
        batcher.push("orders".to_string(), record(1));
        tokio::time::advance(Duration::from_millis(40)).await;
        batcher.push("orders".to_string(), record(2));

        assert_eq!(
            batcher.deadline(Duration::from_millis(100)),
            Some(start + Duration::from_millis(100))
        );
        assert_eq!(batcher.discard(), 2);
        assert_eq!(batcher.deadline(Duration::from_millis(100)), None);
    }
}
