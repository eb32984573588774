use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TapResult;
use crate::sink::base::{BatchOrigin, Sink};
use crate::types::{Record, RunId};

/// A batch received by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredBatch {
    pub origin: BatchOrigin,
    pub stream: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Default)]
struct Inner {
    batches: Vec<DeliveredBatch>,
}

/// [`Sink`] keeping every delivered batch in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all delivered batches, in delivery order.
    pub async fn batches(&self) -> Vec<DeliveredBatch> {
        let inner = self.inner.lock().await;
        inner.batches.clone()
    }

    /// Returns the delivered records of `stream`, in delivery order.
    pub async fn records(&self, stream: &str) -> Vec<Record> {
        let inner = self.inner.lock().await;
        inner
            .batches
            .iter()
            .filter(|batch| batch.stream == stream)
            .flat_map(|batch| batch.records.iter().cloned())
            .collect()
    }

    /// Returns the number of records delivered by a run.
    pub async fn record_count(&self, run_id: RunId) -> usize {
        let inner = self.inner.lock().await;
        inner
            .batches
            .iter()
            .filter(|batch| batch.origin.run_id == run_id)
            .map(|batch| batch.records.len())
            .sum()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.batches.clear();
    }
}

impl Sink for MemorySink {
    async fn deliver(
        &self,
        origin: &BatchOrigin,
        stream: &str,
        records: Vec<Record>,
    ) -> TapResult<()> {
        let mut inner = self.inner.lock().await;
        debug!(run_id = %origin.run_id, stream, count = records.len(), "storing batch in memory");
        inner.batches.push(DeliveredBatch {
            origin: origin.clone(),
            stream: stream.to_string(),
            records,
        });

        Ok(())
    }
}
