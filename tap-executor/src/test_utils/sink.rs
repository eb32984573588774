use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::error::{ErrorKind, TapResult};
use crate::sink::{BatchOrigin, Sink};
use crate::tap_error;
use crate::types::Record;

#[derive(Debug, Default)]
struct Faults {
    delivery_failures: u32,
    delivery_failure_kind: Option<ErrorKind>,
    delay: Option<Duration>,
    attempts: u64,
    delivered_records: u64,
    record_notifiers: Vec<(u64, Arc<Notify>)>,
}

/// [`Sink`] wrapper failing or delaying deliveries before forwarding them.
#[derive(Debug, Clone)]
pub struct FaultySink<K> {
    inner: K,
    faults: Arc<Mutex<Faults>>,
}

impl<K> FaultySink<K> {
    pub fn wrap(inner: K) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    pub fn inner(&self) -> &K {
        &self.inner
    }

    /// Makes the next `count` deliveries fail with `kind`.
    pub async fn fail_next_deliveries(&self, count: u32, kind: ErrorKind) {
        let mut faults = self.faults.lock().await;
        faults.delivery_failures = count;
        faults.delivery_failure_kind = Some(kind);
    }

    /// Delays every delivery by `delay`.
    pub async fn delay_deliveries(&self, delay: Duration) {
        let mut faults = self.faults.lock().await;
        faults.delay = Some(delay);
    }

    /// Number of delivery attempts, failed ones included.
    pub async fn attempts(&self) -> u64 {
        self.faults.lock().await.attempts
    }

    /// Returns a notification fired once `count` records have been delivered.
    pub async fn notify_on_records(&self, count: u64) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        let mut faults = self.faults.lock().await;

        if faults.delivered_records >= count {
            notify.notify_one();
        } else {
            faults.record_notifiers.push((count, notify.clone()));
        }

        notify
    }
}

impl<K> Sink for FaultySink<K>
where
    K: Sink + Send + Sync,
{
    async fn deliver(
        &self,
        origin: &BatchOrigin,
        stream: &str,
        records: Vec<Record>,
    ) -> TapResult<()> {
        let delay = {
            let mut faults = self.faults.lock().await;
            faults.attempts += 1;

            if faults.delivery_failures > 0 {
                faults.delivery_failures -= 1;
                let kind = faults.delivery_failure_kind.unwrap_or(ErrorKind::SinkError);
                return Err(tap_error!(kind, "Injected delivery failure"));
            }

            faults.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let count = records.len() as u64;
        self.inner.deliver(origin, stream, records).await?;

        let mut faults = self.faults.lock().await;
        faults.delivered_records += count;
        let delivered = faults.delivered_records;
        faults.record_notifiers.retain(|(count, notify)| {
            let reached = delivered >= *count;
            if reached {
                notify.notify_one();
            }
            !reached
        });

        Ok(())
    }
}
