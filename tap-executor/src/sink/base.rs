use std::future::Future;

use crate::error::TapResult;
use crate::types::{Record, RunId, TapId};

/// The run a batch of records was extracted by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOrigin {
    pub run_id: RunId,
    pub tap_id: TapId,
}

/// Destination of validated records.
///
/// A batch holds records of a single stream in the order the tap emitted them. A delivery
/// either succeeds as a whole or fails; failures of kind [`crate::error::ErrorKind::SinkError`]
/// are retried by the coordinator, so implementations should make a failed delivery leave no
/// partial batch behind when they can.
pub trait Sink {
    fn deliver(
        &self,
        origin: &BatchOrigin,
        stream: &str,
        records: Vec<Record>,
    ) -> impl Future<Output = TapResult<()>> + Send;
}
