use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::error::{ErrorKind, TapResult};
use crate::sink::base::{BatchOrigin, Sink};
use crate::tap_error;
use crate::types::{Record, RunId};

#[derive(Serialize)]
struct OutputLine<'a> {
    run_id: RunId,
    stream: &'a str,
    record: &'a Record,
}

/// [`Sink`] writing each record as one JSON line.
///
/// Lines look like `{"run_id":"…","stream":"orders","record":{…}}`. A batch is written and
/// flushed under a lock, so batches of concurrent runs never interleave.
#[derive(Debug)]
pub struct StdoutSink<W = Stdout> {
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for StdoutSink<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl StdoutSink<Stdout> {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }
}

impl Default for StdoutSink<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdoutSink<W> {
    /// Writes to `writer` instead of standard output.
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Consumes the sink and returns its writer, if no clone is left.
    pub fn into_writer(self) -> Option<W> {
        Arc::into_inner(self.writer).map(Mutex::into_inner)
    }
}

impl<W> Sink for StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(
        &self,
        origin: &BatchOrigin,
        stream: &str,
        records: Vec<Record>,
    ) -> TapResult<()> {
        let mut buffer = Vec::new();
        for record in &records {
            let line = OutputLine {
                run_id: origin.run_id,
                stream,
                record,
            };
            serde_json::to_writer(&mut buffer, &line).map_err(|err| {
                tap_error!(
                    ErrorKind::SerializationError,
                    "Failed to serialize record",
                    err
                )
            })?;
            buffer.push(b'\n');
        }

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&buffer).await?;
            writer.flush().await
        };
        write
            .await
            .map_err(|err| tap_error!(ErrorKind::SinkError, "Failed to write records", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TapId, Value};

    #[tokio::test]
    async fn writes_one_line_per_record() {
        let sink = StdoutSink::with_writer(Vec::<u8>::new());
        let origin = BatchOrigin {
            run_id: RunId::new(),
            tap_id: TapId::new("tap-orders"),
        };

        let mut first = Record::new();
        first.insert("id".to_string(), Value::from(1i64));
        let mut second = Record::new();
        second.insert("id".to_string(), Value::from(2i64));

        sink.deliver(&origin, "orders", vec![first, second])
            .await
            .unwrap();

        let output = String::from_utf8(sink.into_writer().unwrap()).unwrap();
        let lines = output.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["stream"], "orders");
        assert_eq!(parsed["record"]["id"], 2);
        assert_eq!(parsed["run_id"], origin.run_id.to_string());
    }
}
