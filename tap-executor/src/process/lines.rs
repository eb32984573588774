use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::process::base::TapLine;
use crate::protocol::{DecodeError, DecodeReason};

/// Bytes of an oversized line kept for error reports.
const OVERSIZED_LINE_PREFIX_BYTES: usize = 256;

/// Splits a byte stream into lines of bounded length.
///
/// Lines longer than `max_line_bytes` are consumed entirely but only reported as a
/// [`DecodeReason::LineTooLong`] error, so one huge line never grows memory beyond the limit.
/// [`LineReader::next_line`] is cancel safe: partial lines are kept in the reader.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
    /// Length of the current line once it went over the limit, 0 otherwise.
    oversized_length: usize,
    max_line_bytes: usize,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            oversized_length: 0,
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Returns the next line without its terminator, `None` at end of input.
    ///
    /// A final line without a trailing newline is still returned.
    pub async fn next_line(&mut self) -> std::io::Result<Option<TapLine>> {
        loop {
            let available = self.reader.fill_buf().await?;

            if available.is_empty() {
                if self.buffer.is_empty() && self.oversized_length == 0 {
                    return Ok(None);
                }

                return Ok(Some(self.take_line()));
            }

            let (consumed, complete) = match available.iter().position(|byte| *byte == b'\n') {
                Some(index) => {
                    append(
                        &mut self.buffer,
                        &mut self.oversized_length,
                        self.max_line_bytes,
                        &available[..index],
                    );
                    (index + 1, true)
                }
                None => {
                    append(
                        &mut self.buffer,
                        &mut self.oversized_length,
                        self.max_line_bytes,
                        available,
                    );
                    (available.len(), false)
                }
            };
            self.reader.consume(consumed);

            if complete {
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> TapLine {
        let mut bytes = std::mem::take(&mut self.buffer);

        if self.oversized_length > 0 {
            let length = std::mem::take(&mut self.oversized_length);
            return Err(DecodeError::new(
                DecodeReason::LineTooLong {
                    length,
                    limit: self.max_line_bytes,
                },
                String::from_utf8_lossy(&bytes),
            ));
        }

        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }

        String::from_utf8(bytes).map_err(|err| {
            DecodeError::new(
                DecodeReason::InvalidUtf8,
                String::from_utf8_lossy(err.as_bytes()),
            )
        })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn append(buffer: &mut Vec<u8>, oversized_length: &mut usize, limit: usize, chunk: &[u8]) {
    if *oversized_length > 0 {
        *oversized_length += chunk.len();
        return;
    }

    let length = buffer.len() + chunk.len();
    if length <= limit {
        buffer.extend_from_slice(chunk);
        return;
    }

    // Keep a prefix for the error report and only count the rest.
    *oversized_length = length;
    let room = OVERSIZED_LINE_PREFIX_BYTES.saturating_sub(buffer.len());
    buffer.extend_from_slice(&chunk[..room.min(chunk.len())]);
    buffer.truncate(OVERSIZED_LINE_PREFIX_BYTES);
}

#[cfg(test)]
mod tests {
    use tokio::io::BufReader;

    use super::*;

    async fn collect(input: &'static [u8], max_line_bytes: usize) -> Vec<TapLine> {
        // A tiny buffer makes lines span several reads.
        let mut reader = LineReader::new(BufReader::with_capacity(4, input), max_line_bytes);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn splits_lines_across_reads() {
        let lines = collect(b"first line\r\nsecond\n\nlast without newline", 1024).await;

        assert_eq!(
            lines,
            vec![
                Ok("first line".to_string()),
                Ok("second".to_string()),
                Ok(String::new()),
                Ok("last without newline".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn oversized_lines_are_reported_and_skipped() {
        let lines = collect(b"short\nthis line is too long\nok\n", 10).await;

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Ok("short".to_string()));
        let err = lines[1].clone().unwrap_err();
        assert_eq!(
            err.reason,
            DecodeReason::LineTooLong {
                length: 21,
                limit: 10
            }
        );
        assert_eq!(lines[2], Ok("ok".to_string()));
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_decode_error() {
        let lines = collect(b"\xff\xfe\n{}\n", 1024).await;

        assert_eq!(lines[0].clone().unwrap_err().reason, DecodeReason::InvalidUtf8);
        assert_eq!(lines[1], Ok("{}".to_string()));
    }

    #[tokio::test]
    async fn empty_input_has_no_lines() {
        assert!(collect(b"", 16).await.is_empty());
    }
}
