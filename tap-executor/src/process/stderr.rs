use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Keeps the last `capacity` bytes written by a process to stderr.
#[derive(Debug)]
pub struct StderrTail {
    bytes: VecDeque<u8>,
    capacity: usize,
    truncated: bool,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity.min(READ_CHUNK_BYTES)),
            capacity,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            self.truncated |= !chunk.is_empty();
            return;
        }

        let chunk = if chunk.len() > self.capacity {
            self.truncated = true;
            &chunk[chunk.len() - self.capacity..]
        } else {
            chunk
        };

        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.truncated = true;
            self.bytes.drain(..overflow);
        }
        self.bytes.extend(chunk);
    }

    /// Reads `reader` to its end, keeping the tail in `tail`.
    ///
    /// The tail is updated after every chunk, so it stays readable when the drain is aborted.
    /// Read errors end the capture; whatever was collected is kept.
    pub async fn drain<R>(tail: Arc<Mutex<StderrTail>>, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(read) => tail.lock().await.push(&chunk[..read]),
            }
        }
    }

    /// Returns the captured text, prefixed with `…` when earlier output was dropped.
    pub fn render(&self) -> String {
        let (front, back) = self.bytes.as_slices();
        let mut bytes = Vec::with_capacity(front.len() + back.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);

        let text = String::from_utf8_lossy(&bytes).into_owned();
        if self.truncated {
            format!("…{text}")
        } else {
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_tail() {
        let mut tail = StderrTail::new(8);
        tail.push(b"0123");
        tail.push(b"456789");

        assert_eq!(tail.render(), "…23456789");
    }

    #[test]
    fn short_output_is_kept_verbatim() {
        let mut tail = StderrTail::new(64);
        tail.push(b"INFO starting\n");

        assert_eq!(tail.render(), "INFO starting\n");
    }

    #[tokio::test]
    async fn drains_a_reader() {
        let tail = Arc::new(Mutex::new(StderrTail::new(5)));
        StderrTail::drain(tail.clone(), &b"a long stderr output"[..]).await;

        assert_eq!(tail.lock().await.render(), "…utput");
    }
}
