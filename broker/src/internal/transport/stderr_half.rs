//! Stderr half for worker stderr.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Stderr half for worker stderr.
///
/// Worker stderr is free-form diagnostic text. It is never parsed, only
/// drained so the child cannot block on a full pipe.
pub struct StderrHalf<R: AsyncRead + Unpin + Send> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> StderrHalf<R> {
    /// Create a new stderr half from an AsyncRead.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Consume self and re-emit every stderr line as a debug log record
    /// tagged with the worker name. Runs until EOF.
    pub fn forward_to_log(self, server: String) -> tokio::task::JoinHandle<usize> {
        let mut reader = self.reader;

        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut count = 0;
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        count += 1;
                        let line = String::from_utf8_lossy(&buf);
                        debug!(server = %server, "[stderr] {}", line.trim_end());
                    }
                    Err(e) => {
                        debug!(server = %server, "[stderr] read failed: {}", e);
                        break;
                    }
                }
            }
            count
        })
    }
}
