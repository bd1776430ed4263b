//! Read half for worker stdout.
//!
//! Spawns a background task that reads stdout line by line and forwards every
//! line that decodes as a JSON-RPC response. Everything else a worker prints
//! on stdout (banners, log text, notifications) is dropped here.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::types::RpcReply;
use crate::types::protocol::parse_response_line;

/// Read half for worker stdout.
pub struct ReadHalf<R: AsyncRead + Unpin + Send> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> ReadHalf<R> {
    /// Create a new read half from an AsyncRead.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Consume self and return a channel of `(id, reply)` pairs.
    ///
    /// The channel closes when stdout reaches EOF or fails, which is how the
    /// multiplexer learns that the worker is gone.
    pub fn read_responses(self, server: String) -> mpsc::Receiver<(u64, RpcReply)> {
        let (tx, rx) = mpsc::channel(100);
        let mut reader = self.reader;

        tokio::spawn(async move {
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        // Invalid UTF-8 is noise like any other non-protocol line.
                        let line = String::from_utf8_lossy(&buf);
                        match parse_response_line(&line) {
                            Some(response) => {
                                trace!(server = %server, id = response.0, "[stdout] response");
                                if tx.send(response).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                trace!(server = %server, "[stdout] ignoring non-protocol line: {}", line.trim_end());
                            }
                        }
                    }
                    Err(e) => {
                        debug!(server = %server, "[stdout] read failed: {}", e);
                        break;
                    }
                }
            }
            debug!(server = %server, "[stdout] stream ended");
        });

        rx
    }
}
