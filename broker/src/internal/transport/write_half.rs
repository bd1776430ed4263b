//! Write half for worker stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::types::Result;

/// Write half for worker stdin.
///
/// Writes whole lines and flushes after each one so a request never sits in a
/// buffer while its caller is waiting on the response.
pub struct WriteHalf<W: AsyncWrite + Unpin + Send> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> WriteHalf<W> {
    /// Create a new write half from an AsyncWrite.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write data to stdin and flush.
    pub async fn write(&mut self, data: &str) -> Result<()> {
        self.writer.write_all(data.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
