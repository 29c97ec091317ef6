use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Downstream Graphite plaintext client.
///
/// Opens a fresh connection for every flush and closes it after the write;
/// no pooling. The whole connect + write sequence is bounded by a deadline
/// so a stalled downstream cannot block the core past a flush period.
#[derive(Debug, Clone)]
pub struct GraphiteClient {
    addr: String,
}

impl GraphiteClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Writes one flush payload, failing if `deadline` elapses first.
    pub async fn send(&self, payload: &[u8], deadline: Duration) -> Result<()> {
        tokio::time::timeout(deadline, self.write_payload(payload))
            .await
            .with_context(|| format!("graphite write to {} timed out", self.addr))?
    }

    async fn write_payload(&self, payload: &[u8]) -> Result<()> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("dialing graphite at {}", self.addr))?;

        stream
            .write_all(payload)
            .await
            .context("writing stats payload")?;

        stream
            .shutdown()
            .await
            .context("closing graphite connection")?;

        Ok(())
    }
}
