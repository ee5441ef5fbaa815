//! One-directional byte pump
//!
//! A pump reads at most one chunk from its source, and does not read again
//! until that chunk has been fully written and flushed to the destination.
//! A slow destination therefore stalls the source instead of growing a
//! buffer. End-of-stream on the source is forwarded as a write shutdown on
//! the destination, leaving the opposite direction untouched.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::common::types::Side;

/// Bytes moved so far in each direction of a pair
#[derive(Debug, Default)]
pub struct PairCounters {
    pub to_upstream: AtomicU64,
    pub to_client: AtomicU64,
}

impl PairCounters {
    /// Counter for bytes read from `from`
    pub fn from_side(&self, from: Side) -> &AtomicU64 {
        match from {
            Side::Client => &self.to_upstream,
            Side::Upstream => &self.to_client,
        }
    }

    pub fn total(&self) -> u64 {
        self.to_upstream.load(Ordering::Relaxed) + self.to_client.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

pub struct Pump<R, W> {
    from: Side,
    reader: R,
    writer: W,
    buf: Box<[u8]>,
    counters: Arc<PairCounters>,
}

impl<R, W> Pump<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Pump bytes read on side `from` into the opposite side's writer
    pub fn new(from: Side, reader: R, writer: W, chunk_size: usize) -> Self {
        Self {
            from,
            reader,
            writer,
            buf: vec![0u8; chunk_size.max(1)].into_boxed_slice(),
            counters: Arc::default(),
        }
    }

    pub fn with_counters(mut self, counters: Arc<PairCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Run until the source reaches end-of-stream (Ok, bytes moved) or an
    /// I/O error occurs on either end.
    pub async fn run(mut self) -> Result<u64, PumpError> {
        let mut total = 0u64;

        loop {
            let n = self.reader.read(&mut self.buf).await.map_err(PumpError::Read)?;
            if n == 0 {
                break;
            }

            self.writer
                .write_all(&self.buf[..n])
                .await
                .map_err(PumpError::Write)?;
            self.writer.flush().await.map_err(PumpError::Write)?;

            total += n as u64;
            self.counters
                .from_side(self.from)
                .fetch_add(n as u64, Ordering::Relaxed);
            trace!(from = %self.from, bytes = n, "Forwarded chunk");
        }

        // 相手側がすでに切断済みならshutdownの失敗は無視する
        match self.writer.shutdown().await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(PumpError::Write(e)),
        }

        trace!(from = %self.from, total, "End of stream");
        Ok(total)
    }
}
