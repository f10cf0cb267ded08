//! The transfer state machine run by one agent.
//!
//! An agent owns exactly one in-flight transfer: it resolves the resume
//! offset, opens a ranged stream, buffers received bytes, and writes them
//! out in `flush_size` slices so the number of disk writes depends on the
//! byte count, not on network chunking. A stall longer than the configured
//! timeout aborts the transfer; so does the shared abort token.
//!
//! The agent never emits events itself — it reports through a
//! [`TransferObserver`] so the manager can order notifications against
//! concurrent removal.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::error::DownloadError;
use crate::storage::Storage;
use crate::transport::Transport;

/// Progress callbacks from an agent into its manager.
///
/// The `bool` returns report whether the task still exists; `false` tells
/// the agent to stop quietly because a removal already emitted the
/// terminal event.
pub(crate) trait TransferObserver: Send + Sync {
    /// The response was accepted; the transfer starts at `offset`.
    fn on_started(&self, serial_id: u64, offset: u64) -> bool;
    /// A flush was written; `current_length` is the cumulative byte count.
    fn on_flush(&self, serial_id: u64, current_length: u64) -> bool;
    /// Bytes arrived off the wire (pre-flush), for throughput sampling.
    fn on_bytes(&self, count: u64);
}

/// Settings snapshotted at dispatch time. Changing the manager's timeout or
/// flush size never retroactively affects an in-flight transfer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransferSettings {
    pub resume: bool,
    pub timeout: Duration,
    pub flush_size: usize,
}

/// Identity and shared state for one assigned transfer.
pub(crate) struct TransferContext {
    pub serial_id: u64,
    pub path: PathBuf,
    pub uri: String,
    pub settings: TransferSettings,
    /// Cumulative byte count, shared with info snapshots.
    pub current: Arc<AtomicU64>,
    /// Set by removal paths; checked once per received chunk.
    pub abort: Arc<AtomicBool>,
}

/// Execute one transfer to completion. Returns the final on-disk length.
///
/// Buffered-but-unflushed bytes are written out on the failure paths too
/// (best effort, errors ignored) so a later resume loses less than one
/// flush window.
pub(crate) async fn run_transfer(
    transport: &dyn Transport,
    storage: &dyn Storage,
    observer: &dyn TransferObserver,
    ctx: &TransferContext,
) -> Result<u64, DownloadError> {
    let mut offset = if ctx.settings.resume {
        storage.existing_len(&ctx.path).await?
    } else {
        storage.truncate(&ctx.path).await?;
        0
    };

    if ctx.abort.load(Ordering::Relaxed) {
        return Err(DownloadError::Cancelled);
    }

    // Requesting.
    let opened = transport.open(&ctx.uri, offset).await?;
    let mut stream = opened.stream;
    if opened.start_offset != offset {
        // The server ignored the range and is sending the full body; the
        // partial prefix would be duplicated if we kept it.
        storage.truncate(&ctx.path).await?;
        offset = opened.start_offset;
    }

    ctx.current.store(offset, Ordering::Relaxed);
    if !observer.on_started(ctx.serial_id, offset) {
        return Err(DownloadError::Cancelled);
    }

    // Transferring.
    let flush_size = ctx.settings.flush_size.max(1);
    let mut buffer: Vec<u8> = Vec::with_capacity(flush_size);
    let mut cursor = offset;

    loop {
        let next = tokio::time::timeout(ctx.settings.timeout, stream.next()).await;
        let chunk = match next {
            Err(_) => {
                flush_remainder(storage, ctx, &mut buffer).await;
                return Err(DownloadError::Timeout(ctx.settings.timeout));
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                flush_remainder(storage, ctx, &mut buffer).await;
                return Err(err);
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        if ctx.abort.load(Ordering::Relaxed) {
            flush_remainder(storage, ctx, &mut buffer).await;
            return Err(DownloadError::Cancelled);
        }

        observer.on_bytes(chunk.len() as u64);
        cursor += chunk.len() as u64;
        ctx.current.store(cursor, Ordering::Relaxed);
        buffer.extend_from_slice(&chunk);

        while buffer.len() >= flush_size {
            storage.append(&ctx.path, &buffer[..flush_size]).await?;
            buffer.drain(..flush_size);
            if !observer.on_flush(ctx.serial_id, cursor) {
                return Err(DownloadError::Cancelled);
            }
        }
    }

    // End of stream: write out whatever is left.
    if !buffer.is_empty() {
        storage.append(&ctx.path, &buffer).await?;
        buffer.clear();
        if !observer.on_flush(ctx.serial_id, cursor) {
            return Err(DownloadError::Cancelled);
        }
    }

    Ok(cursor)
}

async fn flush_remainder(storage: &dyn Storage, ctx: &TransferContext, buffer: &mut Vec<u8>) {
    if !buffer.is_empty() {
        let _ = storage.append(&ctx.path, buffer).await;
        buffer.clear();
    }
}
