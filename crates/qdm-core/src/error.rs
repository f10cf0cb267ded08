//! Error taxonomy for the download engine.
//!
//! Agent-local failures never cross the manager boundary as panics; they are
//! converted into a Failure event carrying this error's message. Only
//! submission-time argument errors are returned to the caller directly.

use std::time::Duration;

/// Error produced by submission validation or by a single transfer.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Rejected synchronously at submission (empty path or uri).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection, DNS, non-success status, or mid-stream transport failure.
    #[error("transport: {0}")]
    Transport(String),

    /// No byte progress observed within the configured window.
    #[error("no progress within {0:?}")]
    Timeout(Duration),

    /// Flush or other file-system failure. The partial file is left intact.
    #[error("disk: {0}")]
    Disk(#[from] std::io::Error),

    /// The task was removed while running.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Wrap any transport-level failure, keeping only its message.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        DownloadError::Transport(err.to_string())
    }
}
