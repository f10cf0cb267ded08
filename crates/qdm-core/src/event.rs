//! Download notifications and the sink they are delivered through.
//!
//! The manager emits exactly four event kinds. Per task the observed
//! sequence is `Started`, zero or more `Updated`, then exactly one of
//! `Succeeded` / `Failed`; nothing is delivered after the terminal event.
//! Broadcast to arbitrary listeners is the host's business — the engine
//! only talks to one injected [`EventSink`].

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Opaque caller payload attached at submission and echoed back in every
/// event for that task.
#[derive(Clone)]
pub struct UserData(Arc<dyn Any + Send + Sync>);

impl UserData {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the payload back as its concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserData(..)")
    }
}

/// One download notification.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// The response was accepted and the transfer begins. `current_length`
    /// is the resume offset (0 for a fresh download).
    Started {
        serial_id: u64,
        path: PathBuf,
        uri: String,
        current_length: u64,
        user_data: Option<UserData>,
    },
    /// A flush happened; `current_length` is the cumulative byte count.
    Updated {
        serial_id: u64,
        path: PathBuf,
        uri: String,
        current_length: u64,
        user_data: Option<UserData>,
    },
    /// The transfer completed; `final_length` is the full on-disk size.
    Succeeded {
        serial_id: u64,
        path: PathBuf,
        uri: String,
        final_length: u64,
        user_data: Option<UserData>,
    },
    /// The transfer failed (transport, timeout, disk, or cancellation).
    /// The partial file is retained for a future resume.
    Failed {
        serial_id: u64,
        path: PathBuf,
        uri: String,
        current_length: u64,
        error: String,
        user_data: Option<UserData>,
    },
}

impl DownloadEvent {
    /// Serial id of the task this event belongs to.
    pub fn serial_id(&self) -> u64 {
        match self {
            DownloadEvent::Started { serial_id, .. }
            | DownloadEvent::Updated { serial_id, .. }
            | DownloadEvent::Succeeded { serial_id, .. }
            | DownloadEvent::Failed { serial_id, .. } => *serial_id,
        }
    }

    /// True for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Succeeded { .. } | DownloadEvent::Failed { .. }
        )
    }
}

/// Destination for download notifications.
///
/// `emit` is called from the manager's dispatch and completion paths while
/// internal state is locked, so implementations must return promptly and
/// must not call back into the manager synchronously. Handing the event to
/// a channel (see [`ChannelSink`]) satisfies both.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DownloadEvent);
}

/// Sink that forwards every event into an unbounded tokio channel.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelSink {
    /// Create a sink plus the receiving end the host consumes.
    pub fn new() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<DownloadEvent>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DownloadEvent) {
        // A dropped receiver means the host stopped listening; that is not
        // the engine's problem.
        let _ = self.tx.send(event);
    }
}
