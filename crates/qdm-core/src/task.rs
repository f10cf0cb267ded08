//! Task status and read-only task snapshots.

use std::path::PathBuf;

use crate::event::UserData;

/// Lifecycle state of a download task.
///
/// Terminal states are transient: a task that succeeded or failed is removed
/// from the manager in the same step, so snapshots only ever observe
/// `Waiting` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Enqueued, not yet assigned to an agent.
    Waiting,
    /// Assigned to an agent; the transfer is in progress.
    Running,
    /// Finished with a Success event.
    Succeeded,
    /// Finished with a Failure event.
    Failed,
}

/// Point-in-time copy of one task's externally visible state.
///
/// Returned by the info queries; holds no live references into the manager,
/// so callers cannot corrupt internal state through it.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub serial_id: u64,
    pub tag: Option<String>,
    pub priority: i32,
    pub status: TaskStatus,
    pub download_path: PathBuf,
    pub download_uri: String,
    pub current_length: u64,
    pub user_data: Option<UserData>,
}
