//! QDM core: a bounded pool of download agents working a priority queue of
//! resumable HTTP(S) transfers, with per-task progress events and
//! completion signals for the embedding host.

pub mod config;
pub mod logging;

pub mod error;
pub mod event;
pub mod manager;
pub mod storage;
pub mod task;
pub mod transport;

mod agent;
mod pool;
mod queue;
mod speed;

#[cfg(test)]
mod test_util;

pub use config::QdmConfig;
pub use error::DownloadError;
pub use event::{ChannelSink, DownloadEvent, EventSink, UserData};
pub use manager::{DownloadManager, DEFAULT_PRIORITY};
pub use storage::{LocalStorage, Storage};
pub use task::{TaskInfo, TaskStatus};
pub use transport::{ByteStream, HttpTransport, OpenedStream, Transport};
