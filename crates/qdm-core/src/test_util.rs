//! In-memory doubles for deterministic engine tests: a scripted transport,
//! a shared map-backed storage, and recording observers/sinks.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::agent::TransferObserver;
use crate::error::DownloadError;
use crate::event::{DownloadEvent, EventSink};
use crate::storage::Storage;
use crate::transport::{OpenedStream, Transport};

/// One scripted element of a response body.
#[derive(Clone)]
pub(crate) enum ScriptStep {
    /// Yield this chunk.
    Chunk(Vec<u8>),
    /// Yield a transport error.
    Fail(String),
    /// Never yield again (provokes the stall timeout).
    Stall,
}

/// Transport that replays a fixed script for every `open` call.
#[derive(Clone)]
pub(crate) struct ScriptedTransport {
    steps: Arc<Vec<ScriptStep>>,
    ignore_range: bool,
    fail_open: Option<String>,
    chunk_delay: Option<Duration>,
    last_offset: Arc<Mutex<Option<u64>>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Arc::new(steps),
            ignore_range: false,
            fail_open: None,
            chunk_delay: None,
            last_offset: Arc::new(Mutex::new(None)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer ranged requests with the full body from offset 0.
    pub fn ignore_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    /// Fail every `open` call with a transport error.
    pub fn fail_open(mut self, message: &str) -> Self {
        self.fail_open = Some(message.to_string());
        self
    }

    /// Sleep before yielding each chunk, keeping transfers observable.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Offset requested by the most recent `open` call.
    pub fn last_offset(&self) -> Option<u64> {
        *self.last_offset.lock().unwrap()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _uri: &str, start_offset: u64) -> Result<OpenedStream, DownloadError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        *self.last_offset.lock().unwrap() = Some(start_offset);
        if let Some(message) = &self.fail_open {
            return Err(DownloadError::Transport(message.clone()));
        }

        let steps: VecDeque<ScriptStep> = self.steps.as_ref().clone().into();
        let delay = self.chunk_delay;
        let stream = futures_util::stream::unfold(steps, move |mut steps| async move {
            let step = steps.pop_front()?;
            match step {
                ScriptStep::Chunk(data) => {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    Some((Ok(Bytes::from(data)), steps))
                }
                ScriptStep::Fail(message) => {
                    Some((Err(DownloadError::Transport(message)), steps))
                }
                ScriptStep::Stall => {
                    futures_util::future::pending::<()>().await;
                    None
                }
            }
        })
        .boxed();

        Ok(OpenedStream {
            start_offset: if self.ignore_range { 0 } else { start_offset },
            stream,
        })
    }
}

/// Map-backed storage that records every append's size.
#[derive(Clone)]
pub(crate) struct SharedStorage {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    writes: Arc<Mutex<Vec<(PathBuf, usize)>>>,
    fail_appends: Arc<AtomicBool>,
}

impl SharedStorage {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_appends: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pre-populate a partial file.
    pub fn seed(&self, path: &Path, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(path.to_path_buf(), bytes);
    }

    pub fn contents(&self, path: &Path) -> Vec<u8> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Sizes of the appends issued against `path`, in order.
    pub fn writes(&self, path: &Path) -> Vec<usize> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, n)| *n)
            .collect()
    }

    /// Make every subsequent append fail with a disk error.
    pub fn fail_appends(self) -> Self {
        self.fail_appends.store(true, Ordering::Relaxed);
        self
    }
}

#[async_trait]
impl Storage for SharedStorage {
    async fn existing_len(&self, path: &Path) -> Result<u64, DownloadError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| f.len() as u64)
            .unwrap_or(0))
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(DownloadError::Disk(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )));
        }
        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), bytes.len()));
        self.files
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    async fn truncate(&self, path: &Path) -> Result<(), DownloadError> {
        self.files.lock().unwrap().insert(path.to_path_buf(), Vec::new());
        Ok(())
    }
}

/// Observer that records callbacks and can start refusing after a number
/// of flushes.
pub(crate) struct RecordingObserver {
    started: Mutex<Vec<(u64, u64)>>,
    flushes: Mutex<Vec<(u64, u64)>>,
    bytes: AtomicU64,
    deny_after: Option<usize>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            flushes: Mutex::new(Vec::new()),
            bytes: AtomicU64::new(0),
            deny_after: None,
        }
    }

    /// Allow `count` flushes, then report the task as removed.
    pub fn deny_after(mut self, count: usize) -> Self {
        self.deny_after = Some(count);
        self
    }

    pub fn started(&self) -> Vec<(u64, u64)> {
        self.started.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> Vec<(u64, u64)> {
        self.flushes.lock().unwrap().clone()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl TransferObserver for RecordingObserver {
    fn on_started(&self, serial_id: u64, offset: u64) -> bool {
        self.started.lock().unwrap().push((serial_id, offset));
        true
    }

    fn on_flush(&self, serial_id: u64, current_length: u64) -> bool {
        let mut flushes = self.flushes.lock().unwrap();
        flushes.push((serial_id, current_length));
        match self.deny_after {
            Some(limit) => flushes.len() <= limit,
            None => true,
        }
    }

    fn on_bytes(&self, count: u64) {
        self.bytes.fetch_add(count, Ordering::Relaxed);
    }
}

/// Sink that appends every event to a shared vector.
#[derive(Clone)]
pub(crate) struct CollectingSink {
    events: Arc<Mutex<Vec<DownloadEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<DownloadEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events for one serial id, in emission order.
    pub fn events_for(&self, serial_id: u64) -> Vec<DownloadEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.serial_id() == serial_id)
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: DownloadEvent) {
        self.events.lock().unwrap().push(event);
    }
}
