//! The download manager: the one place that couples the task queue and the
//! agent pool.
//!
//! Submissions enqueue and return immediately. Dispatch runs whenever a
//! task is enqueued, an agent frees, or the global pause is lifted, and
//! assigns the highest-priority waiting task to a free agent until one of
//! the two runs out. Each assignment is executed by
//! [`agent::run_transfer`] in its own tokio task; queue/pool mutations and
//! event emission happen under a single mutex held only for brief state
//! transitions, never across network or disk I/O.
//!
//! Per task, callers observe Started, zero or more Updated, then exactly
//! one terminal event. Removing a running task synchronously emits the
//! cancellation Failure and guarantees nothing further for that serial id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::agent::{self, TransferContext, TransferObserver, TransferSettings};
use crate::config::QdmConfig;
use crate::error::DownloadError;
use crate::event::{DownloadEvent, EventSink, UserData};
use crate::pool::AgentPool;
use crate::queue::{QueuedTask, TaskQueue};
use crate::speed::SpeedMeter;
use crate::storage::{LocalStorage, Storage};
use crate::task::{TaskInfo, TaskStatus};
use crate::transport::{HttpTransport, Transport};


/// Priority assigned by [`DownloadManager::submit_simple`].
pub const DEFAULT_PRIORITY: i32 = 0;

/// Handle to the download engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    sink: Box<dyn EventSink>,
    state: Mutex<State>,
    completions: Mutex<HashMap<u64, Completion>>,
    paused: AtomicBool,
    timeout_millis: AtomicU64,
    flush_size: AtomicUsize,
    resume: bool,
    /// Bytes received across all agents, ever. Feeds the speed sampler.
    transferred: AtomicU64,
    speed_bps: AtomicU64,
}

struct State {
    queue: TaskQueue,
    pool: AgentPool,
    running: HashMap<u64, RunningTask>,
}

/// Authoritative record of one assigned task.
struct RunningTask {
    agent_index: usize,
    path: PathBuf,
    uri: String,
    tag: Option<String>,
    priority: i32,
    user_data: Option<UserData>,
    current: Arc<AtomicU64>,
    abort: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Single-resolution completion signal, inserted at submission, resolved by
/// the terminal handler, removed on resolution.
struct Completion {
    tx: Option<oneshot::Sender<bool>>,
    rx: Option<oneshot::Receiver<bool>>,
}

impl Completion {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

impl State {
    /// Pop the next waiting task together with a free agent, or nothing.
    fn next_assignment(&mut self) -> Option<(QueuedTask, usize)> {
        if self.pool.free() == 0 {
            return None;
        }
        let task = self.queue.dequeue_next()?;
        // A free agent exists; this lock has been held since the check.
        let agent_index = self.pool.acquire_free(task.serial_id)?;
        debug_assert_eq!(self.pool.assignment(agent_index), Some(task.serial_id));
        Some((task, agent_index))
    }
}

impl DownloadManager {
    /// Create a manager over explicit transport/storage/sink seams.
    ///
    /// Must be called within a tokio runtime: transfers and the speed
    /// sampler are spawned tasks.
    pub fn new(
        config: &QdmConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            storage,
            sink,
            state: Mutex::new(State {
                queue: TaskQueue::new(),
                pool: AgentPool::new(config.agent_count),
                running: HashMap::new(),
            }),
            completions: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
            timeout_millis: AtomicU64::new(config.timeout().as_millis() as u64),
            flush_size: AtomicUsize::new(config.flush_size),
            resume: config.resume,
            transferred: AtomicU64::new(0),
            speed_bps: AtomicU64::new(0),
        });

        Inner::spawn_speed_sampler(&inner, config.speed_sample());
        tracing::info!(agents = config.agent_count, "download manager initialized");
        Self { inner }
    }

    /// Create a manager with the default HTTP transport and local storage.
    pub fn with_defaults(config: &QdmConfig, sink: Box<dyn EventSink>) -> Result<Self, DownloadError> {
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Self::new(config, transport, Arc::new(LocalStorage), sink))
    }

    /// Queue a download. Returns the new task's serial id immediately; the
    /// transfer starts when an agent is free and the manager is not paused.
    pub fn submit(
        &self,
        path: impl Into<PathBuf>,
        uri: impl Into<String>,
        tag: Option<String>,
        priority: i32,
        user_data: Option<UserData>,
    ) -> Result<u64, DownloadError> {
        let serial_id = {
            let mut st = self.inner.state.lock().unwrap();
            st.queue
                .enqueue(path.into(), uri.into(), tag, priority, user_data)?
        };
        self.inner
            .completions
            .lock()
            .unwrap()
            .insert(serial_id, Completion::new());
        tracing::debug!(serial_id, "download submitted");
        Inner::dispatch(&self.inner);
        Ok(serial_id)
    }

    /// `submit` with no tag, default priority, and no user data.
    pub fn submit_simple(
        &self,
        path: impl Into<PathBuf>,
        uri: impl Into<String>,
    ) -> Result<u64, DownloadError> {
        self.submit(path, uri, None, DEFAULT_PRIORITY, None)
    }

    /// Remove a task by serial id, aborting it when already running.
    /// Returns whether a task was removed.
    pub fn remove_by_id(&self, serial_id: u64) -> bool {
        let removed_running = {
            let mut st = self.inner.state.lock().unwrap();
            if st.queue.remove_by_id(serial_id) {
                Some(false)
            } else if let Some(task) = st.running.remove(&serial_id) {
                self.inner.cancel_running(&mut st, serial_id, task);
                Some(true)
            } else {
                None
            }
        };
        match removed_running {
            None => false,
            Some(false) => {
                // Never started: no events, and the completion handle just
                // goes away.
                self.inner.drop_completion(serial_id);
                true
            }
            Some(true) => {
                self.inner.resolve_completion(serial_id, false);
                Inner::dispatch(&self.inner);
                true
            }
        }
    }

    /// Remove every task carrying `tag`, aborting running ones. Returns the
    /// number of tasks removed.
    pub fn remove_by_tag(&self, tag: &str) -> usize {
        let (waiting, cancelled) = {
            let mut st = self.inner.state.lock().unwrap();
            let waiting = st.queue.remove_by_tag(tag);
            let matches: Vec<u64> = st
                .running
                .iter()
                .filter(|(_, task)| task.tag.as_deref() == Some(tag))
                .map(|(serial, _)| *serial)
                .collect();
            for serial in &matches {
                if let Some(task) = st.running.remove(serial) {
                    self.inner.cancel_running(&mut st, *serial, task);
                }
            }
            (waiting, matches)
        };
        Inner::settle_removals(&self.inner, &waiting, &cancelled);
        waiting.len() + cancelled.len()
    }

    /// Remove every task, aborting running ones. Returns the number removed.
    pub fn remove_all(&self) -> usize {
        let (waiting, cancelled) = {
            let mut st = self.inner.state.lock().unwrap();
            let waiting = st.queue.remove_all();
            let serials: Vec<u64> = st.running.keys().copied().collect();
            for serial in &serials {
                if let Some(task) = st.running.remove(serial) {
                    self.inner.cancel_running(&mut st, *serial, task);
                }
            }
            (waiting, serials)
        };
        Inner::settle_removals(&self.inner, &waiting, &cancelled);
        waiting.len() + cancelled.len()
    }

    /// Snapshot of one task, or `None` when it is not live.
    pub fn info(&self, serial_id: u64) -> Option<TaskInfo> {
        let st = self.inner.state.lock().unwrap();
        if let Some(task) = st.queue.get(serial_id) {
            return Some(waiting_info(task));
        }
        st.running
            .get(&serial_id)
            .map(|task| running_info(serial_id, task))
    }

    /// Snapshots of every live task carrying `tag`.
    pub fn infos_by_tag(&self, tag: &str) -> Vec<TaskInfo> {
        let st = self.inner.state.lock().unwrap();
        let mut infos: Vec<TaskInfo> = st
            .queue
            .iter()
            .filter(|t| t.tag.as_deref() == Some(tag))
            .map(waiting_info)
            .chain(
                st.running
                    .iter()
                    .filter(|(_, t)| t.tag.as_deref() == Some(tag))
                    .map(|(serial, t)| running_info(*serial, t)),
            )
            .collect();
        infos.sort_by_key(|info| info.serial_id);
        infos
    }

    /// Snapshots of every live task.
    pub fn all_infos(&self) -> Vec<TaskInfo> {
        let st = self.inner.state.lock().unwrap();
        let mut infos: Vec<TaskInfo> = st
            .queue
            .iter()
            .map(waiting_info)
            .chain(
                st.running
                    .iter()
                    .map(|(serial, t)| running_info(*serial, t)),
            )
            .collect();
        infos.sort_by_key(|info| info.serial_id);
        infos
    }

    /// Resolves once the task's terminal event fires: `Some(true)` on
    /// success, `Some(false)` on failure (including cancellation). `None`
    /// for unknown serial ids, tasks removed while still waiting, and
    /// tasks whose completion was already consumed.
    pub async fn await_completion(&self, serial_id: u64) -> Option<bool> {
        let rx = {
            self.inner
                .completions
                .lock()
                .unwrap()
                .get_mut(&serial_id)
                .and_then(|completion| completion.rx.take())
        }?;
        rx.await.ok()
    }

    /// While paused, dispatch assigns no new work; in-flight transfers
    /// continue uninterrupted.
    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::Relaxed);
        tracing::debug!(paused, "pause flag changed");
        if !paused {
            Inner::dispatch(&self.inner);
        }
    }

    /// Stall timeout applied to subsequently dispatched agents.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.inner
            .timeout_millis
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Flush threshold applied to subsequently dispatched agents.
    pub fn flush_size(&self) -> usize {
        self.inner.flush_size()
    }

    pub fn set_flush_size(&self, flush_size: usize) {
        self.inner.flush_size.store(flush_size, Ordering::Relaxed);
    }

    /// Aggregate bytes/sec across transferring agents over the sampling
    /// window; 0 when nothing is transferring.
    pub fn current_speed(&self) -> u64 {
        self.inner.speed_bps.load(Ordering::Relaxed)
    }

    pub fn total_agents(&self) -> usize {
        self.inner.state.lock().unwrap().pool.total()
    }

    pub fn free_agents(&self) -> usize {
        self.inner.state.lock().unwrap().pool.free()
    }

    pub fn working_agents(&self) -> usize {
        self.inner.state.lock().unwrap().pool.working()
    }

    pub fn waiting_tasks(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }
}

impl Inner {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis.load(Ordering::Relaxed))
    }

    fn flush_size(&self) -> usize {
        self.flush_size.load(Ordering::Relaxed)
    }

    /// Assign waiting tasks to free agents until either runs out.
    fn dispatch(inner: &Arc<Inner>) {
        loop {
            if inner.paused.load(Ordering::Relaxed) {
                return;
            }

            let assignment = {
                let mut st = inner.state.lock().unwrap();
                match st.next_assignment() {
                    None => return,
                    Some((task, agent_index)) => {
                        let current = Arc::new(AtomicU64::new(0));
                        let abort = Arc::new(AtomicBool::new(false));
                        st.running.insert(
                            task.serial_id,
                            RunningTask {
                                agent_index,
                                path: task.path.clone(),
                                uri: task.uri.clone(),
                                tag: task.tag.clone(),
                                priority: task.priority,
                                user_data: task.user_data.clone(),
                                current: Arc::clone(&current),
                                abort: Arc::clone(&abort),
                                handle: None,
                            },
                        );
                        (task, agent_index, current, abort)
                    }
                }
            };
            let (task, agent_index, current, abort) = assignment;
            let serial_id = task.serial_id;
            tracing::debug!(serial_id, agent = agent_index, "task assigned");

            let ctx = TransferContext {
                serial_id,
                path: task.path,
                uri: task.uri,
                settings: TransferSettings {
                    resume: inner.resume,
                    timeout: inner.timeout(),
                    flush_size: inner.flush_size(),
                },
                current,
                abort,
            };

            let worker = Arc::clone(inner);
            let handle = tokio::spawn(async move {
                let transport = Arc::clone(&worker.transport);
                let storage = Arc::clone(&worker.storage);
                let outcome =
                    agent::run_transfer(transport.as_ref(), storage.as_ref(), worker.as_ref(), &ctx)
                        .await;
                Inner::finish(&worker, ctx.serial_id, outcome);
            });

            // Register the handle unless a removal won the race meanwhile.
            let mut st = inner.state.lock().unwrap();
            match st.running.get_mut(&serial_id) {
                Some(task) => task.handle = Some(handle),
                None => handle.abort(),
            }
        }
    }

    /// Terminal handler for a transfer that ran to an outcome on its own.
    fn finish(inner: &Arc<Inner>, serial_id: u64, outcome: Result<u64, DownloadError>) {
        let succeeded = {
            let mut st = inner.state.lock().unwrap();
            let Some(task) = st.running.remove(&serial_id) else {
                // A removal already emitted this task's terminal event.
                return;
            };
            st.pool.release(task.agent_index);
            match outcome {
                Ok(final_length) => {
                    tracing::info!(serial_id, final_length, "download succeeded");
                    inner.sink.emit(DownloadEvent::Succeeded {
                        serial_id,
                        path: task.path,
                        uri: task.uri,
                        final_length,
                        user_data: task.user_data,
                    });
                    true
                }
                Err(err) => {
                    tracing::warn!(
                        serial_id,
                        path = %task.path.display(),
                        uri = %task.uri,
                        error = %err,
                        "download failed"
                    );
                    inner.sink.emit(DownloadEvent::Failed {
                        serial_id,
                        path: task.path,
                        uri: task.uri,
                        current_length: task.current.load(Ordering::Relaxed),
                        error: err.to_string(),
                        user_data: task.user_data,
                    });
                    false
                }
            }
        };
        inner.resolve_completion(serial_id, succeeded);
        Inner::dispatch(inner);
    }

    /// Abort a running task and emit its cancellation Failure. Called with
    /// the task already removed from `running`, under the state lock, so no
    /// Update or Success can follow.
    fn cancel_running(&self, st: &mut State, serial_id: u64, task: RunningTask) {
        task.abort.store(true, Ordering::Relaxed);
        if let Some(handle) = &task.handle {
            handle.abort();
        }
        st.pool.release(task.agent_index);
        tracing::info!(serial_id, "download cancelled");
        self.sink.emit(DownloadEvent::Failed {
            serial_id,
            path: task.path,
            uri: task.uri,
            current_length: task.current.load(Ordering::Relaxed),
            error: DownloadError::Cancelled.to_string(),
            user_data: task.user_data,
        });
    }

    /// Handle bookkeeping after a bulk removal left the state lock.
    fn settle_removals(inner: &Arc<Inner>, waiting: &[u64], cancelled: &[u64]) {
        for serial in waiting {
            inner.drop_completion(*serial);
        }
        for serial in cancelled {
            inner.resolve_completion(*serial, false);
        }
        if !cancelled.is_empty() {
            Inner::dispatch(inner);
        }
    }

    fn resolve_completion(&self, serial_id: u64, succeeded: bool) {
        let tx = {
            self.completions
                .lock()
                .unwrap()
                .remove(&serial_id)
                .and_then(|mut completion| completion.tx.take())
        };
        if let Some(tx) = tx {
            // A dropped receiver just means nobody was waiting.
            let _ = tx.send(succeeded);
        }
    }

    fn drop_completion(&self, serial_id: u64) {
        self.completions.lock().unwrap().remove(&serial_id);
    }

    fn spawn_speed_sampler(inner: &Arc<Inner>, window: Duration) {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut meter = SpeedMeter::new();
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let total = inner.transferred.load(Ordering::Relaxed);
                let transferring = inner.state.lock().unwrap().pool.working();
                let bps = if transferring == 0 {
                    meter.reset(total);
                    0
                } else {
                    meter.sample(total, window)
                };
                inner.speed_bps.store(bps, Ordering::Relaxed);
            }
        });
    }
}

impl TransferObserver for Inner {
    fn on_started(&self, serial_id: u64, offset: u64) -> bool {
        let st = self.state.lock().unwrap();
        let Some(task) = st.running.get(&serial_id) else {
            return false;
        };
        self.sink.emit(DownloadEvent::Started {
            serial_id,
            path: task.path.clone(),
            uri: task.uri.clone(),
            current_length: offset,
            user_data: task.user_data.clone(),
        });
        true
    }

    fn on_flush(&self, serial_id: u64, current_length: u64) -> bool {
        let st = self.state.lock().unwrap();
        let Some(task) = st.running.get(&serial_id) else {
            return false;
        };
        self.sink.emit(DownloadEvent::Updated {
            serial_id,
            path: task.path.clone(),
            uri: task.uri.clone(),
            current_length,
            user_data: task.user_data.clone(),
        });
        true
    }

    fn on_bytes(&self, count: u64) {
        self.transferred.fetch_add(count, Ordering::Relaxed);
    }
}

fn waiting_info(task: &QueuedTask) -> TaskInfo {
    TaskInfo {
        serial_id: task.serial_id,
        tag: task.tag.clone(),
        priority: task.priority,
        status: TaskStatus::Waiting,
        download_path: task.path.clone(),
        download_uri: task.uri.clone(),
        current_length: 0,
        user_data: task.user_data.clone(),
    }
}

fn running_info(serial_id: u64, task: &RunningTask) -> TaskInfo {
    TaskInfo {
        serial_id,
        tag: task.tag.clone(),
        priority: task.priority,
        status: TaskStatus::Running,
        download_path: task.path.clone(),
        download_uri: task.uri.clone(),
        current_length: task.current.load(Ordering::Relaxed),
        user_data: task.user_data.clone(),
    }
}
