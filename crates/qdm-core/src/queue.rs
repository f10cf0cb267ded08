//! Priority queue of pending download tasks.
//!
//! Tasks are keyed by a process-unique, monotonically increasing serial id
//! and ordered by (priority desc, submission order asc). Removal by id or
//! tag uses lazy deletion: the heap entry stays behind and is skipped when
//! it surfaces.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;

use crate::error::DownloadError;
use crate::event::UserData;

/// A task waiting for an agent.
#[derive(Clone)]
pub(crate) struct QueuedTask {
    pub serial_id: u64,
    pub path: PathBuf,
    pub uri: String,
    pub tag: Option<String>,
    pub priority: i32,
    pub user_data: Option<UserData>,
}

/// Heap key: higher priority first, then lower serial id (FIFO among equal
/// priority).
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    priority: i32,
    serial_id: u64,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.serial_id.cmp(&self.serial_id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending tasks, ordered for dispatch.
pub(crate) struct TaskQueue {
    next_serial: u64,
    heap: BinaryHeap<HeapEntry>,
    waiting: HashMap<u64, QueuedTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            next_serial: 1,
            heap: BinaryHeap::new(),
            waiting: HashMap::new(),
        }
    }

    /// Allocate a fresh serial id and insert a waiting task.
    ///
    /// Fails with `InvalidArgument` when the path or uri is empty; serial
    /// ids are only consumed by successful submissions.
    pub fn enqueue(
        &mut self,
        path: PathBuf,
        uri: String,
        tag: Option<String>,
        priority: i32,
        user_data: Option<UserData>,
    ) -> Result<u64, DownloadError> {
        if path.as_os_str().is_empty() {
            return Err(DownloadError::InvalidArgument(
                "download path is empty".into(),
            ));
        }
        if uri.is_empty() {
            return Err(DownloadError::InvalidArgument(
                "download uri is empty".into(),
            ));
        }

        let serial_id = self.next_serial;
        self.next_serial += 1;

        self.heap.push(HeapEntry {
            priority,
            serial_id,
        });
        self.waiting.insert(
            serial_id,
            QueuedTask {
                serial_id,
                path,
                uri,
                tag,
                priority,
                user_data,
            },
        );
        Ok(serial_id)
    }

    /// Remove and return the highest-priority waiting task.
    pub fn dequeue_next(&mut self) -> Option<QueuedTask> {
        while let Some(entry) = self.heap.pop() {
            // Stale entries (removed by id/tag) are skipped here.
            if let Some(task) = self.waiting.remove(&entry.serial_id) {
                return Some(task);
            }
        }
        None
    }

    /// Remove a waiting task; returns whether it was present.
    pub fn remove_by_id(&mut self, serial_id: u64) -> bool {
        self.waiting.remove(&serial_id).is_some()
    }

    /// Remove all waiting tasks with the given tag; returns their serial ids.
    pub fn remove_by_tag(&mut self, tag: &str) -> Vec<u64> {
        let serials: Vec<u64> = self
            .waiting
            .values()
            .filter(|t| t.tag.as_deref() == Some(tag))
            .map(|t| t.serial_id)
            .collect();
        for serial in &serials {
            self.waiting.remove(serial);
        }
        serials
    }

    /// Remove every waiting task; returns their serial ids.
    pub fn remove_all(&mut self) -> Vec<u64> {
        self.heap.clear();
        self.waiting.drain().map(|(serial, _)| serial).collect()
    }

    pub fn get(&self, serial_id: u64) -> Option<&QueuedTask> {
        self.waiting.get(&serial_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedTask> {
        self.waiting.values()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
