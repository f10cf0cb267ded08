//! Fixed-size pool of download agents.
//!
//! Agents are created once at construction and reused across many tasks.
//! The pool only does bookkeeping; transfers run in the tasks the manager
//! spawns. `total = free + working` holds at every observation point.

/// State of one agent slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Free,
    Working,
}

#[derive(Debug)]
struct AgentSlot {
    state: AgentState,
    /// Serial id of the assigned task; present iff `Working`.
    assigned: Option<u64>,
}

/// Bookkeeping for the fixed set of agents.
pub(crate) struct AgentPool {
    slots: Vec<AgentSlot>,
}

impl AgentPool {
    /// Create a pool with `count` free agents.
    pub fn new(count: usize) -> Self {
        let mut pool = Self { slots: Vec::with_capacity(count) };
        for _ in 0..count {
            pool.add_agent();
        }
        pool
    }

    /// Register one more free agent. Setup only; the pool never shrinks.
    fn add_agent(&mut self) {
        self.slots.push(AgentSlot {
            state: AgentState::Free,
            assigned: None,
        });
    }

    /// Mark a free agent as working on `serial_id` and return its index.
    /// Never blocks; `None` when every agent is busy.
    pub fn acquire_free(&mut self, serial_id: u64) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .position(|s| s.state == AgentState::Free)?;
        self.slots[index].state = AgentState::Working;
        self.slots[index].assigned = Some(serial_id);
        Some(index)
    }

    /// Mark an agent free again, clearing its assignment.
    ///
    /// Releasing an already-free agent is a no-op so that abort paths may
    /// race with natural completion.
    pub fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = AgentState::Free;
            slot.assigned = None;
        }
    }

    /// Serial id of the task assigned to `index`, if it is working.
    pub fn assignment(&self, index: usize) -> Option<u64> {
        self.slots.get(index).and_then(|s| s.assigned)
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn free(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == AgentState::Free)
            .count()
    }

    pub fn working(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == AgentState::Working)
            .count()
    }
}
