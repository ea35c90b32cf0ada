use agentos_core::{Task, TaskId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Position of a task in the queue: higher priority first, then earlier
/// submission sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// Pending tasks ordered by priority, FIFO among equal priorities.
///
/// Ties are broken by a monotonically increasing submission sequence rather
/// than the wall-clock timestamp, which can collide.
pub struct PendingQueue {
    entries: BTreeMap<QueueKey, Task>,
    index: HashMap<TaskId, QueueKey>,
    next_seq: u64,
}

impl PendingQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Add a task behind every queued task of the same priority.
    /// Returns its sequence number.
    pub fn push(&mut self, task: Task) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert(seq, task);
        seq
    }

    /// Put a task back at the position given by its original sequence.
    pub fn restore(&mut self, seq: u64, task: Task) {
        self.insert(seq, task);
    }

    fn insert(&mut self, seq: u64, task: Task) {
        let key = QueueKey {
            priority: Reverse(task.priority),
            seq,
        };
        if let Some(old) = self.index.insert(task.id, key) {
            self.entries.remove(&old);
        }
        self.entries.insert(key, task);
    }

    /// Remove and return the next task to run, with its sequence number.
    pub fn pop(&mut self) -> Option<(u64, Task)> {
        let (key, task) = self.entries.pop_first()?;
        self.index.remove(&task.id);
        Some((key.seq, task))
    }

    /// The next task to run, without removing it.
    pub fn peek(&self) -> Option<&Task> {
        self.entries.values().next()
    }

    /// Remove a specific task.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let key = self.index.remove(&id)?;
        self.entries.remove(&key)
    }

    /// Whether task `id` is queued.
    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued task ids in run order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.values().map(|t| t.id).collect()
    }

    /// Remove every task, in run order.
    pub fn drain(&mut self) -> Vec<Task> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
