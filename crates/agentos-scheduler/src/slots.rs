use agentos_core::{AgentosError, AgentosResult, TaskId};
use serde::{Deserialize, Serialize};

/// Identifier of an execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub usize);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// A unit of execution capacity. Holds at most one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    /// Position in the pool.
    pub id: SlotId,
    /// Task holding the slot, if any.
    pub task: Option<TaskId>,
}

impl Slot {
    /// Whether a task holds the slot.
    pub fn is_busy(&self) -> bool {
        self.task.is_some()
    }
}

/// Fixed-size pool of slots.
pub struct SlotPool {
    slots: Vec<Slot>,
}

impl SlotPool {
    /// Pool of `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|i| Slot {
                    id: SlotId(i),
                    task: None,
                })
                .collect(),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots without a task.
    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_busy()).count()
    }

    /// Slots holding a task.
    pub fn busy_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// Bind `task` to the lowest-numbered free slot.
    ///
    /// Returns `None` when every slot is busy or the task already holds one.
    pub fn acquire(&mut self, task: TaskId) -> Option<SlotId> {
        if self.slot_of(task).is_some() {
            return None;
        }
        let slot = self.slots.iter_mut().find(|s| !s.is_busy())?;
        slot.task = Some(task);
        Some(slot.id)
    }

    /// Free a busy slot, returning the task it held.
    pub fn release(&mut self, id: SlotId) -> AgentosResult<TaskId> {
        self.slots
            .get_mut(id.0)
            .and_then(|slot| slot.task.take())
            .ok_or_else(|| AgentosError::NotFound(format!("{id} is not assigned")))
    }

    /// Task holding slot `id`.
    pub fn holder(&self, id: SlotId) -> Option<TaskId> {
        self.slots.get(id.0).and_then(|s| s.task)
    }

    /// Slot held by `task`.
    pub fn slot_of(&self, task: TaskId) -> Option<SlotId> {
        self.slots
            .iter()
            .find(|s| s.task == Some(task))
            .map(|s| s.id)
    }

    /// Every slot, in id order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}
