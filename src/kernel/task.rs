//! Task identity and control block.

use crate::kernel::clock::Tick;

/// Entry point of a task. Tasks never return; a task that is done calls
/// [`Kernel::exit`](crate::kernel::Kernel::exit).
pub type TaskEntry = fn() -> !;

/// Stable handle to a task: a slot in the task table plus the generation the
/// slot was in when the task was created.
///
/// Deleting a task bumps its slot's generation, so a handle to a deleted task
/// never refers to whatever later reuses the slot. A slot whose generation
/// would wrap is retired instead of reused.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId {
    index: u8,
    generation: u16,
}

impl TaskId {
    pub(crate) const fn new(index: usize, generation: u16) -> Self {
        Self {
            index: index as u8,
            generation,
        }
    }

    /// Slot in the task table.
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    pub const fn generation(&self) -> u16 {
        self.generation
    }
}

/// Scheduling priority. Higher runs first.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Priority(pub u8);

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    Ready,
    Running,
    /// Waiting for the clock to reach `Tcb::wake_at`.
    Blocked,
    /// Terminated. A deleted task's slot is free; this state is only ever
    /// observed through a stale handle.
    Deleted,
}

/// Task control block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tcb {
    pub name: &'static str,
    pub priority: Priority,
    pub state: TaskState,
    /// Meaningful only while `Blocked`.
    pub wake_at: Tick,
    /// Position among equal-priority peers; smaller runs first.
    pub arrival: u64,
    /// Saved stack pointer while the task is switched out.
    pub sp: usize,
}

impl Tcb {
    pub const fn new(name: &'static str, priority: Priority, arrival: u64, sp: usize) -> Self {
        Self {
            name,
            priority,
            state: TaskState::Ready,
            wake_at: 0,
            arrival,
            sp,
        }
    }

    pub const fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }
}
