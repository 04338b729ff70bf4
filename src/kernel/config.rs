//! Kernel configuration.
//!
//! Capacities are compile time (the task table and the stack pool are
//! statically sized); the scheduling quantum is a runtime [`Config`].

/// SysTick rate. One tick per millisecond.
pub const DEFAULT_TICK_HZ: u32 = 1_000;

/// Round-robin quantum, in ticks.
pub const DEFAULT_TIME_SLICE_TICKS: u32 = 1;

/// Words of stack given to every task slot (1 KiB).
pub const STACK_WORDS: usize = 256;

/// Words of stack for the internal idle context. Idle only sleeps, but the
/// stack still has to hold a full exception frame plus the saved registers.
pub const IDLE_STACK_WORDS: usize = 64;

/// Written to the lowest word of every stack and checked on each context
/// switch.
pub const STACK_CANARY: u32 = 0xC0DE_5AFE;

/// Runtime kernel settings.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Ticks a task may run before yielding to an equal-priority peer.
    /// Zero is treated as one.
    pub time_slice_ticks: u32,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            time_slice_ticks: DEFAULT_TIME_SLICE_TICKS,
        }
    }

    /// Sets the round-robin quantum.
    pub const fn time_slice(mut self, ticks: u32) -> Self {
        self.time_slice_ticks = ticks;
        self
    }

    pub(crate) const fn slice(&self) -> u32 {
        if self.time_slice_ticks == 0 {
            1
        } else {
            self.time_slice_ticks
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
