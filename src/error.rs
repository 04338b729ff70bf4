//! Common error definitions.

use crate::kernel::task::TaskId;

/// Alias for Result<T, Error>.
pub type Result<T> = core::result::Result<T, Error>;

/// Collection of all errors the kernel can report.
///
/// Only [`Error::ResourceExhausted`] and [`Error::NoSuchTask`] are ever handed
/// back to a caller. [`Error::Fatal`] exists so fatal conditions can be named
/// and logged; the kernel halts instead of returning one.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Every task slot (and so every task stack) is in use.
    ResourceExhausted,
    /// The handle is stale or was never issued by this kernel.
    NoSuchTask,
    /// Scheduler state can no longer be trusted.
    Fatal(FatalError),
}

/// Unrecoverable conditions. The policy is halt-and-spin.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalError {
    /// A task's saved stack pointer left its stack, or the guard word at the
    /// bottom of the stack was overwritten.
    StackOverflow {
        /// `None` for the idle context.
        task: Option<TaskId>,
    },
    /// The context being switched out does not match what the scheduler
    /// believes is running.
    ContextCorrupted,
}

impl From<FatalError> for Error {
    fn from(error: FatalError) -> Self {
        Self::Fatal(error)
    }
}
