//! The seam between the kernel and the CPU.
//!
//! A port knows how to lay out a fresh task context on a stack, how to ask
//! for a context switch and how to stop the machine. The kernel never touches
//! registers itself.

use crate::error::FatalError;
use crate::kernel::task::TaskEntry;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod armv7m;

pub trait Port {
    /// Writes an initial context for `entry` at the top of `stack` and
    /// returns the stack pointer the switch code should restore from.
    fn init_stack(&self, stack: &mut [u32], entry: TaskEntry) -> usize;

    /// Requests a context switch. From an interrupt it happens when the
    /// interrupt returns; from thread mode it happens before this returns.
    fn pend_switch(&self);

    /// Hands the port the kernel its switch exception should call into.
    /// Called once, right before the first switch is pended.
    fn install(&self, kernel: &'static dyn ContextSwitch);

    /// Body of the idle context.
    fn idle() -> !;

    /// Stops the machine after a fatal error.
    fn halt(&self, error: FatalError) -> !;
}

/// Called by the port's switch exception with the stack pointer of the
/// context being switched out (its callee-saved registers already pushed);
/// returns the stack pointer of the context to switch in.
pub trait ContextSwitch: Sync {
    fn switch_context(&self, saved_sp: usize) -> usize;
}
