//! Delays measured on the tick clock.
//!
//! One [`Delay`] type, two ways of waiting, picked by what it is built on:
//!
//! - `Delay<TickClock>` ([`BusyDelay`]) spins on the clock. Nothing else runs
//!   in the meantime, which is fine when there is only one thing to do.
//! - `Delay<Kernel>` ([`TaskDelay`]) blocks the calling task and lets the
//!   scheduler run something else until the deadline.
//!
//! Both compute `deadline = now + ticks` with saturating addition and return
//! only once `now >= deadline`. A zero-length delay returns immediately.

use embedded_hal::delay::DelayNs;

use crate::kernel::Kernel;
use crate::kernel::clock::{Tick, TickClock};
use crate::kernel::port::Port;

/// Something that can wait for the clock to reach a deadline.
pub trait WaitUntil {
    fn clock(&self) -> &TickClock;

    /// Returns once `clock().now() >= deadline`.
    fn wait_until(&self, deadline: Tick);
}

impl WaitUntil for TickClock {
    fn clock(&self) -> &TickClock {
        self
    }

    fn wait_until(&self, deadline: Tick) {
        while self.now() < deadline {
            core::hint::spin_loop();
        }
    }
}

impl<P: Port, const N: usize> WaitUntil for Kernel<'_, P, N> {
    fn clock(&self) -> &TickClock {
        Kernel::clock(self)
    }

    fn wait_until(&self, deadline: Tick) {
        self.sleep_until(deadline);
    }
}

/// `DelayNs` provider on top of a [`WaitUntil`].
pub struct Delay<'w, W: ?Sized> {
    waiter: &'w W,
}

/// Spins on the clock.
pub type BusyDelay<'c> = Delay<'c, TickClock>;

/// Blocks the calling task.
pub type TaskDelay<'k, 'c, P, const N: usize> = Delay<'k, Kernel<'c, P, N>>;

impl<'w, W: WaitUntil + ?Sized> Delay<'w, W> {
    pub const fn new(waiter: &'w W) -> Self {
        Self { waiter }
    }

    /// Waits for at least `ticks` ticks.
    pub fn delay_ticks(&mut self, ticks: Tick) {
        if ticks == 0 {
            return;
        }
        let deadline = self.waiter.clock().deadline_after(ticks);
        self.waiter.wait_until(deadline);
    }
}

impl<W: WaitUntil + ?Sized> DelayNs for Delay<'_, W> {
    fn delay_ns(&mut self, ns: u32) {
        let ticks = self.waiter.clock().ns_to_ticks(ns);
        self.delay_ticks(ticks);
    }

    fn delay_us(&mut self, us: u32) {
        let ticks = self.waiter.clock().us_to_ticks(us);
        self.delay_ticks(ticks);
    }

    fn delay_ms(&mut self, ms: u32) {
        let ticks = self.waiter.clock().ms_to_ticks(ms);
        self.delay_ticks(ticks);
    }
}
