//! Monotonic tick counter.
//!
//! The count is 64 bits wide so it cannot wrap within the life of the device
//! (at 1 kHz that is over 500 million years). ARMv7-M has no 64-bit atomics,
//! so the count is kept as two 32-bit halves plus a carry sequence:
//!
//! - the writer ([`TickClock::increment`]) runs only in the timer interrupt
//!   and is never interleaved with itself. A plain increment touches only the
//!   low half. A carry makes `carry` odd, updates both halves, then makes it
//!   even again.
//! - readers ([`TickClock::now`]) read `carry`, both halves and `carry`
//!   again, and retry if a carry was in progress or happened in between.

use core::sync::atomic::{AtomicU32, Ordering};

/// A tick count.
pub type Tick = u64;

/// Monotonic tick counter plus the rate it is driven at.
pub struct TickClock {
    /// Odd while a carry into `hi` is being written.
    carry: AtomicU32,
    hi: AtomicU32,
    lo: AtomicU32,
    tick_hz: u32,
}

impl TickClock {
    /// A clock at tick zero, incremented `tick_hz` times per second.
    pub const fn new(tick_hz: u32) -> Self {
        Self::starting_at(tick_hz, 0)
    }

    /// A clock that starts at an arbitrary count. Used to exercise the carry
    /// between the two halves.
    pub const fn starting_at(tick_hz: u32, start: Tick) -> Self {
        Self {
            carry: AtomicU32::new(0),
            hi: AtomicU32::new((start >> 32) as u32),
            lo: AtomicU32::new(start as u32),
            tick_hz,
        }
    }

    /// Advances the count by exactly one.
    ///
    /// Call only from the timer interrupt (or from the kernel's tick hook,
    /// which runs there).
    #[inline]
    pub fn increment(&self) {
        let lo = self.lo.load(Ordering::Relaxed).wrapping_add(1);
        if lo != 0 {
            self.lo.store(lo, Ordering::SeqCst);
            return;
        }

        let carry = self.carry.load(Ordering::Relaxed);
        self.carry.store(carry.wrapping_add(1), Ordering::SeqCst);
        let hi = self.hi.load(Ordering::Relaxed).wrapping_add(1);
        self.hi.store(hi, Ordering::SeqCst);
        self.lo.store(0, Ordering::SeqCst);
        self.carry.store(carry.wrapping_add(2), Ordering::SeqCst);
    }

    /// Current count. Never blocks, callable from any context.
    #[inline]
    pub fn now(&self) -> Tick {
        loop {
            let carry = self.carry.load(Ordering::SeqCst);
            let hi = self.hi.load(Ordering::SeqCst);
            let lo = self.lo.load(Ordering::SeqCst);
            if carry & 1 == 0 && self.carry.load(Ordering::SeqCst) == carry {
                return ((hi as u64) << 32) | lo as u64;
            }
            core::hint::spin_loop();
        }
    }

    /// Rate the clock is driven at.
    pub const fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    /// Ticks covering at least `ms` milliseconds.
    pub fn ms_to_ticks(&self, ms: u32) -> Tick {
        ceil_ticks(ms as u64, self.tick_hz, 1_000)
    }

    /// Ticks covering at least `us` microseconds.
    pub fn us_to_ticks(&self, us: u32) -> Tick {
        ceil_ticks(us as u64, self.tick_hz, 1_000_000)
    }

    /// Ticks covering at least `ns` nanoseconds.
    pub fn ns_to_ticks(&self, ns: u32) -> Tick {
        ceil_ticks(ns as u64, self.tick_hz, 1_000_000_000)
    }

    /// The tick at which a wait of `ticks` starting now is over.
    ///
    /// Saturates rather than wraps, so a deadline is never numerically
    /// smaller than the count it was computed from.
    pub fn deadline_after(&self, ticks: Tick) -> Tick {
        self.now().saturating_add(ticks)
    }
}

// `amount * tick_hz` fits in u64 for any u32 amount and rate.
fn ceil_ticks(amount: u64, tick_hz: u32, per_second: u64) -> Tick {
    (amount * tick_hz as u64).div_ceil(per_second)
}
