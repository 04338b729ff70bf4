//! Tick-driven timing and task scheduling for the STM32F103 "Blue Pill".
//!
//! The crate is split the same way the firmware is wired:
//!
//! - [`kernel::clock::TickClock`]: the monotonic millisecond counter, bumped
//!   once per SysTick interrupt.
//! - [`kernel::delay::Delay`]: `embedded_hal::delay::DelayNs` on top of the
//!   clock, either spinning ([`TickClock`](kernel::clock::TickClock) backend)
//!   or blocking the calling task ([`Kernel`](kernel::Kernel) backend).
//! - [`kernel::Kernel`]: a fixed-capacity preemptive priority scheduler with
//!   round robin among equal priorities.
//! - [`hardware`]: the LED collaborator and the blink task body.
//!
//! Everything except `kernel::port::armv7m`, `hardware::board` and the
//! binaries is hardware free and is unit tested on the host.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module below.
mod fmt;

pub mod error;
pub mod hardware;
pub mod kernel;

pub use error::{Error, FatalError, Result};
