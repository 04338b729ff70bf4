//! 板级外设：LED 及其闪烁任务

pub mod blink;
#[cfg(feature = "board")]
pub mod board;
pub mod gpio_led;
pub mod traits;

pub use blink::Blinker;
pub use gpio_led::{GpioLed, Polarity};
pub use traits::Led;
