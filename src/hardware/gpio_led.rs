use core::convert::Infallible;

use embedded_hal::digital::StatefulOutputPin;

use super::traits::Led;

/// 点亮LED的引脚电平
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    ActiveHigh,
    /// Blue Pill 的 PC13 LED 接在 3V3 上，引脚拉低时点亮
    ActiveLow,
}

/// 推挽输出引脚上的LED
///
/// # 泛型参数
/// - `P`: 任意不会失败的 embedded-hal 1.0 输出引脚，例如
///   `embassy_stm32::gpio::Output`
pub struct GpioLed<P> {
    pin: P,
    polarity: Polarity,
}

impl<P> GpioLed<P>
where
    P: StatefulOutputPin<Error = Infallible>,
{
    pub fn new(pin: P, polarity: Polarity) -> Self {
        Self { pin, polarity }
    }

    /// 低电平点亮的LED（Blue Pill 板载LED）
    pub fn active_low(pin: P) -> Self {
        Self::new(pin, Polarity::ActiveLow)
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P> Led for GpioLed<P>
where
    P: StatefulOutputPin<Error = Infallible>,
{
    fn on(&mut self) {
        let Ok(()) = match self.polarity {
            Polarity::ActiveHigh => self.pin.set_high(),
            Polarity::ActiveLow => self.pin.set_low(),
        };
    }

    fn off(&mut self) {
        let Ok(()) = match self.polarity {
            Polarity::ActiveHigh => self.pin.set_low(),
            Polarity::ActiveLow => self.pin.set_high(),
        };
    }

    fn toggle(&mut self) {
        let Ok(()) = self.pin.toggle();
    }

    fn is_on(&mut self) -> bool {
        let Ok(high) = self.pin.is_set_high();
        high == (self.polarity == Polarity::ActiveHigh)
    }
}
