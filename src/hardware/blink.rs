use embedded_hal::delay::DelayNs;

use super::traits::Led;

/// LED 闪烁任务主体
///
/// 不关心节拍和调度器：传入的延时决定等待时是忙等还是阻塞
pub struct Blinker<L, D> {
    led: L,
    delay: D,
    on_ms: u32,
    off_ms: u32,
}

impl<L: Led, D: DelayNs> Blinker<L, D> {
    /// 创建闪烁器
    ///
    /// # 参数
    /// - `led`: 要驱动的LED
    /// - `delay`: 延时提供者（忙等或任务阻塞）
    /// - `on_ms`: 每周期点亮时长（毫秒）
    /// - `off_ms`: 每周期熄灭时长（毫秒）
    pub fn new(led: L, delay: D, on_ms: u32, off_ms: u32) -> Self {
        Self {
            led,
            delay,
            on_ms,
            off_ms,
        }
    }

    /// 亮灭时长相同的方波闪烁
    ///
    /// # 参数
    /// - `half_period_ms`: 半周期（毫秒）
    pub fn square(led: L, delay: D, half_period_ms: u32) -> Self {
        Self::new(led, delay, half_period_ms, half_period_ms)
    }

    /// 执行一个亮灭周期
    pub fn cycle(&mut self) {
        self.led.on();
        self.delay.delay_ms(self.on_ms);
        self.led.off();
        self.delay.delay_ms(self.off_ms);
    }

    /// 永远闪烁，不返回
    pub fn run(mut self) -> ! {
        loop {
            self.cycle();
        }
    }
}
