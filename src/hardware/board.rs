//! Blue Pill (STM32F103C8) 板级配置，供各固件共用

use embassy_stm32::gpio::Output;

use super::gpio_led::GpioLed;

/// 应用 [`clock_config`] 后的 HCLK：8MHz HSE 经 PLL 9 倍频
pub const CORE_HZ: u32 = 72_000_000;

/// PC13 上的板载LED，高电平时熄灭
pub type BoardLed = GpioLed<Output<'static>>;

/// 由外部晶振得到 72MHz 的时钟树配置
///
/// # 返回值
/// 配置好 HSE、PLL 和总线分频的 `embassy_stm32::Config`
pub fn clock_config() -> embassy_stm32::Config {
    let mut config = embassy_stm32::Config::default();
    {
        use embassy_stm32::rcc::*;
        config.rcc.hse = Some(Hse {
            freq: embassy_stm32::time::Hertz(8_000_000),
            // 开发板使用外部振荡器
            mode: HseMode::Oscillator,
        });
        config.rcc.pll = Some(Pll {
            src: PllSource::HSE,     // PLL时钟源选择HSE
            prediv: PllPreDiv::DIV1, // 预分频系数
            mul: PllMul::MUL9,       // 倍频系数（8MHz * 9 = 72MHz）
        });
        config.rcc.sys = Sysclk::PLL1_P; // 系统时钟源选择PLL输出
        config.rcc.ahb_pre = AHBPrescaler::DIV1; // AHB预分频（72MHz）
        config.rcc.apb1_pre = APBPrescaler::DIV2; // APB1预分频（36MHz，上限）
        config.rcc.apb2_pre = APBPrescaler::DIV1; // APB2预分频（72MHz）
    }
    config
}
