//! STM32F103 Blue Pill Busy-Wait Blink
//! =============================================================================================
//!
//! Date			Author          Notes
//! 2025-07-20	    YHY             Initial release
//!
//!==============================================================================================
//!
//! 无调度器版本：SysTick 每毫秒推进一次节拍时钟，主循环在两次翻转之间
//! 忙等该时钟。
//!
//! Hardware Connections:
//!   On-board LED -> PC13 (低电平点亮)
//!
//! Features:
//! 1. 外部 8MHz 晶振倍频到 72MHz 系统时钟
//! 2. 1kHz SysTick 驱动节拍时钟
//! 3. LED 以 1Hz 闪烁（亮 500ms，灭 500ms）

#![no_std] // 禁用标准库，适用于裸机嵌入式环境
#![no_main] // 禁用标准main入口，使用自定义入口点

use bluepill_tick::hardware::Blinker;
use bluepill_tick::hardware::board::{self, BoardLed, CORE_HZ};
use bluepill_tick::kernel::clock::TickClock;
use bluepill_tick::kernel::config::DEFAULT_TICK_HZ;
use bluepill_tick::kernel::delay::BusyDelay; // 忙等延时
use bluepill_tick::kernel::port::armv7m::configure_systick;
use cortex_m_rt::{entry, exception};
use embassy_stm32::gpio::{Level, Output, Speed};
use {defmt_rtt as _, panic_probe as _}; // 日志记录和panic处理

/// 系统节拍时钟（毫秒），只在 SysTick 中断里递增
static CLOCK: TickClock = TickClock::new(DEFAULT_TICK_HZ);

/// 主入口函数
///
/// 负责：
/// 1. 配置系统时钟（HSE 8MHz + PLL倍频到72MHz）
/// 2. 配置板载LED（PC13）
/// 3. 启动 1kHz SysTick
/// 4. 进入忙等闪烁循环，永不返回
#[entry]
fn main() -> ! {
    // 初始化外设（72MHz 时钟树）
    let p = embassy_stm32::init(board::clock_config());

    // 获取内核外设（SysTick），只能获取一次
    let Some(mut cp) = cortex_m::Peripherals::take() else {
        defmt::error!("内核外设已被占用");
        halt();
    };

    // 板载LED，初始为熄灭（高电平）
    let led = BoardLed::active_low(Output::new(p.PC13, Level::High, Speed::Low));

    // 1ms 一次 SysTick 中断
    configure_systick(&mut cp.SYST, CORE_HZ, DEFAULT_TICK_HZ);
    defmt::info!("忙等闪烁启动，节拍频率 {} Hz", CLOCK.tick_hz());

    // 亮 500ms / 灭 500ms
    Blinker::square(led, BusyDelay::new(&CLOCK), 500).run()
}

/// 出错后停机
fn halt() -> ! {
    loop {
        cortex_m::asm::nop();
    }
}

/// SysTick 中断：节拍时钟加一
#[exception]
fn SysTick() {
    CLOCK.increment();
}
