//! STM32F103 Blue Pill Preemptive Task Blink
//! =============================================================================================
//!
//! Date			Author          Notes
//! 2025-07-20	    YHY             Initial release
//!
//!==============================================================================================
//!
//! 抢占式任务版本：LED 由一个任务驱动，延时期间任务被阻塞而不是忙等，
//! CPU 在两次翻转之间进入空闲（WFI）。
//!
//! Hardware Connections:
//!   On-board LED -> PC13 (低电平点亮)
//!
//! Features:
//! 1. 外部 8MHz 晶振倍频到 72MHz 系统时钟
//! 2. 1kHz SysTick 驱动内核节拍
//! 3. PendSV 在 LED 任务和空闲上下文之间切换
//! 4. LED 以 5Hz 闪烁（亮 100ms，灭 100ms）

#![no_std] // 禁用标准库，适用于裸机嵌入式环境
#![no_main] // 禁用标准main入口，使用自定义入口点

use core::cell::RefCell;

use bluepill_tick::hardware::Blinker;
use bluepill_tick::hardware::board::{self, BoardLed, CORE_HZ};
use bluepill_tick::kernel::Kernel;
use bluepill_tick::kernel::clock::TickClock;
use bluepill_tick::kernel::config::{Config, DEFAULT_TICK_HZ};
use bluepill_tick::kernel::delay::TaskDelay; // 阻塞式延时
use bluepill_tick::kernel::port::armv7m::{CortexM, configure_systick};
use bluepill_tick::kernel::task::Priority;
use cortex_m_rt::{entry, exception};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use {defmt_rtt as _, panic_probe as _}; // 日志记录和panic处理

/// 任务槽数量：LED 任务占一个，另一个备用
const MAX_TASKS: usize = 2;

// 系统节拍时钟与内核（静态分配，无堆）
static CLOCK: TickClock = TickClock::new(DEFAULT_TICK_HZ);
static KERNEL: Kernel<'static, CortexM, MAX_TASKS> = Kernel::new(&CLOCK, CortexM::new(), Config::new());

// 由 main 交给 LED 任务，任务首次运行时取走
static LED: Mutex<CriticalSectionRawMutex, RefCell<Option<BoardLed>>> = Mutex::new(RefCell::new(None));

/// 主入口函数
///
/// 负责：
/// 1. 配置系统时钟（HSE 8MHz + PLL倍频到72MHz）
/// 2. 配置板载LED并交给 LED 任务
/// 3. 创建 LED 任务（优先级 1），失败则停机
/// 4. 启动 SysTick 和调度器，永不返回
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
    LED.lock(|cell| *cell.borrow_mut() = Some(led));

    // 创建 LED 任务，失败则停机
    if let Err(e) = KERNEL.create("led", Priority(1), led_task) {
        defmt::error!("LED 任务创建失败: {}", e);
        halt();
    }

    // 1ms 一次 SysTick 中断，然后启动调度器
    configure_systick(&mut cp.SYST, CORE_HZ, DEFAULT_TICK_HZ);
    KERNEL.start()
}

/// LED 闪烁任务
///
/// 亮 100ms / 灭 100ms，延时期间阻塞让出 CPU
fn led_task() -> ! {
    let Some(led) = LED.lock(|cell| cell.borrow_mut().take()) else {
        defmt::warn!("LED 已被取走");
        KERNEL.exit()
    };
    Blinker::square(led, TaskDelay::new(&KERNEL), 100).run()
}

/// 出错后停机
fn halt() -> ! {
    loop {
        cortex_m::asm::nop();
    }
}

/// SysTick 中断：推进节拍，唤醒到期任务，必要时请求切换
#[exception]
fn SysTick() {
    KERNEL.on_tick();
}
