//! ARMv7-M 移植层（Cortex-M3，无 FPU；`thumbv7m-none-eabi`）
//!
//! - SysTick 作为节拍源，见 [`configure_systick`]
//! - PendSV 执行上下文切换。它处于最低异常优先级，不会抢占节拍中断；
//!   线程模式下的切换请求立即生效
//! - 任务在线程模式下使用进程栈（PSP）。内核启动后，主栈（MSP）只留给异常处理

use core::arch::naked_asm;
use core::cell::{Cell, UnsafeCell};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use super::{ContextSwitch, Port};
use crate::error::FatalError;
use crate::kernel::task::TaskEntry;

/// 最低优先级；STM32F1 只实现高 4 位
const PENDSV_PRIORITY: u8 = 0xF0;
const SYSTICK_PRIORITY: u8 = 0xE0;

/// Thumb 状态位，每个初始 xPSR 都必须置位
const XPSR_THUMB: u32 = 1 << 24;

/// r4-r11，由 PendSV 压栈
const SOFTWARE_FRAME_WORDS: usize = 8;
/// r0-r3、r12、lr、pc、xPSR，进入异常时由硬件压栈
const HARDWARE_FRAME_WORDS: usize = 8;
const FRAME_WORDS: usize = SOFTWARE_FRAME_WORDS + HARDWARE_FRAME_WORDS;

const LR_SLOT: usize = SOFTWARE_FRAME_WORDS + 5;
const PC_SLOT: usize = SOFTWARE_FRAME_WORDS + 6;
const XPSR_SLOT: usize = SOFTWARE_FRAME_WORDS + 7;

static SWITCHER: Mutex<CriticalSectionRawMutex, Cell<Option<&'static dyn ContextSwitch>>> =
    Mutex::new(Cell::new(None));

/// 第一次 PendSV 存放启动上下文 r4-r11 的位置，永不恢复
struct BootScratch(UnsafeCell<[u32; SOFTWARE_FRAME_WORDS * 2]>);

// SAFETY: 只由 PendSV 经 PSP 写入一次
unsafe impl Sync for BootScratch {}

static BOOT_SCRATCH: BootScratch = BootScratch(UnsafeCell::new([0; SOFTWARE_FRAME_WORDS * 2]));

/// 配置 SysTick 以内核时钟为源，每秒中断 `tick_hz` 次
///
/// # 参数
/// - `syst`: SysTick 外设
/// - `core_hz`: HCLK，例如 Blue Pill 经 PLL 运行时为 72MHz
/// - `tick_hz`: 通常为 [`DEFAULT_TICK_HZ`](crate::kernel::config::DEFAULT_TICK_HZ)
pub fn configure_systick(syst: &mut SYST, core_hz: u32, tick_hz: u32) {
    syst.disable_counter();
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(core_hz / tick_hz - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

/// Cortex-M3 处理器
#[derive(Debug, Default, Clone, Copy)]
pub struct CortexM;

impl CortexM {
    pub const fn new() -> Self {
        Self
    }
}

impl Port for CortexM {
    fn init_stack(&self, stack: &mut [u32], entry: TaskEntry) -> usize {
        // `Stack` 8 字节对齐，取偶数字数使栈顶也保持对齐
        let top = stack.len() & !1;
        let frame = &mut stack[top - FRAME_WORDS..top];
        frame.fill(0);
        frame[LR_SLOT] = task_returned as usize as u32;
        frame[PC_SLOT] = entry as usize as u32 & !1;
        frame[XPSR_SLOT] = XPSR_THUMB;
        frame.as_ptr() as usize
    }

    fn pend_switch(&self) {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn install(&self, kernel: &'static dyn ContextSwitch) {
        SWITCHER.lock(|switcher| switcher.set(Some(kernel)));

        // SAFETY: 在第一次切换前只运行一次；只改动异常优先级和 PSP，
        // 此前 PSP 未被使用
        unsafe {
            let mut core = cortex_m::Peripherals::steal();
            core.SCB.set_priority(SystemHandler::PendSV, PENDSV_PRIORITY);
            core.SCB.set_priority(SystemHandler::SysTick, SYSTICK_PRIORITY);

            let scratch_top = BOOT_SCRATCH.0.get() as usize + core::mem::size_of::<[u32; SOFTWARE_FRAME_WORDS * 2]>();
            cortex_m::register::psp::write(scratch_top as u32);
        }
    }

    fn idle() -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn halt(&self, _error: FatalError) -> ! {
        cortex_m::interrupt::disable();
        loop {
            cortex_m::asm::nop();
        }
    }
}

/// 每个任务帧的返回地址。任务入口是 `fn() -> !`，到这里说明栈已损坏
extern "C" fn task_returned() -> ! {
    error!("任务从入口函数返回");
    CortexM.halt(FatalError::ContextCorrupted)
}

extern "C" fn pendsv_switch(saved_sp: usize) -> usize {
    match SWITCHER.lock(|switcher| switcher.get()) {
        Some(kernel) => kernel.switch_context(saved_sp),
        None => saved_sp,
    }
}

/// 上下文切换
///
/// 进入时硬件已把换出上下文的 r0-r3、r12、lr、pc、xPSR 压入 PSP。
/// 这里在其下方压入 r4-r11，由内核选出下一个上下文，弹出它的 r4-r11，
/// 再以它的 PSP 返回线程模式，其余寄存器由硬件出栈。
///
/// 裸函数：保存 r4-r11 之前编译器不能使用它们
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        // EXC_RETURN 0xFFFFFFFD：线程模式，进程栈
        "mvn lr, #2",
        "bx lr",
        switch = sym pendsv_switch,
    );
}
