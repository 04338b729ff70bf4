//! 抢占式内核：节拍时钟、延时和优先级调度器
//!
//! [`Kernel`] 组合了：
//!
//! - 注入的 [`TickClock`]，内核接管定时器中断后只由 [`Kernel::on_tick`] 推进
//! - 临界区互斥锁保护的 [`Scheduler`]，线程模式（创建、删除、延时）与
//!   节拍中断（唤醒、抢占）共享
//! - 任务栈池，每个任务槽一个，外加空闲上下文的栈
//! - 负责实际寄存器保存/恢复的 [`Port`]
//!
//! 板上的典型接线：
//!
//! ```ignore
//! static CLOCK: TickClock = TickClock::new(DEFAULT_TICK_HZ);
//! static KERNEL: Kernel<'static, CortexM, 4> = Kernel::new(&CLOCK, CortexM::new(), Config::new());
//!
//! #[exception]
//! fn SysTick() {
//!     KERNEL.on_tick();
//! }
//! ```

pub mod clock;
pub mod config;
pub mod delay;
pub mod port;
pub mod scheduler;
pub mod task;

use core::cell::{RefCell, UnsafeCell};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::error::{Error, FatalError, Result};
use clock::{Tick, TickClock};
use config::{Config, IDLE_STACK_WORDS, STACK_CANARY, STACK_WORDS};
use port::{ContextSwitch, Port};
use scheduler::{Cpu, Scheduler};
use task::{Priority, TaskEntry, TaskId, TaskState};

/// 一个执行上下文的栈内存。布置好上下文后，最低字保存 [`STACK_CANARY`]
#[repr(C, align(8))]
pub struct Stack<const WORDS: usize>(UnsafeCell<[u32; WORDS]>);

impl<const WORDS: usize> Stack<WORDS> {
    pub const fn new() -> Self {
        Self(UnsafeCell::new([0; WORDS]))
    }

    /// # Safety
    ///
    /// 此栈上不能有正在运行或已保存的上下文
    #[allow(clippy::mut_from_ref)]
    unsafe fn words(&self) -> &mut [u32; WORDS] {
        unsafe { &mut *self.0.get() }
    }

    fn base(&self) -> usize {
        self.0.get() as usize
    }

    fn top(&self) -> usize {
        self.base() + WORDS * core::mem::size_of::<u32>()
    }

    /// `sp` 落在本栈范围内且保护字未被改写
    fn holds(&self, sp: usize) -> bool {
        // SAFETY: 只读取本栈拥有的一个对齐字
        let canary = unsafe { core::ptr::read_volatile(self.0.get() as *const u32) };
        canary == STACK_CANARY && sp > self.base() && sp <= self.top()
    }
}

impl<const WORDS: usize> Default for Stack<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// 最多容纳 `N` 个任务的定长内核
pub struct Kernel<'c, P, const N: usize> {
    clock: &'c TickClock,
    port: P,
    sched: Mutex<CriticalSectionRawMutex, RefCell<Scheduler<N>>>,
    stacks: [Stack<STACK_WORDS>; N],
    idle_stack: Stack<IDLE_STACK_WORDS>,
}

// SAFETY: 栈只在其槽空闲时（持调度器锁）或由拥有它的上下文写入；
// 调度器本身由临界区互斥锁保护
unsafe impl<P: Port + Sync, const N: usize> Sync for Kernel<'_, P, N> {}

impl<'c, P: Port, const N: usize> Kernel<'c, P, N> {
    pub const fn new(clock: &'c TickClock, port: P, config: Config) -> Self {
        Self {
            clock,
            port,
            sched: Mutex::new(RefCell::new(Scheduler::new(&config))),
            stacks: [const { Stack::new() }; N],
            idle_stack: Stack::new(),
        }
    }

    pub fn clock(&self) -> &'c TickClock {
        self.clock
    }

    /// 当前节拍
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// 创建一个处于 `Ready` 状态的任务
    ///
    /// # 参数
    /// - `name`: 任务名，仅用于日志
    /// - `priority`: 优先级，数值越大越先运行
    /// - `entry`: 任务主体，永不返回
    ///
    /// # 返回值
    /// - `Ok(TaskId)`: 新任务句柄。内核已运行且新任务优先级更高时，调用者被抢占
    /// - `Err(Error::ResourceExhausted)`: `N` 个槽已满，其他状态不变
    pub fn create(&self, name: &'static str, priority: Priority, entry: TaskEntry) -> Result<TaskId> {
        let created = self.sched.lock(|sched| {
            let mut sched = sched.borrow_mut();
            let id = sched.create(name, priority, |index| {
                // SAFETY: 槽 `index` 空闲，其栈上没有上下文
                let words = unsafe { self.stacks[index].words() };
                words[0] = STACK_CANARY;
                self.port.init_stack(words, entry)
            })?;
            Ok::<_, Error>((id, sched.switch_pending()))
        });

        match created {
            Ok((id, preempt)) => {
                info!("任务 {} 已创建（优先级 {}，槽 {}）", name, priority.0, id.index());
                if preempt {
                    self.port.pend_switch();
                }
                Ok(id)
            }
            Err(error) => {
                warn!("任务 {} 创建失败: {}", name, error);
                Err(error)
            }
        }
    }

    /// 删除任意状态的任务，回收其槽和栈
    ///
    /// 删除调用者自身时在目标板上不会返回，切换在本调用内发生；
    /// 这种情况请用 [`Kernel::exit`]
    ///
    /// # 返回值
    /// - `Ok(())`: 删除成功
    /// - `Err(Error::NoSuchTask)`: 句柄已失效或从未签发
    pub fn delete(&self, id: TaskId) -> Result<()> {
        let reschedule = self.sched.lock(|sched| {
            let mut sched = sched.borrow_mut();
            sched.delete(id)?;
            Ok::<_, Error>(sched.switch_pending())
        })?;

        info!("槽 {} 的任务已删除", id.index());
        if reschedule {
            self.port.pend_switch();
        }
        Ok(())
    }

    /// 结束调用者任务
    pub fn exit(&self) -> ! {
        match self.sched.lock(|sched| sched.borrow_mut().exit_current()) {
            Some(id) => info!("槽 {} 的任务已退出", id.index()),
            None => self.fatal(FatalError::ContextCorrupted),
        }
        self.port.pend_switch();
        P::idle()
    }

    /// 阻塞调用者任务，直到时钟到达 `deadline`
    ///
    /// 不在任务中（[`Kernel::start`] 之前）时没有可阻塞的任务，改为忙等
    ///
    /// # 参数
    /// - `deadline`: 唤醒节拍（绝对值）
    pub fn sleep_until(&self, deadline: Tick) {
        loop {
            let blocked = self.sched.lock(|sched| {
                if self.clock.now() >= deadline {
                    return Ok(None);
                }
                sched.borrow_mut().block_current(deadline).map(Some)
            });

            match blocked {
                Ok(None) => return,
                Ok(Some(true)) => self.port.pend_switch(),
                Ok(Some(false)) => core::hint::spin_loop(),
                Err(error) => self.fatal(error),
            }
        }
    }

    /// 定时器中断钩子
    ///
    /// 时钟加一，唤醒到期任务；当前任务不再是应运行的任务时请求抢占
    pub fn on_tick(&self) {
        self.clock.increment();
        let now = self.clock.now();
        if self.sched.lock(|sched| sched.borrow_mut().tick(now)) {
            self.port.pend_switch();
        }
    }

    /// 正在 CPU 上运行的任务
    pub fn current(&self) -> Option<TaskId> {
        self.sched.lock(|sched| sched.borrow().current())
    }

    pub fn state(&self, id: TaskId) -> TaskState {
        self.sched.lock(|sched| sched.borrow().state(id))
    }

    pub fn priority(&self, id: TaskId) -> Option<Priority> {
        self.sched.lock(|sched| sched.borrow().priority(id))
    }

    /// 存活任务数
    pub fn task_count(&self) -> usize {
        self.sched.lock(|sched| sched.borrow().len())
    }

    /// 布置空闲上下文并允许节拍钩子开始调度，返回待调度的任务数
    fn prepare_start(&self) -> usize {
        // SAFETY: 空闲上下文尚未运行
        let words = unsafe { self.idle_stack.words() };
        words[0] = STACK_CANARY;
        let idle_sp = self.port.init_stack(words, P::idle);

        self.sched.lock(|sched| {
            let mut sched = sched.borrow_mut();
            sched.set_idle_sp(idle_sp);
            sched.mark_started();
            if sched.is_empty() {
                warn!("没有任务，只运行空闲上下文");
            }
            sched.len()
        })
    }

    fn check_stack(&self, sched: &Scheduler<N>, saved_sp: usize) -> core::result::Result<(), FatalError> {
        let intact = match sched.cpu() {
            Cpu::Detached => true,
            Cpu::Idle => self.idle_stack.holds(saved_sp),
            Cpu::Task(index) => self.stacks[index].holds(saved_sp),
        };
        if intact {
            Ok(())
        } else {
            Err(FatalError::StackOverflow {
                task: sched.current(),
            })
        }
    }

    fn fatal(&self, error: FatalError) -> ! {
        error!("内核致命错误: {}", error);
        self.port.halt(error)
    }
}

impl<P: Port + Sync + 'static, const N: usize> Kernel<'static, P, N> {
    /// 启动调度，永不返回：启动上下文在第一次切换时被丢弃
    pub fn start(&'static self) -> ! {
        self.port.install(self);
        let tasks = self.prepare_start();
        info!("调度器启动，共 {} 个任务", tasks);
        self.port.pend_switch();
        P::idle()
    }
}

impl<P: Port + Sync, const N: usize> ContextSwitch for Kernel<'_, P, N> {
    fn switch_context(&self, saved_sp: usize) -> usize {
        let next = self.sched.lock(|sched| {
            let mut sched = sched.borrow_mut();
            self.check_stack(&sched, saved_sp)?;
            let next = sched.switch(saved_sp);
            Ok(sched.context_sp(next))
        });

        match next {
            Ok(sp) => sp,
            Err(error) => self.fatal(error),
        }
    }
}
