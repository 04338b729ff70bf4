//! 调度状态机
//!
//! 纯簿记：不碰硬件，不加锁。[`Kernel`](super::Kernel) 把它放在临界区互斥锁后面，
//! 从线程模式（创建、删除、阻塞）和节拍中断（唤醒、抢占）驱动它。
//!
//! 选择规则：可运行任务中优先级最高者胜出；同优先级时到达戳最小者胜出。
//! 任务在创建时、被唤醒时、以及时间片用完且有同优先级可运行任务时获得新的
//! （最大的）到达戳，因此同优先级任务按创建顺序轮转。

use heapless::binary_heap::{BinaryHeap, Min};

use crate::error::{Error, FatalError, Result};
use crate::kernel::clock::Tick;
use crate::kernel::config::Config;
use crate::kernel::task::{Priority, TaskId, TaskState, Tcb};

/// 当前在 CPU 上的上下文
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Cpu {
    /// 无需保存：启动上下文，或已删除自身、等待被切走的任务
    Detached,
    Idle,
    Task(usize),
}

/// 阻塞集合条目。字段顺序即堆序：截止节拍最早者在前，相同时按槽号
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
struct Sleeper {
    wake_at: Tick,
    index: u8,
    generation: u16,
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u16,
    /// `generation` 用尽后置位。退役的槽不再分配，旧句柄永远匹配不到新任务
    retired: bool,
    tcb: Option<Tcb>,
}

impl Slot {
    const EMPTY: Self = Self {
        generation: 0,
        retired: false,
        tcb: None,
    };

    const fn is_free(&self) -> bool {
        self.tcb.is_none() && !self.retired
    }
}

pub struct Scheduler<const N: usize> {
    slots: [Slot; N],
    blocked: BinaryHeap<Sleeper, Min, N>,
    cpu: Cpu,
    idle_sp: usize,
    started: bool,
    next_arrival: u64,
    time_slice: u32,
    slice_left: u32,
}

impl<const N: usize> Scheduler<N> {
    pub const fn new(config: &Config) -> Self {
        const { assert!(N > 0 && N <= u8::MAX as usize, "task table holds 1..=255 tasks") };
        Self {
            slots: [Slot::EMPTY; N],
            blocked: BinaryHeap::new(),
            cpu: Cpu::Detached,
            idle_sp: 0,
            started: false,
            next_arrival: 0,
            time_slice: config.slice(),
            slice_left: config.slice(),
        }
    }

    /// 把新任务放进第一个空闲槽，状态为 `Ready`
    ///
    /// # 参数
    /// - `init_context`: 接收槽号，返回任务的初始栈指针；找到空闲槽后才调用
    ///
    /// # 返回值
    /// - `Ok(TaskId)`: 新任务句柄
    /// - `Err(Error::ResourceExhausted)`: 没有空闲槽
    pub fn create(
        &mut self,
        name: &'static str,
        priority: Priority,
        init_context: impl FnOnce(usize) -> usize,
    ) -> Result<TaskId> {
        let index = self
            .slots
            .iter()
            .position(Slot::is_free)
            .ok_or(Error::ResourceExhausted)?;

        let sp = init_context(index);
        let arrival = self.arrive();
        let slot = &mut self.slots[index];
        slot.tcb = Some(Tcb::new(name, priority, arrival, sp));

        Ok(TaskId::new(index, slot.generation))
    }

    /// 删除任意状态的任务并释放其槽
    ///
    /// 删除 CPU 上的任务会使其脱离：下次切换时其寄存器被丢弃而不是保存
    pub fn delete(&mut self, id: TaskId) -> Result<()> {
        let tcb = self.tcb(id).ok_or(Error::NoSuchTask)?;
        let was_blocked = tcb.state == TaskState::Blocked;

        let slot = &mut self.slots[id.index()];
        slot.tcb = None;
        match slot.generation.checked_add(1) {
            Some(next) => slot.generation = next,
            None => {
                slot.retired = true;
                warn!("槽 {} 的代数已用尽，退役", id.index());
            }
        }

        if was_blocked {
            self.forget_sleeper(id.index());
        }
        if self.cpu == Cpu::Task(id.index()) {
            self.cpu = Cpu::Detached;
        }
        Ok(())
    }

    /// 删除 CPU 上的任务
    pub fn exit_current(&mut self) -> Option<TaskId> {
        let id = self.current()?;
        self.delete(id).ok()?;
        Some(id)
    }

    /// 把 CPU 上的任务置为 `Blocked`，直到 `deadline`
    ///
    /// # 返回值
    /// - `Ok(true)`: 任务已阻塞（重复调用保持原截止节拍）
    /// - `Ok(false)`: CPU 上没有任务（启动或空闲上下文），调用者需自行等待
    /// - `Err(FatalError::ContextCorrupted)`: 簿记不一致
    pub fn block_current(&mut self, deadline: Tick) -> core::result::Result<bool, FatalError> {
        let Cpu::Task(index) = self.cpu else {
            return Ok(false);
        };
        let Some(tcb) = self.slots[index].tcb.as_mut() else {
            return Err(FatalError::ContextCorrupted);
        };
        if tcb.state == TaskState::Blocked {
            return Ok(true);
        }

        tcb.state = TaskState::Blocked;
        tcb.wake_at = deadline;
        let sleeper = Sleeper {
            wake_at: deadline,
            index: index as u8,
            generation: self.slots[index].generation,
        };
        // 每个存活任务至多一个条目，堆容量为 N
        self.blocked
            .push(sleeper)
            .map_err(|_| FatalError::ContextCorrupted)?;
        Ok(true)
    }

    /// 节拍钩子
    ///
    /// 唤醒所有截止节拍 `<= now` 的任务，扣除当前任务一个节拍的时间片，
    /// 返回是否应切换到其他上下文
    pub fn tick(&mut self, now: Tick) -> bool {
        if !self.started {
            return false;
        }
        self.wake(now);

        if let Cpu::Task(index) = self.cpu {
            self.slice_left = self.slice_left.saturating_sub(1);
            if self.slice_left == 0 {
                self.slice_left = self.time_slice;
                if self.has_runnable_peer(index) {
                    let arrival = self.arrive();
                    if let Some(tcb) = self.slots[index].tcb.as_mut() {
                        tcb.arrival = arrival;
                    }
                }
            }
        }

        self.switch_pending()
    }

    /// 选择规则选中的不是 CPU 上的上下文时为真
    pub fn switch_pending(&self) -> bool {
        if !self.started {
            return false;
        }
        let next = self.select();
        match self.cpu {
            Cpu::Task(index) => next != Some(index),
            Cpu::Idle => next.is_some(),
            Cpu::Detached => true,
        }
    }

    /// 上下文切换簿记
    ///
    /// 为 CPU 上原来的上下文保存 `saved_sp`，选出下一个上下文并标记为运行
    ///
    /// # 返回值
    /// 现在 CPU 上的槽号，空闲时为 `None`
    pub fn switch(&mut self, saved_sp: usize) -> Option<usize> {
        match self.cpu {
            Cpu::Task(index) => {
                if let Some(tcb) = self.slots[index].tcb.as_mut() {
                    tcb.sp = saved_sp;
                    if tcb.state == TaskState::Running {
                        tcb.state = TaskState::Ready;
                    }
                }
            }
            Cpu::Idle => self.idle_sp = saved_sp,
            Cpu::Detached => {}
        }

        let next = self.select();
        match next {
            Some(index) => {
                if self.cpu != Cpu::Task(index) {
                    self.slice_left = self.time_slice;
                }
                if let Some(tcb) = self.slots[index].tcb.as_mut() {
                    tcb.state = TaskState::Running;
                }
                self.cpu = Cpu::Task(index);
            }
            None => self.cpu = Cpu::Idle,
        }
        next
    }

    /// 槽的已保存栈指针，`None` 表示空闲上下文
    pub fn context_sp(&self, index: Option<usize>) -> usize {
        match index {
            Some(index) => self.slots[index].tcb.map_or(0, |tcb| tcb.sp),
            None => self.idle_sp,
        }
    }

    pub(crate) fn set_idle_sp(&mut self, sp: usize) {
        self.idle_sp = sp;
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn cpu(&self) -> Cpu {
        self.cpu
    }

    /// CPU 上的任务
    pub fn current(&self) -> Option<TaskId> {
        match self.cpu {
            Cpu::Task(index) => Some(TaskId::new(index, self.slots[index].generation)),
            _ => None,
        }
    }

    /// 任务状态，失效句柄返回 `Deleted`
    pub fn state(&self, id: TaskId) -> TaskState {
        self.tcb(id).map_or(TaskState::Deleted, |tcb| tcb.state)
    }

    pub fn priority(&self, id: TaskId) -> Option<Priority> {
        self.tcb(id).map(|tcb| tcb.priority)
    }

    pub fn name(&self, id: TaskId) -> Option<&'static str> {
        self.tcb(id).map(|tcb| tcb.name)
    }

    /// 阻塞任务的唤醒节拍
    pub fn wake_at(&self, id: TaskId) -> Option<Tick> {
        self.tcb(id)
            .filter(|tcb| tcb.state == TaskState::Blocked)
            .map(|tcb| tcb.wake_at)
    }

    /// 存活任务数
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.tcb.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tcb(&self, id: TaskId) -> Option<&Tcb> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.tcb.as_ref()
    }

    fn arrive(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        arrival
    }

    fn select(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.tcb.map(|tcb| (index, tcb)))
            .filter(|(_, tcb)| tcb.is_runnable())
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.arrival.cmp(&a.arrival))
            })
            .map(|(index, _)| index)
    }

    fn has_runnable_peer(&self, index: usize) -> bool {
        let Some(me) = self.slots[index].tcb else {
            return false;
        };
        self.slots.iter().enumerate().any(|(other, slot)| {
            other != index
                && slot
                    .tcb
                    .is_some_and(|tcb| tcb.is_runnable() && tcb.priority == me.priority)
        })
    }

    fn wake(&mut self, now: Tick) {
        while let Some(&sleeper) = self.blocked.peek() {
            if sleeper.wake_at > now {
                break;
            }
            self.blocked.pop();

            let index = sleeper.index as usize;
            if self.slots[index].generation != sleeper.generation {
                continue;
            }
            let arrival = self.arrive();
            if let Some(tcb) = self.slots[index].tcb.as_mut()
                && tcb.state == TaskState::Blocked
            {
                tcb.state = TaskState::Ready;
                tcb.arrival = arrival;
                trace!("任务 {} 在节拍 {} 被唤醒", tcb.name, now);
            }
        }
    }

    // 删除很少发生，直接重建堆
    fn forget_sleeper(&mut self, index: usize) {
        let mut kept: heapless::Vec<Sleeper, N> = heapless::Vec::new();
        for sleeper in self.blocked.iter() {
            if sleeper.index as usize != index {
                // 不会溢出：`kept` 与堆同容量
                let _ = kept.push(*sleeper);
            }
        }
        self.blocked.clear();
        for sleeper in kept {
            let _ = self.blocked.push(sleeper);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched<const N: usize>(slice: u32) -> Scheduler<N> {
        Scheduler::new(&Config::new().time_slice(slice))
    }

    fn fake_sp(index: usize) -> usize {
        0x2000_0000 + index * 0x400
    }

    fn start<const N: usize>(s: &mut Scheduler<N>) -> Option<usize> {
        s.mark_started();
        s.switch(0)
    }

    /// 走一个节拍，需要时执行切换（相当于 SysTick 后接 PendSV），返回之后运行的槽
    fn tick_and_run<const N: usize>(s: &mut Scheduler<N>, now: Tick) -> Option<usize> {
        if s.tick(now) {
            let sp = s.context_sp(s.current().map(|id| id.index()));
            s.switch(sp)
        } else {
            s.current().map(|id| id.index())
        }
    }

    #[test]
    fn higher_priority_runs_first_and_preempts_on_wake() {
        let mut s = sched::<4>(1);
        let b = s.create("b", Priority(1), fake_sp).unwrap();
        let a = s.create("a", Priority(2), fake_sp).unwrap();

        assert_eq!(start(&mut s), Some(a.index()));
        assert_eq!(s.state(a), TaskState::Running);
        assert_eq!(s.state(b), TaskState::Ready);

        // A 从节拍 0 开始延时 5 个节拍
        assert_eq!(s.block_current(5), Ok(true));
        assert!(s.switch_pending());
        assert_eq!(s.switch(fake_sp(a.index())), Some(b.index()));
        assert_eq!(s.state(a), TaskState::Blocked);
        assert_eq!(s.wake_at(a), Some(5));

        for now in 1..5 {
            assert_eq!(tick_and_run(&mut s, now), Some(b.index()));
        }
        assert_eq!(tick_and_run(&mut s, 5), Some(a.index()));
        assert_eq!(s.state(a), TaskState::Running);
        assert_eq!(s.state(b), TaskState::Ready);
    }

    #[test]
    fn equal_priorities_alternate_in_creation_order() {
        let mut s = sched::<4>(1);
        let c = s.create("c", Priority(1), fake_sp).unwrap();
        let d = s.create("d", Priority(1), fake_sp).unwrap();

        let mut order = vec![start(&mut s).unwrap()];
        for now in 1..6 {
            order.push(tick_and_run(&mut s, now).unwrap());
        }
        let (c, d) = (c.index(), d.index());
        assert_eq!(order, [c, d, c, d, c, d]);
    }

    #[test]
    fn running_task_finishes_its_slice_before_rotating() {
        let mut s = sched::<4>(2);
        let c = s.create("c", Priority(1), fake_sp).unwrap().index();
        let d = s.create("d", Priority(1), fake_sp).unwrap().index();

        let mut order = vec![start(&mut s).unwrap()];
        for now in 1..8 {
            order.push(tick_and_run(&mut s, now).unwrap());
        }
        assert_eq!(order, [c, c, d, d, c, c, d, d]);
    }

    #[test]
    fn lone_task_keeps_the_cpu() {
        let mut s = sched::<2>(1);
        let t = s.create("t", Priority(1), fake_sp).unwrap();
        start(&mut s);
        for now in 1..10 {
            assert!(!s.tick(now));
        }
        assert_eq!(s.current(), Some(t));
    }

    #[test]
    fn lower_priority_never_preempts() {
        let mut s = sched::<3>(1);
        let hi = s.create("hi", Priority(5), fake_sp).unwrap();
        let _lo = s.create("lo", Priority(1), fake_sp).unwrap();
        start(&mut s);
        for now in 1..10 {
            assert_eq!(tick_and_run(&mut s, now), Some(hi.index()));
        }
    }

    #[test]
    fn woken_task_queues_behind_running_peer() {
        let mut s = sched::<3>(4);
        let c = s.create("c", Priority(1), fake_sp).unwrap().index();
        let d = s.create("d", Priority(1), fake_sp).unwrap().index();

        assert_eq!(start(&mut s), Some(c));
        s.block_current(2).unwrap();
        assert_eq!(s.switch(fake_sp(c)), Some(d));

        // C 在节拍 2 醒来，但 D 用完自己的时间片
        assert_eq!(tick_and_run(&mut s, 1), Some(d));
        assert_eq!(tick_and_run(&mut s, 2), Some(d));
        assert_eq!(s.state(TaskId::new(c, 0)), TaskState::Ready);
        assert_eq!(tick_and_run(&mut s, 3), Some(d));
        assert_eq!(tick_and_run(&mut s, 4), Some(c));
    }

    #[test]
    fn idles_when_everything_is_blocked() {
        let mut s = sched::<2>(1);
        let t = s.create("t", Priority(1), fake_sp).unwrap();
        s.set_idle_sp(0x1234);

        assert_eq!(start(&mut s), Some(t.index()));
        s.block_current(3).unwrap();
        assert_eq!(s.switch(0x2000_0100), None);
        assert_eq!(s.cpu(), Cpu::Idle);
        assert_eq!(s.current(), None);
        assert_eq!(s.context_sp(None), 0x1234);

        assert!(!s.tick(1));
        assert!(!s.tick(2));
        assert!(s.tick(3));
        assert_eq!(s.switch(0x1200), Some(t.index()));
        assert_eq!(s.context_sp(None), 0x1200);
        assert_eq!(s.context_sp(Some(t.index())), 0x2000_0100);
    }

    #[test]
    fn block_outside_a_task_is_refused() {
        let mut s = sched::<2>(1);
        assert_eq!(s.block_current(10), Ok(false));
        s.mark_started();
        assert_eq!(s.switch(0), None);
        assert_eq!(s.block_current(10), Ok(false));
    }

    #[test]
    fn blocking_twice_keeps_one_deadline() {
        let mut s = sched::<2>(1);
        let t = s.create("t", Priority(1), fake_sp).unwrap();
        start(&mut s);
        assert_eq!(s.block_current(4), Ok(true));
        assert_eq!(s.block_current(9), Ok(true));
        assert_eq!(s.wake_at(t), Some(4));
    }

    #[test]
    fn nothing_is_scheduled_before_start() {
        let mut s = sched::<2>(1);
        s.create("t", Priority(1), fake_sp).unwrap();
        assert!(!s.tick(1));
        assert!(!s.switch_pending());
        assert!(!s.is_started());
    }

    #[test]
    fn deleted_identity_is_not_reused() {
        let mut s = sched::<1>(1);
        let old = s.create("old", Priority(7), fake_sp).unwrap();
        start(&mut s);
        s.block_current(50).unwrap();
        s.switch(0x2000_0010);
        s.delete(old).unwrap();

        assert_eq!(s.state(old), TaskState::Deleted);
        assert_eq!(s.delete(old), Err(Error::NoSuchTask));

        let new = s.create("new", Priority(1), fake_sp).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert_eq!(s.priority(new), Some(Priority(1)));
        assert_eq!(s.name(new), Some("new"));
        assert_eq!(s.state(new), TaskState::Ready);
        assert_eq!(s.wake_at(new), None);
        assert_eq!(s.priority(old), None);

        // 旧的截止节拍不能唤醒或干扰新任务
        assert!(s.tick(50));
        assert_eq!(s.switch(0x1000), Some(new.index()));
        s.block_current(100).unwrap();
        s.switch(0x2000_0020);
        assert!(!s.tick(51));
        assert_eq!(s.state(new), TaskState::Blocked);
    }

    #[test]
    fn slot_is_retired_before_its_generation_wraps() {
        let mut s = sched::<1>(1);
        let old = s.create("old", Priority(1), fake_sp).unwrap();
        s.delete(old).unwrap();

        let mut last = old;
        for _ in 0..u16::MAX {
            last = s.create("churn", Priority(1), fake_sp).unwrap();
            s.delete(last).unwrap();
        }
        assert_eq!(last.generation(), u16::MAX);
        assert!(s.is_empty());

        assert_eq!(
            s.create("new", Priority(9), fake_sp),
            Err(Error::ResourceExhausted)
        );
        assert_eq!(s.state(old), TaskState::Deleted);
        assert_eq!(s.state(last), TaskState::Deleted);
        assert_eq!(s.priority(old), None);
        assert_eq!(s.delete(old), Err(Error::NoSuchTask));
        assert_eq!(s.delete(last), Err(Error::NoSuchTask));
    }

    #[test]
    fn exhaustion_leaves_existing_tasks_alone() {
        let mut s = sched::<2>(1);
        let a = s.create("a", Priority(2), fake_sp).unwrap();
        let b = s.create("b", Priority(1), fake_sp).unwrap();
        start(&mut s);
        s.block_current(8).unwrap();
        s.switch(0x2000_0030);

        let mut called = false;
        let err = s.create("c", Priority(9), |_| {
            called = true;
            0
        });
        assert_eq!(err, Err(Error::ResourceExhausted));
        assert!(!called);
        assert_eq!(s.len(), 2);
        assert_eq!(s.state(a), TaskState::Blocked);
        assert_eq!(s.wake_at(a), Some(8));
        assert_eq!(s.state(b), TaskState::Running);
        assert_eq!(s.context_sp(Some(a.index())), 0x2000_0030);
    }

    #[test]
    fn exiting_task_is_not_saved() {
        let mut s = sched::<2>(1);
        let a = s.create("a", Priority(1), fake_sp).unwrap();
        let b = s.create("b", Priority(1), fake_sp).unwrap();
        start(&mut s);

        assert_eq!(s.exit_current(), Some(a));
        assert_eq!(s.cpu(), Cpu::Detached);
        assert!(s.switch_pending());
        assert_eq!(s.switch(0xDEAD), Some(b.index()));
        assert_eq!(s.context_sp(Some(b.index())), fake_sp(b.index()));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn deleting_a_ready_task_skips_it() {
        let mut s = sched::<3>(1);
        let a = s.create("a", Priority(1), fake_sp).unwrap().index();
        let b = s.create("b", Priority(1), fake_sp).unwrap();
        let c = s.create("c", Priority(1), fake_sp).unwrap().index();
        start(&mut s);
        s.delete(b).unwrap();

        let order: Vec<_> = (1..5).map(|now| tick_and_run(&mut s, now).unwrap()).collect();
        assert_eq!(order, [c, a, c, a]);
    }
}
