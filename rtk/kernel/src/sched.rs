//! Scheduler core.
//!
//! [`Kernel`] holds every piece of global kernel state: the thread table,
//! the ready queue, the virtual timer list, the current thread and the tick
//! counter. Its methods are the kernel's primitive operations; they assume
//! the caller already masked interrupts and never touch the CPU themselves.
//! Whenever an operation decides that another thread must run, it updates
//! `current` and returns a [`Switch`] describing the transfer. The caller
//! hands that to the port (see [`System`](crate::System)).
//!
//! ## Scheduling Policy
//!
//! 1. The ready queue is ordered by priority, FIFO among equal priorities
//! 2. Picking the next thread is O(1): the head of the ready queue
//! 3. A ready thread preempts the current one only if strictly more urgent
//! 4. Equal priorities run until they block or yield, unless a time quantum
//!    is configured, in which case an expired quantum also yields to peers

use core::marker::PhantomData;

use critical_section::CriticalSection;
use rtk_core::{
    HaltReason, KernelError, KernelResult, Msg, Priority, Systime, ThreadState, Ticks, Timeout,
    WaitError, WaitKind, WaitResult,
};

use crate::config::KernelConfig;
use crate::halt::halt;
use crate::list::{Corrupted, Index, Queue};
use crate::port::{Port, ThreadEntry};
use crate::thread::{ThreadExit, ThreadId, ThreadTable, Tcb, Wait, Wakeup};
use crate::trace::{SwitchRecord, SwitchTrace};
use crate::vt::UserTimer;

/// CPU transfer decided by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: ThreadId,
    pub to: ThreadId,
}

/// Result of an operation that may block the calling thread.
#[derive(Debug)]
#[must_use]
pub enum Step<T> {
    /// Completed without blocking.
    Done(T),
    /// The caller was suspended; its outcome is available as a
    /// [`Wakeup`] once it runs again.
    Switch(Switch),
}

impl<T> Step<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Done(value) => Step::Done(f(value)),
            Step::Switch(switch) => Step::Switch(switch),
        }
    }

    /// The switch to perform, if the caller blocked
    pub fn switch(&self) -> Option<Switch> {
        match self {
            Step::Done(_) => None,
            Step::Switch(switch) => Some(*switch),
        }
    }
}

/// Global kernel state for `N` threads and `T` user timers.
pub struct Kernel<P: Port, const N: usize, const T: usize> {
    pub(crate) threads: ThreadTable<P::Context, N>,
    pub(crate) timers: [UserTimer; T],
    pub(crate) ready: Queue,
    pub(crate) timer_list: Queue,
    pub(crate) current: Option<Index>,
    pub(crate) now: Systime,
    pub(crate) config: KernelConfig,
    pub(crate) slice_left: u32,
    pub(crate) irq_nesting: u8,
    trace: SwitchTrace,
    _port: PhantomData<fn() -> P>,
}

impl<P: Port, const N: usize, const T: usize> Kernel<P, N, T> {
    pub const fn new(config: KernelConfig) -> Self {
        assert!(N > 0, "kernel needs at least one thread slot");
        assert!(N + T < Index::MAX as usize, "too many thread and timer slots");
        Self {
            threads: ThreadTable::new(),
            timers: [const { UserTimer::VACANT }; T],
            ready: Queue::new(),
            timer_list: Queue::new(),
            current: None,
            now: Systime::ZERO,
            config,
            slice_left: 0,
            irq_nesting: 0,
            trace: SwitchTrace::new(),
            _port: PhantomData,
        }
    }

    /// Unwrap a list operation, halting on corruption.
    pub(crate) fn intact<R>(result: Result<R, Corrupted>) -> R {
        match result {
            Ok(value) => value,
            Err(Corrupted) => halt::<P>(HaltReason::CorruptedQueue),
        }
    }

    pub(crate) fn tcb(&self, index: Index) -> &Tcb<P::Context> {
        Self::intact(self.threads.tcb(index))
    }

    pub(crate) fn tcb_mut(&mut self, index: Index) -> &mut Tcb<P::Context> {
        Self::intact(self.threads.tcb_mut(index))
    }

    pub(crate) fn current_index(&self) -> Index {
        match self.current {
            Some(index) => index,
            None => halt::<P>(HaltReason::NotStarted),
        }
    }

    pub(crate) fn resolve(&self, id: ThreadId) -> KernelResult<Index> {
        self.threads.resolve(id).ok_or(KernelError::UnknownThread)
    }

    // Thread creation

    /// Create a thread and make it ready. Does not reschedule.
    pub fn create(
        &mut self,
        stack: &'static mut [u8],
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
    ) -> KernelResult<ThreadId> {
        let index = self.spawn(stack, priority, entry, arg)?;
        self.ready_i(index);
        Ok(self.threads.id_of(index))
    }

    /// Create a thread that stays suspended until [`resume`](Self::resume).
    pub fn create_suspended(
        &mut self,
        stack: &'static mut [u8],
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
    ) -> KernelResult<ThreadId> {
        let index = self.spawn(stack, priority, entry, arg)?;
        self.tcb_mut(index).state = ThreadState::Suspended(WaitKind::Resume);
        Ok(self.threads.id_of(index))
    }

    fn spawn(
        &mut self,
        stack: &'static mut [u8],
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
    ) -> KernelResult<Index> {
        if stack.len() < P::MIN_STACK {
            return Err(KernelError::StackTooSmall {
                required: P::MIN_STACK,
                provided: stack.len(),
            });
        }
        if self.threads.occupied() == N {
            return Err(KernelError::NoFreeSlot);
        }
        let ctx = P::init_context(stack, entry, arg);
        let index = self
            .threads
            .insert(Tcb::new(ctx, priority, stack))
            .map_err(|_| KernelError::NoFreeSlot)?;
        log::debug!(
            "{}: created {} at {}",
            self.config.name,
            self.threads.id_of(index),
            priority
        );
        Ok(index)
    }

    /// Pick the first thread. The caller hands its context to `Port::start`.
    pub fn start(&mut self) -> ThreadId {
        debug_assert!(self.current.is_none(), "scheduler started twice");
        let first = match Self::intact(self.ready.pop_front(&mut self.threads)) {
            Some(index) => index,
            None => halt::<P>(HaltReason::NoRunnableThread),
        };
        self.tcb_mut(first).state = ThreadState::Running;
        self.current = Some(first);
        self.slice_left = self.config.time_quantum;
        let id = self.threads.id_of(first);
        log::debug!("{}: started with {}", self.config.name, id);
        id
    }

    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    // Ready queue

    /// Put `index` in the ready queue behind every thread of equal or
    /// higher priority. No reschedule.
    pub(crate) fn ready_i(&mut self, index: Index) {
        let prio = {
            let tcb = self.tcb_mut(index);
            tcb.state = ThreadState::Ready;
            tcb.wait = Wait::None;
            tcb.prio
        };
        Self::intact(self.ready.insert_by(&mut self.threads, index, |threads, at| {
            threads.tcb(at).map_or(false, |tcb| tcb.prio < prio)
        }));
    }

    /// Ready a blocked thread with `wakeup` as its outcome. No reschedule.
    pub(crate) fn wake_i(&mut self, index: Index, wakeup: Wakeup) {
        self.disarm_thread_timer(index);
        self.tcb_mut(index).wakeup = wakeup;
        self.ready_i(index);
    }

    /// Check if the ready head must preempt the current thread
    pub fn reschedule_required(&self) -> bool {
        let (Some(current), Some(head)) = (self.current, self.ready.front()) else {
            return false;
        };
        let running = self.tcb(current).prio;
        let ready = self.tcb(head).prio;
        if self.config.timeslicing() && self.slice_left == 0 {
            ready >= running
        } else {
            ready > running
        }
    }

    /// Preempt the current thread if the ready head outranks it.
    pub fn reschedule(&mut self) -> Option<Switch> {
        if self.reschedule_required() {
            Some(self.preempt())
        } else {
            None
        }
    }

    /// Move the current thread back to the ready queue and run the head.
    fn preempt(&mut self) -> Switch {
        let current = self.current_index();
        let next = match Self::intact(self.ready.pop_front(&mut self.threads)) {
            Some(index) => index,
            None => halt::<P>(HaltReason::NoRunnableThread),
        };
        self.ready_i(current);
        self.dispatch(current, next)
    }

    /// Block the current thread in `state` and run the ready head.
    ///
    /// A `Timeout::Ticks` arms the thread's timer; the caller has already
    /// handled `Timeout::Immediate`.
    pub(crate) fn suspend_current(&mut self, state: ThreadState, wait: Wait, timeout: Timeout) -> Switch {
        debug_assert_eq!(self.irq_nesting, 0, "blocking call from interrupt context");
        debug_assert!(!timeout.is_immediate());
        let current = self.current_index();
        {
            let tcb = self.tcb_mut(current);
            tcb.state = state;
            tcb.wait = wait;
        }
        if let Timeout::Ticks(ticks) = timeout {
            self.arm_thread_timer(current, ticks);
        }
        let next = match Self::intact(self.ready.pop_front(&mut self.threads)) {
            Some(index) => index,
            None => halt::<P>(HaltReason::NoRunnableThread),
        };
        self.dispatch(current, next)
    }

    fn dispatch(&mut self, from: Index, to: Index) -> Switch {
        self.tcb_mut(to).state = ThreadState::Running;
        self.current = Some(to);
        self.slice_left = self.config.time_quantum;
        let switch = Switch {
            from: self.threads.id_of(from),
            to: self.threads.id_of(to),
        };
        self.trace.record(SwitchRecord {
            time: self.now,
            from: switch.from,
            to: switch.to,
        });
        switch
    }

    /// Context pointers for the port. They stay valid until the slots are
    /// vacated, which cannot happen before the transfer completes.
    pub(crate) fn contexts(&mut self, switch: Switch) -> (*mut P::Context, *const P::Context) {
        let from: *mut P::Context = &mut self.tcb_mut(switch.from.slot()).ctx;
        let to: *const P::Context = &self.tcb(switch.to.slot()).ctx;
        (from, to)
    }

    pub(crate) fn context(&self, id: ThreadId) -> *const P::Context {
        &self.tcb(id.slot()).ctx
    }

    // Thread-level operations

    /// Outcome of the current thread's last blocking call.
    pub fn wakeup(&self) -> Wakeup {
        self.tcb(self.current_index()).wakeup
    }

    /// Give the CPU to a ready thread of equal or higher priority.
    pub fn yield_now(&mut self) -> Option<Switch> {
        let current = self.current_index();
        let head = self.ready.front()?;
        if self.tcb(head).prio >= self.tcb(current).prio {
            Some(self.preempt())
        } else {
            None
        }
    }

    /// Sleep for `ticks`; zero yields instead.
    pub fn sleep(&mut self, ticks: Ticks) -> Option<Switch> {
        if ticks == 0 {
            return self.yield_now();
        }
        Some(self.suspend_current(ThreadState::Sleeping, Wait::None, Timeout::Ticks(ticks)))
    }

    /// Sleep until the tick counter reaches `deadline`. Returns at once if
    /// the deadline has already passed.
    pub fn sleep_until(&mut self, deadline: Systime) -> Option<Switch> {
        match self.now.until(deadline) {
            0 => None,
            ticks => self.sleep(ticks),
        }
    }

    /// Terminate the current thread with `code`.
    ///
    /// Joiners are woken with the code; threads blocked sending to the
    /// exiting thread fail with `Reset`.
    pub fn exit(&mut self, code: Msg) -> Switch {
        let current = self.current_index();
        debug_assert!(
            self.tcb(current).owned.is_none(),
            "thread exited while owning a mutex"
        );
        self.tcb_mut(current).exit_code = code;
        log::debug!("{} exited with {}", self.threads.id_of(current), code);

        let mut joiners = core::mem::take(&mut self.tcb_mut(current).joiners);
        while let Some(joiner) = Self::intact(joiners.pop_front(&mut self.threads)) {
            self.wake_i(joiner, Wakeup::Signaled(code));
        }
        let mut senders = core::mem::take(&mut self.tcb_mut(current).senders);
        while let Some(sender) = Self::intact(senders.pop_front(&mut self.threads)) {
            self.wake_i(sender, Wakeup::Reset);
        }
        self.suspend_current(ThreadState::Final, Wait::None, Timeout::Never)
    }

    /// Wait for `target` to exit, then release its slot and hand back its
    /// exit code and stack.
    pub fn join(&mut self, target: ThreadId) -> KernelResult<Step<ThreadExit>> {
        let index = self.resolve(target)?;
        let current = self.current_index();
        if index == current {
            return Err(KernelError::JoinSelf);
        }
        if self.tcb(index).state.is_final() {
            return Ok(Step::Done(self.reap(index)));
        }
        let mut joiners = self.tcb(index).joiners;
        Self::intact(joiners.push_back(&mut self.threads, current));
        self.tcb_mut(index).joiners = joiners;
        Ok(Step::Switch(self.suspend_current(
            ThreadState::Suspended(WaitKind::Join),
            Wait::None,
            Timeout::Never,
        )))
    }

    /// Second half of a [`join`](Self::join) that blocked. Fails with
    /// `UnknownThread` if another joiner reaped the target first.
    pub fn finish_join(&mut self, target: ThreadId) -> KernelResult<ThreadExit> {
        let index = self.resolve(target)?;
        if !self.tcb(index).state.is_final() {
            return Err(KernelError::UnknownThread);
        }
        Ok(self.reap(index))
    }

    fn reap(&mut self, index: Index) -> ThreadExit {
        match self.threads.remove(index) {
            Some(tcb) => ThreadExit {
                code: tcb.exit_code,
                stack: tcb.stack,
            },
            None => halt::<P>(HaltReason::CorruptedQueue),
        }
    }

    /// Change the current thread's base priority and reschedule. An
    /// inherited boost above the new priority is kept. Returns the previous
    /// base priority.
    pub fn set_priority(&mut self, cs: CriticalSection<'_>, priority: Priority) -> (Priority, Option<Switch>) {
        let current = self.current_index();
        let old = core::mem::replace(&mut self.tcb_mut(current).base_prio, priority);
        let effective = self.inherited_priority(cs, current);
        self.tcb_mut(current).prio = effective;
        (old, self.reschedule())
    }

    /// Ask `target` to terminate; the thread polls
    /// [`should_terminate`](Self::should_terminate).
    pub fn request_terminate(&mut self, target: ThreadId) -> KernelResult<()> {
        let index = self.resolve(target)?;
        self.tcb_mut(index).terminate = true;
        Ok(())
    }

    pub fn should_terminate(&self) -> bool {
        self.tcb(self.current_index()).terminate
    }

    /// Suspend the current thread until another party resumes it with a
    /// message, or until the timeout expires.
    pub fn suspend(&mut self, timeout: Timeout) -> Step<WaitResult<Msg>> {
        if timeout.is_immediate() {
            return Step::Done(Err(WaitError::Timeout));
        }
        Step::Switch(self.suspend_current(
            ThreadState::Suspended(WaitKind::Resume),
            Wait::None,
            timeout,
        ))
    }

    /// Resume a thread suspended by [`suspend`](Self::suspend) or created
    /// suspended, delivering `msg`. Returns false if it was not suspended
    /// that way. No reschedule.
    pub fn resume_i(&mut self, target: ThreadId, msg: Msg) -> KernelResult<bool> {
        let index = self.resolve(target)?;
        if self.tcb(index).state != ThreadState::Suspended(WaitKind::Resume) {
            return Ok(false);
        }
        self.wake_i(index, Wakeup::Signaled(msg));
        Ok(true)
    }

    /// [`resume_i`](Self::resume_i) followed by a reschedule.
    pub fn resume(&mut self, target: ThreadId, msg: Msg) -> KernelResult<(bool, Option<Switch>)> {
        let resumed = self.resume_i(target, msg)?;
        Ok((resumed, self.reschedule()))
    }

    // Interrupt bracket

    /// Enter interrupt context.
    pub fn irq_enter(&mut self) {
        self.irq_nesting += 1;
    }

    /// Leave interrupt context; the outermost exit reschedules.
    pub fn irq_exit(&mut self) -> Option<Switch> {
        debug_assert!(self.irq_nesting > 0, "unbalanced irq_exit");
        self.irq_nesting = self.irq_nesting.saturating_sub(1);
        if self.irq_nesting == 0 && self.is_started() {
            self.reschedule()
        } else {
            None
        }
    }

    pub fn in_irq(&self) -> bool {
        self.irq_nesting > 0
    }

    // Introspection

    pub fn current(&self) -> Option<ThreadId> {
        self.current.map(|index| self.threads.id_of(index))
    }

    pub fn state(&self, id: ThreadId) -> KernelResult<ThreadState> {
        self.resolve(id).map(|index| self.tcb(index).state)
    }

    /// Effective priority, including any inherited boost
    pub fn priority(&self, id: ThreadId) -> KernelResult<Priority> {
        self.resolve(id).map(|index| self.tcb(index).prio)
    }

    pub fn base_priority(&self, id: ThreadId) -> KernelResult<Priority> {
        self.resolve(id).map(|index| self.tcb(index).base_prio)
    }

    pub fn now(&self) -> Systime {
        self.now
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn trace(&self) -> &SwitchTrace {
        &self.trace
    }

    /// Ready threads, head first
    pub fn ready_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready
            .iter(&self.threads)
            .map(|index| self.threads.id_of(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testport::{self, TestPort};
    use rtk_core::MSG_OK;

    type K = Kernel<TestPort, 8, 2>;

    fn kernel() -> K {
        K::new(KernelConfig::DEFAULT)
    }

    fn spawn(k: &mut K, prio: u8) -> ThreadId {
        k.create(testport::stack(128), Priority::new(prio), testport::spin, 0)
            .unwrap()
    }

    #[test]
    fn undersized_stack_is_rejected_at_creation() {
        let mut k = kernel();
        let err = k
            .create(testport::stack(8), Priority::NORMAL, testport::spin, 0)
            .unwrap_err();
        assert_eq!(
            err,
            KernelError::StackTooSmall {
                required: TestPort::MIN_STACK,
                provided: 8
            }
        );
    }

    #[test]
    fn full_table_is_reported() {
        let mut k = kernel();
        for _ in 0..8 {
            spawn(&mut k, 1);
        }
        let err = k
            .create(testport::stack(128), Priority::LOWEST, testport::spin, 0)
            .unwrap_err();
        assert_eq!(err, KernelError::NoFreeSlot);
    }

    #[test]
    fn context_is_built_from_entry_and_arg() {
        let mut k = kernel();
        let id = k
            .create(testport::stack(96), Priority::NORMAL, testport::spin, 42)
            .unwrap();
        let ctx = k.tcb(id.slot()).ctx;
        assert_eq!(ctx.arg, 42);
        assert_eq!(ctx.stack_len, 96);
    }

    #[test]
    fn start_picks_the_most_urgent_thread() {
        let mut k = kernel();
        spawn(&mut k, 0);
        let t1 = spawn(&mut k, 10);
        let t2 = spawn(&mut k, 20);
        assert_eq!(k.start(), t2);
        assert_eq!(k.state(t2), Ok(ThreadState::Running));
        assert_eq!(k.state(t1), Ok(ThreadState::Ready));
        assert!(!k.reschedule_required());
    }

    #[test]
    #[should_panic(expected = "NoRunnableThread")]
    fn start_without_threads_halts() {
        let mut k = kernel();
        k.start();
    }

    #[test]
    #[should_panic(expected = "NoRunnableThread")]
    fn sleeping_last_thread_halts() {
        let mut k = kernel();
        spawn(&mut k, 5);
        k.start();
        let _ = k.sleep(4);
    }

    #[test]
    #[should_panic(expected = "NoRunnableThread")]
    fn blocking_last_thread_on_a_semaphore_halts() {
        let mut k = kernel();
        spawn(&mut k, 5);
        k.start();
        let sem: &'static crate::sem::Semaphore = Box::leak(Box::new(crate::sem::Semaphore::new(0)));
        critical_section::with(|cs| {
            let _ = k.sem_wait(cs, sem, Timeout::Never);
        });
    }

    #[test]
    #[should_panic(expected = "CorruptedQueue")]
    fn broken_link_halts() {
        K::intact::<()>(Err(Corrupted));
    }

    #[test]
    #[should_panic(expected = "CorruptedQueue")]
    fn reading_a_message_that_was_never_sent_halts() {
        let mut k = kernel();
        spawn(&mut k, 5);
        k.start();
        let _ = k.received();
    }

    #[test]
    fn sleep_switches_to_next_and_tick_wakes() {
        let mut k = kernel();
        let idle = spawn(&mut k, 0);
        let worker = spawn(&mut k, 10);
        k.start();

        let switch = k.sleep(3).unwrap();
        assert_eq!(switch, Switch { from: worker, to: idle });
        assert_eq!(k.state(worker), Ok(ThreadState::Sleeping));

        critical_section::with(|cs| {
            k.tick(cs);
            k.tick(cs);
        });
        assert_eq!(k.state(worker), Ok(ThreadState::Sleeping));
        critical_section::with(|cs| k.tick(cs));
        assert_eq!(k.state(worker), Ok(ThreadState::Ready));
        assert_eq!(k.reschedule(), Some(Switch { from: idle, to: worker }));
        assert_eq!(k.wakeup().into_wait(), Ok(()));
    }

    #[test]
    fn yield_rotates_equal_priorities_only() {
        let mut k = kernel();
        let a = spawn(&mut k, 5);
        let b = spawn(&mut k, 5);
        spawn(&mut k, 1);
        k.start();

        assert_eq!(k.yield_now(), Some(Switch { from: a, to: b }));
        assert_eq!(k.yield_now(), Some(Switch { from: b, to: a }));

        let mut k = kernel();
        spawn(&mut k, 5);
        spawn(&mut k, 1);
        k.start();
        assert_eq!(k.yield_now(), None);
        assert_eq!(k.sleep(0), None);
    }

    #[test]
    fn sleep_until_past_deadline_returns_at_once() {
        let mut k = kernel();
        spawn(&mut k, 0);
        spawn(&mut k, 3);
        k.start();
        critical_section::with(|cs| k.tick(cs));
        assert_eq!(k.sleep_until(Systime::new(1)), None);
        assert!(k.sleep_until(Systime::new(4)).is_some());
    }

    #[test]
    fn join_returns_code_and_stack() {
        let mut k = kernel();
        spawn(&mut k, 0);
        let parent = spawn(&mut k, 5);
        k.start();
        let child = spawn(&mut k, 9);
        assert_eq!(k.reschedule(), Some(Switch { from: parent, to: child }));

        assert_eq!(k.exit(7).to, parent);
        assert_eq!(k.state(child), Ok(ThreadState::Final));
        let Step::Done(exit) = k.join(child).unwrap() else {
            panic!("join blocked on a finished thread");
        };
        assert_eq!(exit.code, 7);
        assert_eq!(exit.stack.len(), 128);
        assert_eq!(k.state(child), Err(KernelError::UnknownThread));
    }

    #[test]
    fn blocked_joiner_is_woken_by_exit() {
        let mut k = kernel();
        let idle = spawn(&mut k, 0);
        let parent = spawn(&mut k, 9);
        let child = spawn(&mut k, 5);
        k.start();

        let step = k.join(child).unwrap();
        assert_eq!(step.switch(), Some(Switch { from: parent, to: child }));
        assert!(matches!(k.join(child), Err(KernelError::JoinSelf)));

        let switch = k.exit(-1);
        assert_eq!(switch, Switch { from: child, to: parent });
        assert_eq!(k.wakeup().into_msg(), Ok(-1));
        let exit = k.finish_join(child).unwrap();
        assert_eq!(exit.code, -1);
        assert_eq!(k.ready_threads().collect::<std::vec::Vec<_>>(), [idle]);
    }

    #[test]
    fn suspended_creation_waits_for_resume() {
        let mut k = kernel();
        spawn(&mut k, 0);
        let main = spawn(&mut k, 5);
        k.start();
        let worker = k
            .create_suspended(testport::stack(128), Priority::new(8), testport::spin, 0)
            .unwrap();
        assert_eq!(k.state(worker), Ok(ThreadState::Suspended(WaitKind::Resume)));
        assert!(k.ready_threads().all(|id| id != worker));

        let (resumed, switch) = k.resume(worker, MSG_OK).unwrap();
        assert!(resumed);
        assert_eq!(switch, Some(Switch { from: main, to: worker }));
        assert_eq!(k.resume_i(worker, MSG_OK), Ok(false));
    }

    #[test]
    fn suspend_times_out_or_receives_message() {
        let mut k = kernel();
        let idle = spawn(&mut k, 0);
        let driver = spawn(&mut k, 5);
        k.start();

        assert_eq!(k.suspend(Timeout::Immediate).switch(), None);
        assert!(k.suspend(Timeout::Ticks(2)).switch().is_some());
        critical_section::with(|cs| {
            k.tick(cs);
            k.tick(cs);
        });
        assert_eq!(k.reschedule(), Some(Switch { from: idle, to: driver }));
        assert_eq!(k.wakeup().into_msg(), Err(WaitError::Timeout));

        assert!(k.suspend(Timeout::Never).switch().is_some());
        k.irq_enter();
        assert_eq!(k.resume_i(driver, 99), Ok(true));
        assert_eq!(k.irq_exit(), Some(Switch { from: idle, to: driver }));
        assert_eq!(k.wakeup().into_msg(), Ok(99));
    }

    #[test]
    fn lowering_priority_yields_to_more_urgent_thread() {
        let mut k = kernel();
        let low = spawn(&mut k, 3);
        let high = spawn(&mut k, 6);
        k.start();

        let (old, switch) = critical_section::with(|cs| k.set_priority(cs, Priority::new(2)));
        assert_eq!(old, Priority::new(6));
        assert_eq!(switch, Some(Switch { from: high, to: low }));
        assert_eq!(k.priority(high), Ok(Priority::new(2)));
    }

    #[test]
    fn terminate_request_is_visible_to_target() {
        let mut k = kernel();
        let a = spawn(&mut k, 3);
        k.start();
        assert!(!k.should_terminate());
        k.request_terminate(a).unwrap();
        assert!(k.should_terminate());
    }

    #[test]
    fn quantum_expiry_rotates_peers() {
        let mut k: K = Kernel::new(KernelConfig::builder().time_quantum(2).build());
        let a = spawn(&mut k, 4);
        let b = spawn(&mut k, 4);
        k.start();

        critical_section::with(|cs| k.tick(cs));
        assert_eq!(k.reschedule(), None);
        critical_section::with(|cs| k.tick(cs));
        assert_eq!(k.reschedule(), Some(Switch { from: a, to: b }));
        critical_section::with(|cs| {
            k.tick(cs);
            k.tick(cs);
        });
        assert_eq!(k.reschedule(), Some(Switch { from: b, to: a }));
    }
}
