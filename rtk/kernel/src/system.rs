//! Thread-facing system API.
//!
//! [`System`] wraps a [`Kernel`] in a critical-section mutex so it can live
//! in a `static`. Every call masks interrupts, runs one kernel operation and,
//! if the scheduler picked another thread, hands the two contexts to the
//! port before unmasking. Blocking calls then read their outcome in a second
//! critical section, after the calling thread was resumed.
//!
//! # Example
//!
//! ```ignore
//! static SYSTEM: System<CortexM, 4, 2> = System::new(KernelConfig::DEFAULT);
//! static DATA: Semaphore = Semaphore::new(0);
//!
//! fn consumer(_: usize) -> ! {
//!     loop {
//!         if SYSTEM.sem_wait_timeout(&DATA, Timeout::Ticks(100)).is_err() {
//!             log::warn!("no data");
//!         }
//!     }
//! }
//!
//! #[interrupt]
//! fn UART0() {
//!     SYSTEM.interrupt(|| SYSTEM.sem_signal_from_isr(&DATA));
//! }
//! ```

use core::cell::{RefCell, RefMut};
use core::marker::PhantomData;

use critical_section::CriticalSection;
use rtk_core::{
    EventMask, KernelResult, Msg, Priority, Systime, ThreadState, Ticks, Timeout, WaitResult,
};

use crate::config::KernelConfig;
use crate::event::{dispatch, EventHandler, EventListener, EventSource};
use crate::mutex::Mutex;
use crate::port::{Port, ThreadEntry};
use crate::sched::{Kernel, Step, Switch};
use crate::sem::Semaphore;
use crate::thread::{ThreadExit, ThreadId};
use crate::vt::{TimerCallback, TimerId};

/// Kernel instance shared by threads and interrupt handlers.
pub struct System<P: Port, const N: usize, const T: usize> {
    kernel: critical_section::Mutex<RefCell<Kernel<P, N, T>>>,
}

impl<P: Port, const N: usize, const T: usize> System<P, N, T> {
    pub const fn new(config: KernelConfig) -> Self {
        Self {
            kernel: critical_section::Mutex::new(RefCell::new(Kernel::new(config))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Kernel<P, N, T>, CriticalSection<'_>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.kernel.borrow_ref_mut(cs), cs))
    }

    /// Run an operation that may reschedule.
    fn run<R>(
        &self,
        f: impl FnOnce(&mut Kernel<P, N, T>, CriticalSection<'_>) -> (R, Option<Switch>),
    ) -> R {
        critical_section::with(|cs| {
            let mut kernel = self.kernel.borrow_ref_mut(cs);
            let (result, switch) = f(&mut kernel, cs);
            if let Some(switch) = switch {
                Self::transfer(kernel, switch);
            }
            result
        })
    }

    /// Run an operation that may block, then read the outcome with `finish`
    /// once the caller runs again.
    fn block_on<R>(
        &self,
        op: impl FnOnce(&mut Kernel<P, N, T>, CriticalSection<'_>) -> Step<R>,
        finish: impl FnOnce(&mut Kernel<P, N, T>) -> R,
    ) -> R {
        let done = critical_section::with(|cs| {
            let mut kernel = self.kernel.borrow_ref_mut(cs);
            match op(&mut kernel, cs) {
                Step::Done(result) => Some(result),
                Step::Switch(switch) => {
                    Self::transfer(kernel, switch);
                    None
                }
            }
        });
        match done {
            Some(result) => result,
            None => self.with(|kernel, _| finish(kernel)),
        }
    }

    fn transfer(mut kernel: RefMut<'_, Kernel<P, N, T>>, switch: Switch) {
        let (from, to) = kernel.contexts(switch);
        drop(kernel);
        // SAFETY: interrupts are masked for the whole critical section and
        // both contexts belong to live slots of the statically allocated
        // thread table.
        unsafe { P::switch(from, to) }
    }

    /// Run read-only diagnostics against the kernel state.
    pub fn inspect<R>(&self, f: impl FnOnce(&Kernel<P, N, T>) -> R) -> R {
        critical_section::with(|cs| f(&self.kernel.borrow_ref(cs)))
    }

    // Threads

    /// Create a ready thread; it preempts the caller if more urgent.
    pub fn create(
        &self,
        stack: &'static mut [u8],
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
    ) -> KernelResult<ThreadId> {
        self.run(|kernel, _| match kernel.create(stack, priority, entry, arg) {
            Ok(id) => (Ok(id), kernel.reschedule()),
            Err(err) => (Err(err), None),
        })
    }

    /// Create a thread that waits for [`resume`](Self::resume).
    pub fn create_suspended(
        &self,
        stack: &'static mut [u8],
        priority: Priority,
        entry: ThreadEntry,
        arg: usize,
    ) -> KernelResult<ThreadId> {
        self.with(|kernel, _| kernel.create_suspended(stack, priority, entry, arg))
    }

    /// Resume a suspended thread with `msg`. Returns false if it was not
    /// suspended.
    pub fn resume(&self, target: ThreadId, msg: Msg) -> KernelResult<bool> {
        self.run(|kernel, _| match kernel.resume(target, msg) {
            Ok((resumed, switch)) => (Ok(resumed), switch),
            Err(err) => (Err(err), None),
        })
    }

    pub fn resume_from_isr(&self, target: ThreadId, msg: Msg) -> KernelResult<bool> {
        self.with(|kernel, _| kernel.resume_i(target, msg))
    }

    /// Suspend the caller until resumed or timed out.
    pub fn suspend(&self, timeout: Timeout) -> WaitResult<Msg> {
        self.block_on(
            |kernel, _| kernel.suspend(timeout),
            |kernel| kernel.wakeup().into_msg(),
        )
    }

    /// Terminate the calling thread.
    pub fn exit(&self, code: Msg) -> ! {
        self.run(|kernel, _| ((), Some(kernel.exit(code))));
        // a deferring port switches away as soon as interrupts are unmasked
        loop {
            core::hint::spin_loop();
        }
    }

    /// Wait for `target` to exit and reclaim its slot and stack.
    pub fn join(&self, target: ThreadId) -> KernelResult<ThreadExit> {
        let done: KernelResult<Option<ThreadExit>> = critical_section::with(|cs| {
            let mut kernel = self.kernel.borrow_ref_mut(cs);
            match kernel.join(target)? {
                Step::Done(exit) => Ok(Some(exit)),
                Step::Switch(switch) => {
                    Self::transfer(kernel, switch);
                    Ok(None)
                }
            }
        });
        match done? {
            Some(exit) => Ok(exit),
            None => self.with(|kernel, _| kernel.finish_join(target)),
        }
    }

    pub fn sleep(&self, ticks: Ticks) {
        self.run(|kernel, _| ((), kernel.sleep(ticks)));
    }

    pub fn sleep_until(&self, deadline: Systime) {
        self.run(|kernel, _| ((), kernel.sleep_until(deadline)));
    }

    pub fn yield_now(&self) {
        self.run(|kernel, _| ((), kernel.yield_now()));
    }

    /// Change the caller's base priority; returns the previous one.
    pub fn set_priority(&self, priority: Priority) -> Priority {
        self.run(|kernel, cs| kernel.set_priority(cs, priority))
    }

    pub fn request_terminate(&self, target: ThreadId) -> KernelResult<()> {
        self.with(|kernel, _| kernel.request_terminate(target))
    }

    pub fn should_terminate(&self) -> bool {
        self.with(|kernel, _| kernel.should_terminate())
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.inspect(|kernel| kernel.current())
    }

    pub fn state(&self, id: ThreadId) -> KernelResult<ThreadState> {
        self.inspect(|kernel| kernel.state(id))
    }

    pub fn priority(&self, id: ThreadId) -> KernelResult<Priority> {
        self.inspect(|kernel| kernel.priority(id))
    }

    pub fn now(&self) -> Systime {
        self.inspect(|kernel| kernel.now())
    }

    // Semaphores

    pub fn sem_wait(&self, sem: &'static Semaphore) -> WaitResult<()> {
        self.sem_wait_timeout(sem, Timeout::Never)
    }

    pub fn sem_wait_timeout(&self, sem: &'static Semaphore, timeout: Timeout) -> WaitResult<()> {
        self.block_on(
            |kernel, cs| kernel.sem_wait(cs, sem, timeout),
            |kernel| kernel.wakeup().into_wait(),
        )
    }

    pub fn sem_signal(&self, sem: &'static Semaphore) {
        self.run(|kernel, cs| ((), kernel.sem_signal(cs, sem)));
    }

    pub fn sem_signal_from_isr(&self, sem: &'static Semaphore) {
        self.with(|kernel, cs| kernel.sem_signal_i(cs, sem));
    }

    pub fn sem_reset(&self, sem: &'static Semaphore, count: i32) {
        self.run(|kernel, cs| ((), kernel.sem_reset(cs, sem, count)));
    }

    /// Signal `signal` and wait on `wait` atomically.
    pub fn sem_signal_wait(
        &self,
        signal: &'static Semaphore,
        wait: &'static Semaphore,
        timeout: Timeout,
    ) -> WaitResult<()> {
        self.block_on(
            |kernel, cs| kernel.sem_signal_wait(cs, signal, wait, timeout),
            |kernel| kernel.wakeup().into_wait(),
        )
    }

    pub fn sem_count(&self, sem: &'static Semaphore) -> i32 {
        critical_section::with(|cs| sem.count(cs))
    }

    // Mutexes

    /// Lock `mutex`, boosting its owner while the caller waits.
    pub fn lock(&self, mutex: &'static Mutex) -> MutexGuard<'_, P, N, T> {
        self.block_on(|kernel, cs| kernel.lock(cs, mutex), |_| ());
        MutexGuard::new(self, mutex)
    }

    pub fn try_lock(&self, mutex: &'static Mutex) -> Option<MutexGuard<'_, P, N, T>> {
        self.with(|kernel, cs| kernel.try_lock(cs, mutex))
            .then(|| MutexGuard::new(self, mutex))
    }

    fn unlock(&self, mutex: &'static Mutex) {
        self.run(|kernel, cs| ((), kernel.unlock(cs, mutex)));
    }

    // Events

    pub fn register(
        &self,
        source: &'static EventSource,
        listener: &'static EventListener,
        id: u8,
        interest: EventMask,
    ) {
        self.with(|kernel, cs| kernel.register(cs, source, listener, id, interest));
    }

    pub fn unregister(&self, source: &'static EventSource, listener: &'static EventListener) -> bool {
        self.with(|kernel, cs| kernel.unregister(cs, source, listener))
    }

    pub fn broadcast(&self, source: &'static EventSource, flags: EventMask) {
        self.run(|kernel, cs| ((), kernel.broadcast(cs, source, flags)));
    }

    pub fn broadcast_from_isr(&self, source: &'static EventSource, flags: EventMask) {
        self.with(|kernel, cs| kernel.broadcast_i(cs, source, flags));
    }

    /// Wait for any flag of `mask` on `listener`.
    pub fn wait_events(
        &self,
        listener: &'static EventListener,
        mask: EventMask,
        timeout: Timeout,
    ) -> WaitResult<EventMask> {
        self.block_on(
            |kernel, cs| kernel.wait_events(cs, listener, mask, timeout),
            |kernel| kernel.wakeup().into_events(),
        )
    }

    pub fn clear_events(&self, listener: &'static EventListener, mask: EventMask) -> EventMask {
        self.with(|kernel, cs| kernel.clear_events(cs, listener, mask))
    }

    /// Wait for any event id of `mask` across all of the caller's listeners.
    pub fn wait_any_event(&self, mask: EventMask, timeout: Timeout) -> WaitResult<EventMask> {
        self.block_on(
            |kernel, _| kernel.wait_any_event(mask, timeout),
            |kernel| kernel.wakeup().into_events(),
        )
    }

    pub fn clear_event_ids(&self, mask: EventMask) -> EventMask {
        self.with(|kernel, _| kernel.clear_event_ids(mask))
    }

    /// Wait for any event id of `mask`, then run `handlers[id]` for each
    /// delivered id. Returns the ids served.
    pub fn serve_events(&self, mask: EventMask, handlers: &[EventHandler]) -> EventMask {
        let events = self.wait_any_event(mask, Timeout::Never).unwrap_or(EventMask::NONE);
        dispatch(handlers, events);
        events
    }

    // Messages

    /// Send `msg` to `target` and wait for the answer.
    pub fn send(&self, target: ThreadId, msg: Msg) -> WaitResult<Msg> {
        self.block_on(
            |kernel, _| kernel.send(target, msg),
            |kernel| kernel.wakeup().into_msg(),
        )
    }

    /// Wait for the next message; answer it with [`release`](Self::release).
    pub fn receive(&self) -> (ThreadId, Msg) {
        self.block_on(|kernel, _| kernel.receive(), |kernel| kernel.received())
    }

    pub fn release(&self, answer: Msg) {
        self.run(|kernel, _| ((), kernel.release(answer)));
    }

    // Timers

    pub fn timer_create(&self, callback: TimerCallback, arg: usize) -> KernelResult<TimerId> {
        self.with(|kernel, _| kernel.timer_create(callback, arg))
    }

    pub fn timer_delete(&self, id: TimerId) -> KernelResult<()> {
        self.with(|kernel, _| kernel.timer_delete(id))
    }

    pub fn timer_arm(&self, id: TimerId, delay: Ticks, period: Option<Ticks>) -> KernelResult<()> {
        self.with(|kernel, _| kernel.timer_arm(id, delay, period))
    }

    pub fn timer_disarm(&self, id: TimerId) -> KernelResult<bool> {
        self.with(|kernel, _| kernel.timer_disarm(id))
    }

    pub fn timer_is_armed(&self, id: TimerId) -> KernelResult<bool> {
        self.inspect(|kernel| kernel.timer_is_armed(id))
    }

    // Interrupts and control

    pub fn irq_enter(&self) {
        self.with(|kernel, _| kernel.irq_enter());
    }

    /// Leave interrupt context, switching threads if the handler readied a
    /// more urgent one.
    pub fn irq_exit(&self) {
        self.run(|kernel, _| ((), kernel.irq_exit()));
    }

    /// Run an interrupt handler body between `irq_enter` and `irq_exit`.
    pub fn interrupt<R>(&self, handler: impl FnOnce() -> R) -> R {
        self.irq_enter();
        let result = handler();
        self.irq_exit();
        result
    }

    /// Advance time by one tick. Call from the tick interrupt, inside
    /// [`interrupt`](Self::interrupt).
    pub fn tick(&self) {
        self.with(|kernel, cs| kernel.tick(cs));
    }

    /// Run the most urgent ready thread. Never returns.
    pub fn start(&self) -> ! {
        let first = self.with(|kernel, _| {
            let id = kernel.start();
            kernel.context(id)
        });
        // SAFETY: the context lives in the statically allocated thread table
        // and the first thread is never reaped before it exits.
        unsafe { P::start(first) }
    }
}

/// Lock on a [`Mutex`], released when dropped.
///
/// Guards must be dropped in reverse locking order and on the thread that
/// took them.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, P: Port, const N: usize, const T: usize> {
    system: &'a System<P, N, T>,
    mutex: &'static Mutex,
    _not_send: PhantomData<*const ()>,
}

impl<'a, P: Port, const N: usize, const T: usize> MutexGuard<'a, P, N, T> {
    fn new(system: &'a System<P, N, T>, mutex: &'static Mutex) -> Self {
        Self {
            system,
            mutex,
            _not_send: PhantomData,
        }
    }
}

impl<P: Port, const N: usize, const T: usize> Drop for MutexGuard<'_, P, N, T> {
    fn drop(&mut self) {
        self.system.unlock(self.mutex);
    }
}
