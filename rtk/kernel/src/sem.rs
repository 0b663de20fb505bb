//! Counting semaphore.
//!
//! The counter goes negative while threads wait: `count < 0` means exactly
//! `-count` threads are queued, FIFO. A timed-out waiter gives its
//! decrement back, so the counter always equals the initial value plus
//! signals minus successful waits.
//!
//! # Example
//!
//! ```ignore
//! static READY: Semaphore = Semaphore::new(0);
//!
//! // consumer thread
//! SYSTEM.sem_wait(&READY)?;
//!
//! // interrupt handler
//! SYSTEM.sem_signal_from_isr(&READY);
//! ```

use core::cell::Cell;

use critical_section::CriticalSection;
use rtk_core::{HaltReason, ThreadState, Timeout, WaitError, WaitKind, WaitResult, MSG_OK};

use crate::halt::halt;
use crate::list::{Arena, Corrupted, Index, Queue};
use crate::port::Port;
use crate::sched::{Kernel, Step, Switch};
use crate::thread::{Wait, Wakeup};

#[derive(Debug, Clone, Copy)]
struct SemState {
    count: i32,
    queue: Queue,
}

/// Counting semaphore with a FIFO wait queue.
pub struct Semaphore {
    state: critical_section::Mutex<Cell<SemState>>,
}

impl Semaphore {
    /// Creates a semaphore holding `count` units.
    pub const fn new(count: i32) -> Self {
        assert!(count >= 0, "semaphore count must not be negative");
        Self {
            state: critical_section::Mutex::new(Cell::new(SemState {
                count,
                queue: Queue::new(),
            })),
        }
    }

    /// Current counter; negative values count the waiters.
    pub fn count(&self, cs: CriticalSection<'_>) -> i32 {
        self.load(cs).count
    }

    fn load(&self, cs: CriticalSection<'_>) -> SemState {
        self.state.borrow(cs).get()
    }

    fn store(&self, cs: CriticalSection<'_>, state: SemState) {
        self.state.borrow(cs).set(state);
    }

    /// Take a timed-out waiter off the queue and give back its unit.
    pub(crate) fn withdraw<A: Arena + ?Sized>(
        &self,
        cs: CriticalSection<'_>,
        arena: &mut A,
        index: Index,
    ) -> Result<(), Corrupted> {
        let mut state = self.load(cs);
        state.queue.remove(arena, index)?;
        state.count += 1;
        self.store(cs, state);
        Ok(())
    }
}

impl<P: Port, const N: usize, const T: usize> Kernel<P, N, T> {
    /// Take a unit, blocking up to `timeout` while none is available.
    ///
    /// `Timeout::Immediate` fails with `Timeout` instead of blocking and
    /// leaves the counter untouched.
    pub fn sem_wait(
        &mut self,
        cs: CriticalSection<'_>,
        sem: &'static Semaphore,
        timeout: Timeout,
    ) -> Step<WaitResult<()>> {
        let mut state = sem.load(cs);
        if state.count > 0 {
            state.count -= 1;
            sem.store(cs, state);
            return Step::Done(Ok(()));
        }
        if timeout.is_immediate() {
            return Step::Done(Err(WaitError::Timeout));
        }
        let current = self.current_index();
        state.count -= 1;
        Self::intact(state.queue.push_back(&mut self.threads, current));
        sem.store(cs, state);
        Step::Switch(self.suspend_current(
            ThreadState::Suspended(WaitKind::Semaphore),
            Wait::Semaphore(sem),
            timeout,
        ))
    }

    /// Add a unit, readying the oldest waiter if there is one. No
    /// reschedule.
    pub fn sem_signal_i(&mut self, cs: CriticalSection<'_>, sem: &'static Semaphore) {
        let mut state = sem.load(cs);
        state.count += 1;
        let waiter = if state.count <= 0 {
            match Self::intact(state.queue.pop_front(&mut self.threads)) {
                Some(index) => Some(index),
                None => halt::<P>(HaltReason::CorruptedQueue),
            }
        } else {
            None
        };
        sem.store(cs, state);
        if let Some(index) = waiter {
            self.wake_i(index, Wakeup::Signaled(MSG_OK));
        }
    }

    /// [`sem_signal_i`](Self::sem_signal_i) followed by a reschedule.
    pub fn sem_signal(&mut self, cs: CriticalSection<'_>, sem: &'static Semaphore) -> Option<Switch> {
        self.sem_signal_i(cs, sem);
        self.reschedule()
    }

    /// Set the counter to `count`, failing every waiter with `Reset`.
    pub fn sem_reset(
        &mut self,
        cs: CriticalSection<'_>,
        sem: &'static Semaphore,
        count: i32,
    ) -> Option<Switch> {
        debug_assert!(count >= 0, "semaphore count must not be negative");
        let mut state = sem.load(cs);
        let mut waiters = core::mem::take(&mut state.queue);
        state.count = count;
        sem.store(cs, state);
        while let Some(index) = Self::intact(waiters.pop_front(&mut self.threads)) {
            self.wake_i(index, Wakeup::Reset);
        }
        self.reschedule()
    }

    /// Signal `signal` and wait on `wait` as one atomic step.
    pub fn sem_signal_wait(
        &mut self,
        cs: CriticalSection<'_>,
        signal: &'static Semaphore,
        wait: &'static Semaphore,
        timeout: Timeout,
    ) -> Step<WaitResult<()>> {
        self.sem_signal_i(cs, signal);
        match self.sem_wait(cs, wait, timeout) {
            Step::Done(result) => {
                // a preempted caller reads its outcome from the wake-up slot
                let current = self.current_index();
                self.tcb_mut(current).wakeup = match result {
                    Ok(()) => Wakeup::Signaled(MSG_OK),
                    Err(_) => Wakeup::Timeout,
                };
                match self.reschedule() {
                    Some(switch) => Step::Switch(switch),
                    None => Step::Done(result),
                }
            }
            blocked => blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::testport::{self, TestPort};
    use crate::thread::ThreadId;
    use rtk_core::Priority;

    type K = Kernel<TestPort, 6, 0>;

    fn spawn(k: &mut K, prio: u8) -> ThreadId {
        k.create(testport::stack(128), Priority::new(prio), testport::spin, 0)
            .unwrap()
    }

    fn leak(count: i32) -> &'static Semaphore {
        Box::leak(Box::new(Semaphore::new(count)))
    }

    #[test]
    fn available_unit_is_taken_without_blocking() {
        let mut k = K::new(KernelConfig::DEFAULT);
        spawn(&mut k, 1);
        k.start();
        let sem = leak(2);
        critical_section::with(|cs| {
            assert!(matches!(k.sem_wait(cs, sem, Timeout::Never), Step::Done(Ok(()))));
            assert!(matches!(k.sem_wait(cs, sem, Timeout::Never), Step::Done(Ok(()))));
            assert!(matches!(
                k.sem_wait(cs, sem, Timeout::Immediate),
                Step::Done(Err(WaitError::Timeout))
            ));
            assert_eq!(sem.count(cs), 0);
        });
    }

    #[test]
    fn zero_tick_timeout_does_not_block() {
        let mut k = K::new(KernelConfig::DEFAULT);
        spawn(&mut k, 0);
        let waiter = spawn(&mut k, 3);
        k.start();
        let sem = leak(0);
        critical_section::with(|cs| {
            assert!(matches!(
                k.sem_wait(cs, sem, Timeout::Ticks(0)),
                Step::Done(Err(WaitError::Timeout))
            ));
            assert_eq!(sem.count(cs), 0);
        });
        assert_eq!(k.state(waiter), Ok(ThreadState::Running));
        assert_eq!(k.next_deadline(), None);
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let mut k = K::new(KernelConfig::DEFAULT);
        let idle = spawn(&mut k, 0);
        let a = spawn(&mut k, 5);
        let b = spawn(&mut k, 5);
        let c = spawn(&mut k, 5);
        k.start();
        let sem = leak(0);

        critical_section::with(|cs| {
            assert_eq!(k.sem_wait(cs, sem, Timeout::Never).switch().map(|s| s.to), Some(b));
            assert_eq!(k.sem_wait(cs, sem, Timeout::Never).switch().map(|s| s.to), Some(c));
            assert_eq!(k.sem_wait(cs, sem, Timeout::Never).switch().map(|s| s.to), Some(idle));
            assert_eq!(sem.count(cs), -3);

            k.irq_enter();
            k.sem_signal_i(cs, sem);
            k.sem_signal_i(cs, sem);
            assert_eq!(sem.count(cs), -1);
            assert_eq!(k.irq_exit().map(|s| s.to), Some(a));
            assert_eq!(k.ready_threads().collect::<Vec<_>>(), [b, idle]);
        });
        assert_eq!(k.wakeup().into_wait(), Ok(()));
    }

    #[test]
    fn reset_fails_waiters() {
        let mut k = K::new(KernelConfig::DEFAULT);
        let idle = spawn(&mut k, 0);
        let waiter = spawn(&mut k, 4);
        k.start();
        let sem = leak(0);

        critical_section::with(|cs| {
            assert!(k.sem_wait(cs, sem, Timeout::Ticks(50)).switch().is_some());
            let switch = k.sem_reset(cs, sem, 3);
            assert_eq!(switch.map(|s| (s.from, s.to)), Some((idle, waiter)));
            assert_eq!(sem.count(cs), 3);
        });
        assert_eq!(k.wakeup().into_wait(), Err(WaitError::Reset));
        assert_eq!(k.next_deadline(), None);
    }

    #[test]
    fn signal_wait_hands_the_cpu_over() {
        let mut k = K::new(KernelConfig::DEFAULT);
        spawn(&mut k, 0);
        let client = spawn(&mut k, 6);
        let server = spawn(&mut k, 6);
        k.start();
        let request = leak(0);
        let reply = leak(0);

        critical_section::with(|cs| {
            // server parks on the request semaphore
            let _ = k.yield_now();
            assert_eq!(k.current(), Some(server));
            assert_eq!(k.sem_wait(cs, request, Timeout::Never).switch().map(|s| s.to), Some(client));

            let step = k.sem_signal_wait(cs, request, reply, Timeout::Never);
            assert_eq!(step.switch().map(|s| (s.from, s.to)), Some((client, server)));
            assert_eq!(request.count(cs), 0);
            assert_eq!(reply.count(cs), -1);
        });
    }
}
