//! Mutex with priority inheritance.
//!
//! Waiters queue by priority. While a thread owns a mutex its effective
//! priority is at least that of the most urgent waiter; if the owner is
//! itself blocked on another mutex the boost travels along the chain of
//! owners. Each thread keeps the mutexes it owns as a stack (most recent
//! first) threaded through the mutexes, and releases them in reverse lock
//! order.

use core::cell::Cell;
use core::ptr;

use critical_section::CriticalSection;
use rtk_core::{HaltReason, Priority, ThreadState, Timeout, WaitKind, MSG_OK};

use crate::halt::halt;
use crate::list::{Index, Queue};
use crate::port::Port;
use crate::sched::{Kernel, Step, Switch};
use crate::thread::{ThreadId, Wait, Wakeup};

#[derive(Clone, Copy)]
struct MutexState {
    owner: Option<Index>,
    queue: Queue,
    /// Next older mutex held by the same owner.
    next: Option<&'static Mutex>,
}

/// Mutual exclusion lock.
pub struct Mutex {
    state: critical_section::Mutex<Cell<MutexState>>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(Cell::new(MutexState {
                owner: None,
                queue: Queue::new(),
                next: None,
            })),
        }
    }

    pub fn is_locked(&self, cs: CriticalSection<'_>) -> bool {
        self.load(cs).owner.is_some()
    }

    fn load(&self, cs: CriticalSection<'_>) -> MutexState {
        self.state.borrow(cs).get()
    }

    fn store(&self, cs: CriticalSection<'_>, state: MutexState) {
        self.state.borrow(cs).set(state);
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port, const N: usize, const T: usize> Kernel<P, N, T> {
    /// Lock `mutex`, blocking while another thread owns it.
    pub fn lock(&mut self, cs: CriticalSection<'_>, mutex: &'static Mutex) -> Step<()> {
        let current = self.current_index();
        let mut state = mutex.load(cs);
        let Some(owner) = state.owner else {
            self.take_ownership(cs, mutex, current);
            return Step::Done(());
        };
        debug_assert_ne!(owner, current, "mutex locked twice by its owner");

        let prio = self.tcb(current).prio;
        self.enqueue_by_priority(&mut state.queue, current, prio);
        mutex.store(cs, state);
        self.inherit(cs, owner, prio);
        Step::Switch(self.suspend_current(
            ThreadState::Suspended(WaitKind::Mutex),
            Wait::Mutex(mutex),
            Timeout::Never,
        ))
    }

    /// Lock `mutex` only if it is free.
    pub fn try_lock(&mut self, cs: CriticalSection<'_>, mutex: &'static Mutex) -> bool {
        if mutex.is_locked(cs) {
            return false;
        }
        let current = self.current_index();
        self.take_ownership(cs, mutex, current);
        true
    }

    /// Release `mutex`, handing it to the most urgent waiter, and drop the
    /// priority boost it carried.
    pub fn unlock(&mut self, cs: CriticalSection<'_>, mutex: &'static Mutex) -> Option<Switch> {
        let current = self.current_index();
        debug_assert_eq!(
            mutex.load(cs).owner,
            Some(current),
            "mutex unlocked by a thread that does not own it"
        );
        debug_assert!(
            self.tcb(current).owned.is_some_and(|head| ptr::eq(head, mutex)),
            "mutexes must be unlocked in reverse lock order"
        );
        self.release_ownership(cs, mutex, current);

        let mut state = mutex.load(cs);
        state.owner = None;
        state.next = None;
        let heir = Self::intact(state.queue.pop_front(&mut self.threads));
        mutex.store(cs, state);
        if let Some(heir) = heir {
            self.take_ownership(cs, mutex, heir);
            self.wake_i(heir, Wakeup::Signaled(MSG_OK));
        }

        let prio = self.inherited_priority(cs, current);
        self.tcb_mut(current).prio = prio;
        self.reschedule()
    }

    /// Owner of `mutex`, if locked
    pub fn mutex_owner(&self, cs: CriticalSection<'_>, mutex: &Mutex) -> Option<ThreadId> {
        mutex.load(cs).owner.map(|index| self.threads.id_of(index))
    }

    fn take_ownership(&mut self, cs: CriticalSection<'_>, mutex: &'static Mutex, owner: Index) {
        let tcb = self.tcb_mut(owner);
        let mut state = mutex.load(cs);
        state.owner = Some(owner);
        state.next = tcb.owned.replace(mutex);
        mutex.store(cs, state);
    }

    /// Remove `mutex` from the owner's stack of held mutexes.
    fn release_ownership(&mut self, cs: CriticalSection<'_>, mutex: &'static Mutex, owner: Index) {
        let next = mutex.load(cs).next;
        let head = self.tcb(owner).owned;
        if head.is_some_and(|head| ptr::eq(head, mutex)) {
            self.tcb_mut(owner).owned = next;
            return;
        }
        let mut cursor = head;
        while let Some(held) = cursor {
            let mut state = held.load(cs);
            if state.next.is_some_and(|older| ptr::eq(older, mutex)) {
                state.next = next;
                held.store(cs, state);
                return;
            }
            cursor = state.next;
        }
        halt::<P>(HaltReason::CorruptedQueue)
    }

    fn enqueue_by_priority(&mut self, queue: &mut Queue, index: Index, prio: Priority) {
        Self::intact(queue.insert_by(&mut self.threads, index, |threads, at| {
            threads.tcb(at).map_or(false, |tcb| tcb.prio < prio)
        }));
    }

    /// Raise `owner` to `prio`, following the chain of owners blocked on
    /// other mutexes.
    fn inherit(&mut self, cs: CriticalSection<'_>, mut owner: Index, prio: Priority) {
        loop {
            let (state, wait) = {
                let tcb = self.tcb_mut(owner);
                if tcb.prio >= prio {
                    return;
                }
                tcb.prio = prio;
                (tcb.state, tcb.wait)
            };
            log::trace!("{} inherits {}", self.threads.id_of(owner), prio);
            match (state, wait) {
                (ThreadState::Ready, _) => {
                    Self::intact(self.ready.remove(&mut self.threads, owner));
                    self.ready_i(owner);
                    return;
                }
                (ThreadState::Suspended(WaitKind::Mutex), Wait::Mutex(blocker)) => {
                    let mut blocked = blocker.load(cs);
                    Self::intact(blocked.queue.remove(&mut self.threads, owner));
                    self.enqueue_by_priority(&mut blocked.queue, owner, prio);
                    blocker.store(cs, blocked);
                    match blocked.owner {
                        Some(next) => owner = next,
                        None => halt::<P>(HaltReason::CorruptedQueue),
                    }
                }
                _ => return,
            }
        }
    }

    /// Base priority raised to the most urgent waiter of every held mutex.
    pub(crate) fn inherited_priority(&self, cs: CriticalSection<'_>, index: Index) -> Priority {
        let tcb = self.tcb(index);
        let mut prio = tcb.base_prio;
        let mut cursor = tcb.owned;
        while let Some(held) = cursor {
            let state = held.load(cs);
            if let Some(waiter) = state.queue.front() {
                prio = prio.max(self.tcb(waiter).prio);
            }
            cursor = state.next;
        }
        prio
    }
}
