//! Virtual timers.
//!
//! One list, sorted by deadline, holds two kinds of timers: the timeout
//! timer embedded in every thread and the user timers allocated with
//! [`Kernel::timer_create`]. Entries share an index space: `0..N` are the
//! thread timers, `N..N + T` the user timers. Arming walks the list (O(n)),
//! disarming unlinks in O(1). Each tick fires every timer whose deadline is
//! due, earliest first, ties in arming order.

use critical_section::CriticalSection;
use rtk_core::{
    EventMask, HaltReason, KernelError, KernelResult, Msg, Systime, ThreadState, Ticks, WaitKind,
    MAX_DELAY, MSG_OK,
};

use crate::event::EventSource;
use crate::halt::halt;
use crate::list::{Arena, Corrupted, Index, Link, Queue};
use crate::port::Port;
use crate::sched::Kernel;
use crate::sem::Semaphore;
use crate::thread::{ThreadId, ThreadTable, Wait, Wakeup};

/// User timer action: runs in tick context with the timer's argument.
pub type TimerCallback = fn(&mut dyn IrqContext, usize);

/// Handle of a user timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: Index,
    generation: u16,
}

impl TimerId {
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TimerId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "V{}.{}", self.index, self.generation);
    }
}

/// Operations available to code running in interrupt context: timer
/// callbacks, and interrupt handlers through the `*_from_isr` calls of
/// [`System`](crate::System). None of them reschedules; the outermost
/// `irq_exit` does.
pub trait IrqContext {
    /// Current tick count
    fn now(&self) -> Systime;

    /// Signal a semaphore
    fn signal(&mut self, sem: &'static Semaphore);

    /// Broadcast flags on an event source
    fn broadcast(&mut self, source: &'static EventSource, flags: EventMask);

    /// Resume a suspended thread with `msg`; false if it was not suspended
    fn resume(&mut self, thread: ThreadId, msg: Msg) -> bool;

    /// Arm (or re-arm) a user timer
    fn arm(&mut self, timer: TimerId, delay: Ticks, period: Option<Ticks>) -> KernelResult<()>;

    /// Disarm a user timer; returns whether it was armed
    fn disarm(&mut self, timer: TimerId) -> KernelResult<bool>;
}

#[derive(Clone, Copy)]
pub(crate) struct UserTimer {
    callback: Option<TimerCallback>,
    arg: usize,
    generation: u16,
    deadline: Systime,
    period: Option<Ticks>,
    link: Link,
    armed: bool,
}

impl UserTimer {
    pub(crate) const VACANT: UserTimer = UserTimer {
        callback: None,
        arg: 0,
        generation: 0,
        deadline: Systime::ZERO,
        period: None,
        link: Link::UNLINKED,
        armed: false,
    };

    fn is_allocated(&self) -> bool {
        self.callback.is_some()
    }
}

/// View of both timer families as one arena.
struct TimerArena<'a, C, const N: usize, const T: usize> {
    threads: &'a mut ThreadTable<C, N>,
    users: &'a mut [UserTimer; T],
}

impl<C, const N: usize, const T: usize> TimerArena<'_, C, N, T> {
    fn deadline(&self, index: Index) -> Result<Systime, Corrupted> {
        match (index as usize).checked_sub(N) {
            None => self.threads.tcb(index).map(|tcb| tcb.timer.deadline),
            Some(slot) => match self.users.get(slot) {
                Some(timer) if timer.is_allocated() => Ok(timer.deadline),
                _ => Err(Corrupted),
            },
        }
    }
}

impl<C, const N: usize, const T: usize> Arena for TimerArena<'_, C, N, T> {
    fn link(&self, index: Index) -> Result<Link, Corrupted> {
        match (index as usize).checked_sub(N) {
            None => self.threads.tcb(index).map(|tcb| tcb.timer.link),
            Some(slot) => match self.users.get(slot) {
                Some(timer) if timer.is_allocated() => Ok(timer.link),
                _ => Err(Corrupted),
            },
        }
    }

    fn link_mut(&mut self, index: Index) -> Result<&mut Link, Corrupted> {
        match (index as usize).checked_sub(N) {
            None => self.threads.tcb_mut(index).map(|tcb| &mut tcb.timer.link),
            Some(slot) => match self.users.get_mut(slot) {
                Some(timer) if timer.is_allocated() => Ok(&mut timer.link),
                _ => Err(Corrupted),
            },
        }
    }
}

/// Interrupt context handed to timer callbacks.
struct TickContext<'a, 'cs, P: Port, const N: usize, const T: usize> {
    kernel: &'a mut Kernel<P, N, T>,
    cs: CriticalSection<'cs>,
}

impl<P: Port, const N: usize, const T: usize> IrqContext for TickContext<'_, '_, P, N, T> {
    fn now(&self) -> Systime {
        self.kernel.now
    }

    fn signal(&mut self, sem: &'static Semaphore) {
        self.kernel.sem_signal_i(self.cs, sem);
    }

    fn broadcast(&mut self, source: &'static EventSource, flags: EventMask) {
        self.kernel.broadcast_i(self.cs, source, flags);
    }

    fn resume(&mut self, thread: ThreadId, msg: Msg) -> bool {
        self.kernel.resume_i(thread, msg).unwrap_or(false)
    }

    fn arm(&mut self, timer: TimerId, delay: Ticks, period: Option<Ticks>) -> KernelResult<()> {
        self.kernel.timer_arm(timer, delay, period)
    }

    fn disarm(&mut self, timer: TimerId) -> KernelResult<bool> {
        self.kernel.timer_disarm(timer)
    }
}

impl<P: Port, const N: usize, const T: usize> Kernel<P, N, T> {
    fn timer_arena(&mut self) -> (&mut Queue, TimerArena<'_, P::Context, N, T>) {
        (
            &mut self.timer_list,
            TimerArena {
                threads: &mut self.threads,
                users: &mut self.timers,
            },
        )
    }

    /// Insert an already stamped timer in deadline order.
    fn link_timer(&mut self, index: Index, deadline: Systime) {
        let now = self.now;
        let offset = deadline.since(now);
        let (list, mut arena) = self.timer_arena();
        Self::intact(list.insert_by(&mut arena, index, |arena, at| {
            arena.deadline(at).map_or(false, |due| due.since(now) > offset)
        }));
    }

    fn unlink_timer(&mut self, index: Index) {
        let (list, mut arena) = self.timer_arena();
        Self::intact(list.remove(&mut arena, index));
    }

    pub(crate) fn arm_thread_timer(&mut self, index: Index, ticks: Ticks) {
        let deadline = self.now.after(ticks.clamp(1, MAX_DELAY));
        let timer = &mut self.tcb_mut(index).timer;
        debug_assert!(!timer.armed, "thread timer armed twice");
        timer.deadline = deadline;
        timer.armed = true;
        self.link_timer(index, deadline);
    }

    pub(crate) fn disarm_thread_timer(&mut self, index: Index) {
        let timer = &mut self.tcb_mut(index).timer;
        if timer.armed {
            timer.armed = false;
            self.unlink_timer(index);
        }
    }

    /// Advance the tick counter and fire every due timer.
    ///
    /// Woken threads are only made ready: the reschedule happens at the
    /// outermost `irq_exit` of the tick interrupt.
    pub fn tick(&mut self, cs: CriticalSection<'_>) {
        self.now.increment();
        self.slice_left = self.slice_left.saturating_sub(1);
        while let Some(head) = self.timer_list.front() {
            let (_, arena) = self.timer_arena();
            let deadline = Self::intact(arena.deadline(head));
            if !deadline.is_reached_at(self.now) {
                break;
            }
            self.unlink_timer(head);
            self.fire(cs, head);
        }
    }

    fn fire(&mut self, cs: CriticalSection<'_>, index: Index) {
        let Some(slot) = (index as usize).checked_sub(N) else {
            self.tcb_mut(index).timer.armed = false;
            self.thread_timeout(cs, index);
            return;
        };
        let timer = self.timers[slot];
        self.timers[slot].armed = false;
        if let Some(period) = timer.period {
            let next = timer.deadline.after(period);
            self.timers[slot].deadline = next;
            self.timers[slot].armed = true;
            self.link_timer(index, next);
        }
        if let Some(callback) = timer.callback {
            let mut ctx = TickContext { kernel: self, cs };
            callback(&mut ctx, timer.arg);
        }
    }

    /// Thread timer expiry. Runs under the same critical section as any
    /// competing signal, so whichever comes first disarms the other.
    fn thread_timeout(&mut self, cs: CriticalSection<'_>, index: Index) {
        let (state, wait) = {
            let tcb = self.tcb(index);
            (tcb.state, tcb.wait)
        };
        let wakeup = match (state, wait) {
            (ThreadState::Sleeping, _) => Wakeup::Signaled(MSG_OK),
            (ThreadState::Suspended(WaitKind::Semaphore), Wait::Semaphore(sem)) => {
                Self::intact(sem.withdraw(cs, &mut self.threads, index));
                Wakeup::Timeout
            }
            (ThreadState::Suspended(WaitKind::Events | WaitKind::Resume), _) => Wakeup::Timeout,
            // not a timed wait
            _ => return,
        };
        if wakeup == Wakeup::Timeout {
            log::trace!("{} timed out at {}", self.threads.id_of(index), self.now);
        }
        self.wake_i(index, wakeup);
    }

    // User timers

    fn timer_slot(&self, id: TimerId) -> KernelResult<usize> {
        match self.timers.get(id.index()) {
            Some(timer) if timer.is_allocated() && timer.generation == id.generation => Ok(id.index()),
            _ => Err(KernelError::UnknownTimer),
        }
    }

    fn timer_list_index(slot: usize) -> Index {
        (N + slot) as Index
    }

    /// Allocate a disarmed user timer.
    pub fn timer_create(&mut self, callback: TimerCallback, arg: usize) -> KernelResult<TimerId> {
        let slot = self
            .timers
            .iter()
            .position(|timer| !timer.is_allocated())
            .ok_or(KernelError::NoFreeTimer)?;
        let timer = &mut self.timers[slot];
        *timer = UserTimer {
            callback: Some(callback),
            arg,
            generation: timer.generation,
            ..UserTimer::VACANT
        };
        Ok(TimerId {
            index: slot as Index,
            generation: timer.generation,
        })
    }

    /// Disarm and free a user timer; its handle becomes stale.
    pub fn timer_delete(&mut self, id: TimerId) -> KernelResult<()> {
        self.timer_disarm(id)?;
        let slot = self.timer_slot(id)?;
        let generation = self.timers[slot].generation.wrapping_add(1);
        self.timers[slot] = UserTimer {
            generation,
            ..UserTimer::VACANT
        };
        Ok(())
    }

    /// Arm a user timer to fire after `delay` ticks (at least one), then
    /// every `period` ticks if given. An armed timer is re-armed.
    pub fn timer_arm(&mut self, id: TimerId, delay: Ticks, period: Option<Ticks>) -> KernelResult<()> {
        self.timer_disarm(id)?;
        let slot = self.timer_slot(id)?;
        let deadline = self.now.after(delay.clamp(1, MAX_DELAY));
        let timer = &mut self.timers[slot];
        timer.deadline = deadline;
        timer.period = period.map(|ticks| ticks.clamp(1, MAX_DELAY));
        timer.armed = true;
        self.link_timer(Self::timer_list_index(slot), deadline);
        Ok(())
    }

    /// Disarm a user timer. Returns whether it was armed.
    pub fn timer_disarm(&mut self, id: TimerId) -> KernelResult<bool> {
        let slot = self.timer_slot(id)?;
        if !self.timers[slot].armed {
            return Ok(false);
        }
        self.timers[slot].armed = false;
        self.unlink_timer(Self::timer_list_index(slot));
        Ok(true)
    }

    pub fn timer_is_armed(&self, id: TimerId) -> KernelResult<bool> {
        self.timer_slot(id).map(|slot| self.timers[slot].armed)
    }

    /// Deadline of the earliest armed timer, for tickless ports
    pub fn next_deadline(&self) -> Option<Systime> {
        let head = self.timer_list.front()?;
        Some(match (head as usize).checked_sub(N) {
            None => self.tcb(head).timer.deadline,
            Some(slot) => match self.timers.get(slot) {
                Some(timer) => timer.deadline,
                None => halt::<P>(HaltReason::CorruptedQueue),
            },
        })
    }
}
