//! Event sources and listeners.
//!
//! A source broadcasts flags to every registered listener. Each listener
//! belongs to one thread, filters the broadcast through its interest mask
//! and accumulates what passes in its own pending flags, so delivery to one
//! listener never consumes flags seen by another. A thread waits on its
//! listener for any flag of a mask; the matching pending flags are returned
//! and cleared.
//!
//! Every registration also carries an event id (0..32). A delivery marks
//! that id pending on the owning thread, which lets one thread listen to
//! several sources and block on all of them at once with
//! [`Kernel::wait_any_event`], then serve the ids with [`dispatch`]. The id
//! mask and the listener flags are consumed independently.

use core::cell::Cell;
use core::ptr;

use critical_section::CriticalSection;
use rtk_core::{EventMask, ThreadState, Timeout, WaitError, WaitKind, WaitResult};

use crate::port::Port;
use crate::sched::{Kernel, Step, Switch};
use crate::thread::{ThreadId, Wait, Wakeup};

#[derive(Clone, Copy)]
struct SourceState {
    flags: EventMask,
    listeners: Option<&'static EventListener>,
}

/// Handler for one event id, see [`dispatch`].
pub type EventHandler = fn(u8);

/// Call `handlers[id]` for every id set in `events`, lowest id first. Ids
/// without a handler are skipped.
pub fn dispatch(handlers: &[EventHandler], events: EventMask) {
    let mut rest = events;
    while let Some(id) = rest.lowest() {
        rest &= !EventMask::flag(id);
        if let Some(handler) = handlers.get(usize::from(id)) {
            handler(id);
        }
    }
}

/// Broadcast point, e.g. "data received" of a driver.
pub struct EventSource {
    state: critical_section::Mutex<Cell<SourceState>>,
}

impl EventSource {
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(Cell::new(SourceState {
                flags: EventMask::NONE,
                listeners: None,
            })),
        }
    }

    /// Every flag broadcast since the last [`take_flags`](Self::take_flags)
    pub fn flags(&self, cs: CriticalSection<'_>) -> EventMask {
        self.load(cs).flags
    }

    /// Read and clear the cumulative flags
    pub fn take_flags(&self, cs: CriticalSection<'_>) -> EventMask {
        let mut state = self.load(cs);
        let flags = core::mem::take(&mut state.flags);
        self.store(cs, state);
        flags
    }

    fn load(&self, cs: CriticalSection<'_>) -> SourceState {
        self.state.borrow(cs).get()
    }

    fn store(&self, cs: CriticalSection<'_>, state: SourceState) {
        self.state.borrow(cs).set(state);
    }
}

impl Default for EventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
struct ListenerState {
    owner: Option<ThreadId>,
    id: u8,
    interest: EventMask,
    pending: EventMask,
    next: Option<&'static EventListener>,
}

/// One thread's subscription to an [`EventSource`].
pub struct EventListener {
    state: critical_section::Mutex<Cell<ListenerState>>,
}

impl EventListener {
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(Cell::new(ListenerState {
                owner: None,
                id: 0,
                interest: EventMask::NONE,
                pending: EventMask::NONE,
                next: None,
            })),
        }
    }

    /// Delivered but not yet consumed flags
    pub fn pending(&self, cs: CriticalSection<'_>) -> EventMask {
        self.load(cs).pending
    }

    /// Event id given at registration
    pub fn id(&self, cs: CriticalSection<'_>) -> u8 {
        self.load(cs).id
    }

    pub fn is_registered(&self, cs: CriticalSection<'_>) -> bool {
        self.load(cs).owner.is_some()
    }

    fn load(&self, cs: CriticalSection<'_>) -> ListenerState {
        self.state.borrow(cs).get()
    }

    fn store(&self, cs: CriticalSection<'_>, state: ListenerState) {
        self.state.borrow(cs).set(state);
    }
}

impl Default for EventListener {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port, const N: usize, const T: usize> Kernel<P, N, T> {
    /// Subscribe the current thread to `source` through `listener`.
    /// Deliveries mark event `id` (0..32) pending on the thread.
    pub fn register(
        &mut self,
        cs: CriticalSection<'_>,
        source: &'static EventSource,
        listener: &'static EventListener,
        id: u8,
        interest: EventMask,
    ) {
        debug_assert!(!listener.is_registered(cs), "listener registered twice");
        debug_assert!(id < 32, "event id out of range");
        let owner = self.threads.id_of(self.current_index());
        let mut chain = source.load(cs);
        listener.store(
            cs,
            ListenerState {
                owner: Some(owner),
                id: id & 31,
                interest,
                pending: EventMask::NONE,
                next: chain.listeners.replace(listener),
            },
        );
        source.store(cs, chain);
    }

    /// Remove `listener` from `source`. Returns false if it was not found.
    pub fn unregister(
        &mut self,
        cs: CriticalSection<'_>,
        source: &'static EventSource,
        listener: &'static EventListener,
    ) -> bool {
        let detached = listener.load(cs);
        let mut chain = source.load(cs);
        let found = if chain.listeners.is_some_and(|head| ptr::eq(head, listener)) {
            chain.listeners = detached.next;
            source.store(cs, chain);
            true
        } else {
            let mut cursor = chain.listeners;
            loop {
                let Some(at) = cursor else { break false };
                let mut state = at.load(cs);
                if state.next.is_some_and(|next| ptr::eq(next, listener)) {
                    state.next = detached.next;
                    at.store(cs, state);
                    break true;
                }
                cursor = state.next;
            }
        };
        if found {
            listener.store(
                cs,
                ListenerState {
                    owner: None,
                    next: None,
                    ..detached
                },
            );
        }
        found
    }

    /// Post `flags` to every interested listener of `source`, readying
    /// owners waiting for them. No reschedule.
    pub fn broadcast_i(&mut self, cs: CriticalSection<'_>, source: &'static EventSource, flags: EventMask) {
        let mut chain = source.load(cs);
        chain.flags |= flags;
        source.store(cs, chain);

        let mut cursor = chain.listeners;
        while let Some(listener) = cursor {
            let mut state = listener.load(cs);
            cursor = state.next;
            let hits = flags & state.interest;
            if hits.is_empty() {
                continue;
            }
            state.pending |= hits;
            let Some(owner) = state.owner.and_then(|id| self.threads.resolve(id)) else {
                listener.store(cs, state);
                continue;
            };
            let delivered = {
                let tcb = self.tcb_mut(owner);
                tcb.events |= EventMask::flag(state.id);
                match (tcb.state, tcb.wait) {
                    (ThreadState::Suspended(WaitKind::Events), Wait::Events { listener: waited, mask })
                        if ptr::eq(waited, listener) =>
                    {
                        let delivered = state.pending & mask;
                        state.pending &= !delivered;
                        delivered
                    }
                    (ThreadState::Suspended(WaitKind::Events), Wait::EventIds(mask)) => {
                        let delivered = tcb.events & mask;
                        tcb.events &= !delivered;
                        delivered
                    }
                    _ => EventMask::NONE,
                }
            };
            listener.store(cs, state);
            if !delivered.is_empty() {
                self.wake_i(owner, Wakeup::Events(delivered));
            }
        }
    }

    /// [`broadcast_i`](Self::broadcast_i) followed by a reschedule.
    pub fn broadcast(
        &mut self,
        cs: CriticalSection<'_>,
        source: &'static EventSource,
        flags: EventMask,
    ) -> Option<Switch> {
        self.broadcast_i(cs, source, flags);
        self.reschedule()
    }

    /// Wait until any flag of `mask` is pending on the caller's `listener`,
    /// then consume and return those flags.
    pub fn wait_events(
        &mut self,
        cs: CriticalSection<'_>,
        listener: &'static EventListener,
        mask: EventMask,
        timeout: Timeout,
    ) -> Step<WaitResult<EventMask>> {
        let mut state = listener.load(cs);
        debug_assert_eq!(
            state.owner,
            self.current(),
            "waiting on a listener owned by another thread"
        );
        let hits = state.pending & mask;
        if !hits.is_empty() {
            state.pending &= !hits;
            listener.store(cs, state);
            return Step::Done(Ok(hits));
        }
        if timeout.is_immediate() {
            return Step::Done(Err(WaitError::Timeout));
        }
        Step::Switch(self.suspend_current(
            ThreadState::Suspended(WaitKind::Events),
            Wait::Events { listener, mask },
            timeout,
        ))
    }

    /// Wait until any event id of `mask` is pending on the current thread,
    /// from whichever of its listeners, then consume and return those ids.
    pub fn wait_any_event(&mut self, mask: EventMask, timeout: Timeout) -> Step<WaitResult<EventMask>> {
        let current = self.current_index();
        let tcb = self.tcb_mut(current);
        let hits = tcb.events & mask;
        if !hits.is_empty() {
            tcb.events &= !hits;
            return Step::Done(Ok(hits));
        }
        if timeout.is_immediate() {
            return Step::Done(Err(WaitError::Timeout));
        }
        Step::Switch(self.suspend_current(
            ThreadState::Suspended(WaitKind::Events),
            Wait::EventIds(mask),
            timeout,
        ))
    }

    /// Clear `mask` from the current thread's pending event ids, returning
    /// the ids that were set.
    pub fn clear_event_ids(&mut self, mask: EventMask) -> EventMask {
        let current = self.current_index();
        let tcb = self.tcb_mut(current);
        let cleared = tcb.events & mask;
        tcb.events &= !mask;
        cleared
    }

    /// Clear `mask` from the listener's pending flags, returning the flags
    /// that were set.
    pub fn clear_events(
        &mut self,
        cs: CriticalSection<'_>,
        listener: &'static EventListener,
        mask: EventMask,
    ) -> EventMask {
        let mut state = listener.load(cs);
        let cleared = state.pending & mask;
        state.pending &= !mask;
        listener.store(cs, state);
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::testport::{self, TestPort};
    use rtk_core::Priority;

    type K = Kernel<TestPort, 6, 0>;

    fn spawn(k: &mut K, prio: u8) -> ThreadId {
        k.create(testport::stack(128), Priority::new(prio), testport::spin, 0)
            .unwrap()
    }

    fn source() -> &'static EventSource {
        Box::leak(Box::new(EventSource::new()))
    }

    fn listener() -> &'static EventListener {
        Box::leak(Box::new(EventListener::new()))
    }

    const RX: EventMask = EventMask::flag(0);
    const TX: EventMask = EventMask::flag(1);
    const ERR: EventMask = EventMask::flag(2);

    #[test]
    fn flags_are_delivered_per_listener() {
        let mut k = K::new(KernelConfig::DEFAULT);
        let idle = spawn(&mut k, 0);
        let a = spawn(&mut k, 5);
        let b = spawn(&mut k, 4);
        k.start();
        let uart = source();
        let la = listener();
        let lb = listener();

        critical_section::with(|cs| {
            k.register(cs, uart, la, 0, RX | ERR);
            assert_eq!(k.wait_events(cs, la, RX, Timeout::Never).switch().map(|s| s.to), Some(b));
            k.register(cs, uart, lb, 0, RX | TX);
            assert_eq!(k.wait_events(cs, lb, TX, Timeout::Never).switch().map(|s| s.to), Some(idle));

            k.irq_enter();
            k.broadcast_i(cs, uart, RX | ERR);
            // a is woken with RX, keeps ERR pending; b only records RX
            assert_eq!(k.state(a), Ok(ThreadState::Ready));
            assert_eq!(k.state(b), Ok(ThreadState::Suspended(WaitKind::Events)));
            assert_eq!(la.pending(cs), ERR);
            assert_eq!(lb.pending(cs), RX);
            assert_eq!(uart.flags(cs), RX | ERR);
            assert_eq!(k.irq_exit().map(|s| s.to), Some(a));
        });
        assert_eq!(k.wakeup().into_events(), Ok(RX));

        critical_section::with(|cs| {
            assert!(matches!(
                k.wait_events(cs, la, ERR | TX, Timeout::Never),
                Step::Done(Ok(ERR))
            ));
            assert_eq!(k.clear_events(cs, la, EventMask::ALL), EventMask::NONE);
        });
    }

    #[test]
    fn wait_times_out_without_broadcast() {
        let mut k = K::new(KernelConfig::DEFAULT);
        let idle = spawn(&mut k, 0);
        let waiter = spawn(&mut k, 5);
        k.start();
        let src = source();
        let l = listener();

        critical_section::with(|cs| {
            k.register(cs, src, l, 0, EventMask::ALL);
            assert!(matches!(
                k.wait_events(cs, l, RX, Timeout::Immediate),
                Step::Done(Err(WaitError::Timeout))
            ));
            assert!(k.wait_events(cs, l, RX, Timeout::Ticks(4)).switch().is_some());
            // a flag outside the wait mask does not wake
            assert_eq!(k.broadcast(cs, src, TX), None);
            for _ in 0..4 {
                k.tick(cs);
            }
            assert_eq!(k.reschedule().map(|s| (s.from, s.to)), Some((idle, waiter)));
            assert_eq!(l.pending(cs), TX);
        });
        assert_eq!(k.wakeup().into_events(), Err(WaitError::Timeout));
    }

    #[test]
    fn unregistered_listener_no_longer_receives() {
        let mut k = K::new(KernelConfig::DEFAULT);
        spawn(&mut k, 1);
        k.start();
        let src = source();
        let first = listener();
        let second = listener();

        critical_section::with(|cs| {
            k.register(cs, src, first, 0, EventMask::ALL);
            k.register(cs, src, second, 1, EventMask::ALL);
            assert!(k.unregister(cs, src, first));
            assert!(!k.unregister(cs, src, first));
            assert!(!first.is_registered(cs));

            k.broadcast_i(cs, src, RX);
            assert_eq!(first.pending(cs), EventMask::NONE);
            assert_eq!(second.pending(cs), RX);
            assert!(k.unregister(cs, src, second));
            assert_eq!(src.take_flags(cs), RX);
            assert_eq!(src.flags(cs), EventMask::NONE);
        });
    }

    #[test]
    fn one_wait_covers_several_sources() {
        let mut k = K::new(KernelConfig::DEFAULT);
        let idle = spawn(&mut k, 0);
        let server = spawn(&mut k, 5);
        k.start();
        let timer = source();
        let insert = source();
        let remove = source();
        let (l0, l1, l2) = (listener(), listener(), listener());

        critical_section::with(|cs| {
            k.register(cs, timer, l0, 0, EventMask::ALL);
            k.register(cs, insert, l1, 1, EventMask::ALL);
            k.register(cs, remove, l2, 2, EventMask::ALL);
            assert_eq!(l1.id(cs), 1);

            let step = k.wait_any_event(EventMask::ALL, Timeout::Never);
            assert_eq!(step.switch().map(|s| s.to), Some(idle));
            k.irq_enter();
            k.broadcast_i(cs, insert, RX);
            assert_eq!(k.state(server), Ok(ThreadState::Ready));
            assert_eq!(k.irq_exit().map(|s| s.to), Some(server));
        });
        assert_eq!(k.wakeup().into_events(), Ok(EventMask::flag(1)));

        critical_section::with(|cs| {
            // the listener keeps its flags for the handler to read
            assert_eq!(l1.pending(cs), RX);
            assert_eq!(k.broadcast(cs, remove, TX), None);
            assert_eq!(k.broadcast(cs, timer, TX), None);
            assert!(matches!(
                k.wait_any_event(EventMask::flag(2), Timeout::Never),
                Step::Done(Ok(ids)) if ids == EventMask::flag(2)
            ));
            assert_eq!(k.clear_event_ids(EventMask::ALL), EventMask::flag(0));
            assert!(matches!(
                k.wait_any_event(EventMask::ALL, Timeout::Immediate),
                Step::Done(Err(WaitError::Timeout))
            ));
        });
    }

    #[test]
    fn listener_wait_ignores_other_sources() {
        let mut k = K::new(KernelConfig::DEFAULT);
        spawn(&mut k, 0);
        let waiter = spawn(&mut k, 5);
        k.start();
        let (a, b) = (source(), source());
        let (la, lb) = (listener(), listener());

        critical_section::with(|cs| {
            k.register(cs, a, la, 0, EventMask::ALL);
            k.register(cs, b, lb, 1, EventMask::ALL);
            assert!(k.wait_events(cs, la, RX, Timeout::Never).switch().is_some());
            assert_eq!(k.broadcast(cs, b, RX), None);
            assert_eq!(k.state(waiter), Ok(ThreadState::Suspended(WaitKind::Events)));
            assert_eq!(k.broadcast(cs, a, RX).map(|s| s.to), Some(waiter));
        });
        assert_eq!(k.wakeup().into_events(), Ok(RX));
        // both deliveries are still visible as ids
        assert_eq!(k.clear_event_ids(EventMask::ALL), EventMask::flag(0) | EventMask::flag(1));
    }

    #[test]
    fn dispatch_serves_ids_lowest_first() {
        use std::sync::Mutex as StdMutex;

        static SERVED: StdMutex<Vec<u8>> = StdMutex::new(Vec::new());
        fn record(id: u8) {
            SERVED.lock().unwrap().push(id);
        }

        let handlers: [EventHandler; 3] = [record, record, record];
        dispatch(&handlers, EventMask::flag(2) | EventMask::flag(0) | EventMask::flag(7));
        assert_eq!(*SERVED.lock().unwrap(), [0, 2]);
    }
}
