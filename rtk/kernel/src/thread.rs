//! Thread control blocks and the slot table that owns them.
//!
//! Threads live in a fixed array of slots. A [`ThreadId`] pairs the slot
//! index with the slot's generation, which is bumped every time a finished
//! thread is joined, so a stale handle is detected instead of silently
//! addressing the slot's next occupant.

use core::fmt;

use rtk_core::{EventMask, Msg, Priority, Systime, ThreadState, WaitError, WaitResult, MSG_OK};

use crate::event::EventListener;
use crate::list::{Arena, Corrupted, Index, Link, Queue};
use crate::mutex::Mutex;
use crate::sem::Semaphore;

/// Handle of a thread: slot index plus slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId {
    index: Index,
    generation: u16,
}

impl ThreadId {
    pub(crate) const fn new(index: Index, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Slot index in the thread table
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when this handle was issued
    pub const fn generation(self) -> u16 {
        self.generation
    }

    pub(crate) const fn slot(self) -> Index {
        self.index
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}.{}", self.index, self.generation)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "T{}.{}", self.index, self.generation);
    }
}

/// What a joined thread hands back to the joiner.
#[derive(Debug)]
pub struct ThreadExit {
    /// Value passed to `exit`.
    pub code: Msg,
    /// The stack region supplied at creation, free for reuse.
    pub stack: &'static mut [u8],
}

/// Kernel object a suspended thread is blocked on, when a timeout or a
/// priority change has to find it again.
#[derive(Clone, Copy)]
pub(crate) enum Wait {
    None,
    Semaphore(&'static Semaphore),
    Mutex(&'static Mutex),
    Events {
        listener: &'static EventListener,
        mask: EventMask,
    },
    /// Any registration id in the mask, across all of the thread's listeners.
    EventIds(EventMask),
}

/// Outcome delivered to a blocked thread by whoever readied it.
///
/// A thread reads its wake-up after it runs again, which is why the blocking
/// calls of [`Kernel`](crate::Kernel) return a [`Step`](crate::Step) and
/// leave the conversion to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Readied with a message (`MSG_OK` for plain signals and sleeps).
    Signaled(Msg),
    /// Readied by a broadcast, carrying the delivered flags.
    Events(EventMask),
    /// The wait timer fired first.
    Timeout,
    /// The object was reset or the peer went away.
    Reset,
}

impl Wakeup {
    /// Outcome of a wait that carries no value
    pub fn into_wait(self) -> WaitResult<()> {
        self.into_msg().map(|_| ())
    }

    /// Outcome of a wait that carries a message
    pub fn into_msg(self) -> WaitResult<Msg> {
        match self {
            Wakeup::Signaled(msg) => Ok(msg),
            Wakeup::Events(mask) => Ok(mask.bits() as Msg),
            Wakeup::Timeout => Err(WaitError::Timeout),
            Wakeup::Reset => Err(WaitError::Reset),
        }
    }

    /// Outcome of an event wait
    pub fn into_events(self) -> WaitResult<EventMask> {
        match self {
            Wakeup::Events(mask) => Ok(mask),
            Wakeup::Signaled(_) => Ok(EventMask::NONE),
            Wakeup::Timeout => Err(WaitError::Timeout),
            Wakeup::Reset => Err(WaitError::Reset),
        }
    }
}

/// Timeout timer embedded in every thread.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThreadTimer {
    pub deadline: Systime,
    pub link: Link,
    pub armed: bool,
}

impl ThreadTimer {
    const IDLE: ThreadTimer = ThreadTimer {
        deadline: Systime::ZERO,
        link: Link::UNLINKED,
        armed: false,
    };
}

/// Thread control block.
pub(crate) struct Tcb<C> {
    pub ctx: C,
    /// Effective priority, including any inherited boost.
    pub prio: Priority,
    /// Priority requested by the thread itself.
    pub base_prio: Priority,
    pub state: ThreadState,
    pub wait: Wait,
    /// Ready queue or wait queue membership.
    pub link: Link,
    pub timer: ThreadTimer,
    pub wakeup: Wakeup,
    /// Registration ids whose listeners received flags, not yet consumed.
    pub events: EventMask,
    /// Most recently locked mutex; older ones chain through the mutexes.
    pub owned: Option<&'static Mutex>,
    /// Threads blocked in `send` to this thread.
    pub senders: Queue,
    /// Message of a pending `send`.
    pub outbox: Msg,
    pub joiners: Queue,
    pub exit_code: Msg,
    pub terminate: bool,
    pub stack: &'static mut [u8],
}

impl<C> Tcb<C> {
    pub fn new(ctx: C, prio: Priority, stack: &'static mut [u8]) -> Self {
        Self {
            ctx,
            prio,
            base_prio: prio,
            state: ThreadState::Ready,
            wait: Wait::None,
            link: Link::UNLINKED,
            timer: ThreadTimer::IDLE,
            wakeup: Wakeup::Signaled(MSG_OK),
            events: EventMask::NONE,
            owned: None,
            senders: Queue::new(),
            outbox: MSG_OK,
            joiners: Queue::new(),
            exit_code: MSG_OK,
            terminate: false,
            stack,
        }
    }
}

/// Fixed-capacity slot table of thread control blocks.
pub(crate) struct ThreadTable<C, const N: usize> {
    slots: [Option<Tcb<C>>; N],
    generations: [u16; N],
}

impl<C, const N: usize> ThreadTable<C, N> {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; N],
            generations: [0; N],
        }
    }

    /// Handle of the thread in `index`.
    pub fn id_of(&self, index: Index) -> ThreadId {
        ThreadId::new(index, self.generations[index as usize])
    }

    /// Resolve a handle, rejecting vacant slots and stale generations.
    pub fn resolve(&self, id: ThreadId) -> Option<Index> {
        let slot = id.index();
        match self.slots.get(slot) {
            Some(Some(_)) if self.generations[slot] == id.generation => Some(id.slot()),
            _ => None,
        }
    }

    pub fn tcb(&self, index: Index) -> Result<&Tcb<C>, Corrupted> {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(Corrupted)
    }

    pub fn tcb_mut(&mut self, index: Index) -> Result<&mut Tcb<C>, Corrupted> {
        self.slots
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(Corrupted)
    }

    /// Place `tcb` in the first vacant slot.
    pub fn insert(&mut self, tcb: Tcb<C>) -> Result<Index, Tcb<C>> {
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(tcb);
                Ok(slot as Index)
            }
            None => Err(tcb),
        }
    }

    /// Vacate `index` and retire its generation.
    pub fn remove(&mut self, index: Index) -> Option<Tcb<C>> {
        let slot = index as usize;
        let tcb = self.slots.get_mut(slot)?.take()?;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        Some(tcb)
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl<C, const N: usize> Arena for ThreadTable<C, N> {
    fn link(&self, index: Index) -> Result<Link, Corrupted> {
        self.tcb(index).map(|tcb| tcb.link)
    }

    fn link_mut(&mut self, index: Index) -> Result<&mut Link, Corrupted> {
        self.tcb_mut(index).map(|tcb| &mut tcb.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> &'static mut [u8] {
        Box::leak(vec![0u8; 16].into_boxed_slice())
    }

    #[test]
    fn recycled_slot_rejects_stale_handle() {
        let mut table: ThreadTable<(), 2> = ThreadTable::new();
        let index = table.insert(Tcb::new((), Priority::NORMAL, stack())).ok().unwrap();
        let stale = table.id_of(index);
        assert_eq!(table.resolve(stale), Some(index));

        assert!(table.remove(index).is_some());
        assert_eq!(table.resolve(stale), None);

        let again = table.insert(Tcb::new((), Priority::NORMAL, stack())).ok().unwrap();
        assert_eq!(again, index);
        assert_eq!(table.resolve(stale), None);
        assert_eq!(table.id_of(again).generation(), stale.generation() + 1);
    }

    #[test]
    fn full_table_returns_the_tcb() {
        let mut table: ThreadTable<(), 1> = ThreadTable::new();
        assert!(table.insert(Tcb::new((), Priority::LOWEST, stack())).is_ok());
        assert!(table.insert(Tcb::new((), Priority::LOWEST, stack())).is_err());
        assert_eq!(table.occupied(), 1);
        assert_eq!(table.link(5), Err(Corrupted));
    }
}
