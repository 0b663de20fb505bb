//! Thread state machine vocabulary

use core::fmt;

/// What a suspended thread is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// Counting semaphore
    Semaphore,
    /// Mutex ownership
    Mutex,
    /// Event flags on a listener
    Events,
    /// Explicit resume (suspended creation or a thread reference)
    Resume,
    /// Termination of another thread
    Join,
    /// Rendezvous: a receiver releasing our message
    Send,
    /// Rendezvous: a sender posting a message
    Receive,
}

/// Life-cycle state of a thread.
///
/// ```text
/// create ──► Ready ◄──────── wake (signal, unlock, timer, broadcast, resume)
///              │  ▲                        ▲
///     dispatch │  │ preempt / yield        │
///              ▼  │                        │
///            Running ──► Suspended / Sleeping
///              │
///         exit ▼
///            Final
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// In the ready queue
    Ready,
    /// The current thread
    Running,
    /// Blocked on a kernel object, possibly with a timeout armed
    Suspended(WaitKind),
    /// Blocked on its wake timer only
    Sleeping,
    /// Terminated; waiting to be joined
    Final,
}

impl ThreadState {
    /// Check if the thread is blocked
    pub const fn is_blocked(self) -> bool {
        matches!(self, Self::Suspended(_) | Self::Sleeping)
    }

    /// Check if the thread has terminated
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Final)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Suspended(kind) => write!(f, "SUSPENDED({kind:?})"),
            Self::Sleeping => write!(f, "SLEEPING"),
            Self::Final => write!(f, "FINAL"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for WaitKind {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Semaphore => defmt::write!(fmt, "Semaphore"),
            Self::Mutex => defmt::write!(fmt, "Mutex"),
            Self::Events => defmt::write!(fmt, "Events"),
            Self::Resume => defmt::write!(fmt, "Resume"),
            Self::Join => defmt::write!(fmt, "Join"),
            Self::Send => defmt::write!(fmt, "Send"),
            Self::Receive => defmt::write!(fmt, "Receive"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadState {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Ready => defmt::write!(fmt, "READY"),
            Self::Running => defmt::write!(fmt, "RUNNING"),
            Self::Suspended(kind) => defmt::write!(fmt, "SUSPENDED({})", kind),
            Self::Sleeping => defmt::write!(fmt, "SLEEPING"),
            Self::Final => defmt::write!(fmt, "FINAL"),
        }
    }
}
