#![no_std]
#![forbid(unsafe_code)]

//! # rtk core
//!
//! Value types shared by the rtk scheduling kernel and the architecture ports
//! that drive it: priorities, the wrapping system tick, timeouts, event masks,
//! thread states and the error/result vocabulary of blocking calls.

use core::fmt;

pub mod events;
pub mod priority;
pub mod state;
pub mod time;

pub use events::*;
pub use priority::*;
pub use state::*;
pub use time::*;

/// rtk version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Message word exchanged on wake-ups, exits and rendezvous.
pub type Msg = i32;

/// Message delivered by an ordinary wake-up (signal, sleep expiry, resume).
pub const MSG_OK: Msg = 0;

/// Result of a blocking call.
pub type WaitResult<T> = Result<T, WaitError>;

/// Expected, non-fatal outcomes of a blocking call that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitError {
    /// The timeout expired before the wake condition occurred.
    Timeout,
    /// The object was reset (or the peer went away) while waiting.
    Reset,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "wait timed out"),
            WaitError::Reset => write!(f, "wait aborted by reset"),
        }
    }
}

impl core::error::Error for WaitError {}

#[cfg(feature = "defmt")]
impl defmt::Format for WaitError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            WaitError::Timeout => defmt::write!(fmt, "Timeout"),
            WaitError::Reset => defmt::write!(fmt, "Reset"),
        }
    }
}

/// Result type of the non-blocking kernel API.
pub type KernelResult<T> = Result<T, KernelError>;

/// Misuse reported by creation and lookup calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelError {
    /// Supplied stack cannot hold the initial context frame.
    StackTooSmall { required: usize, provided: usize },
    /// Every thread slot is in use.
    NoFreeSlot,
    /// Every virtual timer slot is in use.
    NoFreeTimer,
    /// Handle refers to a vacant or recycled thread slot.
    UnknownThread,
    /// Handle refers to a vacant or recycled timer slot.
    UnknownTimer,
    /// A thread tried to join itself.
    JoinSelf,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::StackTooSmall { required, provided } => {
                write!(f, "stack of {provided} bytes is below the {required} byte minimum")
            }
            KernelError::NoFreeSlot => write!(f, "no free thread slot"),
            KernelError::NoFreeTimer => write!(f, "no free timer slot"),
            KernelError::UnknownThread => write!(f, "unknown or stale thread handle"),
            KernelError::UnknownTimer => write!(f, "unknown or stale timer handle"),
            KernelError::JoinSelf => write!(f, "thread cannot join itself"),
        }
    }
}

impl core::error::Error for KernelError {}

#[cfg(feature = "defmt")]
impl defmt::Format for KernelError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            KernelError::StackTooSmall { required, provided } => {
                defmt::write!(fmt, "StackTooSmall({}<{})", provided, required)
            }
            KernelError::NoFreeSlot => defmt::write!(fmt, "NoFreeSlot"),
            KernelError::NoFreeTimer => defmt::write!(fmt, "NoFreeTimer"),
            KernelError::UnknownThread => defmt::write!(fmt, "UnknownThread"),
            KernelError::UnknownTimer => defmt::write!(fmt, "UnknownTimer"),
            KernelError::JoinSelf => defmt::write!(fmt, "JoinSelf"),
        }
    }
}

/// Unrecoverable kernel invariant violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaltReason {
    /// A thread blocked and no other thread was ready to run.
    NoRunnableThread,
    /// A queue link pointed at a vacant thread or timer slot.
    CorruptedQueue,
    /// A thread-level call was made before the scheduler started.
    NotStarted,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::NoRunnableThread => write!(f, "no runnable thread"),
            HaltReason::CorruptedQueue => write!(f, "corrupted kernel queue"),
            HaltReason::NotStarted => write!(f, "scheduler not started"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for HaltReason {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            HaltReason::NoRunnableThread => defmt::write!(fmt, "NoRunnableThread"),
            HaltReason::CorruptedQueue => defmt::write!(fmt, "CorruptedQueue"),
            HaltReason::NotStarted => defmt::write!(fmt, "NotStarted"),
        }
    }
}
