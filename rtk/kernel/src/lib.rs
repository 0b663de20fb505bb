#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

//! # rtk - preemptive real-time kernel
//!
//! A small, portable, fixed-capacity kernel for single-core microcontrollers:
//!
//! - Threads with 256 priority levels, strict priority preemption and FIFO
//!   order within a level (optional round-robin time quantum)
//! - Virtual timers driven by a periodic tick: thread timeouts, sleeps and
//!   one-shot or periodic user timers
//! - Counting semaphores, mutexes with transitive priority inheritance,
//!   event sources with per-listener flag masks and per-thread event ids,
//!   and synchronous messages
//! - `*_from_isr` variants that never reschedule; the outermost interrupt
//!   exit does
//!
//! All storage is static: `N` thread slots and `T` user timers are const
//! generic parameters. Machine-specific code sits behind the [`Port`] trait.
//!
//! [`Kernel`] is the state machine with every primitive operation, usable
//! (and tested) without a CPU. [`System`] wraps it for use from threads and
//! interrupt handlers.

mod config;
mod event;
mod halt;
mod list;
mod msg;
mod mutex;
#[allow(unsafe_code)]
mod port;
mod sched;
mod sem;
#[allow(unsafe_code)]
mod system;
mod thread;
mod trace;
mod vt;

#[cfg(test)]
#[allow(unsafe_code)]
mod testport;

pub use rtk_core::*;

pub use config::{KernelConfig, KernelConfigBuilder};
pub use event::{dispatch, EventHandler, EventListener, EventSource};
pub use halt::{halt, last_halt_reason};
pub use mutex::Mutex;
pub use port::{Port, ThreadEntry};
pub use sched::{Kernel, Step, Switch};
pub use sem::Semaphore;
pub use system::{MutexGuard, System};
pub use thread::{ThreadExit, ThreadId, Wakeup};
pub use trace::{SwitchRecord, SwitchTrace, TRACE_DEPTH};
pub use vt::{IrqContext, TimerCallback, TimerId};
