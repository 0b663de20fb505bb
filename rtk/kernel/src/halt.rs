//! Fatal error path.
//!
//! A halt records its reason in a fixed location before handing the CPU to
//! [`Port::halt`], so a debugger (or a reset handler inspecting retained
//! RAM) can find out why the system stopped.

use core::cell::Cell;

use critical_section::Mutex;
use rtk_core::HaltReason;

use crate::port::Port;

static LAST_HALT: Mutex<Cell<Option<HaltReason>>> = Mutex::new(Cell::new(None));

/// Record `reason` and stop the system.
pub fn halt<P: Port>(reason: HaltReason) -> ! {
    critical_section::with(|cs| LAST_HALT.borrow(cs).set(Some(reason)));
    log::error!("kernel halted: {}", reason);
    P::halt(reason)
}

/// Reason of the most recent halt, if any.
pub fn last_halt_reason() -> Option<HaltReason> {
    critical_section::with(|cs| LAST_HALT.borrow(cs).get())
}
