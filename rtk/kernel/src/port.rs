//! Architecture port contract.
//!
//! Everything that touches machine registers lives behind [`Port`]: building
//! the initial frame on a fresh stack, transferring the CPU between two saved
//! contexts, starting the first thread and stopping the CPU. The portable
//! kernel never dereferences a context; it only hands pointers to the port.
//!
//! ## Switch timing
//!
//! [`Port::switch`] is always called with interrupts masked and with every
//! kernel list consistent. A port may transfer the CPU right away (the call
//! returns when the outgoing thread is resumed) or defer the transfer until
//! interrupts are unmasked again, e.g. by pending the lowest priority
//! exception on Cortex-M. The kernel handles both: a blocked thread reads
//! its wake result only after it runs again.

use rtk_core::HaltReason;

/// Thread entry point. A thread leaves only by calling `exit`.
pub type ThreadEntry = fn(usize) -> !;

/// Register save/restore backend for one target architecture.
pub trait Port: 'static {
    /// Saved execution state of a suspended thread.
    type Context: Send;

    /// Smallest stack, in bytes, that holds the initial frame plus the
    /// space the port needs for one exception frame on top of it.
    const MIN_STACK: usize;

    /// Build the initial frame of a new thread so that the first switch to
    /// it enters `entry(arg)`. `stack` is at least `MIN_STACK` bytes.
    ///
    /// [`switch`](Self::switch) is called with interrupts masked, so a new
    /// thread must enter `entry` with interrupts unmasked. A port that
    /// switches synchronously has its initial frame (or a trampoline)
    /// restore the unmasked state; a port that defers the switch to a
    /// lowest-priority exception gets this from the exception return.
    fn init_context(stack: &mut [u8], entry: ThreadEntry, arg: usize) -> Self::Context;

    /// Save the running thread into `from` and resume `to`.
    ///
    /// # Safety
    ///
    /// Interrupts are masked. Both pointers refer to contexts owned by the
    /// kernel's thread table and stay valid until the transfer completes;
    /// `from` is the context of the thread that is running now.
    unsafe fn switch(from: *mut Self::Context, to: *const Self::Context);

    /// Leave the boot context and run the first thread with interrupts
    /// unmasked.
    ///
    /// # Safety
    ///
    /// Called once, with `first` pointing at a context built by
    /// `init_context` that stays valid for the lifetime of the system.
    unsafe fn start(first: *const Self::Context) -> !;

    /// Stop the CPU after a fatal kernel error.
    fn halt(reason: HaltReason) -> !;
}
