//! # rtk Cortex-M port
//!
//! Context switching for Armv7-M and Armv8-M Mainline cores without FPU
//! state (use a soft-float target or keep floating point out of threads).
//!
//! Threads run in thread mode on the process stack. A switch requested by
//! the kernel only pends PendSV; the handler runs once every other interrupt
//! has returned and interrupts are unmasked, saves `r4-r11` below the
//! hardware-stacked frame of the outgoing thread and restores the incoming
//! one the same way.
//!
//! The application provides the tick:
//!
//! ```ignore
//! static SYSTEM: System<CortexM, 4, 2> = System::new(KernelConfig::DEFAULT);
//!
//! #[exception]
//! fn SysTick() {
//!     SYSTEM.interrupt(|| SYSTEM.tick());
//! }
//! ```

#![no_std]

use core::sync::atomic::{AtomicPtr, Ordering};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::SCB;
use rtk::{HaltReason, Port, ThreadEntry};

// Vector table; the `PendSV` symbol below replaces its default handler.
use cortex_m_rt as _;

/// Saved process stack pointer; the registers live on the thread's stack.
#[repr(C)]
#[derive(Debug)]
pub struct Context {
    sp: u32,
}

/// Context to save on the next PendSV; null discards the outgoing state.
#[no_mangle]
static RTK_SWITCH_FROM: AtomicPtr<Context> = AtomicPtr::new(core::ptr::null_mut());

/// Context to restore on the next PendSV.
#[no_mangle]
static RTK_SWITCH_TO: AtomicPtr<Context> = AtomicPtr::new(core::ptr::null_mut());

const FRAME_WORDS: usize = 16;
const INITIAL_XPSR: u32 = 0x0100_0000;
const EXC_RETURN_LR: u32 = 0xFFFF_FFFF;

/// Port for single-core Cortex-M parts.
pub struct CortexM;

impl Port for CortexM {
    type Context = Context;

    const MIN_STACK: usize = 256;

    fn init_context(stack: &mut [u8], entry: ThreadEntry, arg: usize) -> Context {
        let base = stack.as_ptr() as usize;
        let top = (base + stack.len()) & !7;
        let sp = top - FRAME_WORDS * 4;

        // r4-r11, then the exception frame: r0-r3, r12, lr, pc, xpsr
        let mut frame = [0u32; FRAME_WORDS];
        frame[8] = arg as u32;
        frame[13] = EXC_RETURN_LR;
        frame[14] = (entry as usize as u32) & !1;
        frame[15] = INITIAL_XPSR;

        let offset = sp - base;
        for (slot, word) in stack[offset..offset + FRAME_WORDS * 4]
            .chunks_exact_mut(4)
            .zip(frame)
        {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        Context { sp: sp as u32 }
    }

    unsafe fn switch(from: *mut Context, to: *const Context) {
        // a switch already pending has not saved its outgoing thread yet;
        // that thread, not `from`, is still on the CPU
        if !SCB::is_pendsv_pending() {
            RTK_SWITCH_FROM.store(from, Ordering::Relaxed);
        }
        RTK_SWITCH_TO.store(to.cast_mut(), Ordering::Relaxed);
        SCB::set_pendsv();
    }

    unsafe fn start(first: *const Context) -> ! {
        RTK_SWITCH_FROM.store(core::ptr::null_mut(), Ordering::Relaxed);
        RTK_SWITCH_TO.store(first.cast_mut(), Ordering::Relaxed);

        // SAFETY: boot code owns the core; nothing else configures the
        // system handler priorities concurrently.
        let mut peripherals = unsafe { cortex_m::Peripherals::steal() };
        // SAFETY: PendSV at the lowest priority cannot break a priority
        // based critical section.
        unsafe { peripherals.SCB.set_priority(SystemHandler::PendSV, 0xFF) };
        SCB::set_pendsv();
        // SAFETY: the kernel state is consistent; the first PendSV leaves
        // the boot context for good.
        unsafe { cortex_m::interrupt::enable() };
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn halt(_reason: HaltReason) -> ! {
        cortex_m::interrupt::disable();
        loop {
            cortex_m::asm::wfi();
        }
    }
}

#[cfg(target_arch = "arm")]
core::arch::global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    // save the outgoing thread unless it is being discarded
    "    ldr   r2, ={from}",
    "    ldr   r0, [r2]",
    "    cbz   r0, 1f",
    "    mrs   r1, psp",
    "    stmdb r1!, {{r4-r11}}",
    "    str   r1, [r0]",
    "    movs  r3, #0",
    "    str   r3, [r2]",
    "1:",
    "    ldr   r2, ={to}",
    "    ldr   r0, [r2]",
    "    ldr   r1, [r0]",
    "    ldmia r1!, {{r4-r11}}",
    "    msr   psp, r1",
    // return to thread mode on the process stack
    "    ldr   lr, =0xFFFFFFFD",
    "    bx    lr",
    ".size PendSV, . - PendSV",
    from = sym RTK_SWITCH_FROM,
    to = sym RTK_SWITCH_TO,
);
