//! Host port used by the unit tests: contexts only record how they were
//! built, switches are counted, and a halt panics with its reason.

use std::cell::Cell;

use rtk_core::HaltReason;

use crate::port::{Port, ThreadEntry};

thread_local! {
    static SWITCHES: Cell<u32> = const { Cell::new(0) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestContext {
    pub entry: usize,
    pub arg: usize,
    pub stack_len: usize,
}

pub struct TestPort;

impl Port for TestPort {
    type Context = TestContext;

    const MIN_STACK: usize = 64;

    fn init_context(stack: &mut [u8], entry: ThreadEntry, arg: usize) -> TestContext {
        TestContext {
            entry: entry as usize,
            arg,
            stack_len: stack.len(),
        }
    }

    unsafe fn switch(_from: *mut TestContext, _to: *const TestContext) {
        SWITCHES.with(|count| count.set(count.get() + 1));
    }

    unsafe fn start(_first: *const TestContext) -> ! {
        panic!("test port cannot run threads");
    }

    fn halt(reason: HaltReason) -> ! {
        panic!("kernel halt: {reason:?}");
    }
}

/// Switches performed by the port on this test thread
pub fn switches() -> u32 {
    SWITCHES.with(Cell::get)
}

pub fn stack(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

pub fn spin(_: usize) -> ! {
    loop {
        std::hint::spin_loop();
    }
}
