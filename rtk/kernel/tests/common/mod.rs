//! Host port shared by the integration tests.
//!
//! Contexts are just the entry argument; switches are bookkeeping only, so
//! the tests drive the kernel's state machine and act on behalf of whichever
//! thread it reports as current.

#![allow(dead_code)]

use rtk::{HaltReason, Kernel, KernelConfig, Port, Priority, ThreadEntry, ThreadId};

pub struct HostPort;

impl Port for HostPort {
    type Context = usize;

    const MIN_STACK: usize = 64;

    fn init_context(_stack: &mut [u8], _entry: ThreadEntry, arg: usize) -> usize {
        arg
    }

    unsafe fn switch(_from: *mut usize, _to: *const usize) {}

    unsafe fn start(_first: *const usize) -> ! {
        panic!("host port cannot run threads");
    }

    fn halt(reason: HaltReason) -> ! {
        panic!("kernel halt: {reason:?}");
    }
}

pub type HostKernel = Kernel<HostPort, 8, 4>;

pub fn kernel() -> HostKernel {
    HostKernel::new(KernelConfig::DEFAULT)
}

pub fn stack() -> &'static mut [u8] {
    Box::leak(vec![0u8; 256].into_boxed_slice())
}

pub fn forever(_: usize) -> ! {
    loop {
        std::hint::spin_loop();
    }
}

pub fn spawn(k: &mut HostKernel, priority: u8) -> ThreadId {
    k.create(stack(), Priority::new(priority), forever, priority as usize)
        .expect("free thread slot")
}

pub fn ticks(k: &mut HostKernel, n: u32) {
    critical_section::with(|cs| {
        for _ in 0..n {
            k.tick(cs);
        }
    });
}

/// Running thread outranks every ready thread.
pub fn assert_priority_order(k: &HostKernel) {
    let running = k.priority(k.current().expect("started")).unwrap();
    for ready in k.ready_threads() {
        assert!(k.priority(ready).unwrap() <= running, "{ready} outranks the running thread");
    }
}
