//! Ready queue and timer list costs on the host.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rtk::{HaltReason, IrqContext, Kernel, KernelConfig, Port, Priority, ThreadEntry};
use std::hint::black_box;

struct BenchPort;

impl Port for BenchPort {
    type Context = usize;

    const MIN_STACK: usize = 16;

    fn init_context(_stack: &mut [u8], _entry: ThreadEntry, arg: usize) -> usize {
        arg
    }

    unsafe fn switch(_from: *mut usize, _to: *const usize) {}

    unsafe fn start(_first: *const usize) -> ! {
        unreachable!("benchmarks never start threads")
    }

    fn halt(reason: HaltReason) -> ! {
        panic!("kernel halt: {reason}")
    }
}

type BenchKernel = Kernel<BenchPort, 32, 32>;

fn idle(_: usize) -> ! {
    loop {
        std::hint::spin_loop();
    }
}

fn stack() -> &'static mut [u8] {
    Box::leak(vec![0u8; 64].into_boxed_slice())
}

fn kernel_with(threads: &[u8]) -> Box<BenchKernel> {
    let mut kernel = Box::new(BenchKernel::new(KernelConfig::DEFAULT));
    for &prio in threads {
        kernel
            .create(stack(), Priority::new(prio), idle, 0)
            .expect("thread slot");
    }
    kernel.start();
    kernel
}

/// Rotate the CPU among equal-priority peers.
fn bench_yield(c: &mut Criterion) {
    let mut group = c.benchmark_group("yield_ring");
    for peers in [2usize, 8, 31] {
        let mut kernel = kernel_with(&vec![5; peers]);
        group.bench_with_input(BenchmarkId::from_parameter(peers), &peers, |b, _| {
            b.iter(|| black_box(kernel.yield_now()));
        });
    }
    group.finish();
}

/// Sleep one tick, get woken by the timer and preempt back in.
fn bench_sleep_wake(c: &mut Criterion) {
    let mut prios: Vec<u8> = (0..30).map(|i| (i * 7 % 120) as u8 + 1).collect();
    prios.push(150);
    let mut kernel = kernel_with(&prios);

    c.bench_function("sleep_wake_cycle", |b| {
        b.iter(|| {
            black_box(kernel.sleep(1));
            critical_section::with(|cs| kernel.tick(cs));
            black_box(kernel.reschedule())
        });
    });
}

fn nop(_: &mut dyn IrqContext, _: usize) {}

/// Arm a batch of timers at scattered deadlines, then let them fire.
fn bench_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_list");
    for armed in [4usize, 16, 32] {
        let mut kernel = kernel_with(&[1]);
        let ids: Vec<_> = (0..armed)
            .map(|_| kernel.timer_create(nop, 0).expect("timer slot"))
            .collect();
        group.bench_with_input(BenchmarkId::new("arm_and_fire", armed), &armed, |b, _| {
            b.iter(|| {
                for (n, id) in ids.iter().enumerate() {
                    kernel
                        .timer_arm(*id, ((n * 13) % 17 + 1) as u32, None)
                        .expect("timer");
                }
                critical_section::with(|cs| {
                    for _ in 0..17 {
                        kernel.tick(cs);
                    }
                });
                black_box(kernel.next_deadline())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_yield, bench_sleep_wake, bench_timers);
criterion_main!(benches);
