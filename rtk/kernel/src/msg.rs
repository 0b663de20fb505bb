//! Synchronous messages between threads.
//!
//! A sender blocks until the receiver releases its message with an answer.
//! Pending senders queue FIFO on the receiver; the receiver serves the head
//! of that queue, one message at a time.

use rtk_core::{HaltReason, Msg, ThreadState, Timeout, WaitError, WaitKind, WaitResult, MSG_OK};

use crate::halt::halt;
use crate::port::Port;
use crate::sched::{Kernel, Step, Switch};
use crate::thread::{ThreadId, Wait, Wakeup};

impl<P: Port, const N: usize, const T: usize> Kernel<P, N, T> {
    /// Send `msg` to `target` and wait for its answer.
    ///
    /// Fails with `Reset` at once if the target is gone or finished, and
    /// later if it exits before releasing the message.
    pub fn send(&mut self, target: ThreadId, msg: Msg) -> Step<WaitResult<Msg>> {
        let current = self.current_index();
        let Some(index) = self.threads.resolve(target) else {
            return Step::Done(Err(WaitError::Reset));
        };
        debug_assert_ne!(index, current, "thread sent a message to itself");
        if index == current || self.tcb(index).state.is_final() {
            return Step::Done(Err(WaitError::Reset));
        }

        self.tcb_mut(current).outbox = msg;
        let mut senders = self.tcb(index).senders;
        Self::intact(senders.push_back(&mut self.threads, current));
        self.tcb_mut(index).senders = senders;
        if self.tcb(index).state == ThreadState::Suspended(WaitKind::Receive) {
            self.wake_i(index, Wakeup::Signaled(MSG_OK));
        }
        Step::Switch(self.suspend_current(
            ThreadState::Suspended(WaitKind::Send),
            Wait::None,
            Timeout::Never,
        ))
    }

    /// Wait for a message. Returns the sender and its message, or blocks
    /// until one arrives; then [`received`](Self::received) reads it.
    pub fn receive(&mut self) -> Step<(ThreadId, Msg)> {
        let current = self.current_index();
        if self.tcb(current).senders.is_empty() {
            Step::Switch(self.suspend_current(
                ThreadState::Suspended(WaitKind::Receive),
                Wait::None,
                Timeout::Never,
            ))
        } else {
            Step::Done(self.received())
        }
    }

    /// Message at the head of the current thread's queue.
    pub fn received(&self) -> (ThreadId, Msg) {
        match self.tcb(self.current_index()).senders.front() {
            Some(sender) => (self.threads.id_of(sender), self.tcb(sender).outbox),
            None => halt::<P>(HaltReason::CorruptedQueue),
        }
    }

    /// Whether a sender is waiting on the current thread
    pub fn has_messages(&self) -> bool {
        !self.tcb(self.current_index()).senders.is_empty()
    }

    /// Answer the message being served and ready its sender.
    pub fn release(&mut self, answer: Msg) -> Option<Switch> {
        let current = self.current_index();
        let mut senders = self.tcb(current).senders;
        let sender = Self::intact(senders.pop_front(&mut self.threads));
        self.tcb_mut(current).senders = senders;
        match sender {
            Some(sender) => {
                self.wake_i(sender, Wakeup::Signaled(answer));
                self.reschedule()
            }
            None => {
                debug_assert!(false, "release without a pending message");
                None
            }
        }
    }
}
