//! Waiter suspension/resumption protocol (C7).
//!
//! A blocked requester parks on a [`WaitSlot`]: a mutex-guarded resume slot
//! plus a condition variable. The granter (release engine, deadlock detector, or
//! the lock manager's shutdown path) sets the resume status and notifies;
//! the waiter wakes, inspects the status, and maps it to an `Outcome`.
//!
//! A thread that discovers its own transaction is already waiting on the
//! same resource doesn't register a second waiter record at all: it clones
//! the existing waiter's `Arc<WaitSlot>` and waits on that directly (see
//! `lock_manager`'s `request_once`), so it wakes alongside the primary for
//! free.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::common::TransactionId;

/// Why a waiter was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStatus {
    Resumed,
    ResumedTimeout,
    ResumedDeadlockTimeout,
    AbortedFirst,
    AbortedOther,
    Interrupted,
}

struct WaitState {
    resume: Option<ResumeStatus>,
}

/// One thread's parking slot. Cheap to clone (`Arc`) so the request engine
/// can hand a clone to the resource record (for wakeup) while the waiting
/// thread blocks on its own copy.
pub struct WaitSlot {
    state: Mutex<WaitState>,
    cv: Condvar,
    pub registered_at: Instant,
}

impl WaitSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WaitState { resume: None }),
            cv: Condvar::new(),
            registered_at: Instant::now(),
        })
    }

    /// Resume this waiter with `status`.
    pub fn resume(&self, status: ResumeStatus) {
        let mut state = self.state.lock();
        if state.resume.is_some() {
            return;
        }
        state.resume = Some(status);
        self.cv.notify_all();
    }

    pub fn is_resumed(&self) -> bool {
        self.state.lock().resume.is_some()
    }

    /// Block until resumed or `deadline` elapses. `None` deadline waits
    /// forever. Returns `ResumedTimeout` synthetically if the deadline
    /// elapses without an explicit resume.
    pub fn wait(&self, deadline: Option<Instant>) -> ResumeStatus {
        let mut state = self.state.lock();
        loop {
            if let Some(status) = state.resume {
                return status;
            }
            match deadline {
                None => self.cv.wait(&mut state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.resume = Some(ResumeStatus::ResumedTimeout);
                        return ResumeStatus::ResumedTimeout;
                    }
                    let timed_out = self
                        .cv
                        .wait_for(&mut state, deadline - now)
                        .timed_out();
                    if timed_out && state.resume.is_none() {
                        state.resume = Some(ResumeStatus::ResumedTimeout);
                        return ResumeStatus::ResumedTimeout;
                    }
                }
            }
        }
    }
}

/// A requester's wait budget, from §4.5/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBudget {
    Infinite,
    /// Poll once; never surface a timeout error even when it fails.
    ForceZero,
    /// Poll once; surface a timeout error on failure.
    Zero,
    Seconds(u64),
}

impl WaitBudget {
    pub fn is_conditional(&self) -> bool {
        matches!(self, WaitBudget::ForceZero | WaitBudget::Zero)
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WaitBudget::Infinite => None,
            WaitBudget::ForceZero | WaitBudget::Zero => Some(Instant::now()),
            WaitBudget::Seconds(s) => Some(Instant::now() + Duration::from_secs(*s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn resume_wakes_waiter() {
        let slot = WaitSlot::new();
        let slot2 = Arc::clone(&slot);
        let handle = thread::spawn(move || slot2.wait(None));
        thread::sleep(Duration::from_millis(20));
        slot.resume(ResumeStatus::Resumed);
        assert_eq!(handle.join().unwrap(), ResumeStatus::Resumed);
    }

    #[test]
    fn deadline_in_the_past_times_out_immediately() {
        let slot = WaitSlot::new();
        let status = slot.wait(Some(Instant::now() - Duration::from_millis(1)));
        assert_eq!(status, ResumeStatus::ResumedTimeout);
    }

    #[test]
    fn double_resume_keeps_first_status() {
        let slot = WaitSlot::new();
        slot.resume(ResumeStatus::Resumed);
        slot.resume(ResumeStatus::AbortedFirst);
        assert_eq!(slot.wait(None), ResumeStatus::Resumed);
    }
}
