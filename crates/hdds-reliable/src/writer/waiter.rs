// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wake slots for threads parked outside the container lock.
//!
//! The container lock is reentrant and cannot back a condvar, so blocked
//! threads park on private mutex/condvar pairs instead:
//!
//! - [`Waiter`]: one per blocked `obtain_buffer` call, queued on its
//!   instance. A signal only means "re-check"; the writer re-runs admission
//!   under the container lock and parks again if it still cannot proceed.
//! - [`Progress`]: one per container, a generation counter bumped whenever
//!   samples complete. Backs `wait_pending` and `wait_for_acknowledgment`.
//!
//! The outcome or generation is stored before signalling, so a wakeup issued
//! before the thread parks is never lost.
//!
//! Lock order: container lock, then waiter or progress lock. Neither is held
//! while taking the container lock.

use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// State of a blocked write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitState {
    Waiting,
    /// Something changed on the instance; re-check admission.
    Signalled,
    /// The container shut down.
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct Waiter {
    state: Mutex<WaitState>,
    condvar: Condvar,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaitState::Waiting),
            condvar: Condvar::new(),
        }
    }

    /// Wake this writer for a re-check. False if it was not waiting.
    pub fn signal(&self) -> bool {
        self.resolve(WaitState::Signalled)
    }

    /// Wake this writer with a shutdown outcome. False if already cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if *state == WaitState::Cancelled {
            return false;
        }
        *state = WaitState::Cancelled;
        self.condvar.notify_one();
        true
    }

    fn resolve(&self, outcome: WaitState) -> bool {
        let mut state = self.state.lock();
        if *state != WaitState::Waiting {
            return false;
        }
        *state = outcome;
        self.condvar.notify_one();
        true
    }

    /// Consume a signal before parking again. Cancellation sticks.
    pub fn rearm(&self) {
        let mut state = self.state.lock();
        if *state == WaitState::Signalled {
            *state = WaitState::Waiting;
        }
    }

    pub fn state(&self) -> WaitState {
        *self.state.lock()
    }

    /// Park until signalled, cancelled or `deadline` passes.
    pub fn wait_until(&self, deadline: Instant) -> WaitState {
        let mut state = self.state.lock();
        while *state == WaitState::Waiting {
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }
}

/// Completion generation counter.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read under the container lock, after checking the wait predicate.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    pub fn notify_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Park until the generation moves past `seen`. False on timeout.
    pub fn wait_past(&self, seen: u64, deadline: Instant) -> bool {
        let mut generation = self.generation.lock();
        while *generation == seen {
            if self.condvar.wait_until(&mut generation, deadline).timed_out() {
                return *generation != seen;
            }
        }
        true
    }
}
