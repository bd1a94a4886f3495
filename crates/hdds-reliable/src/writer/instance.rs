// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-instance record: sample queue, registration sample, blocked writers.

use std::collections::VecDeque;
use std::sync::Arc;

use super::list::SampleList;
use super::sample::InstanceHandle;
use super::waiter::Waiter;

#[derive(Debug)]
pub(crate) struct PublicationInstance {
    pub handle: InstanceHandle,
    /// Duplicate of the registration sample, replayed on unregister/dispose.
    pub registered_sample: Arc<[u8]>,
    /// Samples of this instance in write order (instance thread).
    pub samples: SampleList,
    /// Slots handed out by `obtain_buffer` but not yet enqueued.
    pub reserved: usize,
    /// Blocked writers, oldest first.
    pub waiters: VecDeque<Arc<Waiter>>,
    pub unregistered: bool,
}

impl PublicationInstance {
    pub fn new(handle: InstanceHandle, registered_sample: Arc<[u8]>) -> Self {
        Self {
            handle,
            registered_sample,
            samples: SampleList::default(),
            reserved: 0,
            waiters: VecDeque::new(),
            unregistered: false,
        }
    }

    /// Queued plus reserved slots.
    #[inline]
    pub fn occupied(&self) -> usize {
        self.samples.len() + self.reserved
    }

    /// Is `waiter` (or, for a newcomer, nobody) first in line?
    pub fn is_next(&self, waiter: Option<&Arc<Waiter>>) -> bool {
        match (self.waiters.front(), waiter) {
            (None, _) => true,
            (Some(front), Some(waiter)) => Arc::ptr_eq(front, waiter),
            (Some(_), None) => false,
        }
    }

    /// Wake the oldest blocked writer for a re-check. Only one is woken.
    pub fn signal_next(&self) -> bool {
        self.waiters.front().is_some_and(|w| w.signal())
    }

    /// Wake every blocked writer with a shutdown outcome.
    pub fn cancel_waiters(&mut self) -> usize {
        self.waiters.drain(..).filter(|w| w.cancel()).count()
    }

    /// Drop a writer that proceeded or gave up.
    pub fn remove_waiter(&mut self, waiter: &Arc<Waiter>) {
        self.waiters.retain(|w| !Arc::ptr_eq(w, waiter));
    }
}
