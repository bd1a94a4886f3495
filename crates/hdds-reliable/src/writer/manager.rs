// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side sample lifecycle container.
//!
//! Owns every sample a writer produces from `obtain_buffer` until the
//! transport reports a terminal outcome for it.
//!
//! # Lists
//!
//! ```text
//!            get_unsent_data            data_delivered
//!   write --> Unsent ---------> Sending --------------> Sent
//!               ^   data_dropped  |                      |
//!               +-----(local)-----+                      | evict / dispose / trim
//!                                 | evict (in flight)    v
//!                                 +-----------------> Released --> freed
//!                                                         ^
//!   reenqueue_all --> Resend ------ get_resend_data ------+
//! ```
//!
//! Every live sample sits on exactly one of the five global lists. Samples
//! that still count against their instance's depth are also linked on the
//! instance queue (Unsent, Sending and Sent members; never Released or Resend).
//! Control samples travel Unsent -> Sending and are freed on their outcome.
//!
//! # Locking
//!
//! One reentrant lock per container. Transport callbacks (`data_delivered`,
//! `data_dropped`) may arrive on the thread that is inside `abandon` or
//! `send`, so no `RefCell` borrow is ever held across a transport call.
//! A blocked writer parks on its own [`Waiter`] and re-runs admission each
//! time it is signalled; `obtain_buffer` must not be called by a thread that
//! already holds the container lock.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;

use super::instance::PublicationInstance;
use super::list::{list_head, SampleList, Thread};
use super::metrics::LifecycleMetrics;
use super::pool::{SlotHandle, SlotPool};
use super::sample::{
    now_nanos, Guid, InstanceHandle, SampleChain, SampleHeader, SampleId, SampleNode,
};
use super::transport::TransportHandoff;
use super::waiter::{Progress, WaitState, Waiter};
use crate::config::{LifecycleConfig, LENGTH_UNLIMITED, MAX_READERS_PER_ELEM};
use crate::reliability::{SeqNumGenerator, SequenceNumber, SequenceTracker};
use crate::{Error, Result};

/// Global list a live sample currently sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendState {
    /// Written, not yet handed to the transport.
    Unsent,
    /// Handed to the transport, outcome pending.
    Sending,
    /// Delivered; kept for durability until evicted.
    Sent,
    /// Gone from its instance, outcome pending; freed on the transport's report.
    Released,
    /// Duplicate for late-joining readers, not yet handed to the transport.
    Resend,
}

enum Eviction {
    /// The oldest sample was freed on the spot.
    Freed,
    /// The oldest sample was in flight and moved to Released.
    InFlight(SampleId),
}

enum Admission {
    Proceed { abandon: Option<SampleId> },
    Wait,
}

enum Step {
    Proceed(Option<SampleId>),
    Park(Arc<Waiter>, Instant),
}

struct ContainerState {
    samples: SlotPool<SampleNode>,
    instances: SlotPool<PublicationInstance>,
    handles: BTreeMap<InstanceHandle, SlotHandle>,
    unsent: SampleList,
    sending: SampleList,
    sent: SampleList,
    released: SampleList,
    resend: SampleList,
    /// Sequence numbers that reached a terminal outcome.
    acked: SequenceTracker,
    next_handle: u64,
}

impl ContainerState {
    fn new(config: &LifecycleConfig) -> Self {
        Self {
            samples: SlotPool::with_capacity(config.max_samples),
            instances: SlotPool::with_capacity(config.max_instances),
            handles: BTreeMap::new(),
            unsent: SampleList::default(),
            sending: SampleList::default(),
            sent: SampleList::default(),
            released: SampleList::default(),
            resend: SampleList::default(),
            acked: SequenceTracker::new(SequenceNumber::ZERO),
            next_handle: 1,
        }
    }

    fn list(&self, state: SendState) -> &SampleList {
        match state {
            SendState::Unsent => &self.unsent,
            SendState::Sending => &self.sending,
            SendState::Sent => &self.sent,
            SendState::Released => &self.released,
            SendState::Resend => &self.resend,
        }
    }

    fn list_and_nodes(&mut self, state: SendState) -> (&mut SampleList, &mut SlotPool<SampleNode>) {
        match state {
            SendState::Unsent => (&mut self.unsent, &mut self.samples),
            SendState::Sending => (&mut self.sending, &mut self.samples),
            SendState::Sent => (&mut self.sent, &mut self.samples),
            SendState::Released => (&mut self.released, &mut self.samples),
            SendState::Resend => (&mut self.resend, &mut self.samples),
        }
    }

    /// Find the global list of `id` by walking to its list head.
    fn send_state_of(&self, id: SampleId) -> Option<SendState> {
        let head = list_head(&self.samples, id, Thread::Send)?;
        [
            SendState::Unsent,
            SendState::Sending,
            SendState::Sent,
            SendState::Released,
            SendState::Resend,
        ]
        .into_iter()
        .find(|&state| self.list(state).head() == Some(head))
    }

    fn unlink(&mut self, from: SendState, id: SampleId) -> bool {
        let (list, nodes) = self.list_and_nodes(from);
        list.remove(nodes, id, Thread::Send)
    }

    fn link_back(&mut self, to: SendState, id: SampleId) {
        let (list, nodes) = self.list_and_nodes(to);
        list.push_back(nodes, id, Thread::Send);
    }

    fn move_sample(&mut self, id: SampleId, from: SendState, to: SendState) {
        if self.unlink(from, id) {
            self.link_back(to, id);
        }
    }

    fn instance_slot(&self, handle: InstanceHandle) -> Option<SlotHandle> {
        self.handles.get(&handle).copied()
    }

    fn instance_mut(&mut self, handle: InstanceHandle) -> Option<&mut PublicationInstance> {
        let slot = self.instance_slot(handle)?;
        self.instances.get_mut(slot)
    }

    /// Wake the oldest blocked writer on `handle`, if any.
    fn signal_instance(&self, handle: InstanceHandle) {
        if let Some(inst) = self
            .instance_slot(handle)
            .and_then(|slot| self.instances.get(slot))
        {
            inst.signal_next();
        }
    }

    /// Record that `sequence` will never need the transport again.
    fn acknowledge(&mut self, sequence: SequenceNumber) {
        if sequence > SequenceNumber::ZERO {
            self.acked.update(sequence);
        }
    }

    fn is_acknowledged(&self, sequence: SequenceNumber) -> bool {
        sequence == SequenceNumber::UNKNOWN || sequence <= self.acked.low()
    }

    fn has_pending(&self) -> bool {
        !(self.unsent.is_empty()
            && self.sending.is_empty()
            && self.released.is_empty()
            && self.resend.is_empty())
    }
}

/// Per-writer sample queue engine.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use hdds_reliable::config::LifecycleConfig;
/// use hdds_reliable::writer::{DiscardTransport, Guid, InstanceHandle, SampleLifecycleManager, SendState};
///
/// let manager = SampleLifecycleManager::new(
///     Guid::from_parts([1; 12], 0x102),
///     LifecycleConfig::new(2),
///     Arc::new(DiscardTransport),
/// )
/// .unwrap();
///
/// let handle = manager.register_instance(InstanceHandle::NIL, &b"key"[..]).unwrap();
/// let sample = manager.write(handle, &b"hello"[..]).unwrap();
/// assert_eq!(manager.send_state(sample), Some(SendState::Unsent));
///
/// let chain = manager.get_unsent_data();
/// assert_eq!(chain.ids(), vec![sample]);
/// manager.data_delivered(sample);
/// assert_eq!(manager.send_state(sample), Some(SendState::Sent));
/// assert!(manager.sequence_acknowledged(chain.iter().next().unwrap().header.sequence));
///
/// manager.unregister_all();
/// ```
pub struct SampleLifecycleManager {
    publication_id: Guid,
    config: LifecycleConfig,
    state: ReentrantMutex<RefCell<ContainerState>>,
    shutdown: AtomicBool,
    transport: Arc<dyn TransportHandoff>,
    sequence: SeqNumGenerator,
    progress: Progress,
    metrics: LifecycleMetrics,
}

impl SampleLifecycleManager {
    /// Build a container with preallocated sample and instance pools.
    pub fn new(
        publication_id: Guid,
        config: LifecycleConfig,
        transport: Arc<dyn TransportHandoff>,
    ) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "[SampleLifecycleManager::new] publication={} depth={} block={} pool={}",
            publication_id,
            config.depth,
            config.should_block,
            config.max_samples
        );
        Ok(Self {
            publication_id,
            state: ReentrantMutex::new(RefCell::new(ContainerState::new(&config))),
            config,
            shutdown: AtomicBool::new(false),
            transport,
            sequence: SeqNumGenerator::new(),
            progress: Progress::new(),
            metrics: LifecycleMetrics::new(),
        })
    }

    pub fn publication_id(&self) -> Guid {
        self.publication_id
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sequence number the next obtained sample will carry.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.sequence.current()
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Register an instance.
    ///
    /// `InstanceHandle::NIL` allocates a new instance holding a duplicate of
    /// `registered_sample`. A known handle is re-registered (idempotent, clears
    /// the unregistered flag).
    pub fn register_instance(
        &self,
        handle: InstanceHandle,
        registered_sample: impl Into<Arc<[u8]>>,
    ) -> Result<InstanceHandle> {
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        if handle.is_nil() {
            let new_handle = InstanceHandle::new(st.next_handle);
            let record = PublicationInstance::new(new_handle, registered_sample.into());
            let slot = st.instances.allocate(record).map_err(|_| {
                Error::ResourceExhausted(format!(
                    "instance pool full ({} instances)",
                    st.instances.capacity()
                ))
            })?;
            st.next_handle += 1;
            st.handles.insert(new_handle, slot);
            log::debug!(
                "[SampleLifecycleManager::register_instance] registered {}",
                new_handle
            );
            return Ok(new_handle);
        }

        let inst = st.instance_mut(handle).ok_or_else(|| unknown_instance(handle))?;
        inst.unregistered = false;
        Ok(handle)
    }

    /// Mark an instance unregistered; queued samples are untouched.
    ///
    /// Returns the registration sample for the unregister message.
    pub fn unregister(&self, handle: InstanceHandle) -> Result<Arc<[u8]>> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let inst = cell
            .instance_mut(handle)
            .ok_or_else(|| unknown_instance(handle))?;
        inst.unregistered = true;
        Ok(Arc::clone(&inst.registered_sample))
    }

    /// Evict every queued sample of an instance.
    ///
    /// In-flight samples move to Released and complete on their own; they are
    /// not abandoned.
    pub fn dispose(&self, handle: InstanceHandle) -> Result<()> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;
        let slot = st
            .instance_slot(handle)
            .ok_or_else(|| unknown_instance(handle))?;

        let mut evicted = 0usize;
        while st
            .instances
            .get(slot)
            .is_some_and(|inst| !inst.samples.is_empty())
        {
            self.evict_oldest(st, slot)?;
            evicted += 1;
        }
        st.signal_instance(handle);
        self.progress.notify_all();
        log::debug!(
            "[SampleLifecycleManager::dispose] {} evicted {} samples",
            handle,
            evicted
        );
        Ok(())
    }

    pub fn registered_sample(&self, handle: InstanceHandle) -> Option<Arc<[u8]>> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        cell.instance_mut(handle)
            .map(|inst| Arc::clone(&inst.registered_sample))
    }

    pub fn is_unregistered(&self, handle: InstanceHandle) -> Option<bool> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        cell.instance_mut(handle).map(|inst| inst.unregistered)
    }

    pub fn instance_handles(&self) -> Vec<InstanceHandle> {
        let guard = self.state.lock();
        let cell = guard.borrow();
        cell.handles.keys().copied().collect()
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Secure a slot on `handle`'s queue and stamp a new sample.
    ///
    /// Sent samples beyond `max_durable_per_instance` are trimmed first. At
    /// depth, the instance's oldest sample is evicted. If it was still in
    /// flight, a blocking container parks the caller; a non-blocking one asks
    /// the transport to abandon it and proceeds.
    ///
    /// A parked writer re-runs the whole check each time it is signalled,
    /// oldest writer first, until it gets a slot, `max_blocking_time` passes
    /// (`Timeout`) or the container shuts down (`Shutdown`).
    ///
    /// The slot stays reserved until [`enqueue`](Self::enqueue) or
    /// [`release_buffer`](Self::release_buffer).
    pub fn obtain_buffer(
        &self,
        handle: InstanceHandle,
        payload: impl Into<Arc<[u8]>>,
    ) -> Result<SampleId> {
        let payload = payload.into();
        let mut waiter: Option<Arc<Waiter>> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            if self.is_shut_down() {
                return Err(Error::Shutdown);
            }
            match self.try_admit(handle, &mut waiter, &mut deadline)? {
                Step::Proceed(abandon) => {
                    if let Some(stale) = abandon {
                        self.metrics.increment_abandons();
                        log::debug!(
                            "[SampleLifecycleManager::obtain_buffer] abandoning in-flight {}",
                            stale
                        );
                        self.transport.abandon(stale);
                    }
                    return self.fill_slot(handle, payload);
                }
                Step::Park(parked, until) => match parked.wait_until(until) {
                    WaitState::Signalled => {}
                    WaitState::Cancelled => return Err(Error::Shutdown),
                    WaitState::Waiting => return Err(self.give_up(handle, &parked)),
                },
            }
        }
    }

    /// Link an obtained sample at the tail of Unsent and of its instance queue.
    pub fn enqueue(&self, sample: SampleId) -> Result<()> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        let node = st
            .samples
            .get(sample.0)
            .ok_or_else(|| Error::PreconditionNotMet(format!("unknown {}", sample)))?;
        if node.enqueued {
            return Err(Error::PreconditionNotMet(format!(
                "{} already enqueued",
                sample
            )));
        }
        if node.control {
            return Err(Error::PreconditionNotMet(format!(
                "{} is a control sample",
                sample
            )));
        }
        let handle = node.header.instance;
        let sequence = node.header.sequence;
        let Some(slot) = st.instance_slot(handle) else {
            // Torn down between obtain_buffer and enqueue.
            st.samples.free(sample.0);
            st.acknowledge(sequence);
            return Err(Error::Shutdown);
        };

        if let Some(node) = st.samples.get_mut(sample.0) {
            node.enqueued = true;
        }
        st.unsent.push_back(&mut st.samples, sample, Thread::Send);
        let inst = st
            .instances
            .get_mut(slot)
            .ok_or_else(|| Error::Internal(format!("{} record missing", handle)))?;
        inst.samples.push_back(&mut st.samples, sample, Thread::Instance);
        inst.reserved = inst.reserved.saturating_sub(1);
        self.metrics.record_write(inst.occupied());
        // The new tail may let a parked writer evict an unsent sample.
        inst.signal_next();
        Ok(())
    }

    /// `obtain_buffer` followed by `enqueue`.
    pub fn write(
        &self,
        handle: InstanceHandle,
        payload: impl Into<Arc<[u8]>>,
    ) -> Result<SampleId> {
        let sample = self.obtain_buffer(handle, payload)?;
        self.enqueue(sample)?;
        Ok(sample)
    }

    /// Give back a sample obtained but never enqueued.
    pub fn release_buffer(&self, sample: SampleId) -> Result<()> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        match st.samples.get(sample.0) {
            Some(node) if !node.enqueued => {}
            _ => {
                return Err(Error::PreconditionNotMet(format!(
                    "{} is not an obtained buffer",
                    sample
                )))
            }
        }
        if let Some(node) = st.samples.free(sample.0) {
            st.acknowledge(node.header.sequence);
            if let Some(inst) = st.instance_mut(node.header.instance) {
                inst.reserved = inst.reserved.saturating_sub(1);
                inst.signal_next();
            }
        }
        self.progress.notify_all();
        Ok(())
    }

    /// Allocate a control sample (no instance, no sequence number).
    pub fn obtain_buffer_for_control(&self, payload: impl Into<Arc<[u8]>>) -> Result<SampleId> {
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        let header = SampleHeader {
            publication_id: self.publication_id,
            sequence: SequenceNumber::UNKNOWN,
            source_timestamp: now_nanos(),
            instance: InstanceHandle::NIL,
        };
        let capacity = st.samples.capacity();
        st.samples
            .allocate(SampleNode::control(header, payload.into()))
            .map(SampleId)
            .map_err(|_| {
                Error::ResourceExhausted(format!("sample pool full ({} slots)", capacity))
            })
    }

    /// Queue a control sample at the tail of Unsent.
    ///
    /// It counts against no instance and is freed once the transport reports
    /// it delivered or dropped.
    pub fn enqueue_control(&self, sample: SampleId) -> Result<()> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        match st.samples.get_mut(sample.0) {
            Some(node) if node.control && !node.enqueued => node.enqueued = true,
            _ => {
                return Err(Error::PreconditionNotMet(format!(
                    "{} is not an obtained control sample",
                    sample
                )))
            }
        }
        st.unsent.push_back(&mut st.samples, sample, Thread::Send);
        Ok(())
    }

    /// Evict the oldest queued sample of an instance.
    ///
    /// `Ok(true)` when it was freed immediately, `Ok(false)` when it was in
    /// flight and now waits in Released for the transport's report.
    pub fn remove_oldest_sample(&self, handle: InstanceHandle) -> Result<bool> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;
        let slot = st
            .instance_slot(handle)
            .ok_or_else(|| unknown_instance(handle))?;
        if st.instances.get(slot).is_some_and(|i| i.samples.is_empty()) {
            return Err(Error::PreconditionNotMet(format!("{} has no samples", handle)));
        }

        let eviction = self.evict_oldest(st, slot)?;
        st.signal_instance(handle);
        self.progress.notify_all();
        Ok(matches!(eviction, Eviction::Freed))
    }

    /// Free Sent samples beyond `max_durable_per_instance`, newest kept.
    ///
    /// Runs on every `obtain_buffer`. Returns the number freed.
    pub fn remove_excess_durable(&self) -> usize {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        self.trim_durable(&mut cell)
    }

    // ------------------------------------------------------------------
    // Transport hand-off
    // ------------------------------------------------------------------

    /// Detach Unsent, append it to Sending and return the detached chain.
    pub fn get_unsent_data(&self) -> SampleChain {
        self.detach(SendState::Unsent, SendState::Sending)
    }

    /// Detach Resend, append it to Released and return the detached chain.
    pub fn get_resend_data(&self) -> SampleChain {
        self.detach(SendState::Resend, SendState::Released)
    }

    /// Hand all unsent and resend data to the transport. Returns the count.
    pub fn send_pending(&self) -> usize {
        let mut chain = self.get_unsent_data();
        chain.extend(self.get_resend_data());
        let count = chain.len();
        if count > 0 {
            self.transport.send(chain);
        }
        count
    }

    /// Transport confirmed delivery of `sample`.
    pub fn data_delivered(&self, sample: SampleId) {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        if self.complete_in_flight(&mut cell, sample, "data_delivered") {
            self.metrics.increment_delivered();
        }
        self.progress.notify_all();
    }

    /// `sample` was dropped, by the transport or by a local decision.
    ///
    /// A transport drop is terminal, like delivery. A local drop sends an
    /// in-flight sample back to Unsent for another attempt.
    pub fn data_dropped(&self, sample: SampleId, dropped_by_transport: bool) {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        if dropped_by_transport {
            if self.complete_in_flight(st, sample, "data_dropped") {
                self.metrics.increment_dropped();
            }
            self.progress.notify_all();
            return;
        }

        match st.send_state_of(sample) {
            Some(SendState::Sending) => {
                st.unlink(SendState::Sending, sample);
                st.unsent.push_front(&mut st.samples, sample, Thread::Send);
                if let Some(handle) = st.samples.get(sample.0).map(|n| n.header.instance) {
                    st.signal_instance(handle);
                }
                self.metrics.increment_dropped();
            }
            Some(SendState::Released) => {
                self.finalize_released(st, sample);
                self.metrics.increment_dropped();
            }
            state => self.unmatched(sample, state, "data_dropped"),
        }
        self.progress.notify_all();
    }

    /// Duplicate in-flight and sent samples into Resend for new readers.
    ///
    /// Each duplicate targets at most `MAX_READERS_PER_ELEM` of `readers`;
    /// only the newest `max_durable_per_instance` samples of each instance
    /// are replayed. Returns the number of duplicates created.
    pub fn reenqueue_all(&self, readers: &[Guid]) -> Result<usize> {
        let max_durable = self.config.max_durable_per_instance;
        if readers.is_empty() || max_durable == 0 {
            return Ok(0);
        }

        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        let mut candidates: Vec<(SequenceNumber, InstanceHandle, SampleId)> = st
            .sending
            .iter(&st.samples, Thread::Send)
            .chain(st.sent.iter(&st.samples, Thread::Send))
            .filter_map(|id| {
                let node = st.samples.get(id.0)?;
                (!node.control).then_some((node.header.sequence, node.header.instance, id))
            })
            .collect();
        candidates.sort_unstable_by_key(|&(seq, _, _)| seq);

        let mut remaining: BTreeMap<InstanceHandle, usize> = BTreeMap::new();
        for &(_, handle, _) in &candidates {
            *remaining.entry(handle).or_insert(0) += 1;
        }

        let mut created = 0usize;
        for (_, handle, id) in candidates {
            let left = remaining.entry(handle).or_insert(0);
            let replay = *left <= max_durable;
            *left -= 1;
            if !replay {
                continue;
            }

            let duplicates: Vec<SampleNode> = match st.samples.get(id.0) {
                Some(template) => readers
                    .chunks(MAX_READERS_PER_ELEM)
                    .map(|chunk| template.duplicate_for(chunk))
                    .collect(),
                None => continue,
            };
            for duplicate in duplicates {
                let Ok(dup) = st.samples.allocate(duplicate) else {
                    self.metrics.increment_resend_duplicates(created as u64);
                    log::warn!(
                        "[SampleLifecycleManager::reenqueue_all] sample pool exhausted after {} duplicates",
                        created
                    );
                    return Err(Error::ResourceExhausted(
                        "sample pool full while duplicating for resend".to_string(),
                    ));
                };
                st.resend.push_back(&mut st.samples, SampleId(dup), Thread::Send);
                created += 1;
            }
        }

        self.metrics.increment_resend_duplicates(created as u64);
        log::debug!(
            "[SampleLifecycleManager::reenqueue_all] {} duplicates for {} readers",
            created,
            readers.len()
        );
        Ok(created)
    }

    /// Shut the container down.
    ///
    /// Abandons every in-flight sample (finalizing any the transport does not
    /// report back), wakes all blocked writers with `Shutdown`, then disposes
    /// and unregisters every instance. Returns each instance's registration
    /// sample for the final unregister messages.
    pub fn unregister_all(&self) -> Vec<(InstanceHandle, Arc<[u8]>)> {
        self.shutdown.store(true, Ordering::Release);
        let guard = self.state.lock();

        for list in [SendState::Sending, SendState::Released] {
            loop {
                let head = guard.borrow().list(list).head();
                let Some(head) = head else {
                    break;
                };
                self.metrics.increment_abandons();
                self.transport.abandon(head);

                let mut cell = guard.borrow_mut();
                if cell.list(list).head() == Some(head) {
                    // Transport did not report back; finalize here.
                    self.complete_in_flight(&mut cell, head, "unregister_all");
                }
            }
        }

        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        let mut cancelled = 0usize;
        for slot in st.instances.handles().collect::<Vec<_>>() {
            if let Some(inst) = st.instances.get_mut(slot) {
                cancelled += inst.cancel_waiters();
            }
        }

        let mut registrations = Vec::with_capacity(st.handles.len());
        let handles: Vec<(InstanceHandle, SlotHandle)> =
            st.handles.iter().map(|(h, s)| (*h, *s)).collect();
        for (handle, slot) in handles {
            while st
                .instances
                .get(slot)
                .is_some_and(|inst| !inst.samples.is_empty())
            {
                if let Err(e) = self.evict_oldest(st, slot) {
                    log::error!(
                        "[SampleLifecycleManager::unregister_all] dispose {} failed: {}",
                        handle,
                        e
                    );
                    break;
                }
            }
            if let Some(inst) = st.instances.free(slot) {
                registrations.push((handle, inst.registered_sample));
            }
            st.handles.remove(&handle);
        }

        // Left over: resend duplicates and queued control samples.
        for list in [SendState::Resend, SendState::Unsent] {
            loop {
                let (source, nodes) = st.list_and_nodes(list);
                let Some(id) = source.pop_front(nodes, Thread::Send) else {
                    break;
                };
                st.samples.free(id.0);
            }
        }
        self.progress.notify_all();

        log::debug!(
            "[SampleLifecycleManager::unregister_all] {} instances torn down, {} writers woken, {} samples left",
            registrations.len(),
            cancelled,
            st.samples.len()
        );
        registrations
    }

    // ------------------------------------------------------------------
    // Acknowledgments and pending data
    // ------------------------------------------------------------------

    /// Has every sequence number up to `sequence` reached a terminal outcome?
    ///
    /// Delivered, transport-dropped and discarded-before-sending samples all
    /// count. `SequenceNumber::UNKNOWN` is always acknowledged.
    pub fn sequence_acknowledged(&self, sequence: SequenceNumber) -> bool {
        let guard = self.state.lock();
        let cell = guard.borrow();
        cell.is_acknowledged(sequence)
    }

    /// Highest sequence number below which nothing is outstanding.
    pub fn cumulative_ack(&self) -> SequenceNumber {
        let guard = self.state.lock();
        let cell = guard.borrow();
        cell.acked.low()
    }

    /// Block until `sequence` is acknowledged or `max_wait` passes.
    ///
    /// # Errors
    ///
    /// `Timeout` when `max_wait` passes first; `Shutdown` when the container
    /// shuts down with `sequence` still outstanding.
    pub fn wait_for_acknowledgment(&self, sequence: SequenceNumber, max_wait: Duration) -> Result<()> {
        let deadline = deadline_after(Instant::now(), max_wait);
        loop {
            let seen = {
                let guard = self.state.lock();
                let cell = guard.borrow();
                if cell.is_acknowledged(sequence) {
                    return Ok(());
                }
                if self.is_shut_down() {
                    return Err(Error::Shutdown);
                }
                self.progress.generation()
            };
            if !self.progress.wait_past(seen, deadline) {
                log::debug!(
                    "[SampleLifecycleManager::wait_for_acknowledgment] timed out waiting for {}",
                    sequence
                );
                return if self.sequence_acknowledged(sequence) {
                    Ok(())
                } else {
                    Err(Error::Timeout)
                };
            }
        }
    }

    /// Block until no sample awaits sending or a transport outcome.
    ///
    /// Returns false if `max_wait` passed with data still pending.
    pub fn wait_pending(&self, max_wait: Duration) -> bool {
        let deadline = deadline_after(Instant::now(), max_wait);
        loop {
            let seen = {
                let guard = self.state.lock();
                let cell = guard.borrow();
                if !cell.has_pending() {
                    return true;
                }
                self.progress.generation()
            };
            if !self.progress.wait_past(seen, deadline) {
                let drained = !self.pending_data();
                if !drained {
                    log::info!(
                        "[SampleLifecycleManager::wait_pending] timed out with {} unsent, {} sending, {} released",
                        self.list_len(SendState::Unsent),
                        self.list_len(SendState::Sending),
                        self.list_len(SendState::Released)
                    );
                }
                return drained;
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Samples queued on an instance.
    pub fn num_samples(&self, handle: InstanceHandle) -> Result<usize> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        cell.instance_mut(handle)
            .map(|inst| inst.samples.len())
            .ok_or_else(|| unknown_instance(handle))
    }

    /// Live samples in the pool (all lists, plus obtained buffers).
    pub fn num_all_samples(&self) -> usize {
        let guard = self.state.lock();
        let cell = guard.borrow();
        cell.samples.len()
    }

    /// True while any sample awaits sending or a transport outcome.
    pub fn pending_data(&self) -> bool {
        let guard = self.state.lock();
        let cell = guard.borrow();
        cell.has_pending()
    }

    pub fn send_state(&self, sample: SampleId) -> Option<SendState> {
        let guard = self.state.lock();
        let cell = guard.borrow();
        cell.send_state_of(sample)
    }

    pub fn list_len(&self, state: SendState) -> usize {
        let guard = self.state.lock();
        let cell = guard.borrow();
        cell.list(state).len()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// One admission pass under the container lock.
    ///
    /// Queues the caller on first block and consumes its signal on later
    /// ones, so a wakeup issued after this pass is never lost.
    fn try_admit(
        &self,
        handle: InstanceHandle,
        waiter: &mut Option<Arc<Waiter>>,
        deadline: &mut Option<Instant>,
    ) -> Result<Step> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;
        let Some(slot) = st.instance_slot(handle) else {
            return Err(match waiter {
                Some(_) => Error::Shutdown,
                None => unknown_instance(handle),
            });
        };

        self.trim_durable(st);
        let admission = match self.admit(st, slot, waiter.as_ref()) {
            Ok(admission) => admission,
            Err(e) => {
                leave_queue(st, slot, waiter.as_ref());
                return Err(e);
            }
        };
        self.progress.notify_all();

        match admission {
            Admission::Proceed { abandon } => {
                if let Some(inst) = st.instances.get_mut(slot) {
                    inst.reserved += 1;
                }
                leave_queue(st, slot, waiter.as_ref());
                Ok(Step::Proceed(abandon))
            }
            Admission::Wait => {
                let now = Instant::now();
                let until =
                    *deadline.get_or_insert_with(|| deadline_after(now, self.config.max_blocking_time));
                if now >= until {
                    drop(cell);
                    return Err(match waiter {
                        Some(parked) => self.give_up(handle, parked),
                        None => {
                            self.metrics.increment_write_timeouts();
                            Error::Timeout
                        }
                    });
                }
                let parked = match waiter {
                    Some(parked) => {
                        parked.rearm();
                        Arc::clone(parked)
                    }
                    None => {
                        let parked = Arc::new(Waiter::new());
                        if let Some(inst) = st.instances.get_mut(slot) {
                            inst.waiters.push_back(Arc::clone(&parked));
                        }
                        self.metrics.increment_blocked_writes();
                        log::debug!(
                            "[SampleLifecycleManager::obtain_buffer] {} full, blocking up to {:?}",
                            handle,
                            self.config.max_blocking_time
                        );
                        *waiter = Some(Arc::clone(&parked));
                        parked
                    }
                };
                Ok(Step::Park(parked, until))
            }
        }
    }

    /// Decide whether a write on `slot` may proceed, evicting when at depth.
    ///
    /// Blocked writers are served oldest first: a writer that is not next in
    /// line waits without touching the queue.
    fn admit(
        &self,
        st: &mut ContainerState,
        slot: SlotHandle,
        waiter: Option<&Arc<Waiter>>,
    ) -> Result<Admission> {
        let depth = self.config.depth;
        let (handle, occupied, is_next, queue_empty) = {
            let inst = st
                .instances
                .get(slot)
                .ok_or_else(|| Error::Internal("instance record missing".to_string()))?;
            (
                inst.handle,
                inst.occupied(),
                inst.is_next(waiter),
                inst.samples.is_empty(),
            )
        };

        if occupied > depth {
            log::error!(
                "[SampleLifecycleManager::obtain_buffer] {} holds {} samples, depth {}",
                handle,
                occupied,
                depth
            );
            return Err(Error::Internal(format!(
                "{} exceeds depth {} ({} samples)",
                handle, depth, occupied
            )));
        }

        if self.config.should_block && !is_next {
            return Ok(Admission::Wait);
        }
        if occupied < depth {
            return Ok(Admission::Proceed { abandon: None });
        }
        if queue_empty {
            // Every slot is reserved by writers between obtain and enqueue.
            return if self.config.should_block {
                Ok(Admission::Wait)
            } else {
                Err(Error::ResourceExhausted(format!(
                    "all {} slots of {} reserved",
                    depth, handle
                )))
            };
        }

        match self.evict_oldest(st, slot)? {
            Eviction::Freed => Ok(Admission::Proceed { abandon: None }),
            Eviction::InFlight(_) if self.config.should_block => Ok(Admission::Wait),
            Eviction::InFlight(stale) => Ok(Admission::Proceed {
                abandon: Some(stale),
            }),
        }
    }

    /// Timed-out writer leaves the line; the next one re-checks.
    fn give_up(&self, handle: InstanceHandle, parked: &Arc<Waiter>) -> Error {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        if let Some(slot) = cell.instance_slot(handle) {
            leave_queue(&mut cell, slot, Some(parked));
        }
        if parked.state() == WaitState::Cancelled {
            return Error::Shutdown;
        }
        self.metrics.increment_write_timeouts();
        log::warn!(
            "[SampleLifecycleManager::obtain_buffer] {} timed out after {:?}",
            handle,
            self.config.max_blocking_time
        );
        Error::Timeout
    }

    /// Pop the head of an instance queue and retire it from its global list.
    fn evict_oldest(&self, st: &mut ContainerState, slot: SlotHandle) -> Result<Eviction> {
        let inst = st
            .instances
            .get_mut(slot)
            .ok_or_else(|| Error::Internal("instance record missing".to_string()))?;
        let handle = inst.handle;
        let Some(id) = inst.samples.pop_front(&mut st.samples, Thread::Instance) else {
            return Err(Error::Internal(format!("{} queue is empty", handle)));
        };

        match st.send_state_of(id) {
            Some(SendState::Sending) => {
                st.move_sample(id, SendState::Sending, SendState::Released);
                if let Some(node) = st.samples.get_mut(id.0) {
                    node.evicted_in_flight = true;
                }
                self.metrics.record_eviction(true);
                log::debug!(
                    "[SampleLifecycleManager::remove_oldest_sample] {} of {} in flight, released",
                    id,
                    handle
                );
                Ok(Eviction::InFlight(id))
            }
            Some(state @ (SendState::Sent | SendState::Unsent)) => {
                st.unlink(state, id);
                if let Some(node) = st.samples.free(id.0) {
                    st.acknowledge(node.header.sequence);
                }
                self.metrics.record_eviction(false);
                Ok(Eviction::Freed)
            }
            state => {
                log::error!(
                    "[SampleLifecycleManager::remove_oldest_sample] {} of {} not in Unsent, Sending or Sent ({:?})",
                    id,
                    handle,
                    state
                );
                Err(Error::Internal(format!(
                    "{} not found in any send list",
                    id
                )))
            }
        }
    }

    /// Free Sent samples beyond the durable budget of each instance.
    fn trim_durable(&self, st: &mut ContainerState) -> usize {
        let max_durable = self.config.max_durable_per_instance;
        if max_durable == LENGTH_UNLIMITED || st.sent.len() <= max_durable {
            return 0;
        }

        let mut trimmed = 0usize;
        for slot in st.instances.handles().collect::<Vec<_>>() {
            let Some(inst) = st.instances.get(slot) else {
                continue;
            };
            let handle = inst.handle;
            let queued: Vec<SampleId> = inst.samples.iter(&st.samples, Thread::Instance).collect();

            let mut kept = 0usize;
            let mut freed = 0usize;
            for id in queued.into_iter().rev() {
                if st.send_state_of(id) != Some(SendState::Sent) {
                    continue;
                }
                if kept < max_durable {
                    kept += 1;
                    continue;
                }
                if let Some(inst) = st.instances.get_mut(slot) {
                    inst.samples.remove(&mut st.samples, id, Thread::Instance);
                }
                st.unlink(SendState::Sent, id);
                st.samples.free(id.0);
                freed += 1;
            }
            if freed > 0 {
                st.signal_instance(handle);
                trimmed += freed;
            }
        }

        if trimmed > 0 {
            self.metrics.increment_durable_trimmed(trimmed as u64);
            log::debug!(
                "[SampleLifecycleManager::remove_excess_durable] {} samples removed from durable data",
                trimmed
            );
        }
        trimmed
    }

    /// Terminal transport outcome for an in-flight sample. False if unmatched.
    fn complete_in_flight(&self, st: &mut ContainerState, sample: SampleId, origin: &str) -> bool {
        match st.send_state_of(sample) {
            Some(SendState::Released) => {
                self.finalize_released(st, sample);
                true
            }
            Some(SendState::Sending) => {
                st.unlink(SendState::Sending, sample);
                let Some((control, handle, sequence)) = st
                    .samples
                    .get(sample.0)
                    .map(|n| (n.control, n.header.instance, n.header.sequence))
                else {
                    return true;
                };
                if control {
                    st.samples.free(sample.0);
                } else {
                    st.link_back(SendState::Sent, sample);
                    st.acknowledge(sequence);
                    st.signal_instance(handle);
                }
                true
            }
            state => {
                self.unmatched(sample, state, origin);
                false
            }
        }
    }

    fn finalize_released(&self, st: &mut ContainerState, sample: SampleId) {
        st.unlink(SendState::Released, sample);
        let Some(node) = st.samples.free(sample.0) else {
            return;
        };
        st.acknowledge(node.header.sequence);
        if node.evicted_in_flight {
            st.signal_instance(node.header.instance);
        }
    }

    fn unmatched(&self, sample: SampleId, state: Option<SendState>, origin: &str) {
        self.metrics.increment_unmatched();
        log::warn!(
            "[SampleLifecycleManager::{}] {} not in flight (state {:?}), ignored",
            origin,
            sample,
            state
        );
    }

    fn detach(&self, from: SendState, to: SendState) -> SampleChain {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        let mut chain = SampleChain::default();
        for id in st.list(from).iter(&st.samples, Thread::Send) {
            if let Some(node) = st.samples.get(id.0) {
                chain.push(node.outgoing(id));
            }
        }

        let (source, _) = st.list_and_nodes(from);
        let mut detached = std::mem::take(source);
        let (target, nodes) = st.list_and_nodes(to);
        target.append(&mut detached, nodes, Thread::Send);
        chain
    }

    /// Allocate and stamp the sample for a reserved slot.
    fn fill_slot(&self, handle: InstanceHandle, payload: Arc<[u8]>) -> Result<SampleId> {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        let st = &mut *cell;

        if st.instance_slot(handle).is_none() {
            return Err(Error::Shutdown);
        }
        let failure = if self.is_shut_down() {
            Some(Error::Shutdown)
        } else if st.samples.is_full() {
            log::warn!(
                "[SampleLifecycleManager::obtain_buffer] sample pool exhausted ({} slots)",
                st.samples.capacity()
            );
            Some(Error::ResourceExhausted(format!(
                "sample pool full ({} slots)",
                st.samples.capacity()
            )))
        } else {
            None
        };
        if let Some(err) = failure {
            if let Some(inst) = st.instance_mut(handle) {
                inst.reserved = inst.reserved.saturating_sub(1);
                inst.signal_next();
            }
            return Err(err);
        }

        let header = SampleHeader {
            publication_id: self.publication_id,
            sequence: self.sequence.next(),
            source_timestamp: now_nanos(),
            instance: handle,
        };
        st.samples
            .allocate(SampleNode::new(header, payload))
            .map(SampleId)
            .map_err(|_| Error::ResourceExhausted("sample pool full".to_string()))
    }
}

impl Drop for SampleLifecycleManager {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            let live = self.state.get_mut().get_mut().samples.len();
            log::error!(
                "[SampleLifecycleManager::drop] {} dropped without unregister_all ({} samples discarded)",
                self.publication_id,
                live
            );
        }
    }
}

impl std::fmt::Debug for SampleLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLifecycleManager")
            .field("publication_id", &self.publication_id)
            .field("config", &self.config)
            .field("shutdown", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Remove a writer from its instance line; if it was first, wake the next.
fn leave_queue(st: &mut ContainerState, slot: SlotHandle, waiter: Option<&Arc<Waiter>>) {
    let (Some(waiter), Some(inst)) = (waiter, st.instances.get_mut(slot)) else {
        return;
    };
    let was_next = inst.is_next(Some(waiter));
    inst.remove_waiter(waiter);
    if was_next {
        inst.signal_next();
    }
}

fn deadline_after(now: Instant, budget: Duration) -> Instant {
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600))
}

fn unknown_instance(handle: InstanceHandle) -> Error {
    Error::PreconditionNotMet(format!("unknown {}", handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::transport::DiscardTransport;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<SampleId>>,
        abandoned: Mutex<Vec<SampleId>>,
    }

    impl TransportHandoff for RecordingTransport {
        fn send(&self, chain: SampleChain) {
            self.sent.lock().extend(chain.ids());
        }

        fn abandon(&self, sample: SampleId) {
            self.abandoned.lock().push(sample);
        }
    }

    fn manager(config: LifecycleConfig) -> SampleLifecycleManager {
        SampleLifecycleManager::new(Guid::from_parts([7; 12], 0x102), config, Arc::new(DiscardTransport))
            .unwrap()
    }

    fn register(m: &SampleLifecycleManager) -> InstanceHandle {
        m.register_instance(InstanceHandle::NIL, &b"key"[..]).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = SampleLifecycleManager::new(
            Guid::UNKNOWN,
            LifecycleConfig::new(0),
            Arc::new(DiscardTransport),
        );
        assert!(matches!(result, Err(Error::InvalidQos(_))));
    }

    #[test]
    fn test_register_allocates_distinct_handles() {
        let m = manager(LifecycleConfig::new(2));
        let a = register(&m);
        let b = register(&m);
        assert_ne!(a, b);
        assert!(!a.is_nil());
        assert_eq!(m.instance_handles(), vec![a, b]);
        m.unregister_all();
    }

    #[test]
    fn test_reregister_clears_unregistered() {
        let m = manager(LifecycleConfig::new(2));
        let h = register(&m);
        let dup = m.unregister(h).unwrap();
        assert_eq!(&dup[..], b"key");
        assert_eq!(m.is_unregistered(h), Some(true));

        assert_eq!(m.register_instance(h, &b"other"[..]).unwrap(), h);
        assert_eq!(m.is_unregistered(h), Some(false));
        m.unregister_all();
    }

    #[test]
    fn test_unknown_handle_is_precondition_failure() {
        let m = manager(LifecycleConfig::new(2));
        let bogus = InstanceHandle::new(99);
        assert!(matches!(m.unregister(bogus), Err(Error::PreconditionNotMet(_))));
        assert!(matches!(m.dispose(bogus), Err(Error::PreconditionNotMet(_))));
        assert!(matches!(
            m.register_instance(bogus, &b"k"[..]),
            Err(Error::PreconditionNotMet(_))
        ));
        assert!(matches!(
            m.obtain_buffer(bogus, &b"x"[..]),
            Err(Error::PreconditionNotMet(_))
        ));
        m.unregister_all();
    }

    #[test]
    fn test_instance_pool_exhaustion() {
        let m = manager(LifecycleConfig::new(1).with_max_instances(1));
        register(&m);
        assert!(matches!(
            m.register_instance(InstanceHandle::NIL, &b"k"[..]),
            Err(Error::ResourceExhausted(_))
        ));
        m.unregister_all();
    }

    #[test]
    fn test_sample_pool_exhaustion() {
        let m = manager(LifecycleConfig::new(2).with_max_samples(2));
        let a = register(&m);
        let b = register(&m);
        m.write(a, &b"1"[..]).unwrap();
        m.write(a, &b"2"[..]).unwrap();
        assert!(matches!(
            m.write(b, &b"3"[..]),
            Err(Error::ResourceExhausted(_))
        ));
        // The failed write gave its reservation back.
        assert_eq!(m.num_samples(b).unwrap(), 0);
        m.unregister_all();
    }

    #[test]
    fn test_sequence_numbers_follow_write_order() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        m.write(h, &b"a"[..]).unwrap();
        m.write(h, &b"b"[..]).unwrap();
        let chain = m.get_unsent_data();
        let seqs: Vec<i64> = chain.iter().map(|s| s.header.sequence.value()).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(chain.iter().all(|s| s.header.instance == h));
        assert_eq!(m.next_sequence(), SequenceNumber::new(3));
        m.unregister_all();
    }

    #[test]
    fn test_get_unsent_moves_to_sending() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        let b = m.write(h, &b"b"[..]).unwrap();

        let chain = m.get_unsent_data();
        assert_eq!(chain.ids(), vec![a, b]);
        assert_eq!(m.list_len(SendState::Unsent), 0);
        assert_eq!(m.list_len(SendState::Sending), 2);
        assert_eq!(m.send_state(b), Some(SendState::Sending));
        assert!(m.get_unsent_data().is_empty());
        m.unregister_all();
    }

    #[test]
    fn test_enqueue_twice_rejected() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        let s = m.obtain_buffer(h, &b"a"[..]).unwrap();
        m.enqueue(s).unwrap();
        assert!(matches!(m.enqueue(s), Err(Error::PreconditionNotMet(_))));
        m.unregister_all();
    }

    #[test]
    fn test_release_buffer_returns_slot() {
        let m = manager(LifecycleConfig::new(1));
        let h = register(&m);
        let s = m.obtain_buffer(h, &b"a"[..]).unwrap();
        assert_eq!(m.num_all_samples(), 1);
        m.release_buffer(s).unwrap();
        assert_eq!(m.num_all_samples(), 0);
        assert!(matches!(m.release_buffer(s), Err(Error::PreconditionNotMet(_))));

        // Slot is free again: no eviction needed.
        m.write(h, &b"b"[..]).unwrap();
        assert_eq!(m.metrics().evictions(), 0);
        m.unregister_all();
    }

    #[test]
    fn test_remove_oldest_sample_states() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        m.get_unsent_data();
        let b = m.write(h, &b"b"[..]).unwrap();

        // a is in flight: kept alive in Released.
        assert_eq!(m.remove_oldest_sample(h), Ok(false));
        assert_eq!(m.send_state(a), Some(SendState::Released));
        // b is unsent: freed on the spot.
        assert_eq!(m.remove_oldest_sample(h), Ok(true));
        assert_eq!(m.send_state(b), None);
        assert!(matches!(
            m.remove_oldest_sample(h),
            Err(Error::PreconditionNotMet(_))
        ));

        m.data_delivered(a);
        assert_eq!(m.num_all_samples(), 0);
        m.unregister_all();
    }

    #[test]
    fn test_local_drop_returns_to_unsent_head() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        m.get_unsent_data();
        let b = m.write(h, &b"b"[..]).unwrap();

        m.data_dropped(a, false);
        assert_eq!(m.send_state(a), Some(SendState::Unsent));
        assert_eq!(m.get_unsent_data().ids(), vec![a, b]);
        m.unregister_all();
    }

    #[test]
    fn test_transport_drop_is_terminal() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        m.get_unsent_data();
        m.data_dropped(a, true);
        assert_eq!(m.send_state(a), Some(SendState::Sent));
        assert_eq!(m.metrics().snapshot().dropped, 1);
        m.unregister_all();
    }

    #[test]
    fn test_dispose_keeps_in_flight_alive() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        m.get_unsent_data();
        let b = m.write(h, &b"b"[..]).unwrap();

        m.dispose(h).unwrap();
        assert_eq!(m.num_samples(h).unwrap(), 0);
        assert_eq!(m.send_state(a), Some(SendState::Released));
        assert_eq!(m.send_state(b), None);
        m.unregister_all();
    }

    #[test]
    fn test_send_pending_hands_off_both_lists() {
        let transport = Arc::new(RecordingTransport::default());
        let m = SampleLifecycleManager::new(
            Guid::UNKNOWN,
            LifecycleConfig::new(4),
            Arc::clone(&transport) as Arc<dyn TransportHandoff>,
        )
        .unwrap();
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        assert_eq!(m.send_pending(), 1);
        assert_eq!(m.reenqueue_all(&[Guid::from_parts([2; 12], 1)]).unwrap(), 1);
        let b = m.write(h, &b"b"[..]).unwrap();
        assert_eq!(m.send_pending(), 2);

        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], a);
        assert_eq!(sent[1], b);
        assert_eq!(m.list_len(SendState::Released), 1);
        assert_eq!(m.send_pending(), 0);

        m.unregister_all();
        assert_eq!(transport.abandoned.lock().len(), 3);
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let m = manager(LifecycleConfig::new(2));
        let h = register(&m);
        let regs = m.unregister_all();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].0, h);
        assert!(m.is_shut_down());
        assert_eq!(m.write(h, &b"x"[..]), Err(Error::Shutdown));
        assert_eq!(
            m.register_instance(InstanceHandle::NIL, &b"k"[..]),
            Err(Error::Shutdown)
        );
        assert!(m.unregister_all().is_empty());
    }

    #[test]
    fn test_enqueue_after_shutdown_frees_buffer() {
        let m = manager(LifecycleConfig::new(2));
        let h = register(&m);
        let s = m.obtain_buffer(h, &b"x"[..]).unwrap();
        m.unregister_all();
        assert_eq!(m.enqueue(s), Err(Error::Shutdown));
        assert_eq!(m.num_all_samples(), 0);
    }

    #[test]
    fn test_control_sample_freed_on_delivery() {
        let m = manager(LifecycleConfig::new(1));
        let h = register(&m);
        let data = m.write(h, &b"a"[..]).unwrap();
        let control = m.obtain_buffer_for_control(&b"hb"[..]).unwrap();
        // Not a regular sample, and not yet enqueued as control.
        assert!(matches!(m.enqueue(control), Err(Error::PreconditionNotMet(_))));
        assert!(matches!(m.enqueue_control(data), Err(Error::PreconditionNotMet(_))));
        m.enqueue_control(control).unwrap();
        assert!(matches!(m.enqueue_control(control), Err(Error::PreconditionNotMet(_))));

        let chain = m.get_unsent_data();
        assert_eq!(chain.ids(), vec![data, control]);
        let header = chain.iter().nth(1).unwrap().header;
        assert!(chain.iter().nth(1).unwrap().control);
        assert!(header.instance.is_nil());
        assert_eq!(header.sequence, SequenceNumber::UNKNOWN);
        // Counts against no instance.
        assert_eq!(m.num_samples(h).unwrap(), 1);

        m.data_delivered(control);
        assert_eq!(m.send_state(control), None);
        m.data_delivered(data);
        assert_eq!(m.send_state(data), Some(SendState::Sent));
        assert_eq!(m.num_all_samples(), 1);
        m.unregister_all();
    }

    #[test]
    fn test_control_sample_survives_local_drop_and_teardown() {
        let m = manager(LifecycleConfig::new(1));
        let queued = m.obtain_buffer_for_control(&b"gap"[..]).unwrap();
        m.enqueue_control(queued).unwrap();
        m.get_unsent_data();
        m.data_dropped(queued, false);
        assert_eq!(m.send_state(queued), Some(SendState::Unsent));
        m.data_dropped(queued, true);
        assert_eq!(m.metrics().unmatched_notifications(), 1);

        let obtained = m.obtain_buffer_for_control(&b"hb"[..]).unwrap();
        m.release_buffer(obtained).unwrap();
        assert_eq!(m.num_all_samples(), 1);

        m.unregister_all();
        assert_eq!(m.num_all_samples(), 0);
        assert!(!m.pending_data());
        assert_eq!(m.obtain_buffer_for_control(&b"x"[..]), Err(Error::Shutdown));
    }

    #[test]
    fn test_acknowledgment_tracks_terminal_outcomes() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        assert!(m.sequence_acknowledged(SequenceNumber::UNKNOWN));
        assert!(m.sequence_acknowledged(SequenceNumber::ZERO));

        let a = m.write(h, &b"a"[..]).unwrap();
        let b = m.write(h, &b"b"[..]).unwrap();
        m.get_unsent_data();
        assert!(!m.sequence_acknowledged(SequenceNumber::new(1)));

        // Out of order: 2 alone does not advance the cumulative mark.
        m.data_delivered(b);
        assert!(!m.sequence_acknowledged(SequenceNumber::new(2)));
        assert_eq!(m.cumulative_ack(), SequenceNumber::ZERO);

        m.data_dropped(a, true);
        assert!(m.sequence_acknowledged(SequenceNumber::new(2)));
        assert_eq!(m.cumulative_ack(), SequenceNumber::new(2));

        // A released buffer never reaches the transport; its number is settled.
        let c = m.obtain_buffer(h, &b"c"[..]).unwrap();
        m.release_buffer(c).unwrap();
        assert_eq!(m.cumulative_ack(), SequenceNumber::new(3));

        // Local drops are not terminal.
        m.write(h, &b"d"[..]).unwrap();
        let d = m.get_unsent_data().ids()[0];
        m.data_dropped(d, false);
        assert!(!m.sequence_acknowledged(SequenceNumber::new(4)));
        m.unregister_all();
    }

    #[test]
    fn test_evicted_unsent_sample_counts_as_acknowledged() {
        let m = manager(LifecycleConfig::new(1));
        let h = register(&m);
        m.write(h, &b"a"[..]).unwrap();
        m.write(h, &b"b"[..]).unwrap();
        assert!(m.sequence_acknowledged(SequenceNumber::new(1)));
        assert!(!m.sequence_acknowledged(SequenceNumber::new(2)));
        m.unregister_all();
    }

    #[test]
    fn test_wait_for_acknowledgment_outcomes() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        let seq = SequenceNumber::new(1);

        assert_eq!(
            m.wait_for_acknowledgment(seq, Duration::from_millis(10)),
            Err(Error::Timeout)
        );
        m.get_unsent_data();
        m.data_delivered(a);
        assert_eq!(m.wait_for_acknowledgment(seq, Duration::ZERO), Ok(()));

        m.write(h, &b"b"[..]).unwrap();
        m.get_unsent_data();
        // Teardown settles every in-flight sample.
        m.unregister_all();
        assert_eq!(
            m.wait_for_acknowledgment(SequenceNumber::new(2), Duration::ZERO),
            Ok(())
        );
        assert_eq!(
            m.wait_for_acknowledgment(SequenceNumber::new(9), Duration::from_secs(5)),
            Err(Error::Shutdown)
        );
    }

    #[test]
    fn test_wait_pending_reports_drain() {
        let m = manager(LifecycleConfig::new(4));
        let h = register(&m);
        assert!(m.wait_pending(Duration::ZERO));

        let a = m.write(h, &b"a"[..]).unwrap();
        assert!(!m.wait_pending(Duration::from_millis(10)));
        m.get_unsent_data();
        assert!(!m.wait_pending(Duration::from_millis(10)));
        m.data_delivered(a);
        // Sent samples are history, not pending.
        assert!(m.wait_pending(Duration::ZERO));
        m.unregister_all();
    }

    #[test]
    fn test_excess_durable_trimmed_on_obtain() {
        let m = manager(LifecycleConfig::new(4).with_max_durable_per_instance(1));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        let b = m.write(h, &b"b"[..]).unwrap();
        let c = m.write(h, &b"c"[..]).unwrap();
        m.get_unsent_data();
        m.data_delivered(a);
        m.data_delivered(b);
        assert_eq!(m.num_samples(h).unwrap(), 3);

        // Newest durable sample kept, older one freed; c is still in flight.
        let d = m.write(h, &b"d"[..]).unwrap();
        assert_eq!(m.send_state(a), None);
        assert_eq!(m.send_state(b), Some(SendState::Sent));
        assert_eq!(m.send_state(c), Some(SendState::Sending));
        assert_eq!(m.num_samples(h).unwrap(), 3);
        assert_eq!(m.metrics().snapshot().durable_trimmed, 1);
        assert_eq!(m.metrics().evictions(), 0);

        m.data_delivered(c);
        assert_eq!(m.remove_excess_durable(), 1);
        assert_eq!(m.send_state(b), None);
        assert_eq!(m.send_state(d), Some(SendState::Unsent));
        assert_eq!(m.remove_excess_durable(), 0);
        m.unregister_all();
    }

    #[test]
    fn test_volatile_history_trimmed_to_nothing() {
        let m = manager(LifecycleConfig::new(2).with_max_durable_per_instance(0));
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        m.get_unsent_data();
        m.data_delivered(a);
        assert_eq!(m.num_samples(h).unwrap(), 1);
        assert_eq!(m.remove_excess_durable(), 1);
        assert_eq!(m.num_samples(h).unwrap(), 0);
        m.unregister_all();
    }

    #[test]
    fn test_unlimited_durable_never_trims() {
        let m = manager(LifecycleConfig::new(8));
        let h = register(&m);
        for _ in 0..4 {
            m.write(h, &b"x"[..]).unwrap();
        }
        for id in m.get_unsent_data().ids() {
            m.data_delivered(id);
        }
        assert_eq!(m.remove_excess_durable(), 0);
        assert_eq!(m.num_samples(h).unwrap(), 4);
        m.unregister_all();
    }

    #[test]
    fn test_non_blocking_writer_abandons_in_flight_oldest() {
        let transport = Arc::new(RecordingTransport::default());
        let m = SampleLifecycleManager::new(
            Guid::UNKNOWN,
            LifecycleConfig::new(1),
            Arc::clone(&transport) as Arc<dyn TransportHandoff>,
        )
        .unwrap();
        let h = register(&m);
        let a = m.write(h, &b"a"[..]).unwrap();
        m.get_unsent_data();
        m.write(h, &b"b"[..]).unwrap();
        assert_eq!(transport.abandoned.lock().clone(), vec![a]);
        assert_eq!(m.send_state(a), Some(SendState::Released));

        // All slots reserved: a non-blocking writer cannot evict anything.
        m.get_unsent_data();
        m.data_delivered(a);
        assert_eq!(m.remove_oldest_sample(h), Ok(false));
        let held = m.obtain_buffer(h, &b"c"[..]).unwrap();
        assert!(matches!(
            m.obtain_buffer(h, &b"d"[..]),
            Err(Error::ResourceExhausted(_))
        ));
        m.release_buffer(held).unwrap();
        m.unregister_all();
    }
}
