// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample records and the types handed to the transport.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::list::{Link, Thread};
use super::pool::SlotHandle;
use crate::reliability::SequenceNumber;

/// 16-byte entity identifier (RTPS GUID: 12-byte prefix + 4-byte entity id).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const UNKNOWN: Self = Self([0; 16]);

    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn from_parts(prefix: [u8; 12], entity_id: u32) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..12].copy_from_slice(&prefix);
        bytes[12..].copy_from_slice(&entity_id.to_be_bytes());
        Self(bytes)
    }

    pub fn entity_id(&self) -> u32 {
        u32::from_be_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i == 12 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Writer-local key of one instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// "No instance": asks `register_instance` to allocate a new one.
    pub const NIL: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance({})", self.0)
    }
}

/// Stable handle of a sample owned by a lifecycle container.
///
/// Stays valid until the container frees the sample; afterwards every lookup
/// with it fails, so late notifications cannot touch a recycled slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleId(pub(crate) SlotHandle);

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sample{}", self.0)
    }
}

/// Header stamped on a sample when its buffer is obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleHeader {
    pub publication_id: Guid,
    pub sequence: SequenceNumber,
    /// Nanoseconds since the UNIX epoch.
    pub source_timestamp: u64,
    pub instance: InstanceHandle,
}

pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Pool-resident sample: payload plus its two list memberships.
#[derive(Debug)]
pub(crate) struct SampleNode {
    pub header: SampleHeader,
    pub payload: Arc<[u8]>,
    /// Target readers; empty means every matched reader.
    pub readers: Vec<Guid>,
    pub send_link: Link,
    pub instance_link: Link,
    /// Resend duplicate (never on an instance queue).
    pub duplicate: bool,
    /// Control message: no instance, freed once the transport reports it.
    pub control: bool,
    /// Evicted from its instance while in flight; its finalization frees an instance slot.
    pub evicted_in_flight: bool,
    /// Linked into Unsent and its instance queue.
    pub enqueued: bool,
}

impl SampleNode {
    pub fn new(header: SampleHeader, payload: Arc<[u8]>) -> Self {
        Self {
            header,
            payload,
            readers: Vec::new(),
            send_link: Link::default(),
            instance_link: Link::default(),
            duplicate: false,
            control: false,
            evicted_in_flight: false,
            enqueued: false,
        }
    }

    pub fn control(header: SampleHeader, payload: Arc<[u8]>) -> Self {
        Self {
            control: true,
            ..Self::new(header, payload)
        }
    }

    /// Resend copy of `self` addressed to `readers`.
    pub fn duplicate_for(&self, readers: &[Guid]) -> Self {
        Self {
            header: self.header,
            payload: Arc::clone(&self.payload),
            readers: readers.to_vec(),
            send_link: Link::default(),
            instance_link: Link::default(),
            duplicate: true,
            control: false,
            evicted_in_flight: false,
            enqueued: true,
        }
    }

    #[inline]
    pub fn link(&self, thread: Thread) -> &Link {
        match thread {
            Thread::Send => &self.send_link,
            Thread::Instance => &self.instance_link,
        }
    }

    #[inline]
    pub fn link_mut(&mut self, thread: Thread) -> &mut Link {
        match thread {
            Thread::Send => &mut self.send_link,
            Thread::Instance => &mut self.instance_link,
        }
    }

    pub fn outgoing(&self, id: SampleId) -> OutgoingSample {
        OutgoingSample {
            id,
            header: self.header,
            payload: Arc::clone(&self.payload),
            readers: self.readers.clone(),
            duplicate: self.duplicate,
            control: self.control,
        }
    }
}

/// One sample as seen by the transport.
///
/// The transport reports the outcome for `id` through `data_delivered` or
/// `data_dropped`.
#[derive(Clone, Debug)]
pub struct OutgoingSample {
    pub id: SampleId,
    pub header: SampleHeader,
    pub payload: Arc<[u8]>,
    /// Empty means every matched reader.
    pub readers: Vec<Guid>,
    pub duplicate: bool,
    pub control: bool,
}

impl OutgoingSample {
    pub fn is_for_all_readers(&self) -> bool {
        self.readers.is_empty()
    }
}

/// Samples detached from a send list, in send order.
#[derive(Clone, Debug, Default)]
pub struct SampleChain {
    samples: Vec<OutgoingSample>,
}

impl SampleChain {
    pub(crate) fn push(&mut self, sample: OutgoingSample) {
        self.samples.push(sample);
    }

    pub(crate) fn extend(&mut self, other: SampleChain) {
        self.samples.extend(other.samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OutgoingSample> {
        self.samples.iter()
    }

    pub fn ids(&self) -> Vec<SampleId> {
        self.samples.iter().map(|s| s.id).collect()
    }
}

impl IntoIterator for SampleChain {
    type Item = OutgoingSample;
    type IntoIter = std::vec::IntoIter<OutgoingSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<'a> IntoIterator for &'a SampleChain {
    type Item = &'a OutgoingSample;
    type IntoIter = std::slice::Iter<'a, OutgoingSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
