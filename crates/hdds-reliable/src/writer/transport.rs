// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hand-off seam between the lifecycle container and the network layer.

use super::sample::{SampleChain, SampleId};

/// Network side of a writer.
///
/// Every sample handed over through [`send`](Self::send) must eventually be
/// reported back with `data_delivered` or `data_dropped(.., true)`, from any
/// thread. Both methods may call back into the container synchronously; the
/// container never holds an internal borrow across these calls.
pub trait TransportHandoff: Send + Sync {
    /// Take ownership of a detached chain of samples for transmission.
    fn send(&self, chain: SampleChain);

    /// Stop transmitting `sample` now and report it dropped.
    fn abandon(&self, sample: SampleId);
}

/// Transport that accepts everything and never reports back.
///
/// Samples handed to it stay in flight until the container is shut down.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardTransport;

impl TransportHandoff for DiscardTransport {
    fn send(&self, chain: SampleChain) {
        log::trace!("[DiscardTransport::send] {} samples", chain.len());
    }

    fn abandon(&self, sample: SampleId) {
        log::trace!("[DiscardTransport::abandon] {}", sample);
    }
}
