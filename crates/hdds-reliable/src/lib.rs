// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HDDS Reliable - sample lifecycle and gap tracking
//!
//! The two bookkeeping engines behind reliable DDS delivery:
//!
//! - a **writer-side lifecycle container** that owns every sample from
//!   `write` until the transport confirms or drops it, enforcing the
//!   per-instance history depth (evicting or blocking), and replaying
//!   recent samples to late-joining readers;
//! - a **reader-side sequence tracker** that records observed sequence
//!   numbers as compact runs and reports the gaps to repair.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use hdds_reliable::config::LifecycleConfig;
//! use hdds_reliable::reliability::{SequenceNumber, SequenceTracker};
//! use hdds_reliable::writer::{DiscardTransport, Guid, InstanceHandle, SampleLifecycleManager};
//!
//! fn main() -> hdds_reliable::Result<()> {
//!     // Writer side
//!     let writer = SampleLifecycleManager::new(
//!         Guid::from_parts([1; 12], 0x102),
//!         LifecycleConfig::new(8),
//!         Arc::new(DiscardTransport),
//!     )?;
//!     let instance = writer.register_instance(InstanceHandle::NIL, &b"key"[..])?;
//!     writer.write(instance, &b"payload"[..])?;
//!     writer.send_pending();
//!     writer.unregister_all();
//!
//!     // Reader side
//!     let mut tracker = SequenceTracker::new(SequenceNumber::new(1));
//!     tracker.update(SequenceNumber::new(4));
//!     assert_eq!(tracker.missing_ranges().len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules Overview
//!
//! - [`writer`] - Sample lifecycle container and transport seam
//! - [`reliability`] - Sequence numbers, ranges and the gap tracker
//! - [`qos`] - Writer QoS policies feeding the container
//! - [`config`] - Container settings and limits
//! - [`error`] - Error type and DDS return codes

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

pub mod config;
pub mod error;
pub mod qos;
pub mod reliability;
pub mod writer;

pub use error::{Error, Result, ReturnCode};
