// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Writer sample lifecycle
//!
//! Writer-side half of reliable delivery: hold every sample a writer
//! produces until the transport reports its outcome, bound each instance's
//! queue to the history depth, and replay recent samples to late joiners.
//!
//! ## Write Flow
//!
//! ```text
//! Application          SampleLifecycleManager             Transport
//!   |                         |                               |
//!   |-- write(h, data) ------>| Unsent                        |
//!   |                         |-- send_pending() ------------>| send(chain)
//!   |                         | Sending                       |
//!   |                         |<-------- data_delivered(id) --|
//!   |                         | Sent (kept for durability)    |
//!   |-- write(h, data) ------>| at depth: evict oldest        |
//!   |                         |   in flight? -- abandon(id) ->|
//!   |                         |<-------- data_dropped(id) ----|
//! ```
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | `SampleLifecycleManager` | Container: lists, instances, blocking, acknowledgment, shutdown |
//! | `TransportHandoff` | Seam to the network layer (`send`, `abandon`) |
//! | `SampleChain` | Detached samples handed to the transport in order |
//! | `SlotPool` | Preallocated, generation-checked node storage |
//! | `LifecycleMetrics` | Lock-free counters for one container |

mod instance;
mod list;
mod manager;
mod metrics;
mod pool;
mod sample;
mod transport;
mod waiter;

pub use manager::{SampleLifecycleManager, SendState};
pub use metrics::{LifecycleMetrics, MetricsSnapshot};
pub use pool::{SlotHandle, SlotPool};
pub use sample::{Guid, InstanceHandle, OutgoingSample, SampleChain, SampleHeader, SampleId};
pub use transport::{DiscardTransport, TransportHandoff};
