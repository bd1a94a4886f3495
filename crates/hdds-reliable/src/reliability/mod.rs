// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Sequence tracking for gap repair
//!
//! Reader-side half of reliable delivery: record which sequence numbers
//! have arrived from a remote writer and report the holes so a repair
//! protocol (ACKNACK-style) can request them again.
//!
//! ## Protocol Flow
//!
//! ```text
//! Writer                                    Reader
//!   |                                          |
//!   |--- DATA (seq=5) ------------------------>| update(5)
//!   |--- DATA (seq=6) ----------X (lost)       |
//!   |--- DATA (seq=7) ------------------------>| update(7)   gaps: [6, 6]
//!   |                                          |
//!   |<-- ACKNACK (missing: [6]) ---------------| range_iterator()
//!   |--- DATA (seq=6) [retransmit] ----------->| update(6)   gaps: none
//!   |                                          |
//!   |--- GAP (everything below 10) ----------->| shift(10)
//! ```
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | `SequenceNumber` | 64-bit sequence counter with the zero/max wrap rule |
//! | `SequenceRange` | Inclusive `[first, last]` pair |
//! | `SeqNumGenerator` | Per-writer atomic counter stamping outgoing samples |
//! | `SequenceTracker` | Compact observed/missing record, one per association |
//! | `GapRanges` | Lazy iterator over the tracker's gaps |

mod range;
mod seq;
mod sequence_tracker;

pub use range::SequenceRange;
pub use seq::{SeqNumGenerator, SequenceNumber};
pub use sequence_tracker::{GapRanges, SequenceTracker, MAX_DEPTH};
