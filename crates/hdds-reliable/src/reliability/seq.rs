// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence numbers for reliable delivery
//!
//! `SequenceNumber` is a signed 64-bit counter. Ordering is plain numeric
//! ordering; the only wraparound rules are the two extreme-value special
//! cases documented on [`SequenceNumber::next`] and
//! [`SequenceNumber::previous_relative`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Sequence number stamped on every sample a writer produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    /// Zero (also the default value).
    pub const ZERO: Self = Self(0);

    /// Largest representable sequence number.
    pub const MAX_VALUE: Self = Self(i64::MAX);

    /// RTPS `SEQUENCENUMBER_UNKNOWN` (high = -1, low = 0).
    pub const UNKNOWN: Self = Self(-1_i64 << 32);

    #[inline]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Successor; `MAX_VALUE` wraps to zero.
    #[inline]
    pub fn next(self) -> Self {
        if self.0 == i64::MAX {
            Self::ZERO
        } else {
            Self(self.0 + 1)
        }
    }

    /// Predecessor, taking zero as "genuinely zero" (see [`previous_relative`]).
    ///
    /// [`previous_relative`]: SequenceNumber::previous_relative
    #[inline]
    pub fn previous(self) -> Self {
        self.previous_relative(Self::ZERO)
    }

    /// Predecessor relative to a reference point.
    ///
    /// Returns `self - 1` when `self != 0` or when `reference` is negative
    /// (the tracked stream legitimately spans zero). When `self == 0` and the
    /// reference is non-negative, zero is read as "next after max" and the
    /// result wraps to [`MAX_VALUE`](SequenceNumber::MAX_VALUE).
    #[inline]
    pub fn previous_relative(self, reference: Self) -> Self {
        if self.0 != 0 || reference.0 < 0 {
            Self(self.0.wrapping_sub(1))
        } else {
            Self::MAX_VALUE
        }
    }

    /// True when `other` is exactly one past `self` (no wraparound).
    #[inline]
    pub fn immediately_precedes(self, other: Self) -> bool {
        self.0.checked_add(1) == Some(other.0)
    }

    /// Number of values in `[self, later]`; zero when `later < self`.
    #[inline]
    pub fn span_to(self, later: Self) -> u64 {
        if later.0 < self.0 {
            return 0;
        }
        (later.0.wrapping_sub(self.0) as u64).saturating_add(1)
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<SequenceNumber> for i64 {
    fn from(seq: SequenceNumber) -> Self {
        seq.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence number generator (per-writer)
///
/// Generates monotonically increasing sequence numbers for the samples of one
/// writer. Starts at 1 (RTPS: sequence numbers start at 1, not 0).
///
/// # Thread Safety
///
/// All methods are thread-safe via `AtomicI64`; concurrent `next()` calls
/// never hand out the same value.
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicI64,
}

impl SeqNumGenerator {
    pub fn new() -> Self {
        Self::starting_at(SequenceNumber::new(1))
    }

    /// Generator whose first `next()` returns `first`.
    pub fn starting_at(first: SequenceNumber) -> Self {
        Self {
            next: AtomicI64::new(first.value()),
        }
    }

    /// Get next sequence number (monotonically increasing)
    #[inline]
    pub fn next(&self) -> SequenceNumber {
        // fetch_add returns OLD value, so result is the seq we should use
        SequenceNumber(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The value the next call to `next()` will return (may be stale).
    #[inline]
    pub fn current(&self) -> SequenceNumber {
        SequenceNumber(self.next.load(Ordering::Relaxed))
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_previous_plain() {
        assert_eq!(SequenceNumber::new(99).previous(), SequenceNumber::new(98));
        assert_eq!(
            SequenceNumber::MAX_VALUE.previous(),
            SequenceNumber::new(i64::MAX - 1)
        );
    }

    #[test]
    fn test_previous_of_zero_wraps_with_nonnegative_reference() {
        assert_eq!(SequenceNumber::ZERO.previous(), SequenceNumber::MAX_VALUE);
        assert_eq!(
            SequenceNumber::ZERO.previous_relative(SequenceNumber::new(42)),
            SequenceNumber::MAX_VALUE
        );
    }

    #[test]
    fn test_previous_of_zero_with_negative_reference() {
        assert_eq!(
            SequenceNumber::ZERO.previous_relative(SequenceNumber::new(-5)),
            SequenceNumber::new(-1)
        );
    }

    #[test]
    fn test_next_wraps_at_max() {
        assert_eq!(SequenceNumber::MAX_VALUE.next(), SequenceNumber::ZERO);
        assert_eq!(SequenceNumber::new(7).next(), SequenceNumber::new(8));
    }

    #[test]
    fn test_immediately_precedes() {
        assert!(SequenceNumber::new(3).immediately_precedes(SequenceNumber::new(4)));
        assert!(!SequenceNumber::new(3).immediately_precedes(SequenceNumber::new(5)));
        assert!(!SequenceNumber::MAX_VALUE.immediately_precedes(SequenceNumber::ZERO));
    }

    #[test]
    fn test_span_to() {
        assert_eq!(SequenceNumber::new(5).span_to(SequenceNumber::new(7)), 3);
        assert_eq!(SequenceNumber::new(5).span_to(SequenceNumber::new(5)), 1);
        assert_eq!(SequenceNumber::new(7).span_to(SequenceNumber::new(5)), 0);
    }

    #[test]
    fn test_unknown_matches_rtps_encoding() {
        assert_eq!(SequenceNumber::UNKNOWN.value(), -4_294_967_296);
    }

    #[test]
    fn test_seqgen_starts_at_one() {
        let gen = SeqNumGenerator::new();
        assert_eq!(gen.next(), SequenceNumber::new(1));
        assert_eq!(gen.next(), SequenceNumber::new(2));
        assert_eq!(gen.current(), SequenceNumber::new(3));
    }

    #[test]
    fn test_seqgen_thread_safety() {
        let gen = Arc::new(SeqNumGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = Arc::clone(&gen);
                thread::spawn(move || (0..10_000).map(|_| gen.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq in handle.join().expect("thread should complete") {
                assert!(seen.insert(seq), "duplicate sequence number {}", seq);
            }
        }
        assert_eq!(seen.len(), 40_000);
    }
}
