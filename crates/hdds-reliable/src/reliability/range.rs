// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inclusive sequence number range
//!
//! Gap-repair requests name missing data as inclusive `[first, last]` pairs,
//! so unlike a `std::ops::Range` both ends belong to the range.

use std::fmt;
use std::ops::RangeInclusive;

use super::SequenceNumber;

/// Inclusive range `[first, last]` of sequence numbers.
///
/// Construction does not validate; a range with `first > last` is rejected
/// by the consumer ([`SequenceTracker::update_range`]) with `InvalidRange`.
///
/// [`SequenceTracker::update_range`]: super::SequenceTracker::update_range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SequenceRange {
    pub first: SequenceNumber,
    pub last: SequenceNumber,
}

impl SequenceRange {
    pub fn new(first: impl Into<SequenceNumber>, last: impl Into<SequenceNumber>) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
        }
    }

    /// Single-value range `[seq, seq]`.
    pub fn single(seq: impl Into<SequenceNumber>) -> Self {
        let seq = seq.into();
        Self {
            first: seq,
            last: seq,
        }
    }

    /// True when `first <= last`.
    pub fn is_valid(&self) -> bool {
        self.first <= self.last
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        self.first <= seq && seq <= self.last
    }

    /// Number of sequence numbers covered (0 for an invalid range).
    pub fn len(&self) -> u64 {
        self.first.span_to(self.last)
    }

    pub fn is_empty(&self) -> bool {
        !self.is_valid()
    }

    /// Iterate the covered sequence numbers in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> {
        (self.first.value()..=self.last.value()).map(SequenceNumber::new)
    }
}

impl From<RangeInclusive<i64>> for SequenceRange {
    fn from(range: RangeInclusive<i64>) -> Self {
        Self::new(*range.start(), *range.end())
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len_and_contains() {
        let r = SequenceRange::new(10, 15);
        assert_eq!(r.len(), 6);
        assert!(r.contains(SequenceNumber::new(10)));
        assert!(r.contains(SequenceNumber::new(15)));
        assert!(!r.contains(SequenceNumber::new(16)));
    }

    #[test]
    fn test_single_range() {
        let r = SequenceRange::single(6);
        assert_eq!(r.first, r.last);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let r = SequenceRange::new(50, 40);
        assert!(!r.is_valid());
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
        assert_eq!(r.iter().count(), 0);
    }

    #[test]
    fn test_from_range_inclusive() {
        let r: SequenceRange = (2..=4).into();
        let values: Vec<i64> = r.iter().map(i64::from).collect();
        assert_eq!(values, vec![2, 3, 4]);
    }
}
