// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Disjoint sequence tracking for gap repair
//!
//! Reader-side (or session-side) record of which sequence numbers have been
//! observed from one remote writer. Only the boundaries of covered runs are
//! stored, so memory grows with the number of gaps, not with the span.
//!
//! # Representation
//!
//! ```text
//!  floor      low                                  high
//!    |---------|....gap....[run]....gap....[run]....|
//!    '-- seen --'
//! ```
//!
//! - Values below `floor` (the seed, or the last reset/shift point) are
//!   *unknown*: neither seen nor reported missing.
//! - Everything in `[floor, low]` is accounted for. The first run is always
//!   collapsed to the single point `low` (normalization).
//! - `shift(x)` moves the floor to `x` and the low-water mark to
//!   `previous(x)`, one below the floor. Until later updates fill in `x`,
//!   the accounted interval is empty and `seen(low())` is false.
//! - Each later run `[start, end]` is a block of observed values; the spans
//!   strictly between runs are the gaps handed to NACK builders.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::iter::FusedIterator;

use super::{SequenceNumber, SequenceRange};
use crate::config::TRACKER_MAX_DEPTH;
use crate::{Error, Result};

/// Default span (`high - low + 1`) above which the tracker collapses.
pub const MAX_DEPTH: u64 = TRACKER_MAX_DEPTH;

/// Tracker of observed and missing sequence numbers.
///
/// Not internally synchronized: one tracker belongs to one association and
/// the owner serializes access.
///
/// # Example
///
/// ```
/// use hdds_reliable::reliability::{SequenceNumber, SequenceRange, SequenceTracker};
///
/// let mut tracker = SequenceTracker::new(SequenceNumber::new(5));
/// assert!(!tracker.update(SequenceNumber::new(5)));
/// assert!(tracker.update(SequenceNumber::new(7)));
/// assert_eq!(tracker.missing_ranges(), vec![SequenceRange::new(6, 6)]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceTracker {
    /// Covered runs, keyed by first value, mapping to last value (inclusive).
    ///
    /// Invariant: never empty; runs are disjoint and never adjacent.
    runs: BTreeMap<SequenceNumber, SequenceNumber>,
    floor: SequenceNumber,
    max_depth: u64,
}

impl SequenceTracker {
    /// Seed the tracker with a single known point.
    pub fn new(initial: SequenceNumber) -> Self {
        Self::with_max_depth(initial, MAX_DEPTH)
    }

    /// Seed the tracker with an explicit collapse bound.
    pub fn with_max_depth(initial: SequenceNumber, max_depth: u64) -> Self {
        let mut runs = BTreeMap::new();
        runs.insert(initial, initial);
        Self {
            runs,
            floor: initial,
            max_depth: max_depth.max(1),
        }
    }

    /// Low-water mark: everything from the floor up to here is accounted for.
    pub fn low(&self) -> SequenceNumber {
        self.runs
            .first_key_value()
            .map_or(self.floor, |(start, _)| *start)
    }

    /// High-water mark: largest value observed.
    pub fn high(&self) -> SequenceNumber {
        self.runs
            .last_key_value()
            .map_or(self.floor, |(_, end)| *end)
    }

    /// `high - low + 1`.
    pub fn depth(&self) -> u64 {
        self.low().span_to(self.high())
    }

    /// True when at least one gap is outstanding.
    pub fn disjoint(&self) -> bool {
        self.runs.len() > 1
    }

    pub fn max_depth(&self) -> u64 {
        self.max_depth
    }

    /// Has `value` been observed (or accounted for below the low-water mark)?
    pub fn seen(&self, value: SequenceNumber) -> bool {
        if value < self.floor {
            return false;
        }
        if value <= self.low() {
            return true;
        }
        self.runs
            .range(..=value)
            .next_back()
            .is_some_and(|(_, end)| value <= *end)
    }

    /// Record one observed value.
    ///
    /// Returns `false` when the value was already seen or lies below the
    /// floor; the tracker is unchanged in that case.
    pub fn update(&mut self, value: SequenceNumber) -> bool {
        if value < self.floor || self.seen(value) {
            return false;
        }
        self.insert_run(value, value);
        self.enforce_max_depth();
        self.normalize();
        true
    }

    /// Record every value in `[range.first, range.last]`.
    ///
    /// Observably identical to calling [`update`](Self::update) for each value
    /// in the range; returns `true` if any of them was new.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRange` if the range is malformed; state is unchanged.
    pub fn update_range(&mut self, range: SequenceRange) -> Result<bool> {
        self.validate(&range)?;

        if range.last < self.floor || range.last <= self.low() {
            return Ok(false);
        }
        let first = range.first.max(self.floor);
        if self.covers(first, range.last) {
            return Ok(false);
        }

        self.insert_run(first, range.last);
        self.enforce_max_depth();
        self.normalize();
        Ok(true)
    }

    /// Check a range before applying it.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRange` if `first > last`, or if the range lies entirely
    /// below the low-water mark while also starting above the high-water mark.
    pub fn validate(&self, range: &SequenceRange) -> Result<()> {
        if range.first > range.last || (range.last < self.low() && range.first > self.high()) {
            return Err(Error::InvalidRange {
                first: range.first,
                last: range.last,
            });
        }
        Ok(())
    }

    /// Advance the low-water mark to `previous(value)`.
    ///
    /// Used when the peer declares everything below `value` unrecoverable.
    /// Values below the new low-water mark are discarded and become unknown.
    /// No-op if the mark would not move forward.
    pub fn shift(&mut self, value: SequenceNumber) {
        let low = self.low();
        let new_low = value.previous_relative(low);
        if new_low <= low {
            log::debug!(
                "[SequenceTracker::shift] {} does not advance low-water mark {}",
                value,
                low
            );
            return;
        }

        let discarded: Vec<(SequenceNumber, SequenceNumber)> = self
            .runs
            .range(..=new_low)
            .map(|(start, end)| (*start, *end))
            .collect();
        let mut carried = new_low;
        for (start, end) in discarded {
            carried = carried.max(end);
            self.runs.remove(&start);
        }

        self.floor = value;
        self.insert_run(new_low, carried);
        self.normalize();
    }

    /// Discard all state and restart tracking from `value`.
    pub fn skip(&mut self, value: SequenceNumber) {
        self.runs.clear();
        self.runs.insert(value, value);
        self.floor = value;
    }

    /// Alias of [`skip`](Self::skip) used on resynchronization.
    pub fn reset(&mut self, value: SequenceNumber) {
        self.skip(value);
    }

    /// Collapse the contiguous prefix starting at the minimum into one point.
    ///
    /// Idempotent.
    pub fn normalize(&mut self) {
        let first = self
            .runs
            .first_key_value()
            .map(|(start, end)| (*start, *end));
        if let Some((start, end)) = first {
            if start != end {
                self.runs.remove(&start);
                self.runs.insert(end, end);
            }
        }
    }

    /// Lazy iterator over the gaps, in increasing order.
    ///
    /// Calling it again restarts from the lowest gap.
    pub fn range_iterator(&self) -> GapRanges<'_> {
        GapRanges {
            runs: self.runs.iter(),
            prev_end: None,
        }
    }

    /// All gaps, collected.
    pub fn missing_ranges(&self) -> Vec<SequenceRange> {
        self.range_iterator().collect()
    }

    /// Is every value of `[first, last]` already seen? Requires `first >= floor`.
    fn covers(&self, first: SequenceNumber, last: SequenceNumber) -> bool {
        let low = self.low();
        if last <= low {
            return true;
        }
        let start = first.max(low);
        self.runs
            .range(..=start)
            .next_back()
            .is_some_and(|(_, end)| *end >= last)
    }

    /// Insert `[first, last]`, absorbing overlapping and adjacent runs.
    fn insert_run(&mut self, mut first: SequenceNumber, mut last: SequenceNumber) {
        let before = self
            .runs
            .range(..=first)
            .next_back()
            .map(|(start, end)| (*start, *end));
        if let Some((start, end)) = before {
            if end >= first || end.immediately_precedes(first) {
                first = start;
                last = last.max(end);
                self.runs.remove(&start);
            }
        }

        loop {
            let after = self
                .runs
                .range(first..)
                .next()
                .map(|(start, end)| (*start, *end));
            match after {
                Some((start, end)) if start <= last || last.immediately_precedes(start) => {
                    last = last.max(end);
                    self.runs.remove(&start);
                }
                _ => break,
            }
        }

        self.runs.insert(first, last);
    }

    fn enforce_max_depth(&mut self) {
        let depth = self.depth();
        if depth > self.max_depth {
            let high = self.high();
            log::warn!(
                "[SequenceTracker] depth {} exceeds max {} ({} gaps), skipping to {}",
                depth,
                self.max_depth,
                self.runs.len() - 1,
                high
            );
            self.skip(high);
        }
    }
}

/// Iterator over the gaps of a [`SequenceTracker`].
///
/// Yields one inclusive range per span strictly between two covered runs.
#[derive(Debug, Clone)]
pub struct GapRanges<'a> {
    runs: btree_map::Iter<'a, SequenceNumber, SequenceNumber>,
    prev_end: Option<SequenceNumber>,
}

impl Iterator for GapRanges<'_> {
    type Item = SequenceRange;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (&start, &end) = self.runs.next()?;
            let prev = self.prev_end.replace(end);
            if let Some(prev_end) = prev {
                // Consecutive boundaries leave no gap; keep going.
                if prev_end < start && !prev_end.immediately_precedes(start) {
                    return Some(SequenceRange {
                        first: prev_end.next(),
                        last: start.previous_relative(prev_end),
                    });
                }
            }
        }
    }
}

impl FusedIterator for GapRanges<'_> {}
