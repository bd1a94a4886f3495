// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics for the writer sample lifecycle
//!
//! Tracks writes, evictions, backpressure and transport outcomes for one
//! container.
//!
//! # Thread Safety
//!
//! All methods use atomic operations (Relaxed ordering) for lock-free updates.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle metrics collector (one per container)
#[derive(Debug, Default)]
pub struct LifecycleMetrics {
    /// Samples enqueued for sending
    samples_written: AtomicU64,
    /// Oldest-sample evictions (resource limits or dispose)
    evictions: AtomicU64,
    /// Evictions that found the sample in flight (moved to Released)
    in_flight_evictions: AtomicU64,
    /// `TransportHandoff::abandon` calls issued
    abandons_requested: AtomicU64,
    /// Writes that had to block
    blocked_writes: AtomicU64,
    /// Blocked writes that gave up after `max_blocking_time`
    write_timeouts: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    /// Duplicates created by `reenqueue_all`
    resend_duplicates: AtomicU64,
    /// Sent samples freed beyond `max_durable_per_instance`
    durable_trimmed: AtomicU64,
    /// Transport notifications that matched no live sample
    unmatched_notifications: AtomicU64,
    /// Highest per-instance occupancy observed (high-water mark)
    max_instance_occupancy: AtomicU64,
}

/// Plain copy of the counters at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub samples_written: u64,
    pub evictions: u64,
    pub in_flight_evictions: u64,
    pub abandons_requested: u64,
    pub blocked_writes: u64,
    pub write_timeouts: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub resend_duplicates: u64,
    pub durable_trimmed: u64,
    pub unmatched_notifications: u64,
    pub max_instance_occupancy: u64,
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_write(&self, occupancy: usize) {
        self.samples_written.fetch_add(1, Ordering::Relaxed);
        self.update_max_occupancy(occupancy as u64);
    }

    /// Update occupancy high-water mark
    ///
    /// Uses compare-exchange loop to ensure we only update if the new value is larger.
    fn update_max_occupancy(&self, occupancy: u64) {
        let mut current = self.max_instance_occupancy.load(Ordering::Relaxed);
        while occupancy > current {
            match self.max_instance_occupancy.compare_exchange_weak(
                current,
                occupancy,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn record_eviction(&self, in_flight: bool) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if in_flight {
            self.in_flight_evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn increment_abandons(&self) {
        self.abandons_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_blocked_writes(&self) {
        self.blocked_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_write_timeouts(&self) {
        self.write_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_resend_duplicates(&self, count: u64) {
        self.resend_duplicates.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn increment_durable_trimmed(&self, count: u64) {
        self.durable_trimmed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn increment_unmatched(&self) {
        self.unmatched_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn unmatched_notifications(&self) -> u64 {
        self.unmatched_notifications.load(Ordering::Relaxed)
    }

    pub fn write_timeouts(&self) -> u64 {
        self.write_timeouts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_written: self.samples_written.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            in_flight_evictions: self.in_flight_evictions.load(Ordering::Relaxed),
            abandons_requested: self.abandons_requested.load(Ordering::Relaxed),
            blocked_writes: self.blocked_writes.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            resend_duplicates: self.resend_duplicates.load(Ordering::Relaxed),
            durable_trimmed: self.durable_trimmed.load(Ordering::Relaxed),
            unmatched_notifications: self.unmatched_notifications.load(Ordering::Relaxed),
            max_instance_occupancy: self.max_instance_occupancy.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_new() {
        let m = LifecycleMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_eviction_counts() {
        let m = LifecycleMetrics::new();
        m.record_eviction(false);
        m.record_eviction(true);

        let snap = m.snapshot();
        assert_eq!(snap.evictions, 2);
        assert_eq!(snap.in_flight_evictions, 1);
    }

    #[test]
    fn test_max_occupancy_updates() {
        let m = LifecycleMetrics::new();
        m.record_write(3);
        m.record_write(1); // Smaller, should not update max
        assert_eq!(m.snapshot().max_instance_occupancy, 3);
        m.record_write(7);
        assert_eq!(m.snapshot().max_instance_occupancy, 7);
        assert_eq!(m.snapshot().samples_written, 3);
    }

    #[test]
    fn test_concurrent_writes() {
        let m = Arc::new(LifecycleMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for i in 0..100 {
                        m.record_write(t * 100 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("Thread should complete successfully");
        }

        let snap = m.snapshot();
        assert_eq!(snap.samples_written, 800);
        assert_eq!(snap.max_instance_occupancy, 799);
    }
}
