// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable-delivery configuration - single source of truth
//!
//! - **Level 1 (Static)**: compile-time constants (pool sizes, batch sizes, bounds)
//! - **Level 2 (Per writer)**: [`LifecycleConfig`], derived from a [`QosProfile`]
//!
//! # Example
//!
//! ```
//! use hdds_reliable::config::LifecycleConfig;
//! use hdds_reliable::qos::QosProfile;
//!
//! let config = LifecycleConfig::from_qos(&QosProfile::reliable_keep_all(4)).unwrap();
//! assert!(config.should_block);
//! assert_eq!(config.depth, 4);
//! ```

use std::time::Duration;

use crate::qos::{History, QosProfile, Reliability};
use crate::{Error, Result};

// =======================================================================
// Static limits
// =======================================================================

/// Sentinel for "no limit" on counts.
pub const LENGTH_UNLIMITED: usize = usize::MAX;

/// DDS default RELIABILITY `max_blocking_time` (100 ms).
pub const DEFAULT_MAX_BLOCKING_TIME: Duration = Duration::from_millis(100);

/// Sample slots preallocated per writer when no resource limit says otherwise.
pub const DEFAULT_SAMPLE_POOL_CAPACITY: usize = 4096;

/// Instance records preallocated per writer.
pub const DEFAULT_INSTANCE_POOL_CAPACITY: usize = 64;

/// Reader ids carried by one resend duplicate.
///
/// `reenqueue_all` splits larger reader sets into several duplicates.
pub const MAX_READERS_PER_ELEM: usize = 5;

/// Span above which a `SequenceTracker` collapses to its high-water mark.
pub const TRACKER_MAX_DEPTH: u64 = 1 << 16;

// =======================================================================
// Per-writer configuration
// =======================================================================

/// Settings of one writer's sample lifecycle container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Per-instance queue depth (HISTORY depth, or max_samples_per_instance).
    pub depth: usize,
    /// Block writers on a full instance instead of abandoning in-flight data.
    pub should_block: bool,
    /// Budget of one blocking write.
    pub max_blocking_time: Duration,
    /// Sample pool capacity (queued, in-flight and resend duplicates).
    pub max_samples: usize,
    /// Instance record pool capacity.
    pub max_instances: usize,
    /// Newest samples per instance duplicated for a late joiner.
    pub max_durable_per_instance: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            depth: 10,
            should_block: false,
            max_blocking_time: DEFAULT_MAX_BLOCKING_TIME,
            max_samples: DEFAULT_SAMPLE_POOL_CAPACITY,
            max_instances: DEFAULT_INSTANCE_POOL_CAPACITY,
            max_durable_per_instance: LENGTH_UNLIMITED,
        }
    }
}

impl LifecycleConfig {
    /// Non-blocking container with the given depth and default pools.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            ..Default::default()
        }
    }

    /// Derive the container settings from a writer's QoS.
    ///
    /// - `depth`: `KeepLast(n)` gives `n`; `KeepAll` gives `max_samples_per_instance`
    /// - `should_block`: `Reliable` together with `KeepAll`
    /// - `max_durable_per_instance`: zero for volatile writers, else the
    ///   durability-service history depth
    pub fn from_qos(qos: &QosProfile) -> Result<Self> {
        qos.validate().map_err(Error::InvalidQos)?;

        let rl = &qos.resource_limits;
        let depth = match qos.history {
            History::KeepLast(n) => n as usize,
            History::KeepAll => rl.max_samples_per_instance,
        };
        let should_block =
            qos.reliability == Reliability::Reliable && qos.history == History::KeepAll;
        let max_durable_per_instance = if qos.durability.replays_history() {
            match qos.durability_service.history {
                History::KeepLast(n) => n as usize,
                History::KeepAll => LENGTH_UNLIMITED,
            }
        } else {
            0
        };

        let config = Self {
            depth,
            should_block,
            max_blocking_time: qos.max_blocking_time,
            max_samples: rl.max_samples.max(depth),
            max_instances: rl.max_instances.max(1),
            max_durable_per_instance,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a QoS profile from YAML and derive the settings from it.
    #[cfg(feature = "qos-loaders")]
    pub fn from_yaml_str(yaml_content: &str) -> Result<Self> {
        let qos = QosProfile::from_yaml_str(yaml_content).map_err(Error::InvalidQos)?;
        Self::from_qos(&qos)
    }

    #[must_use]
    pub fn with_blocking(mut self, max_blocking_time: Duration) -> Self {
        self.should_block = true;
        self.max_blocking_time = max_blocking_time;
        self
    }

    #[must_use]
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    #[must_use]
    pub fn with_max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances;
        self
    }

    #[must_use]
    pub fn with_max_durable_per_instance(mut self, max_durable: usize) -> Self {
        self.max_durable_per_instance = max_durable;
        self
    }

    /// Reject settings the container cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::InvalidQos("depth must be > 0".to_string()));
        }
        if self.should_block && self.depth == LENGTH_UNLIMITED {
            return Err(Error::InvalidQos(
                "blocking writes require a bounded depth".to_string(),
            ));
        }
        if self.max_samples < self.depth {
            return Err(Error::InvalidQos(format!(
                "max_samples ({}) must be >= depth ({})",
                self.max_samples, self.depth
            )));
        }
        if self.max_instances == 0 {
            return Err(Error::InvalidQos("max_instances must be > 0".to_string()));
        }
        if u32::try_from(self.max_samples).is_err() || u32::try_from(self.max_instances).is_err()
        {
            return Err(Error::InvalidQos("pool capacity exceeds u32".to_string()));
        }
        Ok(())
    }
}
