// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS policies that shape a writer's sample lifecycle
//!
//! Only the policies the lifecycle manager reads are modelled here:
//!
//! - **Reliability**: BestEffort or Reliable
//! - **History**: KeepLast(n) bounded queue, KeepAll within ResourceLimits
//! - **Durability**: Volatile, TransientLocal, Persistent
//! - **DurabilityService**: how much history a late joiner gets back
//! - **ResourceLimits**: max_samples, max_instances, max_samples_per_instance
//! - **max_blocking_time**: budget of a blocking write (RELIABILITY policy)
//!
//! # Examples
//!
//! ```
//! use hdds_reliable::qos::{History, QosProfile, Reliability, ResourceLimits};
//!
//! let qos = QosProfile {
//!     reliability: Reliability::Reliable,
//!     history: History::KeepAll,
//!     resource_limits: ResourceLimits {
//!         max_samples: 64,
//!         max_instances: 4,
//!         max_samples_per_instance: 16,
//!     },
//!     ..Default::default()
//! };
//! assert!(qos.validate().is_ok());
//! ```

use std::time::Duration;

use crate::config::DEFAULT_MAX_BLOCKING_TIME;

/// Writer QoS as seen by the lifecycle container.
///
/// Checked by [`LifecycleConfig::from_qos`](crate::config::LifecycleConfig::from_qos)
/// before any pool is allocated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QosProfile {
    pub reliability: Reliability,
    pub history: History,
    pub durability: Durability,
    /// History replayed to late-joining readers.
    pub durability_service: DurabilityService,
    pub resource_limits: ResourceLimits,
    /// RELIABILITY max_blocking_time: budget of one blocking write.
    pub max_blocking_time: Duration,
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            history: History::KeepLast(10),
            durability: Durability::Volatile,
            durability_service: DurabilityService::default(),
            resource_limits: ResourceLimits::default(),
            max_blocking_time: DEFAULT_MAX_BLOCKING_TIME,
        }
    }
}

impl QosProfile {
    /// Check the policies against each other.
    ///
    /// Returns a human-readable reason for the first inconsistency found:
    ///
    /// - a KEEP_LAST depth of zero (writer history or durability service)
    /// - KEEP_ALL with no sample budget at all
    /// - a per-instance budget that the total budget cannot honor for every instance
    ///
    /// ```
    /// use hdds_reliable::qos::{History, QosProfile};
    ///
    /// let qos = QosProfile { history: History::KeepLast(0), ..Default::default() };
    /// assert!(qos.validate().unwrap_err().contains("depth"));
    /// ```
    pub fn validate(&self) -> Result<(), String> {
        check_depth("history", self.history)?;
        check_depth("durability_service.history", self.durability_service.history)?;

        let rl = &self.resource_limits;
        if self.history == History::KeepAll && rl.max_samples == 0 {
            return Err("KEEP_ALL history needs resource_limits.max_samples > 0".to_string());
        }

        let worst_case = rl.max_samples_per_instance.saturating_mul(rl.max_instances);
        if rl.max_samples < worst_case {
            return Err(format!(
                "resource_limits.max_samples {} cannot hold {} instances x {} samples",
                rl.max_samples, rl.max_instances, rl.max_samples_per_instance
            ));
        }
        Ok(())
    }

    /// Reliable, KeepAll profile for a single instance: writers block instead
    /// of dropping history once `max_samples_per_instance` samples are queued.
    #[must_use]
    pub fn reliable_keep_all(max_samples_per_instance: usize) -> Self {
        Self {
            reliability: Reliability::Reliable,
            history: History::KeepAll,
            resource_limits: ResourceLimits {
                max_samples: max_samples_per_instance,
                max_instances: 1,
                max_samples_per_instance,
            },
            ..Default::default()
        }
    }

    /// Parse a profile from YAML (`qos-loaders` feature).
    ///
    /// ```yaml
    /// reliability: RELIABLE
    /// durability: TRANSIENT_LOCAL
    /// history:
    ///   kind: KEEP_LAST
    ///   depth: 8
    /// durability_service:
    ///   kind: KEEP_LAST
    ///   depth: 2
    /// resource_limits:
    ///   max_samples: 64
    ///   max_instances: 8
    ///   max_samples_per_instance: 8
    /// max_blocking_time_ms: 250
    /// ```
    ///
    /// Omitted keys keep their defaults.
    #[cfg(feature = "qos-loaders")]
    pub fn from_yaml_str(yaml_content: &str) -> Result<Self, String> {
        let doc: yaml::YamlQosProfile =
            serde_yaml::from_str(yaml_content).map_err(|e| format!("QoS YAML: {}", e))?;
        doc.into_profile()
    }
}

fn check_depth(policy: &str, history: History) -> Result<(), String> {
    match history {
        History::KeepLast(0) => Err(format!("{}: KEEP_LAST depth must be at least 1", policy)),
        _ => Ok(()),
    }
}

/// RELIABILITY kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Reliability {
    #[default]
    BestEffort,
    /// Samples stay queued until acknowledged; with KeepAll a full
    /// instance blocks the writer.
    Reliable,
}

/// HISTORY kind and depth, per instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum History {
    /// Newest `n` samples; a write at depth evicts the oldest.
    KeepLast(u32),
    /// Everything, up to `ResourceLimits::max_samples_per_instance`.
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(10)
    }
}

/// DURABILITY kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Durability {
    #[default]
    Volatile,
    /// Queued samples are replayed to readers matched later.
    TransientLocal,
    /// Replayed like TransientLocal; storage is not handled here.
    Persistent,
}

impl Durability {
    /// True when late-joining readers get history replayed.
    pub fn replays_history(self) -> bool {
        !matches!(self, Durability::Volatile)
    }
}

/// DURABILITY_SERVICE history: samples per instance replayed to a late joiner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurabilityService {
    pub history: History,
}

impl Default for DurabilityService {
    fn default() -> Self {
        Self {
            history: History::KeepAll,
        }
    }
}

/// RESOURCE_LIMITS of one writer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Sample pool size shared by all instances.
    pub max_samples: usize,
    pub max_instances: usize,
    /// Queue depth under KeepAll.
    pub max_samples_per_instance: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 4096,
            max_instances: 64,
            max_samples_per_instance: 64,
        }
    }
}

#[cfg(feature = "qos-loaders")]
mod yaml {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    pub(super) struct YamlQosProfile {
        reliability: Option<String>,
        durability: Option<String>,
        history: Option<YamlHistory>,
        durability_service: Option<YamlHistory>,
        resource_limits: Option<YamlResourceLimits>,
        max_blocking_time_ms: Option<u64>,
    }

    #[derive(Debug, Deserialize)]
    struct YamlHistory {
        kind: String,
        #[serde(default)]
        depth: Option<u32>,
    }

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct YamlResourceLimits {
        max_samples: Option<usize>,
        max_instances: Option<usize>,
        max_samples_per_instance: Option<usize>,
    }

    impl YamlHistory {
        fn to_history(&self) -> Result<History, String> {
            match self.kind.to_uppercase().as_str() {
                "KEEP_LAST" => Ok(History::KeepLast(self.depth.unwrap_or(1))),
                "KEEP_ALL" => Ok(History::KeepAll),
                other => Err(format!("Invalid history kind: {}", other)),
            }
        }
    }

    impl YamlQosProfile {
        pub(super) fn into_profile(self) -> Result<QosProfile, String> {
            let mut qos = QosProfile::default();

            if let Some(ref rel) = self.reliability {
                qos.reliability = match rel.to_uppercase().as_str() {
                    "RELIABLE" => Reliability::Reliable,
                    "BEST_EFFORT" => Reliability::BestEffort,
                    other => return Err(format!("Invalid reliability: {}", other)),
                };
            }

            if let Some(ref dur) = self.durability {
                qos.durability = match dur.to_uppercase().as_str() {
                    "VOLATILE" => Durability::Volatile,
                    "TRANSIENT_LOCAL" => Durability::TransientLocal,
                    "PERSISTENT" => Durability::Persistent,
                    other => return Err(format!("Invalid durability: {}", other)),
                };
            }

            if let Some(ref history) = self.history {
                qos.history = history.to_history()?;
            }
            if let Some(ref history) = self.durability_service {
                qos.durability_service.history = history.to_history()?;
            }

            if let Some(rl) = self.resource_limits {
                let limits = &mut qos.resource_limits;
                limits.max_samples = rl.max_samples.unwrap_or(limits.max_samples);
                limits.max_instances = rl.max_instances.unwrap_or(limits.max_instances);
                limits.max_samples_per_instance = rl
                    .max_samples_per_instance
                    .unwrap_or(limits.max_samples_per_instance);
            }

            if let Some(ms) = self.max_blocking_time_ms {
                qos.max_blocking_time = Duration::from_millis(ms);
            }

            Ok(qos)
        }
    }
}
