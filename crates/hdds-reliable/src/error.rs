// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the reliable-delivery primitives.
//!
//! Errors are returned synchronously from the call that detects them.
//! Transport notifications that cannot be matched to a live sample are
//! *not* errors: they are logged and counted (see
//! [`LifecycleMetrics`](crate::writer::LifecycleMetrics)).

use crate::reliability::SequenceNumber;

/// DDS return codes the owning DataWriter translates errors into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// Generic failure (`RETCODE_ERROR`).
    Error,
    /// Blocking write exceeded `max_blocking_time` (`RETCODE_TIMEOUT`).
    Timeout,
    /// Operation on an unknown instance handle (`RETCODE_PRECONDITION_NOT_MET`).
    PreconditionNotMet,
    /// Fixed-capacity pool exhausted (`RETCODE_OUT_OF_RESOURCES`).
    OutOfResources,
    /// Container already torn down (`RETCODE_ALREADY_DELETED`).
    AlreadyDeleted,
    /// Malformed argument (`RETCODE_BAD_PARAMETER`).
    BadParameter,
}

/// Errors returned by the sequence tracker and the sample lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed sequence range (`first > last`, or disjoint from known territory).
    InvalidRange {
        first: SequenceNumber,
        last: SequenceNumber,
    },
    /// Operation on an unknown or unregistered instance handle.
    PreconditionNotMet(String),
    /// Blocking write did not obtain a slot within `max_blocking_time`.
    Timeout,
    /// Sample or instance pool exhausted.
    ResourceExhausted(String),
    /// Internal invariant violation detected synchronously.
    Internal(String),
    /// The container was shut down (`unregister_all`) while the call was pending.
    Shutdown,
    /// QoS or container configuration rejected.
    InvalidQos(String),
}

impl Error {
    /// API-level return code for this error.
    pub fn return_code(&self) -> ReturnCode {
        match self {
            Error::InvalidRange { .. } | Error::InvalidQos(_) => ReturnCode::BadParameter,
            Error::PreconditionNotMet(_) => ReturnCode::PreconditionNotMet,
            Error::Timeout => ReturnCode::Timeout,
            Error::ResourceExhausted(_) => ReturnCode::OutOfResources,
            Error::Internal(_) => ReturnCode::Error,
            Error::Shutdown => ReturnCode::AlreadyDeleted,
        }
    }

    /// True when the caller may simply retry the write later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidRange { first, last } => {
                write!(f, "Invalid sequence range: [{}, {}]", first, last)
            }
            Error::PreconditionNotMet(msg) => write!(f, "Precondition not met: {}", msg),
            Error::Timeout => write!(f, "Write timeout"),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
            Error::Shutdown => write!(f, "Container shut down"),
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
