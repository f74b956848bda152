//! Error taxonomy shared by every camera operation.
//!
//! Device rejections and local validation failures both surface as
//! [`Error::InvalidValue`], tagged with an [`Origin`] so callers can decide
//! whether to retry with another value or give up on the feature.

use std::time::Duration;
use thiserror::Error;

/// Where a value was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Rejected by client-side validation before reaching the device.
    Local,
    /// Rejected by the device.
    Device,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local => f.write_str("local validation"),
            Origin::Device => f.write_str("device"),
        }
    }
}

/// Errors returned by camera, stream and feature operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A device identifier or feature name is unknown.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// The feature exists in the naming scheme but this model lacks it.
    #[error("feature not supported by this device: {0}")]
    Unsupported(String),

    /// A value was rejected.
    #[error("invalid value for {feature} ({origin}): {reason}")]
    InvalidValue {
        feature: String,
        reason: String,
        origin: Origin,
    },

    /// Transport or I/O failure talking to the device.
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    /// No filled buffer arrived within the wait.
    #[error("timed out after {0:?} waiting for a frame")]
    Timeout(Duration),

    /// The stream was closed or acquisition halted while waiting.
    #[error("stream closed")]
    Closed,

    #[error("failed to create stream: {0}")]
    StreamCreateFailed(String),

    /// A stream-shaping feature was written outside the Idle state.
    #[error("cannot change {feature} while acquisition is active")]
    ModeChangeWhileActive { feature: String },

    /// The operation is not legal in the current acquisition state.
    #[error("{operation} not allowed: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: String,
    },

    /// The device handle was already closed.
    #[error("device handle already closed")]
    AlreadyClosed,
}

impl Error {
    pub(crate) fn feature_not_found(name: &str) -> Self {
        Error::NotFound {
            what: "feature",
            name: name.to_string(),
        }
    }

    pub(crate) fn local(feature: &str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            feature: feature.to_string(),
            reason: reason.into(),
            origin: Origin::Local,
        }
    }

    pub(crate) fn rejected(feature: &str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            feature: feature.to_string(),
            reason: reason.into(),
            origin: Origin::Device,
        }
    }

    /// Returns true for failures a caller may retry without changing anything,
    /// such as a stream wait that timed out.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::DeviceUnreachable(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_in_message() {
        let err = Error::rejected("Gain", "above maximum 24");
        assert_eq!(
            err.to_string(),
            "invalid value for Gain (device): above maximum 24"
        );

        let err = Error::local("Gain", "not a finite number");
        assert!(matches!(
            err,
            Error::InvalidValue {
                origin: Origin::Local,
                ..
            }
        ));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(Error::Timeout(Duration::from_millis(5)).is_transient());
        assert!(!Error::AlreadyClosed.is_transient());
        assert!(!Error::Unsupported("ExposureAuto".into()).is_transient());
    }
}
