//! Error types for deadlock-sim operations.
//!
//! Only conditions the caller must react to are errors. A request that cannot
//! be granted right now, or whose wait bound elapses, is a normal outcome and is
//! reported through [`RequestOutcome`](crate::manager::RequestOutcome) instead.

use std::io;
use thiserror::Error;

use crate::types::ProcessId;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in deadlock-sim operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The resource vector has no entries.
    #[error("at least one resource type is required")]
    NoResourceTypes,

    /// The max-demand matrix has no rows.
    #[error("at least one process is required")]
    NoProcesses,

    /// A max-demand row does not have one entry per resource type.
    #[error("max demand of P{process} has {found} entries, expected {expected}")]
    DemandShape {
        /// Offending process.
        process: ProcessId,
        /// Number of resource types.
        expected: usize,
        /// Row length supplied.
        found: usize,
    },

    /// A declared maximum exceeds the total units of that type.
    #[error("max demand of P{process} for R{resource} is {demand}, total is {total}")]
    DemandExceedsTotal {
        /// Offending process.
        process: ProcessId,
        /// Resource type index.
        resource: usize,
        /// Declared maximum.
        demand: u32,
        /// Total units of the type.
        total: u32,
    },

    /// A process declared no demand at all.
    #[error("max demand of P{process} is all zero")]
    ZeroDemand {
        /// Offending process.
        process: ProcessId,
    },

    /// Process id out of range.
    #[error("process P{0} does not exist")]
    UnknownProcess(ProcessId),

    /// Request vector has the wrong number of entries.
    #[error("request of P{process} has {found} entries, expected {expected}")]
    RequestShape {
        /// Requesting process.
        process: ProcessId,
        /// Number of resource types.
        expected: usize,
        /// Request length supplied.
        found: usize,
    },

    /// Request exceeds the remaining need of the process.
    #[error("invalid request of P{process}: {request:?} exceeds need {need:?}")]
    InvalidRequest {
        /// Requesting process.
        process: ProcessId,
        /// The rejected request.
        request: Vec<u32>,
        /// Need at the time of the request.
        need: Vec<u32>,
    },

    /// The state model failed its consistency check.
    #[error("state invariant violated: {0}")]
    InvariantViolation(String),

    /// Configuration file not found or unreadable.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    /// Configuration parsing error with line number.
    #[error("configuration error at line {line}: {message}")]
    ConfigParse {
        /// Line number where the error occurred (1-indexed, 0 if unknown).
        line: usize,
        /// Parser message.
        message: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration value for '{key}': {message}")]
    ConfigInvalid {
        /// The configuration key with invalid value.
        key: String,
        /// Why the value is invalid.
        message: String,
    },

    /// YAML serialization error (event export).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error (thread spawning, event export).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A worker thread panicked before reporting an outcome.
    #[error("worker P{0} panicked")]
    WorkerPanicked(ProcessId),

    /// The detector thread panicked before reporting.
    #[error("detector thread panicked")]
    DetectorPanicked,
}

impl Error {
    /// Returns true for errors raised while building the initial state.
    ///
    /// These are fatal to a run and are always surfaced before any worker starts.
    #[must_use]
    pub fn is_construction_failure(&self) -> bool {
        matches!(
            self,
            Self::NoResourceTypes
                | Self::NoProcesses
                | Self::DemandShape { .. }
                | Self::DemandExceedsTotal { .. }
                | Self::ZeroDemand { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_display() {
        let err = Error::InvalidRequest {
            process: 3,
            request: vec![2, 0],
            need: vec![1, 0],
        };
        let display = err.to_string();
        assert!(display.contains("P3"), "Error should include process: {display}");
        assert!(display.contains("[2, 0]"), "Error should include request: {display}");
        assert!(display.contains("[1, 0]"), "Error should include need: {display}");
    }

    #[test]
    fn test_demand_exceeds_total_display() {
        let err = Error::DemandExceedsTotal {
            process: 1,
            resource: 2,
            demand: 9,
            total: 4,
        };
        let display = err.to_string();
        assert!(display.contains("R2"));
        assert!(display.contains('9'));
        assert!(display.contains('4'));
    }

    #[test]
    fn test_config_parse_error_includes_line_number() {
        let err = Error::ConfigParse {
            line: 42,
            message: "invalid value".to_string(),
        };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_construction_failure_classification() {
        assert!(Error::NoResourceTypes.is_construction_failure());
        assert!(Error::ZeroDemand { process: 0 }.is_construction_failure());
        assert!(!Error::UnknownProcess(7).is_construction_failure());
        assert!(!Error::WorkerPanicked(0).is_construction_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
