//! Error types for llm-throttle.
//!
//! Taxonomy:
//! - Configuration: invalid or contradictory policy, caught at construction
//! - Downstream: whatever the executor returned, carried verbatim
//! - Admission: the gate itself refused (closed manager, failed batch task)

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors.
///
/// Always raised synchronously while building a policy or a manager.
/// Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ═══════════════════════════════════════════════════════════════════
    // POLICY SHAPE — exactly one of rps / concurrency
    // ═══════════════════════════════════════════════════════════════════
    #[error("Exactly one of rps or concurrency must be set, neither was given")]
    NoPolicy,

    #[error("Exactly one of rps or concurrency must be set, both were given")]
    ConflictingPolicies,

    #[error("max_in_flight only applies on top of rps, but rps is not set")]
    CapWithoutRate,

    // ═══════════════════════════════════════════════════════════════════
    // POLICY VALUES
    // ═══════════════════════════════════════════════════════════════════
    #[error("rps must be a positive finite number, got {0}")]
    InvalidRate(f64),

    #[error("rps {rps} is too low: dispatch interval would exceed {max_interval_secs}s")]
    RateTooLow { rps: f64, max_interval_secs: u64 },

    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },

    #[error("{field} = {value} exceeds the maximum of {max}")]
    LimitTooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },

    // ═══════════════════════════════════════════════════════════════════
    // CONFIG FILES
    // ═══════════════════════════════════════════════════════════════════
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Error returned by [`RateLimitManager::execute`](crate::RateLimitManager::execute).
///
/// The manager never retries or rewrites downstream failures: they come back
/// as `Downstream` holding the executor's own error value.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    #[error(transparent)]
    Downstream(E),

    #[error("Rate limit manager is closed")]
    Closed,

    #[error("Batch task failed: {0}")]
    TaskFailed(String),
}

impl<E> ExecuteError<E> {
    /// Check if this error came from the executor.
    pub fn is_downstream(&self) -> bool {
        matches!(self, Self::Downstream(_))
    }

    /// Recover the executor's error, if that is what this is.
    pub fn into_downstream(self) -> Option<E> {
        match self {
            Self::Downstream(e) => Some(e),
            _ => None,
        }
    }
}

/// Chat payload errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("No model in payload and no default model configured")]
    MissingModel,

    #[error("Payload field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}
