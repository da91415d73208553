//! Processing error types
//!
//! Every failure raised while executing a job is wrapped in a [`ProcessingError`]
//! carrying an [`ErrorClass`]. The class, not the message, decides whether the
//! queue schedules a retry or records a terminal failure.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure classification used by the queue's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// I/O failures, timeouts, storage unavailability. Retried with backoff.
    Transient,
    /// Malformed or unsupported input, conversion rejection. Never retried.
    Permanent,
    /// Generated output is structurally invalid. Never retried.
    Validation,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Validation => write!(f, "validation"),
        }
    }
}

/// Job execution error with its retry classification
#[derive(Debug)]
pub struct ProcessingError {
    inner: anyhow::Error,
    class: ErrorClass,
}

impl ProcessingError {
    /// Create a transient error.
    ///
    /// Transient errors are retried according to the queue's backoff policy:
    /// - storage reads or writes that failed for reasons other than a missing object
    /// - execution timeouts
    /// - lost leases reclaimed by the maintenance loop
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            class: ErrorClass::Transient,
        }
    }

    /// Create a permanent error.
    ///
    /// The job fails immediately; retrying would see the same bytes and fail again.
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            class: ErrorClass::Permanent,
        }
    }

    pub fn validation(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            class: ErrorClass::Validation,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + 'static) = self.inner.as_ref();
        Some(inner)
    }
}

impl From<anyhow::Error> for ProcessingError {
    /// Unclassified errors default to transient so that an unexpected failure
    /// still gets the bounded retry budget.
    fn from(err: anyhow::Error) -> Self {
        Self::transient(err)
    }
}

impl From<std::io::Error> for ProcessingError {
    fn from(err: std::io::Error) -> Self {
        Self::transient(err)
    }
}

/// Extension trait for classifying errors at the call site
pub trait ProcessingResultExt<T> {
    /// Mark this result as permanent on error
    fn permanent(self) -> Result<T, ProcessingError>;

    /// Mark this result as transient on error
    fn transient(self) -> Result<T, ProcessingError>;
}

impl<T, E: Into<anyhow::Error>> ProcessingResultExt<T> for Result<T, E> {
    fn permanent(self) -> Result<T, ProcessingError> {
        self.map_err(ProcessingError::permanent)
    }

    fn transient(self) -> Result<T, ProcessingError> {
        self.map_err(ProcessingError::transient)
    }
}
