//! Error types for the memory subsystem
//!
//! All fallible operations return [`EngramResult`]. Read-path failures are
//! generally absorbed by the components themselves (degrading to empty
//! results); write-path failures propagate so the recovery coordinator can
//! act on them.

use thiserror::Error;

/// Result alias used throughout the crate
pub type EngramResult<T> = Result<T, EngramError>;

/// Errors produced by the memory subsystem
#[derive(Debug, Error)]
pub enum EngramError {
    /// Malformed input rejected at the boundary
    #[error("validation failed for '{field}': {rule} (got: {value})")]
    Validation {
        /// Field or parameter that failed validation
        field: String,
        /// The rule that was violated
        rule: String,
        /// The offending value (possibly truncated)
        value: String,
    },

    /// File or storage I/O failure
    #[error("storage operation '{operation}' failed: {source}")]
    Storage {
        /// The operation that failed (e.g. "write_store", "backup")
        operation: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failure
    #[error("serialization failed in '{operation}': {source}")]
    Serialization {
        /// The operation that failed
        operation: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Authentication tag mismatch, wrong key, or malformed ciphertext.
    /// Always fails closed; no partial plaintext is ever returned.
    #[error("decryption failed: {reason}")]
    Decryption {
        /// Why decryption was rejected
        reason: String,
    },

    /// Payload compression or decompression failure
    #[error("compression failed in '{operation}': {reason}")]
    Compression {
        /// The operation that failed
        operation: String,
        /// Why the codec gave up
        reason: String,
    },

    /// An outbound call exceeded its deadline. Reported distinctly and
    /// never silently retried by this subsystem.
    #[error("operation '{operation}' timed out after {seconds}s")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The deadline that elapsed
        seconds: u64,
    },

    /// A recovery-wrapped operation exhausted its retry budget
    #[error("operation '{operation}' failed after {attempts} attempts: {reason}")]
    Recovery {
        /// The logical operation key
        operation: String,
        /// How many attempts were made
        attempts: u32,
        /// The last underlying failure
        reason: String,
    },
}

impl EngramError {
    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        rule: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            rule: rule.into(),
            value: value.into(),
        }
    }

    /// Create a storage error
    pub fn storage(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            operation: operation.into(),
            source,
        }
    }

    /// Create a decryption error
    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    /// Create a compression error
    pub fn compression(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compression {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create a recovery-exhausted error
    pub fn recovery(
        operation: impl Into<String>,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::Recovery {
            operation: operation.into(),
            attempts,
            reason: reason.into(),
        }
    }
}
