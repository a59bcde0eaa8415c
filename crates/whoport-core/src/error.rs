//! Error types for whoport operations.
//!
//! One canonical enum covers every query in the workspace:
//! - [`WhoportError`] - typed outcome for all introspection and signal calls
//!
//! Errors carry structured context (pid, operation, data source) rather than
//! bare strings, and none of them ever terminates the process: every failure
//! is returned to the caller as a value.

use std::io;
use thiserror::Error;

// ============================================================================
// Canonical Error Type
// ============================================================================

/// Canonical error type for all whoport operations.
///
/// The taxonomy mirrors what the kernel can actually tell us:
/// a process can vanish (`NotFound`), the kernel can refuse access
/// (`PermissionDenied`), a whole data source can be missing
/// (`Unavailable`), or a record can fail to parse (`Malformed`).
/// `InvalidArgument` and `System` cover the API boundary and raw
/// syscall failures.
#[derive(Debug, Error)]
pub enum WhoportError {
    /// A caller-supplied value failed validation at the API boundary
    /// (pid 0, port 0, out-of-range signal number).
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the value.
        message: String,
    },

    /// The target process does not exist, or exited before the query
    /// reached it.
    #[error("Process {pid} not found")]
    NotFound {
        /// The pid that could not be resolved.
        pid: u32,
    },

    /// The kernel refused access. Expected, not exceptional, when reading
    /// the environment of or signaling another user's process.
    #[error("Permission denied for '{operation}' on PID {pid}")]
    PermissionDenied {
        /// The pid the operation targeted.
        pid: u32,
        /// The operation that was refused (e.g., "read environment",
        /// "signal").
        operation: String,
    },

    /// A required kernel data source could not be opened at all.
    ///
    /// Distinct from an empty result: the connection table being absent is
    /// `Unavailable`, the table containing no matching rows is `Ok(vec![])`.
    #[error("Data source '{resource}' unavailable: {reason}")]
    Unavailable {
        /// The data source that could not be used (path or tool name).
        resource: String,
        /// Why it could not be used.
        reason: String,
    },

    /// A record did not match its expected fixed format.
    ///
    /// Parsers skip malformed lines; this variant surfaces only when the
    /// malformed record was the single authoritative answer to a query.
    #[error("Malformed record: {message}")]
    Malformed {
        /// Description of the parse failure.
        message: String,
    },

    /// A syscall failed with an error code no other variant covers.
    #[error("System error: {message} (errno: {errno})")]
    System {
        /// What failed.
        message: String,
        /// The errno value.
        errno: i32,
    },

    /// An invariant this workspace maintains was violated; seeing one of
    /// these is a bug report.
    #[error("Internal error: {message}")]
    Internal {
        /// Which invariant broke.
        message: String,
    },
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl WhoportError {
    /// Create an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        WhoportError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a `NotFound` error.
    pub fn not_found(pid: u32) -> Self {
        WhoportError::NotFound { pid }
    }

    /// Create a `PermissionDenied` error.
    pub fn permission_denied(pid: u32, operation: impl Into<String>) -> Self {
        WhoportError::PermissionDenied {
            pid,
            operation: operation.into(),
        }
    }

    /// Create an `Unavailable` error.
    pub fn unavailable(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        WhoportError::Unavailable {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a `Malformed` error.
    pub fn malformed(message: impl Into<String>) -> Self {
        WhoportError::Malformed {
            message: message.into(),
        }
    }

    /// Create a `System` error.
    pub fn system(message: impl Into<String>, errno: i32) -> Self {
        WhoportError::System {
            message: message.into(),
            errno,
        }
    }

    /// Create an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        WhoportError::Internal {
            message: message.into(),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<io::Error> for WhoportError {
    fn from(source: io::Error) -> Self {
        // Call sites that know which pid or file was involved map NotFound
        // and PermissionDenied themselves; this blanket conversion is for
        // IO failures without that context.
        WhoportError::System {
            errno: source.raw_os_error().unwrap_or(0),
            message: source.to_string(),
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for whoport operations.
pub type WhoportResult<T> = Result<T, WhoportError>;

// ============================================================================
// Tests
// ============================================================================
