//! Error types for the Converge reconciliation engine.
//!
//! This module provides a comprehensive error hierarchy for all phases of
//! the reconciliation lifecycle: manifest loading, diffing, planning,
//! remote mutation, and convergence verification.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Converge reconciliation engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Manifest loading and validation errors.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Diff computation errors.
    #[error("Diff error: {0}")]
    Diff(#[from] DiffError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Remote system errors.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Convergence verification errors.
    #[error("Verification error: {0}")]
    Verify(#[from] VerifyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Manifest loading and validation errors.
///
/// These are terminal: a run never starts from a manifest that fails to
/// load or validate.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference expression: {expression}")]
    InvalidReference {
        /// The malformed `${{type.name.attribute}}` expression.
        expression: String,
    },

    /// A reference points at a resource that is not declared.
    #[error("Unknown reference: {from} refers to undeclared resource {to}")]
    UnknownReference {
        /// Identifier of the referencing resource.
        from: String,
        /// Identifier of the missing referenced resource.
        to: String,
    },

    /// A provider named in the manifest is not registered.
    #[error("Unknown provider: {provider}")]
    UnknownProvider {
        /// The unresolved provider name.
        provider: String,
    },
}

/// Diff computation errors.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The same attribute was declared with two different values.
    ///
    /// Ambiguous desired state is terminal and reported before planning.
    #[error(
        "Conflicting declarations for {resource}.{attribute}: {first} vs {second}"
    )]
    Conflict {
        /// Identifier of the resource with the ambiguous attribute.
        resource: String,
        /// Name of the conflicting attribute.
        attribute: String,
        /// First declared value.
        first: String,
        /// Second, disagreeing declared value.
        second: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The dependency graph contains a cycle.
    ///
    /// Terminal and non-retryable; reported before any mutation is issued.
    #[error("Dependency cycle detected: {cycle}")]
    Cycle {
        /// The cycle rendered as `a -> b -> a`.
        cycle: String,
    },

    /// A create or update was planned for a resource with no spec.
    #[error("No spec available to plan changes for {resource}")]
    MissingSpec {
        /// Identifier of the resource lacking a spec.
        resource: String,
    },
}

/// Remote system errors, as classified by a [`RemoteStateFetcher`].
///
/// The fetcher contract requires errors to arrive pre-classified so the
/// executor can apply retry policy without inspecting message text.
///
/// [`RemoteStateFetcher`]: crate::remote::RemoteStateFetcher
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The resource does not exist remotely.
    ///
    /// A structured kind, never inferred from message contents. During
    /// delete verification this is the success signal.
    #[error("Resource not found: {id}")]
    NotFound {
        /// Identifier of the missing resource.
        id: String,
    },

    /// A failure expected to succeed on retry (rate limit, network fault).
    #[error("Transient remote error: {message}")]
    Transient {
        /// Description of the transient failure.
        message: String,
        /// Server-suggested wait before retrying, if any.
        retry_after_secs: Option<u64>,
    },

    /// A failure that will not succeed on retry (invalid parameter,
    /// quota exceeded, permission denied).
    #[error("Fatal remote error: {message}")]
    Fatal {
        /// Description of the fatal failure.
        message: String,
    },
}

/// Convergence verification errors.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Observed state did not converge within the allowed wait.
    ///
    /// Treated as fatal for the affected action; never retried.
    #[error("Timed out after {waited_secs}s waiting for {id} to converge")]
    Timeout {
        /// Identifier of the resource that failed to converge.
        id: String,
        /// Total seconds waited before giving up.
        waited_secs: u64,
        /// Number of polls performed.
        polls: u32,
    },

    /// Observed state reached a condition that can never converge.
    #[error("Verification failed for {id}: {reason}")]
    Failed {
        /// Identifier of the resource.
        id: String,
        /// Why convergence is impossible (e.g. resource vanished).
        reason: String,
    },

    /// The run was cancelled while this resource was still polling.
    #[error("Verification of {id} interrupted by cancellation")]
    Interrupted {
        /// Identifier of the resource still in flight.
        id: String,
    },
}

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient and worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Transient { .. }))
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Remote(RemoteError::Transient {
                retry_after_secs: Some(secs),
                ..
            }) => Some(*secs),
            Self::Remote(RemoteError::Transient { .. }) => Some(1),
            _ => None,
        }
    }
}

impl ManifestError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl RemoteError {
    /// Creates a not-found error for the given resource identifier.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a transient error with no server-suggested delay.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns true if this error is transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if this error is the structured not-found kind.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl VerifyError {
    /// Creates a verification failure for the given resource.
    #[must_use]
    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
