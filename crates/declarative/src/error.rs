//! Error taxonomy of the reconciliation engine.
//!
//! Every variant renders as one line carrying enough context (property,
//! values, resource, operation) to act on it without further lookups.

use hmckit::Kind;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable tag identifying the class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Property not defined or not writable
    InvalidProperty,
    /// Property cannot be changed after creation
    ImmutableProperty,
    /// A by-name reference does not resolve
    ReferenceNotFound,
    /// Malformed or incomplete parameters
    Parameter,
    /// Operational status prevents the request
    Status,
    /// Reconfiguration collides with another resource
    Conflict,
    /// A status wait ran out of time
    Timeout,
    /// Error returned by the resource client
    Client,
}

impl ErrorKind {
    /// Tag as a kebab-case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidProperty => "invalid-property",
            Self::ImmutableProperty => "immutable-property",
            Self::ReferenceNotFound => "reference-not-found",
            Self::Parameter => "parameter",
            Self::Status => "status",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Desired state names a property that is unknown or not writable.
    #[error("property {name:?} is {reason} for {kind} resources")]
    InvalidProperty {
        /// Resource kind
        kind: Kind,
        /// Rejected property name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Desired state changes a property that is fixed after creation.
    #[error("property {name:?} of {resource} can be set during creation but cannot be updated afterwards (from {old} to {new})")]
    ImmutableProperty {
        /// Resource display name
        resource: String,
        /// Property name
        name: String,
        /// Current value
        old: Value,
        /// Requested value
        new: Value,
    },

    /// A by-name reference did not resolve.
    #[error("{field}: {kind} {name:?} not found{}", .scope.as_ref().map(|s| format!(" in {s}")).unwrap_or_default())]
    ReferenceNotFound {
        /// Desired-state field holding the reference
        field: String,
        /// Kind that was looked up
        kind: Kind,
        /// Name that was looked up
        name: String,
        /// Where it was looked up
        scope: Option<String>,
    },

    /// Parameters are malformed or incomplete.
    #[error("{message}")]
    Parameter {
        /// Description of the problem
        message: String,
    },

    /// Operational status prevents the requested transition.
    #[error("{resource} has status {status:?}{}: {message}", .operation.map(|o| format!(" after {o}")).unwrap_or_default())]
    Status {
        /// Resource display name
        resource: String,
        /// Observed status
        status: String,
        /// Operation that was attempted, if any
        operation: Option<&'static str>,
        /// What went wrong
        message: String,
    },

    /// Reconfiguration cannot be done without touching another resource.
    #[error("{message} (held by {holder} in access mode {access_mode})")]
    Conflict {
        /// Resource holding the conflicting configuration
        holder: String,
        /// Access mode held by it
        access_mode: String,
        /// Description of the conflict
        message: String,
    },

    /// Waiting for a status ran out of time.
    #[error("{resource} did not reach any of {expected:?} within {}s (last status {last_status:?})", .waited.as_secs())]
    Timeout {
        /// Resource display name
        resource: String,
        /// Statuses waited for
        expected: Vec<String>,
        /// Last status seen
        last_status: String,
        /// Time waited
        waited: Duration,
    },

    /// Error from the resource client, passed through unmodified.
    #[error(transparent)]
    Client(#[from] hmckit::Error),
}

impl Error {
    /// Build a parameter error.
    pub fn parameter(message: impl Into<String>) -> Self {
        Self::Parameter {
            message: message.into(),
        }
    }

    /// Stable tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProperty { .. } => ErrorKind::InvalidProperty,
            Self::ImmutableProperty { .. } => ErrorKind::ImmutableProperty,
            Self::ReferenceNotFound { .. } => ErrorKind::ReferenceNotFound,
            Self::Parameter { .. } => ErrorKind::Parameter,
            Self::Status { .. } => ErrorKind::Status,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Client(_) => ErrorKind::Client,
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, Error>;
