//! Error types for console operations.
//!
//! Errors are categorized so callers can tell transient transport problems
//! (worth retrying) apart from API rejections and missing resources.

use crate::types::Kind;
use thiserror::Error;

/// Categories of client errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (transient, retryable)
    Network,
    /// The addressed resource does not exist
    NotFound,
    /// More than one resource matched a selector that must be unique
    Ambiguous,
    /// The console rejected the request
    Api,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Console connectivity issue",
            Self::NotFound => "Resource not found",
            Self::Ambiguous => "Ambiguous resource selector",
            Self::Api => "Request rejected by the console",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors raised by a [`ResourceClient`](crate::ResourceClient).
#[derive(Debug, Error)]
pub enum Error {
    /// Nothing matched the selector.
    #[error("{kind} not found: {selector}")]
    NotFound {
        /// Kind of resource that was looked up
        kind: Kind,
        /// Rendered selector
        selector: String,
    },

    /// A selector that must identify one resource matched several.
    #[error("{count} {kind} resources match {selector}")]
    NoUniqueMatch {
        /// Kind of resource that was looked up
        kind: Kind,
        /// Rendered selector
        selector: String,
        /// Number of matches
        count: usize,
    },

    /// The console answered with an error status.
    #[error("HTTP {status},{reason}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Console reason code
        reason: u16,
        /// Message returned by the console
        message: String,
    },

    /// Connection-level failure.
    #[error("network error: {message}")]
    Network {
        /// Detailed error message
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an API error.
    pub fn api(status: u16, reason: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            reason,
            message: message.into(),
        }
    }

    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::NoUniqueMatch { .. } => ErrorCategory::Ambiguous,
            Self::Api { status: 404, .. } => ErrorCategory::NotFound,
            Self::Api { status: 503, .. } => ErrorCategory::Network,
            Self::Api { .. } => ErrorCategory::Api,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error means the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

/// Result type for console operations.
pub type Result<T> = std::result::Result<T, Error>;
