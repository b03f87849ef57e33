//! # Error taxonomy
//!
//! Every fallible operation in the crate surfaces a [`StoryError`]. The four
//! variants map directly onto how callers should react:
//!
//! - [`StoryError::Validation`]: the request itself is malformed (missing
//!   field, empty feedback). Nothing was attempted.
//! - [`StoryError::Precondition`]: the request is well-formed but the
//!   conversation state does not allow it yet (outline not confirmed, no
//!   content to rewrite). Fix the state and retry.
//! - [`StoryError::Provider`]: the LLM call failed. Carries the provider's
//!   name and whether the failure was reported by the provider's API or was
//!   a transport-level problem. Never retried by this crate.
//! - [`StoryError::Internal`]: persistence failures and anything else
//!   unexpected. Logged with full detail server-side; callers only see the
//!   message string.
//!
//! Validation and precondition errors are raised before any side effect.
//! Provider errors are raised after the call but before persistence, so no
//! partial writes occur on those paths either.

use thiserror::Error;

/// Distinguishes an error reported by the provider's API from a failure to
/// reach the provider at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailure {
    /// The provider answered with a non-success result (bad credentials,
    /// rate limit, unknown model).
    Api,
    /// The provider could not be reached or the response was unusable
    /// (connection refused, timeout, malformed body).
    Network,
}

/// Unified error type for the story-writing core.
#[derive(Debug, Error)]
pub enum StoryError {
    /// Caller-supplied input failed a required-field or shape check.
    #[error("{message}")]
    Validation {
        message: String,
        /// Name of the offending field, when one can be singled out.
        field: Option<&'static str>,
    },

    /// A domain-state gate failed; the caller may fix state and retry.
    #[error("{message}")]
    Precondition { message: String },

    /// The external LLM capability reported a non-success result.
    #[error("provider '{provider}' request failed: {message}")]
    Provider {
        provider: String,
        kind: ProviderFailure,
        message: String,
    },

    /// Persistence failure or programming error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: &'static str) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// HTTP-style status code for callers that expose one.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Precondition { .. } => 404,
            Self::Provider { kind, .. } => match kind {
                ProviderFailure::Api => 502,
                ProviderFailure::Network => 503,
            },
            Self::Internal(_) => 500,
        }
    }
}

impl From<diesel::result::Error> for StoryError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

impl From<diesel::result::ConnectionError> for StoryError {
    fn from(err: diesel::result::ConnectionError) -> Self {
        Self::Internal(format!("database connection error: {err}"))
    }
}

impl From<serde_json::Error> for StoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}
