use std::sync::Arc;

use thiserror::Error;

use crate::condition::ConditionError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the rule loader and the decisioning pipeline.
///
/// Errors raised while evaluating a request are never returned to the caller. They are logged,
/// passed to the configured [`ExceptionHandler`](crate::ExceptionHandler) and the affected rule
/// is treated as a non-match.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid artifact base URL configuration.
    #[error("invalid artifact_base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Local decisioning is not configured (no local environment) or was disabled after the
    /// rule loader exhausted its bootstrap retries.
    #[error("local decisioning is disabled")]
    LocalDecisioningDisabled,

    /// The artifact location answered with a status other than 200 or 304.
    #[error("received invalid HTTP response while getting local-decisioning rule set: {status} : {reason}")]
    InvalidArtifactStatus {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase, if known.
        reason: String,
    },

    /// The artifact parsed but declares a version this crate cannot evaluate.
    #[error("unknown rules version: {0}")]
    UnsupportedArtifactVersion(String),

    /// The artifact body could not be parsed.
    #[error("unable to parse local-decisioning rule set")]
    ArtifactParse(#[source] Arc<serde_json::Error>),

    /// A rule set with no rule maps.
    #[error("local-decisioning rule set has no rules")]
    MissingRules,

    /// A rule condition failed to compile or evaluate.
    #[error("hit exception while evaluating local-decisioning rule")]
    RuleEvaluation(#[source] ConditionError),

    /// A matching rule's consequence did not have the expected shape.
    #[error("unable to convert local-decisioning rule consequence")]
    ConsequenceConversion(#[source] Arc<serde_json::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Indicates that the loader thread panicked. This should normally never happen.
    #[error("rule loader thread panicked")]
    LoaderThreadPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<ConditionError> for Error {
    fn from(value: ConditionError) -> Self {
        Error::RuleEvaluation(value)
    }
}
