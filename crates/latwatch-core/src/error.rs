//! Error types shared across the pipeline.
//!
//! Source failures and oracle call failures are recoverable: the poll loop
//! logs them and carries on with the next interval. A failed full reset is
//! the only fatal condition.

use thiserror::Error;

/// Errors raised while reading configuration from the environment
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from a sample source. Always treated as "no data this round".
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode: {0}")]
    Decode(String),
}

/// Errors from a score oracle
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("index {0} is already live")]
    DuplicateIndex(u64),
    #[error("index {0} is not live")]
    UnknownIndex(u64),
    #[error("window has {found} dimensions, forest holds {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("ensemble needs at least one member")]
    EmptyEnsemble,
    #[error("oracle failure: {0}")]
    Other(String),
}

/// Errors surfaced by [`crate::pipeline::StreamingPipeline`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// A single insert or score call failed; the next window proceeds normally.
    #[error("oracle call failed for index {index}: {source}")]
    Oracle {
        index: u64,
        #[source]
        source: OracleError,
    },
    /// The ensemble could not be rebuilt. Index bookkeeping is no longer safe.
    #[error("full reset failed: {0}")]
    ResetFailed(#[source] OracleError),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ResetFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_reset_failure_is_fatal() {
        let recoverable = PipelineError::Oracle {
            index: 3,
            source: OracleError::UnknownIndex(3),
        };
        assert!(!recoverable.is_fatal());
        assert!(PipelineError::ResetFailed(OracleError::EmptyEnsemble).is_fatal());
    }

    #[test]
    fn test_config_error_message_names_variable() {
        let err = ConfigError::invalid("LATWATCH_TREE_SIZE", "0", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid value \"0\" for LATWATCH_TREE_SIZE: must be at least 1"
        );
    }
}
