//! Error taxonomy for the generation pipeline.
//!
//! Every fallible core operation returns [`Error`]. The variants map onto
//! four behaviours the orchestrator cares about:
//!
//! | Class | Variants | Orchestrator reaction |
//! |-------|----------|-----------------------|
//! | caller error | `InvalidInput`, `InvalidConfig`, `NotFound`, `Conflict` | surfaced immediately |
//! | transient | `IndexUnavailable`, `Embedding`, `Transient`, `MalformedResponse`, `EmptyResult`, `Timeout` | retried with backoff |
//! | permanent | `Permanent` | job fails, no retry |
//! | storage | `Storage` | job fails, no retry |

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The entity exists but is in a state that forbids the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Rate limiting, backend timeouts, 5xx-equivalents.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Authentication failures, rejected requests.
    #[error("permanent backend error: {0}")]
    Permanent(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model response contained no valid test cases")]
    EmptyResult,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Whether a retry of the same attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::IndexUnavailable(_)
                | Error::Embedding(_)
                | Error::Transient(_)
                | Error::MalformedResponse(_)
                | Error::EmptyResult
                | Error::Timeout(_)
        )
    }

    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::InvalidConfig(_) => "invalid_config",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::IndexUnavailable(_) => "index_unavailable",
            Error::Embedding(_) => "embedding_error",
            Error::Transient(_) => "transient",
            Error::Permanent(_) => "permanent",
            Error::MalformedResponse(_) => "malformed_response",
            Error::EmptyResult => "empty_result",
            Error::Timeout(_) => "timeout",
            Error::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("429".into()).is_transient());
        assert!(Error::MalformedResponse("no array".into()).is_transient());
        assert!(Error::EmptyResult.is_transient());
        assert!(Error::IndexUnavailable("down".into()).is_transient());
        assert!(!Error::Permanent("401".into()).is_transient());
        assert!(!Error::InvalidConfig("count".into()).is_transient());
        assert!(!Error::Storage("disk".into()).is_transient());
    }

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            Error::InvalidInput(String::new()),
            Error::InvalidConfig(String::new()),
            Error::NotFound(String::new()),
            Error::Conflict(String::new()),
            Error::IndexUnavailable(String::new()),
            Error::Embedding(String::new()),
            Error::Transient(String::new()),
            Error::Permanent(String::new()),
            Error::MalformedResponse(String::new()),
            Error::EmptyResult,
            Error::Timeout(String::new()),
            Error::Storage(String::new()),
        ];
        let codes: std::collections::HashSet<_> = all.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), all.len());
    }
}
