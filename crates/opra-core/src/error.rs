use std::fmt;
use thiserror::Error;

/// Classification of a [`HarnessError`], used by the engine to decide
/// whether a failure aborts the run, fails an iteration, or earns a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingConfig,
    Templating,
    Query,
    Transport,
    Assertion,
    Reporter,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MissingConfig => "MissingConfig",
            ErrorKind::Templating => "TemplatingError",
            ErrorKind::Query => "QueryError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::Assertion => "AssertionFailure",
            ErrorKind::Reporter => "ReporterError",
        };
        f.write_str(name)
    }
}

/// Errors raised by the test-execution engine.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A configuration key was requested but is absent or unknown.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A payload template or generated document could not be read, parsed or written.
    #[error("templating error: {0}")]
    Templating(String),

    /// A data-source query or runner-list load failed.
    #[error("query error: {0}")]
    Query(String),

    /// The HTTP exchange failed before a response was captured.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response check did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// The reporter was used out of order or a report could not be written.
    #[error("reporter error: {0}")]
    Reporter(String),
}

impl HarnessError {
    /// Returns the kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::MissingConfig(_) => ErrorKind::MissingConfig,
            HarnessError::Templating(_) => ErrorKind::Templating,
            HarnessError::Query(_) => ErrorKind::Query,
            HarnessError::Transport(_) => ErrorKind::Transport,
            HarnessError::Assertion(_) => ErrorKind::Assertion,
            HarnessError::Reporter(_) => ErrorKind::Reporter,
        }
    }

    /// Fatal errors stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MissingConfig | ErrorKind::Reporter
        )
    }

    /// Retryable errors make the failed iteration eligible for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Assertion)
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        HarnessError::Transport(err.to_string())
    }
}

impl From<rusqlite::Error> for HarnessError {
    fn from(err: rusqlite::Error) -> Self {
        HarnessError::Query(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_and_retryable_partition() {
        let fatal = HarnessError::MissingConfig("env".into());
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());

        let transient = HarnessError::Transport("connection reset".into());
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());

        let templating = HarnessError::Templating("bad json".into());
        assert!(!templating.is_fatal());
        assert!(!templating.is_retryable());
    }

    #[test]
    fn test_kind_display_names() {
        assert_eq!(ErrorKind::Assertion.to_string(), "AssertionFailure");
        assert_eq!(
            HarnessError::Query("x".into()).kind().to_string(),
            "QueryError"
        );
    }
}
