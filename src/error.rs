//! Error types for the report-bot crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized for logging - see [`Error::category`] and [`Error::is_retryable`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while checking the mailbox or producing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A required configuration file does not exist.
    #[error("configuration file not found: {}", path.display())]
    ConfigFileMissing {
        /// The missing file.
        path: PathBuf,
    },

    /// A configuration file exists but could not be read.
    #[error("failed to read configuration file {}", path.display())]
    ConfigFileRead {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON or has the wrong shape.
    #[error("malformed configuration file {}", path.display())]
    ConfigFileMalformed {
        /// The malformed file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The OAuth client-secret file needed for re-authorization is missing.
    #[error("client secret file not found: {}", path.display())]
    ClientSecretsMissing {
        /// The expected location of the client-secret file.
        path: PathBuf,
    },

    /// The OAuth client-secret file could not be interpreted.
    #[error("malformed client secret file {}: {message}", path.display())]
    ClientSecretsMalformed {
        /// The client-secret file.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// The persisted credential could not be read or written.
    #[error("credential store error at {}", path.display())]
    TokenStore {
        /// The token file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The persisted credential is not a valid token document.
    #[error("malformed credential file {}", path.display())]
    TokenParse {
        /// The token file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A refresh was requested for a credential without a refresh token.
    #[error("credential has no refresh token")]
    NoRefreshToken,

    /// The token endpoint rejected a grant (e.g. `invalid_grant` for a revoked token).
    #[error("token endpoint rejected grant: {error}: {description}")]
    TokenGrant {
        /// OAuth error code.
        error: String,
        /// Human readable description from the server.
        description: String,
    },

    /// The interactive authorization flow failed.
    #[error("authorization failed: {message}")]
    Authorization {
        /// Description of the failure.
        message: String,
    },

    /// The interactive authorization flow did not complete in time.
    #[error("authorization not completed after {timeout:?}")]
    AuthorizationTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// The loopback listener for the authorization redirect failed.
    #[error("authorization redirect listener failed")]
    RedirectListener {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / API errors
    // ─────────────────────────────────────────────────────────────────────────
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed during {operation}")]
    Http {
        /// The operation that was being performed.
        operation: String,
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request timed out.
    #[error("{operation} timed out after {timeout:?}")]
    RequestTimeout {
        /// The operation that was being performed.
        operation: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// The remote API returned an error status.
    #[error("{operation} failed with HTTP {status}: {message}")]
    Api {
        /// The operation that was being performed.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// The remote API returned a body that could not be decoded.
    #[error("unexpected response body from {operation}")]
    MalformedResponse {
        /// The operation that was being performed.
        operation: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Report errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The summarization collaborator failed.
    #[error("report generation failed: {message}")]
    Report {
        /// Description of the failure.
        message: String,
    },

    /// An outgoing message could not be built.
    #[error("invalid outgoing message: {message}")]
    InvalidMessage {
        /// Description of the failure.
        message: String,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    ///
    /// The poll loop never retries within a cycle; this is informational and
    /// surfaces in the cycle's log line.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http { .. }
            | Error::RequestTimeout { .. }
            | Error::AuthorizationTimeout { .. } => true,

            Error::Api { status, .. } => *status == 429 || *status >= 500,

            Error::InvalidConfig { .. }
            | Error::ConfigFileMissing { .. }
            | Error::ConfigFileRead { .. }
            | Error::ConfigFileMalformed { .. }
            | Error::ClientSecretsMissing { .. }
            | Error::ClientSecretsMalformed { .. }
            | Error::TokenStore { .. }
            | Error::TokenParse { .. }
            | Error::NoRefreshToken
            | Error::TokenGrant { .. }
            | Error::Authorization { .. }
            | Error::RedirectListener { .. }
            | Error::MalformedResponse { .. }
            | Error::Report { .. }
            | Error::InvalidMessage { .. } => false,
        }
    }

    /// Returns `true` if this is an authentication failure, i.e. no usable
    /// credential could be obtained.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        self.category() == ErrorCategory::Authentication
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::ConfigFileMissing { .. }
            | Error::ConfigFileRead { .. }
            | Error::ConfigFileMalformed { .. } => ErrorCategory::Configuration,

            Error::ClientSecretsMissing { .. }
            | Error::ClientSecretsMalformed { .. }
            | Error::TokenStore { .. }
            | Error::TokenParse { .. }
            | Error::NoRefreshToken
            | Error::TokenGrant { .. }
            | Error::Authorization { .. }
            | Error::AuthorizationTimeout { .. }
            | Error::RedirectListener { .. } => ErrorCategory::Authentication,

            Error::Http { .. } => ErrorCategory::Network,

            Error::RequestTimeout { .. } => ErrorCategory::Timeout,

            Error::Api { .. } => ErrorCategory::Api,

            Error::MalformedResponse { .. } => ErrorCategory::Parse,

            Error::Report { .. } | Error::InvalidMessage { .. } => ErrorCategory::Report,
        }
    }
}

/// Error categories for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// No usable credential could be obtained.
    Authentication,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// Remote API returned an error status.
    Api,
    /// Unexpected response payloads.
    Parse,
    /// Report generation errors.
    Report,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Api => write!(f, "api"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Report => write!(f, "report"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let err = Error::ConfigFileMissing {
            path: PathBuf::from("authorized_clients.json"),
        };
        assert!(!err.is_retryable());

        let err = Error::RequestTimeout {
            operation: "gmail.list".into(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.is_retryable());

        // Revoked tokens won't come back on their own
        let err = Error::TokenGrant {
            error: "invalid_grant".into(),
            description: "Token has been expired or revoked.".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_api_status_retryability() {
        let server = Error::Api {
            operation: "gmail.get".into(),
            status: 503,
            message: "backend error".into(),
        };
        assert!(server.is_retryable());

        let throttled = Error::Api {
            operation: "gmail.get".into(),
            status: 429,
            message: "rate limited".into(),
        };
        assert!(throttled.is_retryable());

        let not_found = Error::Api {
            operation: "gmail.get".into(),
            status: 404,
            message: "not found".into(),
        };
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        let err = Error::ClientSecretsMissing {
            path: PathBuf::from("credentials.json"),
        };
        assert_eq!(err.category(), ErrorCategory::Authentication);
        assert!(err.is_authentication_failure());

        let err = Error::ConfigFileMissing {
            path: PathBuf::from("authorized_clients.json"),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.is_authentication_failure());

        let err = Error::Report {
            message: "summarizer unavailable".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Report);
        assert_eq!(err.category().to_string(), "report");
    }
}
