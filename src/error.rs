//! Error types and handling for the Konker Rust SDK.

use std::fmt;
use thiserror::Error;

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Konker SDK
#[derive(Debug)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Additional context about the error
    pub context: Option<String>,
    /// The underlying source error, if any
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Different kinds of errors that can occur
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// The requested identity is not present in the credential store
    #[error("Credential not found for \"{identity}\"")]
    CredentialNotFound {
        /// Identity key that was looked up
        identity: String,
    },

    /// The credential store file does not exist
    #[error("Credential store unavailable at {path}")]
    CredentialStoreUnavailable {
        /// Path the store was expected at
        path: String,
    },

    /// Username or password missing
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The token endpoint rejected the credentials or could not be reached
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Reason reported by the token exchange
        message: String,
    },

    /// An authenticated call was made before `login`
    #[error("Not connected. Login first")]
    NotConnected,

    /// The platform answered with a non-200 envelope code
    #[error("Remote error (code {code})")]
    Remote {
        /// Envelope code
        code: i64,
        /// Raw response body
        body: serde_json::Value,
    },

    /// Network-related errors
    #[error("Network error")]
    Network {
        /// HTTP status code, if available
        status_code: Option<u16>,
        /// Response body, if available
        response_body: Option<String>,
    },

    /// Request timeout errors
    #[error("Request timeout")]
    Timeout {
        /// Timeout duration in seconds, when known
        timeout_seconds: Option<u64>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error")]
    Serialization {
        /// Serialization error message
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Internal SDK errors
    #[error("Internal error")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl Error {
    /// Create a new error with the given kind
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Create a new error with context
    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Create a new error with a source error
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn credential_not_found<S: Into<String>>(identity: S) -> Self {
        Self::new(ErrorKind::CredentialNotFound {
            identity: identity.into(),
        })
    }

    pub fn credential_store_unavailable<S: Into<String>>(path: S) -> Self {
        Self::new(ErrorKind::CredentialStoreUnavailable { path: path.into() })
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ErrorKind::InvalidCredentials)
    }

    /// Create an authentication error
    pub fn authentication_failed<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::AuthenticationFailed {
            message: message.into(),
        })
    }

    pub fn not_connected() -> Self {
        Self::new(ErrorKind::NotConnected)
    }

    /// Create a remote (envelope) error
    pub fn remote(code: i64, body: serde_json::Value) -> Self {
        Self::new(ErrorKind::Remote { code, body })
    }

    /// Create a network error
    pub fn network(status_code: Option<u16>, response_body: Option<String>) -> Self {
        Self::new(ErrorKind::Network {
            status_code,
            response_body,
        })
    }

    /// Create a timeout error
    pub fn timeout(timeout_seconds: Option<u64>) -> Self {
        Self::new(ErrorKind::Timeout { timeout_seconds })
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Serialization {
            message: message.into(),
        })
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Configuration {
            message: message.into(),
        })
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }

    /// True when the call failed its session precondition
    pub fn is_not_connected(&self) -> bool {
        matches!(self.kind, ErrorKind::NotConnected)
    }

    /// True for a non-200 envelope
    pub fn is_remote(&self) -> bool {
        matches!(self.kind, ErrorKind::Remote { .. })
    }

    /// True when the request never produced a usable response
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Network { .. } | ErrorKind::Timeout { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "{}: {}", context, self.kind)?;
        } else {
            write!(f, "{}", self.kind)?;
        }

        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// Conversion from common error types
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(None).with_source(err)
        } else if err.is_decode() {
            Self::serialization(err.to_string()).with_source(err)
        } else if let Some(status) = err.status() {
            Self::network(Some(status.as_u16()), None).with_source(err)
        } else {
            Self::network(None, None).with_source(err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string()).with_source(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::configuration(format!("Invalid URL: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string()).with_source(err)
    }
}

#[cfg(feature = "csv")]
impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Self::serialization(err.to_string()).with_source(err)
    }
}
