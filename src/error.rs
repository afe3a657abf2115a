//! Error types for the credential broker

use std::io;

use broker_core::{DurationError, ParseClassError};
use thiserror::Error;

use crate::oidc::OidcError;

/// Result type alias for the credential broker
pub type Result<T> = std::result::Result<T, Error>;

/// Credential broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied an invalid value (duration, role ARN, class, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Identity token or login could not be verified
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The identity is not allowed to do what it asked
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// No identity session exists for the stage and class
    #[error("No identity session for {stage}/{class}; run `login` first")]
    LoginRequired {
        /// Stage tag
        stage: String,
        /// Environment class wire name
        class: String,
    },

    /// The identity session expired beyond its refresh window
    #[error("Identity session for {stage}/{class} expired; run `login` again")]
    SessionExpired {
        /// Stage tag
        stage: String,
        /// Environment class wire name
        class: String,
    },

    /// Secure store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Remote service answered with a failure status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code returned by the remote service
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// Request could not be sent or its response could not be read
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error means a fresh interactive login would fix it.
    #[must_use]
    pub fn needs_login(&self) -> bool {
        matches!(self, Self::LoginRequired { .. } | Self::SessionExpired { .. })
    }
}

impl From<OidcError> for Error {
    fn from(e: OidcError) -> Self {
        Self::Authentication(e.to_string())
    }
}

impl From<DurationError> for Error {
    fn from(e: DurationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<ParseClassError> for Error {
    fn from(e: ParseClassError) -> Self {
        Self::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn login_errors_need_login() {
        let required = Error::LoginRequired {
            stage: "prod".into(),
            class: "nonpci".into(),
        };
        let expired = Error::SessionExpired {
            stage: "prod".into(),
            class: "pci".into(),
        };
        assert!(required.needs_login());
        assert!(expired.needs_login());
        assert!(!Error::Validation("x".into()).needs_login());
    }

    #[test]
    fn duration_error_maps_to_validation() {
        let err: Error = DurationError::TooLong {
            max: Duration::from_secs(12 * 3600),
            requested: Duration::from_secs(13 * 3600),
        }
        .into();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("(12h)"));
    }
}
