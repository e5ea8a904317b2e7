//! Error types for secrets backend operations.

use thiserror::Error;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors returned by the OpenBao client.
///
/// Callers branch on [`BackendError::is_not_found`] (e.g. to create a
/// missing transit key) and [`BackendError::is_auth_failure`] (to report
/// permission errors rather than internal ones).
#[derive(Error, Debug)]
pub enum BackendError {
    /// Nothing exists at the requested path.
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// No usable credential, or the backend rejected the login.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The request never reached the backend.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The backend answered with a non-success status.
    #[error("Backend returned status {status}: {message}")]
    Api { status: u16, message: String },

    /// The backend answered but the payload is not what the call expects.
    #[error("Invalid backend response: {message}")]
    InvalidResponse { message: String },

    /// Client-side configuration problem (TLS material, address, ...).
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api { status, message: message.into() }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// True when the backend reported that the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for login failures and permission-denied responses.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. } | Self::Api { status: 401 | 403, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = BackendError::not_found("transit/keys/app");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: transit/keys/app");

        let err = BackendError::authentication_failed("no token");
        assert!(err.is_auth_failure());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_permission_denied_is_auth_failure() {
        assert!(BackendError::api(403, "permission denied").is_auth_failure());
        assert!(!BackendError::api(500, "internal").is_auth_failure());
    }
}
