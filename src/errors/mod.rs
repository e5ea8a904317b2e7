//! # Error Handling
//!
//! Process-level error type shared by the three KubeBao servers. Library
//! layers keep their own error enums ([`crate::backend::BackendError`],
//! [`crate::controller::ReconcileError`]) and convert into this one at the
//! process boundary.

use crate::backend::BackendError;

/// Custom result type for KubeBao operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for KubeBao processes
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// gRPC / socket transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Secrets backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Kubernetes API errors
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error should stop the process from serving
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Transport(_) | Error::Io(_))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Config(format!("Configuration loading failed: {}", error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let detail = errs
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}: {}", field, detail)
            })
            .collect::<Vec<_>>()
            .join("; ");
        Self::Config(message)
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(error: tonic::transport::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
