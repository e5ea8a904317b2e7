//! # Structured Logging
//!
//! Subscriber setup shared by the three binaries, plus span macros for RPC
//! handlers and reconcilers. Secret material, tokens and plaintext never go
//! into span or event fields.

use std::str::FromStr;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{Error, Result};

/// Create an info span for one gRPC call with a fresh `operation_id`.
///
/// ```rust,ignore
/// let span = rpc_span!("kms", "Encrypt", uid = %request.uid);
/// ```
#[macro_export]
macro_rules! rpc_span {
    ($service:expr, $method:expr) => {
        tracing::info_span!(
            "rpc",
            service = %$service,
            method = %$method,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($service:expr, $method:expr, $($field:tt)*) => {
        tracing::info_span!(
            "rpc",
            service = %$service,
            method = %$method,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create an info span for one reconcile of `namespace/name`.
#[macro_export]
macro_rules! reconcile_span {
    ($kind:expr, $namespace:expr, $name:expr) => {
        tracing::info_span!(
            "reconcile",
            kind = %$kind,
            object = %format!("{}/{}", $namespace, $name),
            operation_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "console" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::config(format!("unknown log format '{}'", other))),
        }
    }
}

/// Build the env filter: `RUST_LOG` when set, otherwise `level`.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| Error::config(format!("invalid log level '{}': {}", level, e))),
    }
}

/// Install the global subscriber.
pub fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    result.map_err(|e| Error::internal(format!("failed to install tracing subscriber: {}", e)))
}
