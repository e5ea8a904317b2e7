//! # Observability
//!
//! Logging setup, Prometheus metrics and the operator's health endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

pub use self::health::{serve_health, HealthChecker};
pub use self::logging::{init_logging, LogFormat};
pub use self::metrics::init_metrics;
