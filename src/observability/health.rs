//! # Health Endpoints
//!
//! `/healthz` and `/readyz` endpoints for the operator. Liveness only says
//! the process is serving; readiness additionally asks the backend for
//! `sys/health` and fails while it is unreachable or sealed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::backend::BackendClient;
use crate::errors::{Error, Result};

/// Shared state behind the health routes.
#[derive(Clone)]
pub struct HealthChecker {
    backend: Option<Arc<dyn BackendClient>>,
}

impl HealthChecker {
    pub fn new(backend: Option<Arc<dyn BackendClient>>) -> Self {
        Self { backend }
    }

    /// Readiness: the backend (when configured) must be initialized and unsealed.
    pub async fn readiness(&self) -> (bool, Value) {
        let Some(backend) = &self.backend else {
            return (true, json!({"status": "ok"}));
        };

        match backend.health().await {
            Ok(status) if status.is_ready() => {
                (true, json!({"status": "ok", "backend": {"version": status.version}}))
            }
            Ok(status) => (
                false,
                json!({
                    "status": "unavailable",
                    "backend": {"initialized": status.initialized, "sealed": status.sealed}
                }),
            ),
            Err(e) => (false, json!({"status": "unavailable", "error": e.to_string()})),
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .with_state(self)
    }
}

async fn healthz() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn readyz(State(checker): State<HealthChecker>) -> (StatusCode, Json<Value>) {
    let (ready, body) = checker.readiness().await;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

/// Serve the health endpoints until `shutdown` resolves.
pub async fn serve_health<F>(bind_address: &str, checker: HealthChecker, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        Error::config(format!("Invalid health bind address '{}': {}", bind_address, e))
    })?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind health server: {}", e)))?;

    info!(address = %addr, "Starting health server");
    axum::serve(listener, checker.router())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            warn!(error = %e, "Health server stopped with error");
            Error::transport(format!("Health server error: {}", e))
        })
}
