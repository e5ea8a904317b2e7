//! Unix-socket listener setup and process shutdown signal shared by the
//! KMS plugin and the CSI provider.

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};

/// Permissions on a socket directory created by [`bind_unix_socket`].
pub const SOCKET_DIR_MODE: u32 = 0o755;
/// Owner and group only; the API server / CSI driver connect as a peer in
/// the same group.
pub const SOCKET_MODE: u32 = 0o660;

/// Create the parent directory, remove a stale socket from a previous run,
/// bind and restrict permissions.
pub fn bind_unix_socket(path: impl AsRef<Path>) -> Result<UnixListener> {
    let path = path.as_ref();

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::DirBuilder::new().recursive(true).mode(SOCKET_DIR_MODE).create(dir).map_err(
            |e| {
                Error::transport(format!(
                    "failed to create socket directory {}: {}",
                    dir.display(),
                    e
                ))
            },
        )?;
    }

    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::transport(format!(
                "failed to remove existing socket {}: {}",
                path.display(),
                e
            )))
        }
    }

    let listener = UnixListener::bind(path).map_err(|e| {
        Error::transport(format!("failed to listen on {}: {}", path.display(), e))
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!(path = %path.display(), "Listening on unix socket");
    Ok(listener)
}

/// Remove the socket file after the server has drained.
pub fn remove_socket(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove socket");
        }
    }
}

/// Install ring as the process-wide rustls provider. Both the backend client
/// and the Kubernetes client build TLS configs from it.
pub fn install_crypto_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        // Err only means another thread installed one first.
        let _ = ring::default_provider().install_default();
    }
}

/// Resolves on Ctrl-C or SIGTERM, whichever arrives first.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C listener failed");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM listener failed");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
