//! # Reconciliation Controllers
//!
//! BaoSecret and BaoPolicy reconcilers driven by `kube::runtime::Controller`.
//! Both follow the same shell: finalizer first, then the sync, then a status
//! write and a requeue. Cluster access goes through [`KubeClient`] and
//! backend access through [`BackendClient`], so the reconcile functions can
//! be exercised without a cluster.

pub mod hash;
pub mod kube_client;
pub mod policy_sync;
pub mod run;
pub mod secret_sync;
pub mod template;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendClient, BackendError};
use crate::crd::condition::{REASON_AUTHENTICATION_FAILED, REASON_FAILED, REASON_SECRET_NOT_FOUND};

pub use kube_client::{KubeClient, KubeClientImpl};
pub use run::run_controllers;

/// Retry delay after a failed sync.
pub const FAILURE_REQUEUE: Duration = Duration::from_secs(30);
/// Resync period for policies, to repair out-of-band edits.
pub const POLICY_REQUEUE: Duration = Duration::from_secs(5 * 60);

pub const MANAGED_BY_LABEL: &str = "kubebao.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "kubebao-operator";
pub const SOURCE_LABEL: &str = "kubebao.io/baosecret";
pub const SOURCE_PATH_ANNOTATION: &str = "kubebao.io/source-path";
pub const VERSION_ANNOTATION: &str = "kubebao.io/version";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to read secret from OpenBao: {0}")]
    BackendRead(#[source] BackendError),

    #[error("failed to write policy to OpenBao: {0}")]
    PolicyWrite(#[source] BackendError),

    #[error("key {0} not found in secret")]
    KeyNotFound(String),

    #[error("failed to create/update secret: {0}")]
    TargetSecret(#[source] kube::Error),

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid resource: {0}")]
    InvalidResource(String),
}

impl ReconcileError {
    /// Condition reason describing this failure.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::BackendRead(e) | ReconcileError::PolicyWrite(e) if e.is_auth_failure() => {
                REASON_AUTHENTICATION_FAILED
            }
            ReconcileError::BackendRead(e) if e.is_not_found() => REASON_SECRET_NOT_FOUND,
            _ => REASON_FAILED,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.reason() == REASON_AUTHENTICATION_FAILED
    }
}

/// Shared state handed to every reconcile call.
pub struct Context {
    pub kube: Arc<dyn KubeClient>,
    pub backend: Arc<dyn BackendClient>,
}

impl Context {
    pub fn new(kube: Arc<dyn KubeClient>, backend: Arc<dyn BackendClient>) -> Self {
        Self { kube, backend }
    }
}

/// `finalizers` with `finalizer` added, or `None` when already present.
pub(crate) fn with_finalizer(finalizers: Option<&Vec<String>>, finalizer: &str) -> Option<Vec<String>> {
    let mut list = finalizers.cloned().unwrap_or_default();
    if list.iter().any(|f| f == finalizer) {
        return None;
    }
    list.push(finalizer.to_string());
    Some(list)
}

/// `finalizers` with `finalizer` removed, or `None` when it was not there.
pub(crate) fn without_finalizer(finalizers: Option<&Vec<String>>, finalizer: &str) -> Option<Vec<String>> {
    let list = finalizers.cloned().unwrap_or_default();
    if !list.iter().any(|f| f == finalizer) {
        return None;
    }
    Some(list.into_iter().filter(|f| f != finalizer).collect())
}
