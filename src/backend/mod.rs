//! # Secrets Backend
//!
//! Client for the OpenBao (Vault-compatible) HTTP API shared by the KMS
//! plugin, the CSI provider and the operator.
//!
//! - [`BackendClient`]: the operations callers depend on, so tests and
//!   alternative backends can stand in for [`OpenBaoClient`]
//! - [`AuthMethod`]: static token, Kubernetes or JWT login
//! - [`BackendConfig`]: file/env configuration

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod openbao;

pub use auth::{AuthMethod, JwtSource, LoginCredentials, REFRESH_THRESHOLD};
pub use client::{AuthInfo, BackendClient, Data, HealthStatus, KeyInfo, KvSecret, LogicalResponse};
pub use config::{
    BackendConfig, KubernetesAuthConfig, TlsConfig, DEFAULT_KUBERNETES_MOUNT, SERVICE_ACCOUNT_TOKEN_PATH,
};
pub use error::{BackendError, Result};
pub use openbao::OpenBaoClient;
