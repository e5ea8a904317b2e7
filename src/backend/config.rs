//! Backend connection settings.
//!
//! Loaded from the `openbao` section of a process config file or from
//! `OPENBAO_*` / `VAULT_*` environment variables. Environment values win for
//! address, token, namespace and mount prefixes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::{env_first, env_or};
use crate::errors::{Error, Result};
use crate::utils::duration::serde_str;

pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8200";
pub const DEFAULT_TRANSIT_MOUNT: &str = "transit";
pub const DEFAULT_KV_MOUNT: &str = "secret";
pub const DEFAULT_KUBERNETES_MOUNT: &str = "kubernetes";
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Token variables checked, in order, when no static token is configured.
pub const TOKEN_ENV_VARS: &[&str] = &["OPENBAO_TOKEN", "VAULT_TOKEN"];

/// TLS material for talking to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    pub ca_cert: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub tls_server_name: Option<String>,
    pub insecure: bool,
}

/// Kubernetes service-account login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesAuthConfig {
    #[serde(default)]
    pub role: String,
    #[serde(default = "default_kubernetes_mount")]
    pub mount_path: String,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

impl KubernetesAuthConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            mount_path: default_kubernetes_mount(),
            token_path: default_token_path(),
        }
    }
}

/// Connection and authentication settings for [`super::OpenBaoClient`].
#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default = "default_address")]
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, rename = "tls", skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_auth: Option<KubernetesAuthConfig>,

    #[serde(default = "default_transit_mount")]
    pub transit_mount: String,

    #[serde(default = "default_kv_mount")]
    pub kv_mount: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_timeout", with = "serde_str")]
    pub timeout: Duration,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_transit_mount() -> String {
    DEFAULT_TRANSIT_MOUNT.to_string()
}

fn default_kv_mount() -> String {
    DEFAULT_KV_MOUNT.to_string()
}

fn default_kubernetes_mount() -> String {
    DEFAULT_KUBERNETES_MOUNT.to_string()
}

fn default_token_path() -> PathBuf {
    PathBuf::from(SERVICE_ACCOUNT_TOKEN_PATH)
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            token: None,
            tls: None,
            kubernetes_auth: None,
            transit_mount: default_transit_mount(),
            kv_mount: default_kv_mount(),
            namespace: None,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// Tokens must not end up in logs through `{:?}`.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("kubernetes_auth", &self.kubernetes_auth)
            .field("transit_mount", &self.transit_mount)
            .field("kv_mount", &self.kv_mount)
            .field("namespace", &self.namespace)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BackendConfig {
    /// Build a config purely from the environment.
    ///
    /// The address is left empty when neither `OPENBAO_ADDR` nor
    /// `VAULT_ADDR` is set so that [`BackendConfig::validate`] reports it.
    pub fn from_env() -> Self {
        let tls = {
            let ca_cert = env_first(&["OPENBAO_CACERT", "VAULT_CACERT"]);
            let ca_path = env_first(&["OPENBAO_CAPATH", "VAULT_CAPATH"]);
            let client_cert = env_first(&["OPENBAO_CLIENT_CERT", "VAULT_CLIENT_CERT"]);
            let client_key = env_first(&["OPENBAO_CLIENT_KEY", "VAULT_CLIENT_KEY"]);

            if ca_cert.is_some() || ca_path.is_some() || client_cert.is_some() || client_key.is_some()
            {
                let skip_verify = env_first(&["OPENBAO_SKIP_VERIFY", "VAULT_SKIP_VERIFY"]);
                Some(TlsConfig {
                    ca_cert: ca_cert.map(PathBuf::from),
                    ca_path: ca_path.map(PathBuf::from),
                    client_cert: client_cert.map(PathBuf::from),
                    client_key: client_key.map(PathBuf::from),
                    tls_server_name: env_first(&[
                        "OPENBAO_TLS_SERVER_NAME",
                        "VAULT_TLS_SERVER_NAME",
                    ]),
                    insecure: matches!(skip_verify.as_deref(), Some("true" | "1")),
                })
            } else {
                None
            }
        };

        let kubernetes_auth = env_first(&["KUBEBAO_K8S_ROLE"]).map(|role| KubernetesAuthConfig {
            role,
            mount_path: env_or("KUBEBAO_K8S_MOUNT_PATH", DEFAULT_KUBERNETES_MOUNT),
            token_path: PathBuf::from(env_or("KUBEBAO_K8S_TOKEN_PATH", SERVICE_ACCOUNT_TOKEN_PATH)),
        });

        Self {
            address: env_first(&["OPENBAO_ADDR", "VAULT_ADDR"]).unwrap_or_default(),
            token: env_first(TOKEN_ENV_VARS),
            tls,
            kubernetes_auth,
            transit_mount: env_or("KUBEBAO_TRANSIT_MOUNT", DEFAULT_TRANSIT_MOUNT),
            kv_mount: env_or("KUBEBAO_KV_MOUNT", DEFAULT_KV_MOUNT),
            namespace: env_first(&["OPENBAO_NAMESPACE", "VAULT_NAMESPACE"]),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overlay environment variables on a file-loaded config.
    pub fn merge_env(&mut self) {
        if let Some(address) = env_first(&["OPENBAO_ADDR", "VAULT_ADDR"]) {
            self.address = address;
        }
        if let Some(token) = env_first(TOKEN_ENV_VARS) {
            self.token = Some(token);
        }
        if let Some(namespace) = env_first(&["OPENBAO_NAMESPACE", "VAULT_NAMESPACE"]) {
            self.namespace = Some(namespace);
        }
        if let Some(mount) = env_first(&["KUBEBAO_TRANSIT_MOUNT"]) {
            self.transit_mount = mount;
        }
        if let Some(mount) = env_first(&["KUBEBAO_KV_MOUNT"]) {
            self.kv_mount = mount;
        }
    }

    /// Check required fields and that some way to authenticate exists.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)?;

        let has_token = self.token.as_deref().is_some_and(|t| !t.is_empty());
        if !has_token && self.kubernetes_auth.is_none() && env_first(TOKEN_ENV_VARS).is_none() {
            return Err(Error::config(
                "no authentication method configured: set token or kubernetes auth",
            ));
        }

        if let Some(k8s) = &self.kubernetes_auth {
            if k8s.role.is_empty() {
                return Err(Error::config("kubernetes auth role is required"));
            }
        }

        Ok(())
    }
}
