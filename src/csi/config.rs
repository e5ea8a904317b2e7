//! CSI provider configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::config::{env_bool, env_duration, env_first, env_or, load_yaml_file};
use crate::errors::{Error, Result};
use crate::utils::duration::serde_str;

/// Socket path used when a config file omits `socketPath`.
pub const DEFAULT_SOCKET_PATH: &str = "/provider/kubebao.sock";
/// Socket path used when configuring from the environment.
pub const DEFAULT_ENV_SOCKET_PATH: &str = "/var/run/kubebao/csi.sock";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_ROTATION_POLL_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_AUTH_METHOD: &str = "kubernetes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_cache_ttl", rename = "cacheTTL", with = "serde_str")]
    pub cache_ttl: Duration,

    #[serde(default)]
    pub enable_secret_rotation: bool,

    #[serde(default = "default_rotation_poll_interval", with = "serde_str")]
    pub rotation_poll_interval: Duration,

    #[serde(default = "default_auth_method")]
    pub default_auth_method: String,

    #[serde(default)]
    pub default_role: String,

    #[serde(default = "BackendConfig::from_env")]
    pub openbao: BackendConfig,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

fn default_rotation_poll_interval() -> Duration {
    DEFAULT_ROTATION_POLL_INTERVAL
}

fn default_auth_method() -> String {
    DEFAULT_AUTH_METHOD.to_string()
}

impl Default for CsiConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            cache_ttl: DEFAULT_CACHE_TTL,
            enable_secret_rotation: true,
            rotation_poll_interval: DEFAULT_ROTATION_POLL_INTERVAL,
            default_auth_method: default_auth_method(),
            default_role: String::new(),
            openbao: BackendConfig::default(),
        }
    }
}

impl CsiConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config: CsiConfig = load_yaml_file(path)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        Self {
            socket_path: PathBuf::from(env_or("KUBEBAO_CSI_SOCKET", DEFAULT_ENV_SOCKET_PATH)),
            cache_ttl: env_duration("KUBEBAO_CSI_CACHE_TTL", DEFAULT_CACHE_TTL),
            enable_secret_rotation: env_bool("KUBEBAO_CSI_ENABLE_ROTATION", true),
            rotation_poll_interval: env_duration(
                "KUBEBAO_CSI_ROTATION_INTERVAL",
                DEFAULT_ROTATION_POLL_INTERVAL,
            ),
            default_auth_method: env_or("KUBEBAO_CSI_AUTH_METHOD", DEFAULT_AUTH_METHOD),
            default_role: env_first(&["KUBEBAO_CSI_DEFAULT_ROLE"]).unwrap_or_default(),
            openbao: BackendConfig::from_env(),
        }
    }

    fn apply_defaults(&mut self) {
        if self.socket_path.as_os_str().is_empty() {
            self.socket_path = default_socket_path();
        }
        if self.cache_ttl.is_zero() {
            self.cache_ttl = DEFAULT_CACHE_TTL;
        }
        if self.rotation_poll_interval.is_zero() {
            self.rotation_poll_interval = DEFAULT_ROTATION_POLL_INTERVAL;
        }
        if self.default_auth_method.is_empty() {
            self.default_auth_method = default_auth_method();
        }
    }

    /// Backend credentials are per mount request, so only the socket and
    /// the cache timings are checked here.
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(Error::config("socketPath is required"));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::config("cacheTTL must be positive"));
        }
        if self.rotation_poll_interval.is_zero() {
            return Err(Error::config("rotationPollInterval must be positive"));
        }
        Ok(())
    }
}
