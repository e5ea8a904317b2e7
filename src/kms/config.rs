//! KMS plugin configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendConfig;
use crate::config::{env_bool, env_duration, env_or, load_yaml_file};
use crate::errors::{Error, Result};
use crate::utils::duration::serde_str;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/kubebao/kms.sock";
pub const DEFAULT_KEY_NAME: &str = "kubebao-kms";
pub const DEFAULT_KEY_TYPE: &str = "aes256-gcm96";
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Transit key types the plugin accepts.
pub const SUPPORTED_KEY_TYPES: &[&str] = &["aes128-gcm96", "aes256-gcm96", "chacha20-poly1305"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_key_name")]
    pub key_name: String,

    #[serde(default = "default_key_type")]
    pub key_type: String,

    #[serde(default = "default_true")]
    pub create_key_if_not_exists: bool,

    #[serde(default = "default_health_check_interval", with = "serde_str")]
    pub health_check_interval: Duration,

    /// Falls back to the environment when the section is missing.
    #[serde(default = "BackendConfig::from_env")]
    pub openbao: BackendConfig,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_key_name() -> String {
    DEFAULT_KEY_NAME.to_string()
}

fn default_key_type() -> String {
    DEFAULT_KEY_TYPE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_health_check_interval() -> Duration {
    DEFAULT_HEALTH_CHECK_INTERVAL
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            key_name: default_key_name(),
            key_type: default_key_type(),
            create_key_if_not_exists: true,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            openbao: BackendConfig::default(),
        }
    }
}

impl KmsConfig {
    /// Load from YAML, fill empty fields with defaults and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config: KmsConfig = load_yaml_file(path)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Build from `KUBEBAO_KMS_*` and the backend environment variables.
    pub fn from_env() -> Self {
        Self {
            socket_path: PathBuf::from(env_or("KUBEBAO_KMS_SOCKET", DEFAULT_SOCKET_PATH)),
            key_name: env_or("KUBEBAO_KMS_KEY_NAME", DEFAULT_KEY_NAME),
            key_type: env_or("KUBEBAO_KMS_KEY_TYPE", DEFAULT_KEY_TYPE),
            create_key_if_not_exists: env_bool("KUBEBAO_KMS_CREATE_KEY", true),
            health_check_interval: env_duration(
                "KUBEBAO_KMS_HEALTH_INTERVAL",
                DEFAULT_HEALTH_CHECK_INTERVAL,
            ),
            openbao: BackendConfig::from_env(),
        }
    }

    // Explicitly empty values in the file count as unset.
    fn apply_defaults(&mut self) {
        if self.socket_path.as_os_str().is_empty() {
            self.socket_path = default_socket_path();
        }
        if self.key_name.is_empty() {
            self.key_name = default_key_name();
        }
        if self.key_type.is_empty() {
            self.key_type = default_key_type();
        }
        if self.health_check_interval.is_zero() {
            self.health_check_interval = DEFAULT_HEALTH_CHECK_INTERVAL;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(Error::config("socketPath is required"));
        }
        if self.key_name.is_empty() {
            return Err(Error::config("keyName is required"));
        }
        if !SUPPORTED_KEY_TYPES.contains(&self.key_type.as_str()) {
            return Err(Error::config(format!(
                "invalid keyType: {}, must be one of: {}",
                self.key_type,
                SUPPORTED_KEY_TYPES.join(", ")
            )));
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::config("healthCheckInterval must be positive"));
        }

        self.openbao.validate().map_err(|e| match e {
            Error::Config(message) => {
                Error::config(format!("invalid openbao configuration: {}", message))
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_token(mut config: KmsConfig) -> KmsConfig {
        config.openbao.token = Some("s.test".into());
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = with_token(KmsConfig::default());
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.key_name, "kubebao-kms");
        assert!(config.create_key_if_not_exists);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_key_type() {
        let config = with_token(KmsConfig { key_type: "rsa-2048".into(), ..Default::default() });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid keyType: rsa-2048"));
    }

    #[test]
    fn test_load_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kms.yaml");
        std::fs::write(
            &path,
            r#"
keyName: cluster-etcd
keyType: chacha20-poly1305
healthCheckInterval: 1m
openbao:
  address: https://bao.internal:8200
  token: s.file
"#,
        )
        .unwrap();

        let config = KmsConfig::load(&path).unwrap();
        assert_eq!(config.key_name, "cluster-etcd");
        assert_eq!(config.key_type, "chacha20-poly1305");
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.health_check_interval, Duration::from_secs(60));
        assert_eq!(config.openbao.address, "https://bao.internal:8200");
        assert_eq!(config.openbao.transit_mount, "transit");
    }

    #[test]
    fn test_load_rejects_unknown_key_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kms.yaml");
        std::fs::write(&path, "keyType: des\nopenbao:\n  token: s.t\n").unwrap();

        let err = KmsConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("invalid keyType"));
    }
}
