//! Backend client trait and response types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::Result;

/// JSON object payload as sent to and returned by the backend.
pub type Data = Map<String, Value>;

/// Envelope returned by every logical read/write endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LogicalResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub data: Option<Data>,
    #[serde(default)]
    pub auth: Option<AuthInfo>,
}

/// `auth` block of a login or renew response.
#[derive(Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthInfo {
    pub client_token: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub policies: Vec<String>,
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("client_token", &"<redacted>")
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .field("policies", &self.policies)
            .finish()
    }
}

/// Transit key metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub name: String,
    pub latest_version: u64,
    pub key_type: String,
    pub exportable: bool,
}

impl KeyInfo {
    /// Identifier reported to the API server, `<name>:v<latest_version>`.
    pub fn key_id(&self) -> String {
        format!("{}:v{}", self.name, self.latest_version)
    }
}

/// KV v2 secret: the inner `data` map plus `metadata.version` when reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvSecret {
    pub data: Data,
    pub version: Option<u64>,
}

/// Subset of `sys/health`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub version: String,
}

impl HealthStatus {
    pub fn is_ready(&self) -> bool {
        self.initialized && !self.sealed
    }
}

/// Operations the KMS plugin, CSI provider and controllers need from the
/// secrets backend.
///
/// Every call refreshes the session token first. Implementations never log
/// plaintext, ciphertext or secret data.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Generic logical read. `Ok(None)` when nothing exists at `path`.
    async fn read(&self, path: &str) -> Result<Option<LogicalResponse>>;

    /// Generic logical write. `Ok(None)` when the endpoint returns no body.
    async fn write(&self, path: &str, data: &Data) -> Result<Option<LogicalResponse>>;

    /// Encrypt with a transit key, returning the `vault:vN:...` ciphertext.
    async fn transit_encrypt(&self, key_name: &str, plaintext: &[u8]) -> Result<String>;

    async fn transit_decrypt(&self, key_name: &str, ciphertext: &str) -> Result<Vec<u8>>;

    /// Fails with [`super::BackendError::NotFound`] when the key does not exist.
    async fn transit_key_info(&self, key_name: &str) -> Result<KeyInfo>;

    async fn transit_create_key(&self, key_name: &str, key_type: &str) -> Result<()>;

    /// Read `<kv_mount>/data/<path>`.
    async fn kv_read(&self, path: &str) -> Result<KvSecret>;

    async fn kv_write(&self, path: &str, data: &Data) -> Result<()>;

    /// Create or replace an ACL policy.
    async fn write_policy(&self, name: &str, policy: &str) -> Result<()>;

    async fn health(&self) -> Result<HealthStatus>;
}
