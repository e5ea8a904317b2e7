//! Resolves mount objects against the backend, through the TTL cache.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::cache::SecretCache;
use super::params::{normalize_path, parse_file_permission, SecretObject};
use crate::backend::{BackendClient, BackendError, Data};
use crate::utils::display_value;

/// Version reported when a read carries no KV metadata.
pub const DEFAULT_VERSION: &str = "1";
const DYNAMIC_VERSION_LEN: usize = 8;

/// File content ready to be returned in a mount response.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSecret {
    pub object_name: String,
    pub content: Vec<u8>,
    pub version: String,
    pub mode: i32,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to write to path: {0}")]
    Write(#[source] BackendError),

    #[error("failed to read path: {0}")]
    Read(#[source] BackendError),

    #[error("no data returned from path: {0}")]
    NoDataReturned(String),

    #[error("no data found at path: {0}")]
    NoDataFound(String),

    #[error("unexpected data format")]
    UnexpectedFormat,

    #[error("key {0} not found in secret")]
    KeyNotFound(String),

    #[error("failed to marshal secret data: {0}")]
    Marshal(#[from] serde_json::Error),

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

impl FetchError {
    /// Whether the backend rejected the pod's credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, FetchError::Write(e) | FetchError::Read(e) if e.is_auth_failure())
    }
}

/// One object that could not be fetched.
#[derive(Debug)]
pub struct FetchFailure {
    pub object_name: String,
    pub error: FetchError,
}

/// Outcome of fetching a batch: everything that succeeded plus every failure.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub secrets: Vec<FetchedSecret>,
    pub failures: Vec<FetchFailure>,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Aggregate message naming each failed object, or `None` when all succeeded.
    pub fn error_message(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(self.to_string())
    }
}

impl fmt::Display for FetchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "some secrets failed to fetch:")?;
        for failure in &self.failures {
            write!(f, "\n  - failed to fetch {}: {}", failure.object_name, failure.error)?;
        }
        Ok(())
    }
}

/// Fetches mount objects, consulting and filling the shared cache.
#[derive(Debug, Clone)]
pub struct SecretsFetcher {
    cache: SecretCache,
    kv_mount: String,
}

impl SecretsFetcher {
    pub fn new(cache: SecretCache, kv_mount: impl Into<String>) -> Self {
        Self { cache, kv_mount: kv_mount.into() }
    }

    pub fn cache(&self) -> &SecretCache {
        &self.cache
    }

    /// Fetch every object independently; one failure never stops the rest.
    pub async fn fetch_all(&self, client: &dyn BackendClient, objects: &[SecretObject]) -> FetchReport {
        let mut report = FetchReport::default();
        for object in objects {
            match self.fetch(client, object).await {
                Ok(secret) => report.secrets.push(secret),
                Err(error) => report.failures.push(FetchFailure { object_name: object.object_name.clone(), error }),
            }
        }
        report
    }

    pub async fn fetch(&self, client: &dyn BackendClient, object: &SecretObject) -> Result<FetchedSecret, FetchError> {
        let cache_key = object.cache_key();
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(object_name = %object.object_name, "Cache hit");
            return Ok(cached);
        }

        debug!(object_name = %object.object_name, path = %object.secret_path, "Fetching secret");
        let (data, version) = if object.secret_args.is_empty() {
            self.read_static(client, object).await?
        } else {
            self.write_dynamic(client, object).await?
        };

        let secret = FetchedSecret {
            object_name: object.object_name.clone(),
            content: extract_content(&data, object)?,
            version,
            mode: parse_file_permission(&object.file_permission),
        };

        self.cache.insert(cache_key, secret.clone()).await;
        Ok(secret)
    }

    async fn read_static(
        &self,
        client: &dyn BackendClient,
        object: &SecretObject,
    ) -> Result<(Data, String), FetchError> {
        let path = normalize_path(&object.secret_path, &self.kv_mount);
        let response = client.read(&path).await.map_err(FetchError::Read)?;
        let mut data = response.and_then(|r| r.data).ok_or_else(|| FetchError::NoDataFound(path.clone()))?;

        // KV v2 nests the payload under "data" with a sibling "metadata".
        let version = data
            .get("metadata")
            .and_then(|m| m.get("version"))
            .and_then(version_string)
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        let payload = match data.remove("data") {
            Some(Value::Object(inner)) => inner,
            Some(_) => return Err(FetchError::UnexpectedFormat),
            None => data,
        };
        Ok((payload, version))
    }

    /// Issue dynamic credentials by writing `secretArgs` to the path.
    ///
    /// The path is taken verbatim: dynamic engines (`database/creds/..`,
    /// `pki/issue/..`) live outside the KV mount, so the KV `data/`
    /// normalization applied to static reads would point them at the wrong
    /// engine.
    async fn write_dynamic(
        &self,
        client: &dyn BackendClient,
        object: &SecretObject,
    ) -> Result<(Data, String), FetchError> {
        let path = object.secret_path.trim_start_matches('/').to_string();
        let args: Data = object.secret_args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let response = client.write(&path, &args).await.map_err(FetchError::Write)?;
        let response = response.ok_or_else(|| FetchError::NoDataReturned(path.clone()))?;
        let data = response.data.ok_or_else(|| FetchError::NoDataReturned(path.clone()))?;

        let version: String = response.request_id.chars().take(DYNAMIC_VERSION_LEN).collect();
        let version = if version.is_empty() { DEFAULT_VERSION.to_string() } else { version };
        Ok((data, version))
    }
}

fn version_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn extract_content(data: &Data, object: &SecretObject) -> Result<Vec<u8>, FetchError> {
    let content = if object.secret_key.is_empty() {
        serde_json::to_vec(data)?
    } else {
        let value = data.get(&object.secret_key).ok_or_else(|| FetchError::KeyNotFound(object.secret_key.clone()))?;
        display_value(value).into_bytes()
    };

    match object.encoding.as_str() {
        "" | "text" => Ok(content),
        "base64" => Ok(STANDARD.encode(content).into_bytes()),
        other => Err(FetchError::UnsupportedEncoding(other.to_string())),
    }
}
