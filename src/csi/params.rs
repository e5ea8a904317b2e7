//! Mount request attributes: parsing, validation and path/permission helpers.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Permission applied when `filePermission` is empty or unparsable.
pub const DEFAULT_FILE_MODE: i32 = 0o644;

/// Pod secret carrying the per-audience service account tokens.
pub const SERVICE_ACCOUNT_TOKENS_KEY: &str = "csi.storage.k8s.io/serviceAccount.tokens";

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("attributes are required")]
    MissingAttributes,

    #[error("failed to parse attributes: {0}")]
    InvalidAttributes(#[from] serde_json::Error),

    #[error("failed to parse objects: {0}")]
    InvalidObjects(String),

    #[error("roleName is required")]
    MissingRole,

    #[error("objects list cannot be empty")]
    NoObjects,
}

/// One file to materialize in the pod volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretObject {
    pub object_name: String,
    pub secret_path: String,
    pub secret_key: String,
    /// When non-empty the path is written to instead of read, which is how
    /// dynamic credentials are issued.
    pub secret_args: BTreeMap<String, Value>,
    pub encoding: String,
    pub file_permission: String,
}

impl SecretObject {
    /// Cache key: `path:key:objectName`.
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.secret_path, self.secret_key, self.object_name)
    }
}

/// Parameters of a SecretProviderClass after defaults are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountParams {
    pub role_name: String,
    pub openbao_address: Option<String>,
    pub auth_method: String,
    pub auth_mount_path: String,
    pub namespace: Option<String>,
    pub audience: Option<String>,
    pub objects: Vec<SecretObject>,
}

/// Server-wide values used when an attribute is absent.
#[derive(Debug, Clone)]
pub struct MountDefaults {
    pub auth_method: String,
    pub role_name: String,
}

/// Decode the `attributes` JSON blob of a mount request.
pub fn parse_attributes(attributes: &str) -> Result<HashMap<String, String>, ParamsError> {
    if attributes.trim().is_empty() {
        return Err(ParamsError::MissingAttributes);
    }
    Ok(serde_json::from_str(attributes)?)
}

/// Build [`MountParams`] from decoded attributes.
///
/// `objects` is YAML in most SecretProviderClasses; JSON is accepted as a
/// fallback.
pub fn parse_mount_params(
    attributes: &HashMap<String, String>,
    defaults: &MountDefaults,
) -> Result<MountParams, ParamsError> {
    let non_empty = |key: &str| attributes.get(key).filter(|v| !v.is_empty()).cloned();

    let mut params = MountParams {
        role_name: defaults.role_name.clone(),
        auth_method: defaults.auth_method.clone(),
        auth_mount_path: String::new(),
        openbao_address: non_empty("openbaoAddr"),
        namespace: non_empty("namespace"),
        audience: non_empty("audience"),
        objects: Vec::new(),
    };

    if let Some(role) = attributes.get("roleName") {
        params.role_name = role.clone();
    }
    if let Some(method) = non_empty("authMethod") {
        params.auth_method = method;
    }
    if let Some(mount) = non_empty("authMountPath") {
        params.auth_mount_path = mount;
    }
    if let Some(objects) = attributes.get("objects") {
        params.objects = parse_objects(objects)?;
    }

    if params.role_name.is_empty() {
        return Err(ParamsError::MissingRole);
    }
    if params.objects.is_empty() {
        return Err(ParamsError::NoObjects);
    }

    Ok(params)
}

fn parse_objects(raw: &str) -> Result<Vec<SecretObject>, ParamsError> {
    match serde_yaml::from_str::<Option<Vec<SecretObject>>>(raw) {
        Ok(objects) => Ok(objects.unwrap_or_default()),
        Err(yaml_err) => serde_json::from_str(raw).map_err(|json_err| {
            ParamsError::InvalidObjects(format!("yaml: {}; json: {}", yaml_err, json_err))
        }),
    }
}

/// Resolve a `secretPath` to a full logical path.
///
/// Paths without a known KV mount prefix go under `<kv_mount>/data/`; paths
/// with a prefix but no `/data/` segment get it inserted after the mount.
pub fn normalize_path(path: &str, kv_mount: &str) -> String {
    let path = path.trim_start_matches('/');
    let kv_mount = kv_mount.trim_matches('/');

    let has_mount_prefix = ["secret", "kv", kv_mount]
        .iter()
        .filter(|mount| !mount.is_empty())
        .any(|mount| path.starts_with(&format!("{}/", mount)));

    if !has_mount_prefix {
        return format!("{}/data/{}", kv_mount, path);
    }
    if path.contains("/data/") {
        return path.to_string();
    }
    match path.split_once('/') {
        Some((mount, rest)) => format!("{}/data/{}", mount, rest),
        None => path.to_string(),
    }
}

/// Parse an octal permission such as `0640` or `600`.
pub fn parse_file_permission(permission: &str) -> i32 {
    let trimmed = permission.trim();
    if trimmed.is_empty() {
        return DEFAULT_FILE_MODE;
    }
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    match i32::from_str_radix(digits, 8) {
        Ok(mode) if mode > 0 && mode <= 0o7777 => mode,
        _ => DEFAULT_FILE_MODE,
    }
}

/// Identity token for the pod behind a mount request.
///
/// The driver passes a JSON map of audience to `{token, expirationTimestamp}`;
/// the entry for `audience` is preferred, otherwise the first one. A value that
/// is not such a map is used verbatim.
pub fn service_account_token(
    secrets: &HashMap<String, String>,
    audience: Option<&str>,
) -> Option<String> {
    #[derive(Deserialize)]
    struct AudienceToken {
        token: String,
    }

    let raw = secrets.get(SERVICE_ACCOUNT_TOKENS_KEY).map(|s| s.trim()).filter(|s| !s.is_empty())?;

    match serde_json::from_str::<BTreeMap<String, AudienceToken>>(raw) {
        Ok(mut tokens) => {
            let chosen = audience.and_then(|aud| tokens.remove(aud));
            chosen.or_else(|| tokens.into_values().next()).map(|t| t.token)
        }
        Err(_) => Some(raw.to_string()),
    }
}
