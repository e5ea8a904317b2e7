//! BaoSecret: sync a backend secret into a Kubernetes Secret.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use crate::utils::duration::parse_duration;

pub const BAOSECRET_FINALIZER: &str = "kubebao.io/finalizer";
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";

/// A backend secret mirrored into a Kubernetes Secret.
///
/// ```yaml
/// apiVersion: kubebao.io/v1alpha1
/// kind: BaoSecret
/// metadata:
///   name: db-credentials
/// spec:
///   secretPath: myapp/database
///   refreshInterval: 15m
///   target:
///     name: db-credentials
///     creationPolicy: Merge
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubebao.io",
    version = "v1alpha1",
    kind = "BaoSecret",
    namespaced,
    status = "BaoSecretStatus",
    shortname = "bs",
    printcolumn = r#"{"name":"Secret Path","type":"string","jsonPath":".spec.secretPath"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target.name"}"#,
    printcolumn = r#"{"name":"Last Sync","type":"date","jsonPath":".status.lastSyncTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BaoSecretSpec {
    /// Path of the secret under the KV v2 mount
    pub secret_path: String,

    /// Sync only this field; every field when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Secret engine type (kv, database, pki, ...). Reserved: the operator
    /// currently reads from the KV v2 mount whatever this says.
    #[serde(default = "default_secret_engine")]
    pub secret_engine: String,

    pub target: SecretTarget,

    /// Duration such as `30m` or `1h`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,

    /// Reserved: per-resource connection settings. The operator always uses
    /// its own process-wide backend session.
    #[serde(default, rename = "openbaoRef", skip_serializing_if = "Option::is_none")]
    pub openbao_ref: Option<OpenBaoReference>,

    /// Reserved: login role for a per-resource session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Reserved: arguments for dynamic engines. Not sent by the operator,
    /// which only performs KV reads.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secret_args: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<SecretTemplate>,

    #[serde(default)]
    pub suspend_sync: bool,
}

fn default_secret_engine() -> String {
    "kv".to_string()
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretTarget {
    pub name: String,

    /// Defaults to the BaoSecret's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub creation_policy: CreationPolicy,
}

/// Lifecycle of the target Secret relative to its BaoSecret.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum CreationPolicy {
    /// Owned by the BaoSecret and garbage collected with it
    #[default]
    Owner,
    /// Left behind when the BaoSecret is deleted
    Orphan,
    /// Synced keys are merged into whatever the Secret already holds
    Merge,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenBaoReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default = "default_auth_method")]
    pub auth_method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_ref: Option<ServiceAccountReference>,
}

fn default_auth_method() -> String {
    "kubernetes".to_string()
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Output fields rendered from `{{ .Data.<field> }}` placeholders.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaoSecretStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    /// Content hash of the last synced data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_secret_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_secret_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl BaoSecret {
    /// Namespace the target Secret lives in.
    pub fn target_namespace(&self) -> String {
        self.spec
            .target
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.metadata.namespace.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn target_type(&self) -> String {
        self.spec
            .target
            .type_
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string())
    }

    /// Whether the target should carry an owner reference back to this object.
    ///
    /// Cross-namespace owner references are not honoured by the garbage
    /// collector, so they are never set.
    pub fn owns_target(&self) -> bool {
        self.spec.target.creation_policy == CreationPolicy::Owner
            && Some(self.target_namespace()) == self.metadata.namespace
    }

    /// Refresh interval, defaulted when unset or unparsable and clamped to a minimum.
    pub fn refresh_interval(&self) -> Duration {
        self.spec
            .refresh_interval
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| parse_duration(s).ok())
            .map(|d| d.max(MIN_REFRESH_INTERVAL))
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }
}
