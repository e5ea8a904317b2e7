//! # Custom Resources
//!
//! `kubebao.io/v1alpha1` resources reconciled by the operator.

pub mod baopolicy;
pub mod baosecret;
pub mod condition;

use kube::CustomResourceExt;

pub use baopolicy::{BaoPolicy, BaoPolicySpec, BaoPolicyStatus, Capability, PolicyRule, BAOPOLICY_FINALIZER};
pub use baosecret::{
    BaoSecret, BaoSecretSpec, BaoSecretStatus, CreationPolicy, OpenBaoReference, SecretTarget,
    SecretTemplate, BAOSECRET_FINALIZER,
};
pub use condition::{set_condition, Condition, ConditionStatus};

pub const API_GROUP: &str = "kubebao.io";

/// Both CRD manifests as a multi-document YAML stream.
pub fn crd_manifests() -> crate::Result<String> {
    let documents = [serde_yaml::to_string(&BaoSecret::crd())?, serde_yaml::to_string(&BaoPolicy::crd())?];
    Ok(documents.iter().map(|doc| format!("---\n{}", doc)).collect())
}
