//! BaoPolicy: an ACL policy managed from the cluster.

use std::collections::BTreeMap;
use std::fmt::Write;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::baosecret::OpenBaoReference;
use super::condition::Condition;

pub const BAOPOLICY_FINALIZER: &str = "kubebao.io/policy-finalizer";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubebao.io",
    version = "v1alpha1",
    kind = "BaoPolicy",
    plural = "baopolicies",
    namespaced,
    status = "BaoPolicyStatus",
    shortname = "bp",
    printcolumn = r#"{"name":"Policy Name","type":"string","jsonPath":".status.appliedPolicyName"}"#,
    printcolumn = r#"{"name":"Last Sync","type":"date","jsonPath":".status.lastSyncTime"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BaoPolicySpec {
    /// Name in the backend; the resource name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,

    pub rules: Vec<PolicyRule>,

    /// Reserved: policies are written through the operator's own session.
    #[serde(default, rename = "openbaoRef", skip_serializing_if = "Option::is_none")]
    pub openbao_ref: Option<OpenBaoReference>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// Path pattern, wildcards allowed
    pub path: String,

    pub capabilities: Vec<Capability>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allowed_parameters: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied_parameters: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_parameters: Vec<String>,

    #[serde(default, rename = "minWrappingTTL", skip_serializing_if = "Option::is_none")]
    pub min_wrapping_ttl: Option<String>,

    #[serde(default, rename = "maxWrappingTTL", skip_serializing_if = "Option::is_none")]
    pub max_wrapping_ttl: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Create,
    Read,
    Update,
    Delete,
    List,
    Sudo,
    Deny,
    Patch,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Create => "create",
            Capability::Read => "read",
            Capability::Update => "update",
            Capability::Delete => "delete",
            Capability::List => "list",
            Capability::Sudo => "sudo",
            Capability::Deny => "deny",
            Capability::Patch => "patch",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaoPolicyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,

    /// Content hash of the last document written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_policy_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

fn quoted_list<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    items.into_iter().map(|item| format!("\"{}\"", item)).collect::<Vec<_>>().join(", ")
}

impl BaoPolicy {
    pub fn policy_name(&self) -> String {
        self.spec
            .policy_name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }

    /// Render the rules as an HCL policy document.
    pub fn to_hcl(&self) -> String {
        let mut hcl = String::new();
        for rule in &self.spec.rules {
            // Writing to a String cannot fail.
            let _ = write_rule(&mut hcl, rule);
        }
        hcl
    }
}

fn write_rule(hcl: &mut String, rule: &PolicyRule) -> std::fmt::Result {
    writeln!(hcl, "path \"{}\" {{", rule.path)?;
    writeln!(hcl, "  capabilities = [{}]", quoted_list(rule.capabilities.iter().map(Capability::as_str)))?;

    if !rule.allowed_parameters.is_empty() {
        writeln!(hcl, "  allowed_parameters = {{")?;
        for (key, values) in &rule.allowed_parameters {
            writeln!(hcl, "    \"{}\" = [{}]", key, quoted_list(values.iter().map(String::as_str)))?;
        }
        writeln!(hcl, "  }}")?;
    }

    if !rule.denied_parameters.is_empty() {
        writeln!(hcl, "  denied_parameters = {{")?;
        for key in &rule.denied_parameters {
            writeln!(hcl, "    \"{}\" = []", key)?;
        }
        writeln!(hcl, "  }}")?;
    }

    if !rule.required_parameters.is_empty() {
        writeln!(
            hcl,
            "  required_parameters = [{}]",
            quoted_list(rule.required_parameters.iter().map(String::as_str))
        )?;
    }

    if let Some(ttl) = rule.min_wrapping_ttl.as_deref().filter(|t| !t.is_empty()) {
        writeln!(hcl, "  min_wrapping_ttl = \"{}\"", ttl)?;
    }
    if let Some(ttl) = rule.max_wrapping_ttl.as_deref().filter(|t| !t.is_empty()) {
        writeln!(hcl, "  max_wrapping_ttl = \"{}\"", ttl)?;
    }

    writeln!(hcl, "}}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(yaml: &str) -> BaoPolicy {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_single_rule_hcl() {
        let p = policy(
            r#"
apiVersion: kubebao.io/v1alpha1
kind: BaoPolicy
metadata:
  name: reader
  namespace: apps
spec:
  rules:
    - path: secret/data/app/*
      capabilities: [read, list]
"#,
        );
        assert_eq!(p.policy_name(), "reader");
        assert_eq!(p.to_hcl(), "path \"secret/data/app/*\" {\n  capabilities = [\"read\", \"list\"]\n}\n\n");
    }

    #[test]
    fn test_all_clauses_in_order() {
        let p = policy(
            r#"
apiVersion: kubebao.io/v1alpha1
kind: BaoPolicy
metadata:
  name: writer
spec:
  policyName: app-writer
  rules:
    - path: secret/data/app
      capabilities: [create, update]
      allowedParameters:
        zone: [a, b]
        env: []
      deniedParameters: [admin]
      requiredParameters: [owner]
      minWrappingTTL: 1m
      maxWrappingTTL: 1h
"#,
        );
        let expected = concat!(
            "path \"secret/data/app\" {\n",
            "  capabilities = [\"create\", \"update\"]\n",
            "  allowed_parameters = {\n",
            "    \"env\" = []\n",
            "    \"zone\" = [\"a\", \"b\"]\n",
            "  }\n",
            "  denied_parameters = {\n",
            "    \"admin\" = []\n",
            "  }\n",
            "  required_parameters = [\"owner\"]\n",
            "  min_wrapping_ttl = \"1m\"\n",
            "  max_wrapping_ttl = \"1h\"\n",
            "}\n\n",
        );
        assert_eq!(p.policy_name(), "app-writer");
        assert_eq!(p.to_hcl(), expected);
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let result: Result<BaoPolicy, _> = serde_yaml::from_str(
            r#"
apiVersion: kubebao.io/v1alpha1
kind: BaoPolicy
metadata:
  name: bad
spec:
  rules:
    - path: x
      capabilities: [fly]
"#,
        );
        assert!(result.is_err());
    }
}
