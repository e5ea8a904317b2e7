//! BaoSecret reconciler: mirror a KV secret into a Kubernetes Secret.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, warn, Instrument};

use super::hash::data_version;
use super::template::apply_template;
use super::{
    with_finalizer, without_finalizer, Context, ReconcileError, FAILURE_REQUEUE, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE, SOURCE_LABEL, SOURCE_PATH_ANNOTATION, VERSION_ANNOTATION,
};
use crate::backend::Data;
use crate::crd::condition::{
    now_rfc3339, CONDITION_AUTHENTICATED, CONDITION_READY, CONDITION_SYNCED, REASON_SUCCESS,
    REASON_SYNC_SUSPENDED,
};
use crate::crd::{set_condition, BaoSecret, BaoSecretSpec, Condition, ConditionStatus, CreationPolicy, BAOSECRET_FINALIZER};
use crate::observability::metrics;
use crate::reconcile_span;
use crate::utils::display_value;

pub const CONTROLLER_NAME: &str = "baosecret";

/// Result of one successful write of the target Secret.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedSecret {
    pub name: String,
    pub namespace: String,
    pub version: String,
}

pub async fn reconcile(obj: Arc<BaoSecret>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace =
        obj.namespace().ok_or_else(|| ReconcileError::InvalidResource("BaoSecret has no namespace".into()))?;
    let name = obj.name_any();
    let started = Instant::now();

    let result = reconcile_key(&namespace, &name, &ctx).instrument(reconcile_span!("BaoSecret", namespace, name)).await;

    let synced = matches!(result, Ok((_, true)));
    metrics::record_reconcile(CONTROLLER_NAME, synced, started.elapsed());
    result.map(|(action, _)| action)
}

pub fn error_policy(obj: Arc<BaoSecret>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, baosecret = %obj.name_any(), "BaoSecret reconciliation failed");
    Action::requeue(FAILURE_REQUEUE)
}

/// Reconcile the latest stored state of `namespace/name`.
///
/// The flag is true when the sync itself succeeded.
async fn reconcile_key(namespace: &str, name: &str, ctx: &Context) -> Result<(Action, bool), ReconcileError> {
    let Some(bao_secret) = ctx.kube.get_bao_secret(namespace, name).await? else {
        debug!("BaoSecret no longer exists");
        return Ok((Action::await_change(), true));
    };

    if bao_secret.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&bao_secret, namespace, name, ctx).await.map(|action| (action, true));
    }

    if let Some(finalizers) = with_finalizer(bao_secret.metadata.finalizers.as_ref(), BAOSECRET_FINALIZER) {
        ctx.kube.set_bao_secret_finalizers(namespace, name, &finalizers).await?;
    }

    let mut status = bao_secret.status.clone().unwrap_or_default();

    if bao_secret.spec.suspend_sync {
        info!("Sync is suspended");
        set_condition(
            &mut status.conditions,
            Condition::new(CONDITION_READY, ConditionStatus::False, REASON_SYNC_SUSPENDED, "Sync is suspended"),
        );
        ctx.kube.patch_bao_secret_status(namespace, name, &status).await?;
        return Ok((Action::await_change(), true));
    }

    match sync_secret(&bao_secret, ctx).await {
        Ok(synced) => {
            status.secret_version = Some(synced.version);
            status.synced_secret_name = Some(synced.name);
            status.synced_secret_namespace = Some(synced.namespace);
            status.observed_generation = bao_secret.metadata.generation;
            status.last_sync_time = Some(now_rfc3339());
            for (type_, message) in [
                (CONDITION_AUTHENTICATED, "Authenticated to OpenBao"),
                (CONDITION_SYNCED, "Secret synced successfully"),
                (CONDITION_READY, "Secret is ready"),
            ] {
                set_condition(
                    &mut status.conditions,
                    Condition::new(type_, ConditionStatus::True, REASON_SUCCESS, message),
                );
            }
            ctx.kube.patch_bao_secret_status(namespace, name, &status).await?;

            let next_sync = bao_secret.refresh_interval();
            info!(next_sync = ?next_sync, "Secret synced successfully");
            Ok((Action::requeue(next_sync), true))
        }
        Err(e) => {
            error!(error = %e, "Failed to sync secret");
            let reason = e.reason();
            let message = e.to_string();
            if e.is_auth_failure() {
                set_condition(
                    &mut status.conditions,
                    Condition::new(CONDITION_AUTHENTICATED, ConditionStatus::False, reason, message.clone()),
                );
            }
            for type_ in [CONDITION_SYNCED, CONDITION_READY] {
                set_condition(
                    &mut status.conditions,
                    Condition::new(type_, ConditionStatus::False, reason, message.clone()),
                );
            }
            ctx.kube.patch_bao_secret_status(namespace, name, &status).await?;
            Ok((Action::requeue(FAILURE_REQUEUE), false))
        }
    }
}

async fn handle_deletion(
    bao_secret: &BaoSecret,
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let Some(finalizers) = without_finalizer(bao_secret.metadata.finalizers.as_ref(), BAOSECRET_FINALIZER) else {
        return Ok(Action::await_change());
    };

    if bao_secret.spec.target.creation_policy == CreationPolicy::Orphan {
        info!(secret = %bao_secret.spec.target.name, "Orphaning managed secret");
    } else {
        debug!(secret = %bao_secret.spec.target.name, "Managed secret left to garbage collection");
    }

    ctx.kube.set_bao_secret_finalizers(namespace, name, &finalizers).await?;
    info!("Finalizer removed");
    Ok(Action::await_change())
}

/// Read the source, render the payload and create or update the target Secret.
pub async fn sync_secret(bao_secret: &BaoSecret, ctx: &Context) -> Result<SyncedSecret, ReconcileError> {
    let source = ctx.backend.kv_read(&bao_secret.spec.secret_path).await.map_err(ReconcileError::BackendRead)?;

    let data = build_data(&bao_secret.spec, &source.data)?;
    let version = data_version(&data);

    let namespace = bao_secret.target_namespace();
    let name = bao_secret.spec.target.name.clone();
    let existing = ctx.kube.get_secret(&namespace, &name).await.map_err(ReconcileError::TargetSecret)?;
    let operation = if existing.is_some() { "updated" } else { "created" };

    let secret = build_target_secret(bao_secret, existing, data, &version);
    let written = if operation == "updated" {
        ctx.kube.replace_secret(&namespace, &name, &secret).await
    } else {
        ctx.kube.create_secret(&namespace, &secret).await
    };
    written.map_err(ReconcileError::TargetSecret)?;

    info!(operation, secret = %name, secret_namespace = %namespace, version = %version, "Target secret written");
    Ok(SyncedSecret { name, namespace, version })
}

/// Payload for the target Secret: the selected field or every field, then
/// the template outputs.
pub fn build_data(spec: &BaoSecretSpec, source: &Data) -> Result<BTreeMap<String, Vec<u8>>, ReconcileError> {
    let data = match spec.secret_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            let value = source.get(key).ok_or_else(|| ReconcileError::KeyNotFound(key.to_string()))?;
            BTreeMap::from([(key.to_string(), display_value(value).into_bytes())])
        }
        None => source.iter().map(|(k, v)| (k.clone(), display_value(v).into_bytes())).collect(),
    };

    Ok(match &spec.template {
        Some(template) => apply_template(data, template, source),
        None => data,
    })
}

/// Desired state of the target Secret, starting from the existing object when
/// there is one so unrelated metadata survives.
pub fn build_target_secret(
    bao_secret: &BaoSecret,
    existing: Option<Secret>,
    data: BTreeMap<String, Vec<u8>>,
    version: &str,
) -> Secret {
    let target = &bao_secret.spec.target;
    let mut secret = existing.unwrap_or_else(|| Secret {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(bao_secret.target_namespace()),
            ..Default::default()
        },
        ..Default::default()
    });

    let labels = secret.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(SOURCE_LABEL.to_string(), bao_secret.name_any());
    labels.extend(target.labels.clone());

    let annotations = secret.metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(SOURCE_PATH_ANNOTATION.to_string(), bao_secret.spec.secret_path.clone());
    annotations.insert(VERSION_ANNOTATION.to_string(), version.to_string());
    annotations.extend(target.annotations.clone());

    secret.type_ = Some(bao_secret.target_type());

    let payload = data.into_iter().map(|(k, v)| (k, ByteString(v)));
    secret.data = Some(match target.creation_policy {
        CreationPolicy::Merge => {
            let mut merged = secret.data.take().unwrap_or_default();
            merged.extend(payload);
            merged
        }
        CreationPolicy::Owner | CreationPolicy::Orphan => payload.collect(),
    });
    secret.string_data = None;

    if bao_secret.owns_target() {
        if let Some(owner) = bao_secret.controller_owner_ref(&()) {
            let owners = secret.metadata.owner_references.get_or_insert_with(Vec::new);
            owners.retain(|o| o.uid != owner.uid && o.controller != Some(true));
            owners.push(owner);
        }
    }

    secret
}
