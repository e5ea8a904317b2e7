//! BaoPolicy reconciler: render rules to HCL and write the ACL policy.

use std::sync::Arc;
use std::time::Instant;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, warn, Instrument};

use super::hash::document_version;
use super::{with_finalizer, without_finalizer, Context, ReconcileError, FAILURE_REQUEUE, POLICY_REQUEUE};
use crate::crd::condition::{now_rfc3339, CONDITION_READY, REASON_SUCCESS};
use crate::crd::{set_condition, BaoPolicy, BaoPolicyStatus, Condition, ConditionStatus, BAOPOLICY_FINALIZER};
use crate::observability::metrics;
use crate::reconcile_span;

pub const CONTROLLER_NAME: &str = "baopolicy";

pub async fn reconcile(obj: Arc<BaoPolicy>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace =
        obj.namespace().ok_or_else(|| ReconcileError::InvalidResource("BaoPolicy has no namespace".into()))?;
    let name = obj.name_any();
    let started = Instant::now();

    let result = reconcile_key(&namespace, &name, &ctx).instrument(reconcile_span!("BaoPolicy", namespace, name)).await;

    metrics::record_reconcile(CONTROLLER_NAME, matches!(result, Ok((_, true))), started.elapsed());
    result.map(|(action, _)| action)
}

pub fn error_policy(obj: Arc<BaoPolicy>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, baopolicy = %obj.name_any(), "BaoPolicy reconciliation failed");
    Action::requeue(FAILURE_REQUEUE)
}

async fn reconcile_key(namespace: &str, name: &str, ctx: &Context) -> Result<(Action, bool), ReconcileError> {
    let Some(policy) = ctx.kube.get_bao_policy(namespace, name).await? else {
        debug!("BaoPolicy no longer exists");
        return Ok((Action::await_change(), true));
    };

    if policy.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&policy, namespace, name, ctx).await.map(|action| (action, true));
    }

    if let Some(finalizers) = with_finalizer(policy.metadata.finalizers.as_ref(), BAOPOLICY_FINALIZER) {
        ctx.kube.set_bao_policy_finalizers(namespace, name, &finalizers).await?;
    }

    let mut status = policy.status.clone().unwrap_or_default();

    match sync_policy(&policy, &mut status, ctx).await {
        Ok(()) => {
            status.observed_generation = policy.metadata.generation;
            status.last_sync_time = Some(now_rfc3339());
            set_condition(
                &mut status.conditions,
                Condition::new(CONDITION_READY, ConditionStatus::True, REASON_SUCCESS, "Policy synced successfully"),
            );
            ctx.kube.patch_bao_policy_status(namespace, name, &status).await?;
            info!("Policy synced successfully");
            Ok((Action::requeue(POLICY_REQUEUE), true))
        }
        Err(e) => {
            error!(error = %e, "Failed to sync policy");
            set_condition(
                &mut status.conditions,
                Condition::new(CONDITION_READY, ConditionStatus::False, e.reason(), e.to_string()),
            );
            ctx.kube.patch_bao_policy_status(namespace, name, &status).await?;
            Ok((Action::requeue(FAILURE_REQUEUE), false))
        }
    }
}

/// Write the rendered policy unless the stored version already matches.
///
/// `status` only changes after a successful write.
pub async fn sync_policy(
    policy: &BaoPolicy,
    status: &mut BaoPolicyStatus,
    ctx: &Context,
) -> Result<(), ReconcileError> {
    let document = policy.to_hcl();
    let policy_name = policy.policy_name();
    let version = document_version(&document);

    if status.policy_version.as_deref() == Some(version.as_str()) {
        debug!(policy_name = %policy_name, "Policy unchanged, skipping write");
        return Ok(());
    }

    ctx.backend.write_policy(&policy_name, &document).await.map_err(ReconcileError::PolicyWrite)?;
    info!(policy_name = %policy_name, version = %version, "Policy written to OpenBao");

    status.policy_version = Some(version);
    status.applied_policy_name = Some(policy_name);
    Ok(())
}

async fn handle_deletion(
    policy: &BaoPolicy,
    namespace: &str,
    name: &str,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    let Some(finalizers) = without_finalizer(policy.metadata.finalizers.as_ref(), BAOPOLICY_FINALIZER) else {
        return Ok(Action::await_change());
    };

    // The backend client has no delete call; the policy is left in place.
    if let Some(applied) = policy.status.as_ref().and_then(|s| s.applied_policy_name.as_deref()) {
        warn!(policy_name = %applied, "BaoPolicy deleted; OpenBao policy must be removed out of band");
    }

    ctx.kube.set_bao_policy_finalizers(namespace, name, &finalizers).await?;
    info!("Finalizer removed");
    Ok(Action::await_change())
}
