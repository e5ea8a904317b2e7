//! Controller wiring for the operator process.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error, info};

use super::{policy_sync, secret_sync, Context, KubeClientImpl};
use crate::backend::BackendClient;
use crate::crd::{BaoPolicy, BaoSecret};

/// Run both controllers until a termination signal arrives.
pub async fn run_controllers(client: Client, backend: Arc<dyn BackendClient>) {
    let ctx = Arc::new(Context::new(Arc::new(KubeClientImpl::new(client.clone())), backend));

    let bao_secrets: Api<BaoSecret> = Api::all(client.clone());
    let bao_policies: Api<BaoPolicy> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);

    info!("Starting KubeBao controllers");
    info!("  - BaoSecret controller");
    info!("  - BaoPolicy controller");

    let secret_controller = Controller::new(bao_secrets, WatcherConfig::default())
        .owns(secrets, WatcherConfig::default().labels(&format!("{}={}", super::MANAGED_BY_LABEL, super::MANAGED_BY_VALUE)))
        .shutdown_on_signal()
        .run(secret_sync::reconcile, secret_sync::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(object = %object.name, ?action, "BaoSecret reconciliation completed"),
                Err(e) => error!(error = ?e, "BaoSecret reconciliation error"),
            }
        });

    let policy_controller = Controller::new(bao_policies, WatcherConfig::default())
        .shutdown_on_signal()
        .run(policy_sync::reconcile, policy_sync::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(object = %object.name, ?action, "BaoPolicy reconciliation completed"),
                Err(e) => error!(error = ?e, "BaoPolicy reconciliation error"),
            }
        });

    futures::future::join(secret_controller, policy_controller).await;
    info!("Controllers stopped");
}
