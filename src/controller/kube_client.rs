//! Cluster operations the reconcilers need, behind a trait so tests can run
//! against an in-memory implementation.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::crd::{BaoPolicy, BaoPolicyStatus, BaoSecret, BaoSecretStatus};

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "kubebao-operator";

#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get_bao_secret(&self, namespace: &str, name: &str) -> Result<Option<BaoSecret>, kube::Error>;

    /// Replace the finalizer list of a BaoSecret.
    async fn set_bao_secret_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), kube::Error>;

    async fn patch_bao_secret_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BaoSecretStatus,
    ) -> Result<(), kube::Error>;

    async fn get_bao_policy(&self, namespace: &str, name: &str) -> Result<Option<BaoPolicy>, kube::Error>;

    async fn set_bao_policy_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), kube::Error>;

    async fn patch_bao_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BaoPolicyStatus,
    ) -> Result<(), kube::Error>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error>;

    /// Replace an existing Secret; `secret` carries the resourceVersion it was read at.
    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret, kube::Error>;
}

/// [`KubeClient`] backed by the API server.
#[derive(Clone)]
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn patch_finalizers<K>(api: Api<K>, name: &str, finalizers: &[String]) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn patch_status<K, S>(api: Api<K>, name: &str, status: &S) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize + Sync,
{
    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)).await?;
    Ok(())
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_bao_secret(&self, namespace: &str, name: &str) -> Result<Option<BaoSecret>, kube::Error> {
        self.api::<BaoSecret>(namespace).get_opt(name).await
    }

    async fn set_bao_secret_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), kube::Error> {
        patch_finalizers(self.api::<BaoSecret>(namespace), name, finalizers).await
    }

    async fn patch_bao_secret_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BaoSecretStatus,
    ) -> Result<(), kube::Error> {
        patch_status(self.api::<BaoSecret>(namespace), name, status).await
    }

    async fn get_bao_policy(&self, namespace: &str, name: &str) -> Result<Option<BaoPolicy>, kube::Error> {
        self.api::<BaoPolicy>(namespace).get_opt(name).await
    }

    async fn set_bao_policy_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), kube::Error> {
        patch_finalizers(self.api::<BaoPolicy>(namespace), name, finalizers).await
    }

    async fn patch_bao_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BaoPolicyStatus,
    ) -> Result<(), kube::Error> {
        patch_status(self.api::<BaoPolicy>(namespace), name, status).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        self.api::<Secret>(namespace).get_opt(name).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        self.api::<Secret>(namespace).create(&PostParams::default(), secret).await
    }

    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        self.api::<Secret>(namespace).replace(name, &PostParams::default(), secret).await
    }
}
