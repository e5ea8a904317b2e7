//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kubebao::backend::{BackendClient, BackendConfig, OpenBaoClient};
use kubebao::controller::KubeClient;
use kubebao::crd::{BaoPolicy, BaoPolicyStatus, BaoSecret, BaoSecretStatus};
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use wiremock::MockServer;

/// Backend client authenticated with a static token against a mock server.
pub async fn token_backend(server: &MockServer) -> Arc<dyn BackendClient> {
    let client = OpenBaoClient::connect(BackendConfig {
        address: server.uri(),
        token: Some("s.root".into()),
        max_retries: 0,
        ..Default::default()
    })
    .await
    .expect("static token client");
    Arc::new(client)
}

/// Wait until a server has bound its socket.
pub async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("socket {} never appeared", path.display());
}

/// gRPC channel over a Unix socket. The URI is ignored by the connector.
pub async fn unix_channel(path: PathBuf) -> Channel {
    Endpoint::try_from("http://[::]:50051")
        .expect("static endpoint")
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = path.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
        }))
        .await
        .expect("connect over unix socket")
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn not_found(what: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".into(),
        message: format!("{} not found", what),
        reason: "NotFound".into(),
        code: 404,
    })
}

/// In-memory cluster state.
#[derive(Default)]
pub struct FakeKube {
    pub bao_secrets: Mutex<HashMap<Key, BaoSecret>>,
    pub bao_policies: Mutex<HashMap<Key, BaoPolicy>>,
    pub secrets: Mutex<HashMap<Key, Secret>>,
    pub secret_writes: Mutex<Vec<String>>,
}

impl FakeKube {
    pub fn with_bao_secret(bao_secret: BaoSecret) -> Arc<Self> {
        let fake = Self::default();
        fake.insert_bao_secret(bao_secret);
        Arc::new(fake)
    }

    pub fn with_bao_policy(policy: BaoPolicy) -> Arc<Self> {
        let fake = Self::default();
        fake.insert_bao_policy(policy);
        Arc::new(fake)
    }

    pub fn insert_bao_secret(&self, bao_secret: BaoSecret) {
        let k = key(&bao_secret.namespace().unwrap_or_default(), &bao_secret.name_any());
        self.bao_secrets.lock().unwrap().insert(k, bao_secret);
    }

    pub fn insert_bao_policy(&self, policy: BaoPolicy) {
        let k = key(&policy.namespace().unwrap_or_default(), &policy.name_any());
        self.bao_policies.lock().unwrap().insert(k, policy);
    }

    pub fn bao_secret(&self, namespace: &str, name: &str) -> BaoSecret {
        self.bao_secrets.lock().unwrap()[&key(namespace, name)].clone()
    }

    pub fn bao_policy(&self, namespace: &str, name: &str) -> BaoPolicy {
        self.bao_policies.lock().unwrap()[&key(namespace, name)].clone()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_bao_secret(&self, namespace: &str, name: &str) -> Result<Option<BaoSecret>, kube::Error> {
        Ok(self.bao_secrets.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn set_bao_secret_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), kube::Error> {
        let mut store = self.bao_secrets.lock().unwrap();
        let obj = store.get_mut(&key(namespace, name)).ok_or_else(|| not_found(name))?;
        obj.metadata.finalizers = Some(finalizers.to_vec());
        Ok(())
    }

    async fn patch_bao_secret_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BaoSecretStatus,
    ) -> Result<(), kube::Error> {
        let mut store = self.bao_secrets.lock().unwrap();
        let obj = store.get_mut(&key(namespace, name)).ok_or_else(|| not_found(name))?;
        obj.status = Some(status.clone());
        Ok(())
    }

    async fn get_bao_policy(&self, namespace: &str, name: &str) -> Result<Option<BaoPolicy>, kube::Error> {
        Ok(self.bao_policies.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn set_bao_policy_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), kube::Error> {
        let mut store = self.bao_policies.lock().unwrap();
        let obj = store.get_mut(&key(namespace, name)).ok_or_else(|| not_found(name))?;
        obj.metadata.finalizers = Some(finalizers.to_vec());
        Ok(())
    }

    async fn patch_bao_policy_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BaoPolicyStatus,
    ) -> Result<(), kube::Error> {
        let mut store = self.bao_policies.lock().unwrap();
        let obj = store.get_mut(&key(namespace, name)).ok_or_else(|| not_found(name))?;
        obj.status = Some(status.clone());
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        let name = secret.name_any();
        self.secret_writes.lock().unwrap().push(format!("create {}/{}", namespace, name));
        self.secrets.lock().unwrap().insert(key(namespace, &name), secret.clone());
        Ok(secret.clone())
    }

    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        self.secret_writes.lock().unwrap().push(format!("replace {}/{}", namespace, name));
        let mut store = self.secrets.lock().unwrap();
        if !store.contains_key(&key(namespace, name)) {
            return Err(not_found(name));
        }
        store.insert(key(namespace, name), secret.clone());
        Ok(secret.clone())
    }
}
