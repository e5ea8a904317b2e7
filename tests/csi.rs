//! CSI provider served over a Unix socket, driven by a real gRPC client.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use kubebao::backend::BackendConfig;
use kubebao::csi::{CsiConfig, CsiProvider};
use kubebao::proto::csi_v1alpha1::csi_driver_provider_client::CsiDriverProviderClient;
use kubebao::proto::csi_v1alpha1::{MountRequest, VersionRequest};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct RunningProvider {
    socket_path: PathBuf,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<kubebao::Result<()>>,
    _dir: TempDir,
}

impl RunningProvider {
    async fn start(server: &MockServer, cache_ttl: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("kubebao.sock");
        let provider = CsiProvider::new(CsiConfig {
            socket_path: socket_path.clone(),
            cache_ttl,
            openbao: BackendConfig { address: server.uri(), max_retries: 0, ..Default::default() },
            ..Default::default()
        });

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(provider.run(async move {
            let _ = stopped.await;
        }));
        common::wait_for_socket(&socket_path).await;
        Self { socket_path, stop, handle, _dir: dir }
    }

    async fn client(&self) -> CsiDriverProviderClient<tonic::transport::Channel> {
        CsiDriverProviderClient::new(common::unix_channel(self.socket_path.clone()).await)
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
        assert!(!self.socket_path.exists());
    }
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/kubernetes/login"))
        .and(body_json(json!({"role": "web", "jwt": "pod-jwt"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": {"client_token": "s.pod", "lease_duration": 3600, "renewable": true}
        })))
        .mount(server)
        .await;
}

fn mount_request(objects: &str) -> MountRequest {
    MountRequest {
        attributes: json!({
            "roleName": "web",
            "csi.storage.k8s.io/pod.name": "web-0",
            "csi.storage.k8s.io/pod.namespace": "apps",
            "objects": objects,
        })
        .to_string(),
        secrets: json!({"csi.storage.k8s.io/serviceAccount.tokens": "pod-jwt"}).to_string(),
        target_path: "/var/lib/kubelet/pods/uid/volumes/kubernetes.io~csi/secrets/mount".into(),
        permission: "420".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_version_over_socket() {
    let server = MockServer::start().await;
    let running = RunningProvider::start(&server, Duration::from_secs(60)).await;

    let response = running
        .client()
        .await
        .version(VersionRequest { version: "v1alpha1".into() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.version, "v1alpha1");
    assert_eq!(response.runtime_name, "kubebao");

    running.shutdown().await;
}

#[tokio::test]
async fn test_partial_mount_returns_successes_and_error() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/db"))
        .and(header("X-Vault-Token", "s.pod"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"data": {"username": "app", "password": "hunter2"}, "metadata": {"version": 7}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
        .mount(&server)
        .await;

    let running = RunningProvider::start(&server, Duration::from_secs(60)).await;
    let objects = concat!(
        "- objectName: username\n  secretPath: app/db\n  secretKey: username\n",
        "- objectName: password\n  secretPath: secret/app/db\n  secretKey: password\n  filePermission: \"0400\"\n",
        "- objectName: gone\n  secretPath: app/missing\n  secretKey: token\n",
    );

    let response = running.client().await.mount(mount_request(objects)).await.unwrap().into_inner();

    let names: Vec<_> = response.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(names, vec!["username", "password"]);
    assert_eq!(response.files[0].contents, b"app");
    assert_eq!(response.files[0].mode, 0o644);
    assert_eq!(response.files[1].contents, b"hunter2");
    assert_eq!(response.files[1].mode, 0o400);
    assert!(response.object_version.iter().all(|v| v.version == "7"));
    assert_eq!(response.error.map(|e| e.code).as_deref(), Some("Internal"));

    running.shutdown().await;
}

#[tokio::test]
async fn test_repeat_mount_is_served_from_cache() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"data": {"key": "abc123"}, "metadata": {"version": 1}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let running = RunningProvider::start(&server, Duration::from_secs(300)).await;
    let objects = "- objectName: api-key\n  secretPath: app/api\n  secretKey: key\n";

    let mut client = running.client().await;
    for _ in 0..2 {
        let response = client.mount(mount_request(objects)).await.unwrap().into_inner();
        assert!(response.error.is_none());
        assert_eq!(response.files[0].contents, b"abc123");
    }

    running.shutdown().await;
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"data": {"key": "abc123"}, "metadata": {"version": 1}}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let running = RunningProvider::start(&server, Duration::from_millis(50)).await;
    let objects = "- objectName: api-key\n  secretPath: app/api\n  secretKey: key\n";

    let mut client = running.client().await;
    client.mount(mount_request(objects)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let response = client.mount(mount_request(objects)).await.unwrap().into_inner();
    assert_eq!(response.files.len(), 1);

    running.shutdown().await;
}

#[tokio::test]
async fn test_dynamic_secret_uses_write() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/database/creds/readonly"))
        .and(body_json(json!({"ttl": "1h"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "5f3c2a1b-9d8e-4f7a-b6c5-1234567890ab",
            "data": {"username": "v-web-ro", "password": "generated"}
        })))
        .mount(&server)
        .await;

    let running = RunningProvider::start(&server, Duration::from_secs(60)).await;
    let objects = "- objectName: db-user\n  secretPath: database/creds/readonly\n  secretKey: username\n  secretArgs:\n    ttl: 1h\n";

    let response = running.client().await.mount(mount_request(objects)).await.unwrap().into_inner();
    assert!(response.error.is_none());
    assert_eq!(response.files[0].contents, b"v-web-ro");
    assert_eq!(response.object_version[0].version, "5f3c2a1b");

    running.shutdown().await;
}
