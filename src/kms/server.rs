//! KMS v2 `KeyManagementService` backed by a transit key.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn, Instrument};

use super::config::KmsConfig;
use crate::backend::{BackendClient, BackendError};
use crate::errors::{Error, Result};
use crate::observability::metrics;
use crate::proto::kms_v2::key_management_service_server::{
    KeyManagementService, KeyManagementServiceServer,
};
use crate::proto::kms_v2::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, StatusRequest, StatusResponse,
};
use crate::rpc_span;
use crate::transport::{bind_unix_socket, remove_socket};

/// KMS API version reported by `Status`.
pub const API_VERSION: &str = "v2";
pub const HEALTH_OK: &str = "ok";
pub const HEALTH_UNHEALTHY: &str = "unhealthy";
/// Annotation attached to every encrypt response.
pub const KEY_NAME_ANNOTATION: &str = "kubebao.io/key-name";

#[derive(Debug, Clone, Default)]
struct KeyState {
    key_id: String,
    healthy: bool,
}

/// The plugin: configured key, backend handle and the guarded key state the
/// health loop and RPC handlers share.
#[derive(Clone)]
pub struct KmsPlugin {
    config: Arc<KmsConfig>,
    backend: Arc<dyn BackendClient>,
    state: Arc<RwLock<KeyState>>,
}

impl KmsPlugin {
    pub fn new(config: KmsConfig, backend: Arc<dyn BackendClient>) -> Self {
        Self { config: Arc::new(config), backend, state: Arc::new(RwLock::new(KeyState::default())) }
    }

    /// Make sure the transit key exists and record its current key ID.
    ///
    /// A missing key is created when `createKeyIfNotExists` is set; any other
    /// backend error aborts startup.
    pub async fn initialize(&self) -> Result<()> {
        let key_name = &self.config.key_name;
        info!(key_name = %key_name, "Initializing KMS plugin");

        let info = match self.backend.transit_key_info(key_name).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                if !self.config.create_key_if_not_exists {
                    return Err(Error::config(format!(
                        "transit key {} not found and createKeyIfNotExists is false",
                        key_name
                    )));
                }

                info!(key_name = %key_name, key_type = %self.config.key_type, "Creating transit key");
                self.backend.transit_create_key(key_name, &self.config.key_type).await?;
                self.backend.transit_key_info(key_name).await?
            }
            Err(e) => return Err(e.into()),
        };

        let key_id = info.key_id();
        {
            let mut state = self.state.write().await;
            state.key_id = key_id.clone();
            state.healthy = true;
        }
        metrics::set_kms_healthy(true);

        info!(key_id = %key_id, "KMS plugin initialized");
        Ok(())
    }

    pub async fn key_id(&self) -> String {
        self.state.read().await.key_id.clone()
    }

    pub async fn is_healthy(&self) -> bool {
        self.state.read().await.healthy
    }

    /// One health-check tick: re-read key metadata and pick up rotations.
    ///
    /// On failure the previous key ID is kept and the plugin reports unhealthy.
    pub async fn check_health(&self) {
        let result = self.backend.transit_key_info(&self.config.key_name).await;

        let mut state = self.state.write().await;
        match result {
            Ok(info) => {
                let key_id = info.key_id();
                if key_id != state.key_id {
                    info!(old_key_id = %state.key_id, new_key_id = %key_id, "Transit key rotated");
                    metrics::record_key_rotation();
                    state.key_id = key_id;
                }
                state.healthy = true;
            }
            Err(e) => {
                warn!(error = %e, "KMS health check failed");
                state.healthy = false;
            }
        }
        metrics::set_kms_healthy(state.healthy);
    }

    async fn health_loop(self) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; initialize() already covered it.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.check_health().await;
        }
    }

    /// Serve on the configured socket until `shutdown` resolves, then drain
    /// in-flight calls and remove the socket.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let socket_path = self.config.socket_path.clone();
        let listener = bind_unix_socket(&socket_path)?;

        let health = tokio::spawn(self.clone().health_loop());

        info!(socket = %socket_path.display(), "KMS server starting");
        let served = Server::builder()
            .add_service(KeyManagementServiceServer::new(self))
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
            .await;

        health.abort();
        remove_socket(&socket_path);
        info!("KMS server stopped");

        served.map_err(|e| Error::transport(format!("KMS gRPC server failed: {}", e)))
    }
}

fn backend_status(operation: &str, err: &BackendError) -> Status {
    let message = format!("{} failed: {}", operation, err);
    if err.is_auth_failure() {
        Status::permission_denied(message)
    } else {
        Status::internal(message)
    }
}

#[tonic::async_trait]
impl KeyManagementService for KmsPlugin {
    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> std::result::Result<Response<StatusResponse>, Status> {
        let state = self.state.read().await;
        let healthz = if state.healthy { HEALTH_OK } else { HEALTH_UNHEALTHY };

        Ok(Response::new(StatusResponse {
            version: API_VERSION.to_string(),
            healthz: healthz.to_string(),
            key_id: state.key_id.clone(),
        }))
    }

    async fn encrypt(
        &self,
        request: Request<EncryptRequest>,
    ) -> std::result::Result<Response<EncryptResponse>, Status> {
        let request = request.into_inner();
        let span = rpc_span!("kms", "Encrypt", uid = %request.uid);

        async move {
            debug!(plaintext_size = request.plaintext.len(), "Encrypt request received");
            if request.plaintext.is_empty() {
                metrics::record_rpc("kms", "Encrypt", false);
                return Err(Status::invalid_argument("plaintext cannot be empty"));
            }

            let ciphertext = self
                .backend
                .transit_encrypt(&self.config.key_name, &request.plaintext)
                .await
                .map_err(|e| {
                    error!(error = %e, "Encryption failed");
                    metrics::record_rpc("kms", "Encrypt", false);
                    backend_status("encryption", &e)
                })?;

            let key_id = self.key_id().await;
            let annotations = [(KEY_NAME_ANNOTATION.to_string(), self.config.key_name.as_bytes().to_vec())]
                .into_iter()
                .collect();

            debug!(ciphertext_size = ciphertext.len(), key_id = %key_id, "Encryption successful");
            metrics::record_rpc("kms", "Encrypt", true);
            Ok(Response::new(EncryptResponse { ciphertext: ciphertext.into_bytes(), key_id, annotations }))
        }
        .instrument(span)
        .await
    }

    async fn decrypt(
        &self,
        request: Request<DecryptRequest>,
    ) -> std::result::Result<Response<DecryptResponse>, Status> {
        let request = request.into_inner();
        let span = rpc_span!("kms", "Decrypt", uid = %request.uid, key_id = %request.key_id);

        async move {
            debug!(ciphertext_size = request.ciphertext.len(), "Decrypt request received");
            if request.ciphertext.is_empty() {
                metrics::record_rpc("kms", "Decrypt", false);
                return Err(Status::invalid_argument("ciphertext cannot be empty"));
            }

            // The key ID is informational: transit picks the version from the ciphertext prefix.
            let ciphertext = String::from_utf8_lossy(&request.ciphertext);
            let plaintext = self
                .backend
                .transit_decrypt(&self.config.key_name, &ciphertext)
                .await
                .map_err(|e| {
                    error!(error = %e, "Decryption failed");
                    metrics::record_rpc("kms", "Decrypt", false);
                    backend_status("decryption", &e)
                })?;

            debug!(plaintext_size = plaintext.len(), "Decryption successful");
            metrics::record_rpc("kms", "Decrypt", true);
            Ok(Response::new(DecryptResponse { plaintext }))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, OpenBaoClient};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;
    use tracing_test::traced_test;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn plugin_for(server: &MockServer, create: bool) -> KmsPlugin {
        let backend = OpenBaoClient::connect(BackendConfig {
            address: server.uri(),
            token: Some("s.root".into()),
            max_retries: 0,
            ..Default::default()
        })
        .await
        .unwrap();

        let config = KmsConfig {
            key_name: "etcd".into(),
            create_key_if_not_exists: create,
            ..Default::default()
        };
        KmsPlugin::new(config, Arc::new(backend))
    }

    async fn mount_key_version(server: &MockServer, version: u64) {
        Mock::given(method("GET"))
            .and(path("/v1/transit/keys/etcd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"latest_version": version, "type": "aes256-gcm96", "exportable": false}
            })))
            .mount(server)
            .await;
    }

    // ---------------------------------------------------------------
    // Initialization
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_existing_key() {
        let server = MockServer::start().await;
        mount_key_version(&server, 4).await;

        let plugin = plugin_for(&server, false).await;
        plugin.initialize().await.unwrap();

        assert_eq!(plugin.key_id().await, "etcd:v4");
        assert!(plugin.is_healthy().await);
    }

    #[tokio::test]
    async fn test_initialize_creates_missing_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transit/keys/etcd"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/keys/etcd"))
            .and(body_json(json!({"type": "aes256-gcm96"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        mount_key_version(&server, 1).await;

        let plugin = plugin_for(&server, true).await;
        plugin.initialize().await.unwrap();
        assert_eq!(plugin.key_id().await, "etcd:v1");
    }

    #[tokio::test]
    async fn test_initialize_fails_when_creation_disallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/transit/keys/etcd"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let plugin = plugin_for(&server, false).await;
        let err = plugin.initialize().await.unwrap_err();
        assert!(err.to_string().contains("createKeyIfNotExists is false"));
        assert!(!plugin.is_healthy().await);
    }

    // ---------------------------------------------------------------
    // Health loop and rotation
    // ---------------------------------------------------------------

    #[tokio::test]
    #[traced_test]
    async fn test_rotation_updates_key_id() {
        let server = MockServer::start().await;
        mount_key_version(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/encrypt/etcd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"ciphertext": "vault:v2:Zm9v"}
            })))
            .mount(&server)
            .await;

        let plugin = plugin_for(&server, false).await;
        plugin.initialize().await.unwrap();
        assert_eq!(plugin.key_id().await, "etcd:v1");

        server.reset().await;
        mount_key_version(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/encrypt/etcd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"ciphertext": "vault:v2:Zm9v"}
            })))
            .mount(&server)
            .await;

        plugin.check_health().await;
        assert_eq!(plugin.key_id().await, "etcd:v2");
        assert!(logs_contain("Transit key rotated"));

        let response = plugin
            .encrypt(Request::new(EncryptRequest { plaintext: b"data".to_vec(), uid: "u1".into() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.key_id, "etcd:v2");
    }

    #[tokio::test]
    async fn test_failed_health_check_keeps_key_id() {
        let server = MockServer::start().await;
        mount_key_version(&server, 3).await;

        let plugin = plugin_for(&server, false).await;
        plugin.initialize().await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/v1/transit/keys/etcd"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"errors": ["sealed"]})))
            .mount(&server)
            .await;

        plugin.check_health().await;
        assert!(!plugin.is_healthy().await);
        assert_eq!(plugin.key_id().await, "etcd:v3");

        let status = plugin.status(Request::new(StatusRequest {})).await.unwrap().into_inner();
        assert_eq!(status.healthz, HEALTH_UNHEALTHY);
        assert_eq!(status.key_id, "etcd:v3");
        assert_eq!(status.version, API_VERSION);
    }

    // ---------------------------------------------------------------
    // Encrypt / Decrypt
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_encrypt_returns_ciphertext_and_annotation() {
        let server = MockServer::start().await;
        mount_key_version(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/encrypt/etcd"))
            .and(body_json(json!({"plaintext": STANDARD.encode(b"secret-dek")})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"ciphertext": "vault:v1:abc"}
            })))
            .mount(&server)
            .await;

        let plugin = plugin_for(&server, false).await;
        plugin.initialize().await.unwrap();

        let response = plugin
            .encrypt(Request::new(EncryptRequest {
                plaintext: b"secret-dek".to_vec(),
                uid: "req-1".into(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.ciphertext, b"vault:v1:abc");
        assert_eq!(response.key_id, "etcd:v1");
        assert_eq!(response.annotations.get(KEY_NAME_ANNOTATION).unwrap(), b"etcd");
    }

    #[tokio::test]
    async fn test_empty_payloads_are_invalid() {
        let server = MockServer::start().await;
        let plugin = plugin_for(&server, false).await;

        let err = plugin
            .encrypt(Request::new(EncryptRequest { plaintext: vec![], uid: "u".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let err = plugin
            .decrypt(Request::new(DecryptRequest { ciphertext: vec![], ..Default::default() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_decrypt_ignores_key_id_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transit/decrypt/etcd"))
            .and(body_json(json!({"ciphertext": "vault:v1:abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"plaintext": STANDARD.encode(b"secret-dek")}
            })))
            .mount(&server)
            .await;

        let plugin = plugin_for(&server, false).await;
        let response = plugin
            .decrypt(Request::new(DecryptRequest {
                ciphertext: b"vault:v1:abc".to_vec(),
                uid: "u".into(),
                key_id: "some-other-key:v9".into(),
                annotations: Default::default(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.plaintext, b"secret-dek");
    }
}
