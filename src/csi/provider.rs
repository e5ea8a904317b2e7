//! `CSIDriverProvider` gRPC service.
//!
//! Every mount authenticates as the requesting pod, so a backend client is
//! built per request; only the fetched objects are shared, through the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn, Instrument};

use super::cache::SecretCache;
use super::config::CsiConfig;
use super::fetcher::{FetchReport, SecretsFetcher};
use super::params::{
    parse_attributes, parse_mount_params, service_account_token, MountDefaults, MountParams,
};
use crate::backend::{
    AuthMethod, BackendConfig, BackendError, JwtSource, LoginCredentials, OpenBaoClient,
    DEFAULT_KUBERNETES_MOUNT, SERVICE_ACCOUNT_TOKEN_PATH,
};
use crate::errors::{Error, Result};
use crate::observability::metrics;
use crate::proto::csi_v1alpha1::csi_driver_provider_server::{
    CsiDriverProvider, CsiDriverProviderServer,
};
use crate::proto::csi_v1alpha1::{
    Error as MountError, File, MountRequest, MountResponse, ObjectVersion, VersionRequest,
    VersionResponse,
};
use crate::rpc_span;
use crate::transport::{bind_unix_socket, remove_socket};

pub const PROVIDER_NAME: &str = "kubebao";
pub const PROVIDER_API_VERSION: &str = "v1alpha1";

pub const CODE_INVALID_ARGUMENT: &str = "InvalidArgument";
pub const CODE_PERMISSION_DENIED: &str = "PermissionDenied";
pub const CODE_INTERNAL: &str = "Internal";

const DEFAULT_JWT_MOUNT: &str = "jwt";

#[derive(Clone)]
pub struct CsiProvider {
    config: Arc<CsiConfig>,
    fetcher: SecretsFetcher,
}

impl CsiProvider {
    pub fn new(config: CsiConfig) -> Self {
        let cache = SecretCache::new(config.cache_ttl);
        let fetcher = SecretsFetcher::new(cache, config.openbao.kv_mount.clone());
        Self { config: Arc::new(config), fetcher }
    }

    pub fn cache(&self) -> &SecretCache {
        self.fetcher.cache()
    }

    fn mount_defaults(&self) -> MountDefaults {
        MountDefaults {
            auth_method: self.config.default_auth_method.clone(),
            role_name: self.config.default_role.clone(),
        }
    }

    /// Log in to the backend as the pod described by the mount request.
    async fn authenticate(
        &self,
        params: &MountParams,
        secrets: &HashMap<String, String>,
    ) -> std::result::Result<OpenBaoClient, BackendError> {
        let defaults = &self.config.openbao;
        let config = BackendConfig {
            address: params.openbao_address.clone().unwrap_or_else(|| defaults.address.clone()),
            namespace: params.namespace.clone().or_else(|| defaults.namespace.clone()),
            token: None,
            kubernetes_auth: None,
            ..defaults.clone()
        };

        let pod_token = service_account_token(secrets, params.audience.as_deref());
        let mount_or = |fallback: &str| {
            if params.auth_mount_path.is_empty() {
                fallback.to_string()
            } else {
                params.auth_mount_path.clone()
            }
        };

        let auth = match params.auth_method.as_str() {
            "kubernetes" => AuthMethod::Kubernetes(LoginCredentials {
                mount_path: mount_or(DEFAULT_KUBERNETES_MOUNT),
                role: params.role_name.clone(),
                jwt: pod_token
                    .map(JwtSource::Inline)
                    .unwrap_or_else(|| JwtSource::File(SERVICE_ACCOUNT_TOKEN_PATH.into())),
            }),
            "jwt" => {
                let jwt = match pod_token {
                    Some(token) => token,
                    None => JwtSource::File(SERVICE_ACCOUNT_TOKEN_PATH.into())
                        .load()
                        .await
                        .ok()
                        .filter(|t| !t.is_empty())
                        .ok_or_else(|| {
                            BackendError::authentication_failed("JWT token is required for jwt auth")
                        })?,
                };
                AuthMethod::Jwt(LoginCredentials {
                    mount_path: mount_or(DEFAULT_JWT_MOUNT),
                    role: params.role_name.clone(),
                    jwt: JwtSource::Inline(jwt),
                })
            }
            "token" => AuthMethod::from_env_token()?,
            other => {
                return Err(BackendError::authentication_failed(format!(
                    "unsupported auth method: {}",
                    other
                )))
            }
        };

        OpenBaoClient::connect_with(config, auth).await
    }

    async fn mount_inner(&self, request: MountRequest) -> MountResponse {
        let params = match parse_attributes(&request.attributes)
            .and_then(|attributes| parse_mount_params(&attributes, &self.mount_defaults()))
        {
            Ok(params) => params,
            Err(e) => {
                error!(error = %e, "Invalid mount parameters");
                return error_response(CODE_INVALID_ARGUMENT);
            }
        };

        let secrets: HashMap<String, String> = if request.secrets.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&request.secrets).unwrap_or_else(|e| {
                warn!(error = %e, "Failed to parse pod secrets");
                HashMap::new()
            })
        };

        let client = match self.authenticate(&params, &secrets).await {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, role = %params.role_name, method = %params.auth_method, "Authentication failed");
                return error_response(CODE_PERMISSION_DENIED);
            }
        };

        let report = self.fetcher.fetch_all(&client, &params.objects).await;
        let error = report.error_message().map(|message| {
            error!(error = %message, fetched = report.secrets.len(), "Failed to fetch secrets");
            MountError { code: failure_code(&report).to_string() }
        });

        let mut response = build_response(report);
        response.error = error;
        response
    }

    /// Serve on the configured socket until `shutdown` resolves.
    ///
    /// With rotation enabled a sweeper drops expired cache entries every
    /// `rotationPollInterval`, so the driver's periodic remounts see fresh values.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let socket_path = self.config.socket_path.clone();
        let listener = bind_unix_socket(&socket_path)?;

        let sweeper = self
            .config
            .enable_secret_rotation
            .then(|| self.cache().spawn_sweeper(self.config.rotation_poll_interval));

        info!(
            socket = %socket_path.display(),
            cache_ttl = ?self.config.cache_ttl,
            rotation = self.config.enable_secret_rotation,
            "CSI provider starting"
        );
        let served = Server::builder()
            .add_service(CsiDriverProviderServer::new(self))
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
            .await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        remove_socket(&socket_path);
        info!("CSI provider stopped");

        served.map_err(|e| Error::transport(format!("CSI gRPC server failed: {}", e)))
    }
}

fn error_response(code: &str) -> MountResponse {
    MountResponse { error: Some(MountError { code: code.to_string() }), ..Default::default() }
}

fn failure_code(report: &FetchReport) -> &'static str {
    if report.secrets.is_empty() && report.failures.iter().all(|f| f.error.is_auth_failure()) {
        CODE_PERMISSION_DENIED
    } else {
        CODE_INTERNAL
    }
}

fn build_response(report: FetchReport) -> MountResponse {
    let mut response = MountResponse::default();
    for secret in report.secrets {
        response
            .object_version
            .push(ObjectVersion { id: secret.object_name.clone(), version: secret.version });
        response.files.push(File { path: secret.object_name, mode: secret.mode, contents: secret.content });
    }
    response
}

#[tonic::async_trait]
impl CsiDriverProvider for CsiProvider {
    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> std::result::Result<Response<VersionResponse>, Status> {
        debug!(client_version = %request.get_ref().version, "Version request received");
        Ok(Response::new(VersionResponse {
            version: PROVIDER_API_VERSION.to_string(),
            runtime_name: PROVIDER_NAME.to_string(),
            runtime_version: crate::VERSION.to_string(),
        }))
    }

    async fn mount(
        &self,
        request: Request<MountRequest>,
    ) -> std::result::Result<Response<MountResponse>, Status> {
        let request = request.into_inner();
        let span = rpc_span!("csi", "Mount", target_path = %request.target_path);

        async move {
            info!("Mount request received");
            let response = self.mount_inner(request).await;
            let success = response.error.is_none();
            metrics::record_rpc("csi", "Mount", success);
            if success {
                info!(files = response.files.len(), "Mount successful");
            }
            Ok(Response::new(response))
        }
        .instrument(span)
        .await
    }
}
