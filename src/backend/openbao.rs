//! HTTP client for the OpenBao API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::auth::{AuthMethod, TokenState};
use super::client::{BackendClient, Data, HealthStatus, KeyInfo, KvSecret, LogicalResponse};
use super::config::{BackendConfig, TlsConfig};
use super::error::{BackendError, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// Authenticated OpenBao client.
///
/// Long-lived in the KMS plugin and the operator; the CSI provider builds one
/// per mount request because each mount may log in with a different role.
pub struct OpenBaoClient {
    http: reqwest::Client,
    config: BackendConfig,
    auth: AuthMethod,
    state: RwLock<TokenState>,
}

impl std::fmt::Debug for OpenBaoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenBaoClient")
            .field("address", &self.config.address)
            .field("auth", &self.auth)
            .finish()
    }
}

impl OpenBaoClient {
    /// Build the HTTP client without talking to the backend.
    pub fn new(config: BackendConfig, auth: AuthMethod) -> Result<Self> {
        if config.address.is_empty() {
            return Err(BackendError::config("OpenBao address is required"));
        }

        let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(config.timeout);
        if let Some(tls) = &config.tls {
            builder = configure_tls(builder, tls)?;
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config, auth, state: RwLock::new(TokenState::default()) })
    }

    /// Build a client with the strategy chosen by the config and log in.
    pub async fn connect(config: BackendConfig) -> Result<Self> {
        let auth = AuthMethod::from_config(&config)?;
        Self::connect_with(config, auth).await
    }

    /// Build a client with an explicit strategy and log in.
    pub async fn connect_with(config: BackendConfig, auth: AuthMethod) -> Result<Self> {
        let client = Self::new(config, auth)?;
        client.authenticate().await?;
        Ok(client)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Obtain a fresh token with the configured strategy.
    pub async fn authenticate(&self) -> Result<()> {
        let credentials = match &self.auth {
            AuthMethod::Token(token) => {
                self.state.write().await.set(token.clone(), 0);
                return Ok(());
            }
            AuthMethod::Kubernetes(credentials) | AuthMethod::Jwt(credentials) => credentials,
        };

        let method = self.auth.name();
        let jwt = credentials.jwt.load().await?;
        let mut body = Data::new();
        body.insert("role".into(), Value::String(credentials.role.clone()));
        body.insert("jwt".into(), Value::String(jwt));

        let response = self
            .send(Method::POST, &credentials.login_path(), Some(&body), None)
            .await
            .map_err(|e| {
                BackendError::authentication_failed(format!("{} auth login failed: {}", method, e))
            })?;

        let auth = response.and_then(|r| r.auth).ok_or_else(|| {
            BackendError::authentication_failed(format!(
                "no auth info returned from {} login",
                method
            ))
        })?;

        let lease_duration = auth.lease_duration;
        self.state.write().await.set(auth.client_token, lease_duration);

        info!(method, role = %credentials.role, lease_duration, "Authenticated with OpenBao");
        Ok(())
    }

    /// Renew the token when it is close to expiry, re-authenticating if the
    /// renewal is rejected.
    pub async fn refresh(&self) -> Result<()> {
        let token = {
            let state = self.state.read().await;
            if !state.needs_refresh(Instant::now()) {
                return Ok(());
            }
            state.token.clone()
        };

        debug!("Refreshing OpenBao token");
        let renewed = self
            .send(Method::POST, "auth/token/renew-self", Some(&Data::new()), token.as_deref())
            .await;

        match renewed {
            Ok(Some(LogicalResponse { auth: Some(auth), .. })) => {
                self.state.write().await.set_lease(auth.lease_duration);
                debug!(lease_duration = auth.lease_duration, "Token renewed");
                Ok(())
            }
            Ok(_) => {
                debug!("Token renewal returned no auth info, re-authenticating");
                self.authenticate().await
            }
            Err(e) => {
                debug!(error = %e, "Token renewal failed, re-authenticating");
                self.authenticate().await
            }
        }
    }

    async fn token(&self) -> Option<String> {
        self.state.read().await.token.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.address.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Refresh, then send an authenticated request.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Data>,
    ) -> Result<Option<LogicalResponse>> {
        self.refresh().await?;
        let token = self.token().await;
        self.send(method, path, body, token.as_deref()).await
    }

    /// Send one request. Only connection failures are retried, up to
    /// `max_retries` times; anything that reached the backend is returned
    /// to the caller as-is.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Data>,
        token: Option<&str>,
    ) -> Result<Option<LogicalResponse>> {
        let url = self.url(path);
        let mut attempt = 0u32;

        let response = loop {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(token) = token {
                request = request.header(TOKEN_HEADER, token);
            }
            if let Some(namespace) = self.config.namespace.as_deref().filter(|ns| !ns.is_empty()) {
                request = request.header(NAMESPACE_HEADER, namespace);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => break response,
                Err(e) if e.is_connect() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    debug!(%method, path, attempt, delay_ms = delay.as_millis() as u64, "Retrying OpenBao request");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(BackendError::connection_failed(format!(
                        "{} {}: {}",
                        method, path, e
                    )))
                }
            }
        };

        let status = response.status();
        debug!(%method, path, status = status.as_u16(), "OpenBao response");

        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::not_found(path));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = response.bytes().await.map_err(|e| {
            BackendError::connection_failed(format!("failed to read response from {}: {}", path, e))
        })?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .ok()
                .filter(|body| !body.errors.is_empty())
                .map(|body| body.errors.join("; "))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).trim().to_string());
            return Err(BackendError::api(status.as_u16(), message));
        }

        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn transit_path(&self, operation: &str, key_name: &str) -> String {
        format!("{}/{}/{}", self.config.transit_mount.trim_matches('/'), operation, key_name)
    }

    fn kv_path(&self, path: &str) -> String {
        format!("{}/data/{}", self.config.kv_mount.trim_matches('/'), path.trim_start_matches('/'))
    }
}

fn configure_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> Result<reqwest::ClientBuilder> {
    let mut ca_files = Vec::new();
    if let Some(ca_cert) = &tls.ca_cert {
        ca_files.push(ca_cert.clone());
    }
    if let Some(ca_path) = &tls.ca_path {
        for entry in std::fs::read_dir(ca_path)? {
            let path = entry?.path();
            if path.is_file() {
                ca_files.push(path);
            }
        }
    }

    for file in ca_files {
        let pem = std::fs::read(&file)?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
            BackendError::config(format!("invalid CA certificate {}: {}", file.display(), e))
        })?;
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let mut pem = std::fs::read(cert)?;
            pem.push(b'\n');
            pem.extend(std::fs::read(key)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| BackendError::config(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => return Err(BackendError::config("clientCert and clientKey must be set together")),
    }

    if tls.insecure {
        warn!("TLS verification of the OpenBao server is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }
    if tls.tls_server_name.is_some() {
        warn!("tlsServerName is not supported; the host from the address is verified instead");
    }

    Ok(builder)
}

/// Exponential backoff for the `attempt`th retry (1-based), capped.
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE_DELAY.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

fn string_field<'a>(data: &'a Data, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str)
}

#[async_trait]
impl BackendClient for OpenBaoClient {
    async fn read(&self, path: &str) -> Result<Option<LogicalResponse>> {
        match self.request(Method::GET, path, None).await {
            Err(e) if e.is_not_found() => Ok(None),
            other => other,
        }
    }

    async fn write(&self, path: &str, data: &Data) -> Result<Option<LogicalResponse>> {
        self.request(Method::POST, path, Some(data)).await
    }

    async fn transit_encrypt(&self, key_name: &str, plaintext: &[u8]) -> Result<String> {
        let mut body = Data::new();
        body.insert("plaintext".into(), Value::String(STANDARD.encode(plaintext)));

        let data = self
            .write(&self.transit_path("encrypt", key_name), &body)
            .await?
            .and_then(|r| r.data)
            .ok_or_else(|| BackendError::invalid_response("no data returned from encrypt operation"))?;

        string_field(&data, "ciphertext")
            .map(str::to_string)
            .ok_or_else(|| BackendError::invalid_response("ciphertext not found in response"))
    }

    async fn transit_decrypt(&self, key_name: &str, ciphertext: &str) -> Result<Vec<u8>> {
        let mut body = Data::new();
        body.insert("ciphertext".into(), Value::String(ciphertext.to_string()));

        let data = self
            .write(&self.transit_path("decrypt", key_name), &body)
            .await?
            .and_then(|r| r.data)
            .ok_or_else(|| BackendError::invalid_response("no data returned from decrypt operation"))?;

        let encoded = string_field(&data, "plaintext")
            .ok_or_else(|| BackendError::invalid_response("plaintext not found in response"))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| BackendError::invalid_response(format!("failed to decode plaintext: {}", e)))
    }

    async fn transit_key_info(&self, key_name: &str) -> Result<KeyInfo> {
        let path = self.transit_path("keys", key_name);
        let data = self
            .read(&path)
            .await?
            .and_then(|r| r.data)
            .ok_or_else(|| BackendError::not_found(path))?;

        Ok(KeyInfo {
            name: key_name.to_string(),
            latest_version: data.get("latest_version").and_then(Value::as_u64).unwrap_or_default(),
            key_type: string_field(&data, "type").unwrap_or_default().to_string(),
            exportable: data.get("exportable").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn transit_create_key(&self, key_name: &str, key_type: &str) -> Result<()> {
        let mut body = Data::new();
        if !key_type.is_empty() {
            body.insert("type".into(), Value::String(key_type.to_string()));
        }
        self.write(&self.transit_path("keys", key_name), &body).await?;
        info!(key_name, key_type, "Created transit key");
        Ok(())
    }

    async fn kv_read(&self, path: &str) -> Result<KvSecret> {
        let full_path = self.kv_path(path);
        let mut data = self
            .read(&full_path)
            .await?
            .and_then(|r| r.data)
            .ok_or_else(|| BackendError::not_found(path))?;

        let version =
            data.get("metadata").and_then(|m| m.get("version")).and_then(Value::as_u64);
        match data.remove("data") {
            Some(Value::Object(inner)) => Ok(KvSecret { data: inner, version }),
            _ => Err(BackendError::invalid_response("invalid secret format")),
        }
    }

    async fn kv_write(&self, path: &str, data: &Data) -> Result<()> {
        let mut body = Data::new();
        body.insert("data".into(), Value::Object(data.clone()));
        self.write(&self.kv_path(path), &body).await?;
        Ok(())
    }

    async fn write_policy(&self, name: &str, policy: &str) -> Result<()> {
        let mut body = Data::new();
        body.insert("policy".into(), Value::String(policy.to_string()));
        self.write(&format!("sys/policies/acl/{}", name), &body).await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus> {
        let url = self.url("sys/health?standbyok=true&perfstandbyok=true");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::connection_failed(format!("health check: {}", e)))?;

        // Sealed and uninitialized servers answer with 5xx but still send the body.
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            BackendError::connection_failed(format!("failed to read health response: {}", e))
        })?;
        serde_json::from_slice(&bytes).map_err(|_| {
            BackendError::api(status.as_u16(), String::from_utf8_lossy(&bytes).trim().to_string())
        })
    }
}
