//! Authentication strategies and token lifecycle state.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::config::{BackendConfig, TOKEN_ENV_VARS};
use super::error::{BackendError, Result};
use crate::config::env_first;

/// Tokens with less than this much lifetime left are renewed before use.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Where a login JWT comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum JwtSource {
    /// Supplied with the request, e.g. a pod token handed over by the CSI driver.
    Inline(String),
    /// Read from disk at every login, so projected tokens that rotate are picked up.
    File(PathBuf),
}

impl JwtSource {
    pub async fn load(&self) -> Result<String> {
        match self {
            JwtSource::Inline(jwt) => Ok(jwt.clone()),
            JwtSource::File(path) => {
                let jwt = tokio::fs::read_to_string(path).await.map_err(|e| {
                    BackendError::authentication_failed(format!(
                        "failed to read service account token {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(jwt.trim().to_string())
            }
        }
    }
}

/// Role login against `auth/<mount_path>/login`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginCredentials {
    pub mount_path: String,
    pub role: String,
    pub jwt: JwtSource,
}

impl LoginCredentials {
    pub fn login_path(&self) -> String {
        format!("auth/{}/login", self.mount_path.trim_matches('/'))
    }
}

/// How a client obtains its backend token.
#[derive(Clone, PartialEq)]
pub enum AuthMethod {
    /// Use the token as-is. It never expires from the client's point of view.
    Token(String),
    /// Kubernetes service-account login.
    Kubernetes(LoginCredentials),
    /// Generic JWT/OIDC role login.
    Jwt(LoginCredentials),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Token(_) => f.write_str("Token(<redacted>)"),
            AuthMethod::Kubernetes(c) => f
                .debug_struct("Kubernetes")
                .field("mount_path", &c.mount_path)
                .field("role", &c.role)
                .finish(),
            AuthMethod::Jwt(c) => {
                f.debug_struct("Jwt").field("mount_path", &c.mount_path).field("role", &c.role).finish()
            }
        }
    }
}

impl AuthMethod {
    /// Pick the strategy for a long-lived client.
    ///
    /// Order: static token, kubernetes auth, then `OPENBAO_TOKEN` /
    /// `VAULT_TOKEN`.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(AuthMethod::Token(token.clone()));
        }

        if let Some(k8s) = &config.kubernetes_auth {
            return Ok(AuthMethod::Kubernetes(LoginCredentials {
                mount_path: k8s.mount_path.clone(),
                role: k8s.role.clone(),
                jwt: JwtSource::File(k8s.token_path.clone()),
            }));
        }

        env_first(TOKEN_ENV_VARS)
            .map(AuthMethod::Token)
            .ok_or_else(|| BackendError::authentication_failed("no authentication method configured"))
    }

    /// Static token taken from `OPENBAO_TOKEN` / `VAULT_TOKEN`.
    pub fn from_env_token() -> Result<Self> {
        env_first(TOKEN_ENV_VARS)
            .map(AuthMethod::Token)
            .ok_or_else(|| BackendError::authentication_failed("no token available for token auth"))
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Token(_) => "token",
            AuthMethod::Kubernetes(_) => "kubernetes",
            AuthMethod::Jwt(_) => "jwt",
        }
    }
}

/// Current token and when it stops being valid.
#[derive(Debug, Default, Clone)]
pub(crate) struct TokenState {
    pub token: Option<String>,
    pub expires_at: Option<Instant>,
}

impl TokenState {
    pub fn set(&mut self, token: String, lease_duration: u64) {
        self.token = Some(token);
        self.set_lease(lease_duration);
    }

    pub fn set_lease(&mut self, lease_duration: u64) {
        self.expires_at =
            (lease_duration > 0).then(|| Instant::now() + Duration::from_secs(lease_duration));
    }

    /// Tokens without an expiry are never refreshed.
    pub fn needs_refresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.saturating_duration_since(now) <= REFRESH_THRESHOLD,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::config::KubernetesAuthConfig;

    #[test]
    fn test_static_token_wins() {
        let config = BackendConfig {
            token: Some("s.static".into()),
            kubernetes_auth: Some(KubernetesAuthConfig::new("app")),
            ..Default::default()
        };
        assert_eq!(AuthMethod::from_config(&config).unwrap(), AuthMethod::Token("s.static".into()));
    }

    #[test]
    fn test_kubernetes_auth_reads_token_file() {
        let config = BackendConfig {
            kubernetes_auth: Some(KubernetesAuthConfig::new("kms")),
            ..Default::default()
        };
        match AuthMethod::from_config(&config).unwrap() {
            AuthMethod::Kubernetes(creds) => {
                assert_eq!(creds.role, "kms");
                assert_eq!(creds.login_path(), "auth/kubernetes/login");
                assert!(matches!(creds.jwt, JwtSource::File(_)));
            }
            other => panic!("unexpected auth method {:?}", other),
        }
    }

    #[test]
    fn test_token_state_refresh_threshold() {
        let now = Instant::now();
        let mut state = TokenState::default();
        assert!(!state.needs_refresh(now));

        state.set("t".into(), 0);
        assert!(!state.needs_refresh(now), "tokens without a lease never refresh");

        state.set("t".into(), 3600);
        assert!(!state.needs_refresh(now));

        state.set("t".into(), 60);
        assert!(state.needs_refresh(now));
    }

    #[tokio::test]
    async fn test_jwt_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "eyJhbGciOi.payload.sig\n").unwrap();

        let jwt = tokio_test::assert_ok!(JwtSource::File(path).load().await);
        assert_eq!(jwt, "eyJhbGciOi.payload.sig");
    }

    #[tokio::test]
    async fn test_missing_jwt_file_is_auth_failure() {
        let err = tokio_test::assert_err!(JwtSource::File("/nonexistent/token".into()).load().await);
        assert!(err.is_auth_failure());
    }
}
