//! # Remote Secret Stores
//!
//! Abstraction over external secret managers, addressed by
//! `(project id, secret name, version)`.
//!
//! Implementations:
//! - [`InMemorySecretStore`]: local development and tests
//! - [`HttpSecretStore`]: Secret-Manager-style REST API with bearer auth

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose};
use errors::SecretError;
use parking_lot::RwLock;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store name used in diagnostics.
    fn name(&self) -> &str;

    /// Fetch one secret version. `Ok(None)` means the secret does not exist.
    async fn get_secret(
        &self,
        project_id: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<String>, SecretError>;

    /// Health check for the store
    async fn is_available(&self) -> bool;
}

/// Local secret store keyed by `(project id, name)`; holds one version per secret.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<(String, String), String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, project_id: &str, name: &str, value: &str) -> Self {
        self.insert(project_id, name, value);
        self
    }

    pub fn insert(&self, project_id: &str, name: &str, value: &str) {
        self.secrets.write().insert(
            (project_id.to_string(), name.to_string()),
            value.to_string(),
        );
    }

    pub fn remove(&self, project_id: &str, name: &str) -> Option<String> {
        self.secrets
            .write()
            .remove(&(project_id.to_string(), name.to_string()))
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn get_secret(
        &self,
        project_id: &str,
        name: &str,
        _version: &str,
    ) -> Result<Option<String>, SecretError> {
        Ok(self
            .secrets
            .read()
            .get(&(project_id.to_string(), name.to_string()))
            .cloned())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Secret store speaking the Secret Manager REST protocol:
/// `GET {base}/v1/projects/{project}/secrets/{name}/versions/{version}:access`
/// answering `{"payload": {"data": "<base64>"}}`.
pub struct HttpSecretStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpSecretStore {
    /// Build a store whose every request is bounded by `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SecretError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SecretError::ConnectionFailed {
                store: "http".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn access_url(&self, project_id: &str, name: &str, version: &str) -> String {
        format!(
            "{}/v1/projects/{}/secrets/{}/versions/{}:access",
            self.base_url,
            urlencoding::encode(project_id),
            urlencoding::encode(name),
            urlencoding::encode(version)
        )
    }
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn get_secret(
        &self,
        project_id: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<String>, SecretError> {
        let mut request = self.client.get(self.access_url(project_id, name, version));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SecretError::Timeout {
                    name: name.to_string(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                SecretError::ConnectionFailed {
                    store: self.name().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                debug!(secret = name, "secret not present in store");
                return Ok(None);
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SecretError::AuthFailed {
                    store: self.name().to_string(),
                    reason: format!("secret store returned {status}"),
                });
            }
            _ if !status.is_success() => {
                return Err(SecretError::ConnectionFailed {
                    store: self.name().to_string(),
                    reason: format!("secret store returned {status}"),
                });
            }
            _ => {}
        }

        let format_error = |reason: String| SecretError::FormatError {
            name: name.to_string(),
            reason,
        };

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format_error(e.to_string()))?;
        let encoded = body["payload"]["data"]
            .as_str()
            .ok_or_else(|| format_error("payload.data missing".to_string()))?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| format_error(e.to_string()))?;
        let value = String::from_utf8(decoded).map_err(|e| format_error(e.to_string()))?;

        Ok(Some(value))
    }

    async fn is_available(&self) -> bool {
        self.client.get(&self.base_url).send().await.is_ok()
    }
}
