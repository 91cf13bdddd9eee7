//! Cloud KMS REST client.
//!
//! # Responsibilities
//! - Wrap and unwrap data keys through the `:encrypt` / `:decrypt` methods
//! - Resolve the key resource name from the live configuration on every call
//! - Map transport, status and payload failures onto `KeyServiceError`
//!
//! # Security Constraints
//! - The bearer token comes only from `ENVELOPE_KMS_ACCESS_TOKEN`
//! - Neither the token nor key material is logged or shown by `Debug`

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use zeroize::Zeroize;

use crate::config::{ConfigSnapshot, ConfigStore};
use crate::crypto::{DataKey, WrappedKey};
use crate::kms::types::{KeyServiceError, KeyWrapService, KmsKeyPath};
use crate::observability::metrics;

/// Public Cloud KMS endpoint.
pub const KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com/v1";

/// Setting that overrides [`KMS_ENDPOINT`].
pub const ENDPOINT_SETTING: &str = "encryption.endpoint";

/// Environment variable holding the OAuth bearer token.
pub const ACCESS_TOKEN_ENV_VAR: &str = "ENVELOPE_KMS_ACCESS_TOKEN";

/// Key-wrapping service backed by Cloud KMS.
#[derive(Clone)]
pub struct CloudKmsClient {
    config: Arc<ConfigStore>,
    http: reqwest::Client,
    access_token: String,
    timeout: Duration,
}

impl CloudKmsClient {
    /// Create a client that addresses its key through `config`.
    pub fn new(
        config: Arc<ConfigStore>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, KeyServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                KeyServiceError::Misconfigured(format!("failed to build HTTP client: {}", e))
            })?;

        let client = Self {
            config,
            http,
            access_token: access_token.into(),
            timeout,
        };

        match client.key_path() {
            Ok(path) => tracing::info!(key = %path, "Cloud KMS client initialized"),
            Err(e) => {
                tracing::warn!(error = %e, "Cloud KMS client initialized without a usable key path")
            }
        }

        Ok(client)
    }

    /// Create a client reading the bearer token from `ENVELOPE_KMS_ACCESS_TOKEN`.
    pub fn from_env(config: Arc<ConfigStore>, timeout: Duration) -> Result<Self, KeyServiceError> {
        let token = std::env::var(ACCESS_TOKEN_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                KeyServiceError::Misconfigured(format!(
                    "environment variable {} not set",
                    ACCESS_TOKEN_ENV_VAR
                ))
            })?;
        Self::new(config, token, timeout)
    }

    /// Key resource name under the current configuration.
    pub fn key_path(&self) -> Result<KmsKeyPath, KeyServiceError> {
        KmsKeyPath::from_snapshot(&self.config.snapshot())
    }

    fn method_url(snapshot: &ConfigSnapshot, method: &str) -> Result<Url, KeyServiceError> {
        let path = KmsKeyPath::from_snapshot(snapshot)?;
        let configured = snapshot.get(ENDPOINT_SETTING);
        let endpoint = if configured.is_empty() { KMS_ENDPOINT } else { configured.as_str() };

        let url = format!("{}/{}:{}", endpoint.trim_end_matches('/'), path, method);
        Url::parse(&url).map_err(|e| {
            KeyServiceError::Misconfigured(format!("invalid KMS URL '{}': {}", url, e))
        })
    }

    async fn call(&self, method: &'static str, body: &Value) -> Result<Value, KeyServiceError> {
        let url = Self::method_url(&self.config.snapshot(), method)?;

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(method, e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(method, e))?;
        if !status.is_success() {
            metrics::record_key_service_error(method);
            tracing::warn!(method, status = status.as_u16(), "KMS call failed");
            return Err(KeyServiceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| KeyServiceError::Malformed(format!("{}: {}", method, e)))
    }

    fn transport_error(&self, method: &'static str, e: reqwest::Error) -> KeyServiceError {
        metrics::record_key_service_error(method);
        if e.is_timeout() {
            KeyServiceError::Timeout(self.timeout)
        } else {
            tracing::warn!(method, error = %e, "KMS request failed");
            KeyServiceError::Request(e.to_string())
        }
    }
}

fn string_field<'a>(response: &'a Value, field: &str) -> Result<&'a str, KeyServiceError> {
    response
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| KeyServiceError::Malformed(format!("response missing '{}'", field)))
}

#[async_trait]
impl KeyWrapService for CloudKmsClient {
    async fn wrap_key(&self, key: &DataKey) -> Result<WrappedKey, KeyServiceError> {
        let mut body = json!({ "plaintext": STANDARD.encode(key.as_bytes()) });
        let result = self.call("encrypt", &body).await;
        if let Some(Value::String(plaintext)) = body.get_mut("plaintext") {
            plaintext.zeroize();
        }

        let response = result?;
        Ok(WrappedKey::new(string_field(&response, "ciphertext")?))
    }

    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<DataKey, KeyServiceError> {
        let body = json!({ "ciphertext": wrapped.as_str() });
        let mut response = self.call("decrypt", &body).await?;

        let decoded = STANDARD
            .decode(string_field(&response, "plaintext")?)
            .map_err(|e| KeyServiceError::Malformed(format!("plaintext is not base64: {}", e)));
        if let Some(Value::String(plaintext)) = response.get_mut("plaintext") {
            plaintext.zeroize();
        }

        let mut bytes = decoded?;
        let key = DataKey::from_slice(&bytes);
        bytes.zeroize();
        Ok(key?)
    }
}

impl std::fmt::Debug for CloudKmsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudKmsClient")
            .field("key_path", &self.key_path().map(|p| p.to_string()).ok())
            .field("timeout_secs", &self.timeout.as_secs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(endpoint: Option<&str>) -> ConfigSnapshot {
        let mut value = json!({
            "project": "p",
            "encryption": { "location": "global", "keyring": "ring", "key": "k" }
        });
        if let Some(endpoint) = endpoint {
            value["encryption"]["endpoint"] = json!(endpoint);
        }
        ConfigSnapshot::new(value, "c.json")
    }

    #[test]
    fn test_default_endpoint() {
        let url = CloudKmsClient::method_url(&snapshot(None), "encrypt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloudkms.googleapis.com/v1/projects/p/locations/global/keyRings/ring/cryptoKeys/k:encrypt"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let snapshot = snapshot(Some("http://127.0.0.1:9000/v1/"));
        let url = CloudKmsClient::method_url(&snapshot, "decrypt").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/v1/projects/p/locations/global/keyRings/ring/cryptoKeys/k:decrypt"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let err = CloudKmsClient::method_url(&snapshot(Some("not a url")), "encrypt").unwrap_err();
        assert!(matches!(err, KeyServiceError::Misconfigured(_)));
    }

    #[test]
    fn test_string_field() {
        let response = json!({ "ciphertext": "abc", "n": 1 });
        assert_eq!(string_field(&response, "ciphertext").unwrap(), "abc");
        assert!(string_field(&response, "n").is_err());
        assert!(string_field(&response, "plaintext").is_err());
    }
}
