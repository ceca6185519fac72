//! Credential issuance — exchange a session identity for a transport token
//!
//! The issuer is a trusted collaborator. `HttpCredentialIssuer` talks to the
//! storefront's token endpoint; `MemoryCredentialIssuer` mints opaque tokens
//! in-process for tests and single-process use.

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::types::now_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Short-lived proof binding one identity to backend access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Identity the token is scoped to
    pub identity: String,

    /// Opaque token presented to the transport
    pub token: String,

    /// Unix timestamp in milliseconds
    pub issued_at: u64,

    /// Unix timestamp in milliseconds; `None` for tokens without expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Credential {
    pub fn new(identity: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            token: token.into(),
            issued_at: now_millis(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| now_millis() >= exp)
    }
}

/// Trusted token issuer
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Issue a token scoped to exactly `identity`
    async fn issue_token(&self, identity: &str) -> Result<Credential>;

    /// Issuer name (e.g., "http", "memory")
    fn name(&self) -> &str;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    user_id: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Issuer backed by the storefront's token endpoint
///
/// Sends `POST {"userId": ...}` and expects `{"token": ...}`; failures come
/// back as `{"error": ...}` with a non-2xx status.
pub struct HttpCredentialIssuer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialIssuer {
    /// Build an issuer from the chat config
    pub fn new(config: &ChatConfig) -> Result<Self> {
        config.validate()?;
        Self::with_endpoint(config.issuer_endpoint.clone(), config.request_timeout())
    }

    /// Build an issuer for an explicit endpoint and timeout
    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue_token(&self, identity: &str) -> Result<Credential> {
        if identity.trim().is_empty() {
            return Err(ChatError::credential(identity, "Missing userId"));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&TokenRequest { user_id: identity })
            .send()
            .await
            .map_err(|e| ChatError::credential(identity, format!("issuer unreachable: {}", e)))?;

        let status = response.status();
        let body: TokenResponse = response.json().await.map_err(|e| {
            ChatError::credential(
                identity,
                format!("invalid issuer response (HTTP {}): {}", status.as_u16(), e),
            )
        })?;

        if !status.is_success() {
            let reason = body.error.unwrap_or_else(|| "no error detail".to_string());
            tracing::warn!(
                identity = %identity,
                status = status.as_u16(),
                reason = %reason,
                "Credential issuance rejected"
            );
            return Err(ChatError::credential(
                identity,
                format!("issuer returned HTTP {}: {}", status.as_u16(), reason),
            ));
        }

        match body.token {
            Some(token) if !token.is_empty() => {
                tracing::debug!(identity = %identity, "Credential issued");
                Ok(Credential::new(identity, token))
            }
            _ => Err(ChatError::credential(
                identity,
                body.error
                    .unwrap_or_else(|| "issuer response carried no token".to_string()),
            )),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// In-process issuer of opaque random tokens
///
/// Keeps token → credential in memory so a registry can verify tokens on
/// connect. Tokens are lost on drop.
pub struct MemoryCredentialIssuer {
    /// token → credential
    tokens: RwLock<HashMap<String, Credential>>,
    ttl: Option<Duration>,
}

impl MemoryCredentialIssuer {
    /// Create an issuer whose tokens never expire
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    /// Create an issuer whose tokens expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Resolve a token to the identity it was issued for
    ///
    /// Returns `None` for unknown or expired tokens.
    pub fn verify(&self, token: &str) -> Result<Option<String>> {
        let tokens = self.tokens.read().map_err(|e| {
            ChatError::Transport(format!("Failed to acquire token lock: {}", e))
        })?;
        Ok(tokens
            .get(token)
            .filter(|c| !c.is_expired())
            .map(|c| c.identity.clone()))
    }

    /// Number of tokens issued so far
    pub fn issued(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or_default()
    }
}

impl Default for MemoryCredentialIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialIssuer for MemoryCredentialIssuer {
    async fn issue_token(&self, identity: &str) -> Result<Credential> {
        if identity.trim().is_empty() {
            return Err(ChatError::credential(identity, "Missing userId"));
        }

        let mut credential = Credential::new(identity, format!("tok-{}", uuid::Uuid::new_v4()));
        if let Some(ttl) = self.ttl {
            credential.expires_at = Some(credential.issued_at + ttl.as_millis() as u64);
        }

        let mut tokens = self.tokens.write().map_err(|e| {
            ChatError::credential(identity, format!("Failed to acquire token lock: {}", e))
        })?;
        tokens.insert(credential.token.clone(), credential.clone());

        Ok(credential)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
