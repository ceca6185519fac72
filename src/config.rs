//! Chat configuration
//!
//! `ChatConfig` is built once at the application boundary and injected into
//! the session manager, agent console and HTTP issuer. Nothing below the
//! boundary reads the process environment.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the backend API key
pub const ENV_API_KEY: &str = "A3S_CHAT_API_KEY";

/// Environment variable holding the fixed agent identity
pub const ENV_AGENT_ID: &str = "A3S_CHAT_AGENT_ID";

/// Environment variable holding the credential issuer endpoint
pub const ENV_ISSUER_ENDPOINT: &str = "A3S_CHAT_ISSUER_ENDPOINT";

/// Configuration shared by both sides of a support conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// API key identifying the messaging backend account
    pub api_key: String,

    /// The single well-known agent identity every support channel includes
    #[serde(default = "default_agent_identity")]
    pub agent_identity: String,

    /// Credential issuer endpoint (e.g., `https://shop.example/api/stream-token`)
    pub issuer_endpoint: String,

    /// Display name given to new support channels
    #[serde(default = "default_channel_name")]
    pub channel_name: String,

    /// System message appended when the agent closes a conversation
    #[serde(default = "default_closure_notice")]
    pub closure_notice: String,

    /// Timeout for issuer requests in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_agent_identity() -> String {
    "sales-agent".to_string()
}

fn default_channel_name() -> String {
    "Sales Support".to_string()
}

fn default_closure_notice() -> String {
    "This chat has been closed by the sales associate.".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            agent_identity: default_agent_identity(),
            issuer_endpoint: String::new(),
            channel_name: default_channel_name(),
            closure_notice: default_closure_notice(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ChatConfig {
    /// Create a config with the required fields and defaults for the rest
    pub fn new(api_key: impl Into<String>, issuer_endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            issuer_endpoint: issuer_endpoint.into(),
            ..Default::default()
        }
    }

    /// Override the agent identity
    pub fn with_agent_identity(mut self, agent_identity: impl Into<String>) -> Self {
        self.agent_identity = agent_identity.into();
        self
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, secrets file, test map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup(ENV_API_KEY)
            .ok_or_else(|| ChatError::Config(format!("{} is not set", ENV_API_KEY)))?;
        let issuer_endpoint = lookup(ENV_ISSUER_ENDPOINT)
            .ok_or_else(|| ChatError::Config(format!("{} is not set", ENV_ISSUER_ENDPOINT)))?;

        let mut config = Self::new(api_key, issuer_endpoint);
        if let Some(agent) = lookup(ENV_AGENT_ID) {
            config.agent_identity = agent;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that required fields are present and well-formed
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ChatError::Config("apiKey must not be empty".to_string()));
        }
        if self.agent_identity.trim().is_empty() {
            return Err(ChatError::Config(
                "agentIdentity must not be empty".to_string(),
            ));
        }
        if !(self.issuer_endpoint.starts_with("http://")
            || self.issuer_endpoint.starts_with("https://"))
        {
            return Err(ChatError::Config(format!(
                "issuerEndpoint must be an http(s) URL, got '{}'",
                self.issuer_endpoint
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ChatError::Config(
                "requestTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
