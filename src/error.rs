//! Error types for a3s-livechat

use thiserror::Error;

/// Errors that can occur in the chat session lifecycle
#[derive(Debug, Error)]
pub enum ChatError {
    /// Credential issuance failed (missing identity, issuer unreachable, issuer fault)
    #[error("Credential error for '{identity}': {reason}")]
    Credential {
        identity: String,
        reason: String,
    },

    /// Channel create/join/update/announce failed
    #[error("Channel error on '{channel_id}': {reason}")]
    Channel {
        channel_id: String,
        reason: String,
    },

    /// Transport connection missing or lost mid-session
    #[error("Transport error: {0}")]
    Transport(String),

    /// Customer-authored message against a closed channel
    #[error("Channel '{0}' is closed")]
    ChannelClosed(String),

    /// Console operation that needs a selected channel
    #[error("No active channel selected")]
    NoActiveChannel,

    /// Channel or session not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied input rejected before any external call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Pending work was abandoned by widget deactivation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChatError {
    /// Build a credential error for an identity
    pub fn credential(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Credential {
            identity: identity.into(),
            reason: reason.into(),
        }
    }

    /// Build a channel error for a channel id
    pub fn channel(channel_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Channel {
            channel_id: channel_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether a user-initiated retry of the same operation can succeed
    ///
    /// Closed channels, bad input and configuration errors stay failed no
    /// matter how often they are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Credential { .. }
                | Self::Channel { .. }
                | Self::Transport(_)
                | Self::Cancelled(_)
                | Self::Http(_)
        )
    }
}

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;
