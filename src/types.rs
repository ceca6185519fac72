//! Core chat types for the a3s-livechat system
//!
//! All types use camelCase JSON serialization for wire compatibility,
//! except channel metadata, which keeps the snake_case keys the
//! messaging backend stores (`customer_name`, `customer_id`, ...).

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel type used for every support conversation
pub const CHANNEL_TYPE: &str = "messaging";

/// Prefix of support channel ids (`support-<identity>`)
pub const CHANNEL_PREFIX: &str = "support-";

/// Display name used when the customer leaves theirs blank
pub const DEFAULT_CUSTOMER_NAME: &str = "Guest";

/// Anonymous customer identity, one per chat-widget lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Generate a fresh random (UUID v4) identity
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identity produced elsewhere
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channel identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic support channel id for a session identity
    pub fn for_identity(identity: &SessionIdentity) -> Self {
        Self(format!("{}{}", CHANNEL_PREFIX, identity.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Product the customer was looking at when opening the chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
    pub sku: String,
    pub name: String,
    pub price: f64,
}

impl ProductRef {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            price,
        }
    }

    /// Reject products that cannot be shown to the agent
    pub fn validate(&self) -> Result<()> {
        if self.sku.trim().is_empty() {
            return Err(ChatError::InvalidInput("product sku is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(ChatError::InvalidInput("product name is empty".to_string()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ChatError::InvalidInput(format!(
                "product price must be a non-negative number, got {}",
                self.price
            )));
        }
        Ok(())
    }
}

/// Product summary embedded in channel metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: f64,
}

/// Channel metadata, written once at creation
///
/// Only `closed` and `closure_announced` change afterwards, and only
/// through [`MetadataPatch`]. Both flags only ever go from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Conversation display name (e.g., "Sales Support")
    pub name: String,

    /// Referring page URL
    pub url: String,

    pub sku: String,

    pub product: Product,

    pub customer_name: String,

    pub customer_id: String,

    #[serde(default)]
    pub closed: bool,

    /// Set once the closure notice has been posted
    #[serde(default)]
    pub closure_announced: bool,
}

impl ChannelMetadata {
    /// Build the initial metadata for a new support conversation
    pub fn for_session(
        name: impl Into<String>,
        identity: &SessionIdentity,
        product: &ProductRef,
        customer_name: &str,
        referring_url: &str,
    ) -> Self {
        Self {
            name: name.into(),
            url: referring_url.to_string(),
            sku: product.sku.clone(),
            product: Product {
                name: product.name.clone(),
                price: product.price,
            },
            customer_name: customer_name.to_string(),
            customer_id: identity.as_str().to_string(),
            closed: false,
            closure_announced: false,
        }
    }
}

/// Partial metadata update
///
/// Product context and customer fields are immutable, so the patch can
/// only carry the closure flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closure_announced: Option<bool>,
}

impl MetadataPatch {
    /// Patch that marks a channel closed
    pub fn close() -> Self {
        Self {
            closed: Some(true),
            ..Self::default()
        }
    }

    /// Patch that records the closure notice as posted
    pub fn announced() -> Self {
        Self {
            closure_announced: Some(true),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_none() && self.closure_announced.is_none()
    }
}

/// A support conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,

    /// Backend channel type (always "messaging" for support channels)
    #[serde(rename = "type")]
    pub channel_type: String,

    /// Member identities: the customer and the agent
    pub members: Vec<String>,

    pub metadata: ChannelMetadata,

    /// Unix timestamp in milliseconds
    pub created_at: u64,

    /// Unix timestamp in milliseconds of the latest message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<u64>,
}

impl Channel {
    pub fn is_closed(&self) -> bool {
        self.metadata.closed
    }

    pub fn has_member(&self, identity: &str) -> bool {
        self.members.iter().any(|m| m == identity)
    }

    /// Most recent activity: last message, or creation when silent
    pub fn last_activity(&self) -> u64 {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

/// A user as announced to the transport on connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: String,
    pub name: String,
}

impl ChatUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Authored by a channel member
    #[default]
    Regular,
    /// Authored by the system (e.g., closure notice)
    System,
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier (msg-<uuid>)
    pub id: String,

    pub channel_id: ChannelId,

    /// Author identity; `None` for system messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub kind: MessageKind,

    pub text: String,

    /// Unix timestamp in milliseconds
    pub created_at: u64,
}

impl Message {
    /// Create a member-authored message
    pub fn regular(
        channel_id: ChannelId,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            channel_id,
            user_id: Some(user_id.into()),
            kind: MessageKind::Regular,
            text: text.into(),
            created_at: now_millis(),
        }
    }

    /// Create a system-authored message
    pub fn system(channel_id: ChannelId, text: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            channel_id,
            user_id: None,
            kind: MessageKind::System,
            text: text.into(),
            created_at: now_millis(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Channel query filter
///
/// Every field that is `Some` must match; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelFilter {
    /// Identity that must be among the members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
}

impl ChannelFilter {
    /// Open messaging channels the agent is a member of
    pub fn open_for_agent(agent_identity: impl Into<String>) -> Self {
        Self {
            member: Some(agent_identity.into()),
            channel_type: Some(CHANNEL_TYPE.to_string()),
            closed: Some(false),
        }
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        if let Some(ref member) = self.member {
            if !channel.has_member(member) {
                return false;
            }
        }
        if let Some(ref channel_type) = self.channel_type {
            if &channel.channel_type != channel_type {
                return false;
            }
        }
        if let Some(closed) = self.closed {
            if channel.is_closed() != closed {
                return false;
            }
        }
        true
    }
}

/// Ordering of channel listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelSort {
    /// Most recent activity first
    #[default]
    LastActivityDesc,
    /// Oldest channel first
    CreatedAsc,
}

impl ChannelSort {
    /// Sort channels in place; ties are broken by id for a stable order
    pub fn apply(&self, channels: &mut [Channel]) {
        match self {
            Self::LastActivityDesc => channels.sort_by(|a, b| {
                b.last_activity()
                    .cmp(&a.last_activity())
                    .then_with(|| a.id.cmp(&b.id))
            }),
            Self::CreatedAsc => channels.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }
    }
}

/// Live update pushed by a registry subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RegistryEvent {
    ChannelCreated { channel: Channel },
    ChannelUpdated { channel: Channel },
    MessageNew { message: Message },
}

impl RegistryEvent {
    /// Channel the event belongs to
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Self::ChannelCreated { channel } | Self::ChannelUpdated { channel } => &channel.id,
            Self::MessageNew { message } => &message.channel_id,
        }
    }
}

/// Read-only product context of a conversation, as shown to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub customer_name: String,
    pub url: Option<String>,
    pub sku: Option<String>,
    pub product_name: Option<String>,
}

impl ProductInfo {
    pub fn from_channel(channel: &Channel) -> Self {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
        let meta = &channel.metadata;
        Self {
            customer_name: non_empty(&meta.customer_name)
                .unwrap_or_else(|| "Customer".to_string()),
            url: non_empty(&meta.url),
            sku: non_empty(&meta.sku),
            product_name: non_empty(&meta.product.name),
        }
    }
}

impl fmt::Display for ProductInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());
        write!(
            f,
            "{} | URL: {} | SKU: {} | Product: {}",
            self.customer_name,
            na(&self.url),
            na(&self.sku),
            na(&self.product_name)
        )
    }
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
