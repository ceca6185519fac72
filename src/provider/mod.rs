//! Channel registry trait: the core abstraction for messaging backends
//!
//! All messaging backends (hosted chat services, in-memory, etc.) implement
//! `ChannelRegistry` to provide a uniform API for connecting users,
//! creating and listing channels, patching metadata, and delivering messages.

use crate::credential::Credential;
use crate::error::Result;
use crate::types::{
    Channel, ChannelFilter, ChannelId, ChannelMetadata, ChannelSort, ChatUser, Message,
    MetadataPatch, RegistryEvent,
};
use async_trait::async_trait;

pub mod memory;

/// Core trait for messaging backends
///
/// The registry owns channels, messages and connections. The session
/// manager and agent console perform all cross-role coordination through it.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    /// Open a transport connection for `user`, authenticated by `credential`
    async fn connect(&self, user: &ChatUser, credential: &Credential) -> Result<()>;

    /// Release the transport connection of `identity` (no-op if not connected)
    async fn disconnect(&self, identity: &str) -> Result<()>;

    /// Create a channel, or join it when `channel_id` already exists
    ///
    /// Joining never overwrites existing metadata and never duplicates members.
    async fn create_or_join(
        &self,
        channel_id: &ChannelId,
        members: &[String],
        metadata: &ChannelMetadata,
    ) -> Result<Channel>;

    /// Fetch a channel by id
    async fn get(&self, channel_id: &ChannelId) -> Result<Option<Channel>>;

    /// Query channels matching `filter`, ordered by `sort`, at most `limit`
    async fn list(
        &self,
        filter: &ChannelFilter,
        sort: ChannelSort,
        limit: usize,
    ) -> Result<Vec<Channel>>;

    /// Apply a partial metadata update, returning the updated channel
    async fn update_metadata(
        &self,
        channel_id: &ChannelId,
        patch: &MetadataPatch,
    ) -> Result<Channel>;

    /// Deliver a member-authored message
    async fn send_message(
        &self,
        channel_id: &ChannelId,
        user_id: &str,
        text: &str,
    ) -> Result<Message>;

    /// Append a system-authored message
    async fn send_system_message(&self, channel_id: &ChannelId, text: &str) -> Result<Message>;

    /// Most recent messages of a channel, oldest first, at most `limit`
    async fn messages(&self, channel_id: &ChannelId, limit: usize) -> Result<Vec<Message>>;

    /// Subscribe to live registry updates (channel created/updated, new message)
    async fn subscribe(&self) -> Result<Box<dyn Subscription>>;

    /// Get registry info (channel count, etc.)
    async fn info(&self) -> Result<RegistryInfo>;

    /// Registry name (e.g., "memory")
    fn name(&self) -> &str;

    /// Health check, returns true if the registry is reachable
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Async subscription handle for receiving registry updates
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receive the next update; `None` once the registry is gone
    async fn next(&mut self) -> Result<Option<RegistryEvent>>;
}

/// Registry status information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryInfo {
    /// Registry name
    pub provider: String,
    /// Total channels stored
    pub channels: usize,
    /// Total messages stored
    pub messages: usize,
    /// Number of open transport connections
    pub connections: usize,
    /// Number of live subscribers
    pub subscribers: usize,
}
