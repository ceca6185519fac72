//! In-memory channel registry
//!
//! Implements `ChannelRegistry` with maps behind `RwLock`s and a
//! `tokio::sync::broadcast` channel for live updates. Useful for tests and
//! single-process deployments; everything is lost on drop.

use crate::credential::{Credential, MemoryCredentialIssuer};
use crate::error::{ChatError, Result};
use crate::provider::{ChannelRegistry, RegistryInfo, Subscription};
use crate::types::{
    Channel, ChannelFilter, ChannelId, ChannelMetadata, ChannelSort, ChatUser, Message,
    MetadataPatch, RegistryEvent, CHANNEL_TYPE,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// In-memory registry configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Capacity of the live-update broadcast buffer
    pub event_capacity: usize,

    /// Messages kept per channel; older ones are dropped (0 = unlimited)
    pub max_messages_per_channel: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            max_messages_per_channel: 10_000,
        }
    }
}

struct ChannelRecord {
    channel: Channel,
    messages: Vec<Message>,
}

/// In-memory channel registry
pub struct MemoryRegistry {
    config: MemoryConfig,

    /// channel id → channel and its messages
    channels: RwLock<HashMap<ChannelId, ChannelRecord>>,

    /// identity → connected user
    connections: RwLock<HashMap<String, ChatUser>>,

    /// When set, tokens must have been minted by this issuer
    verifier: Option<Arc<MemoryCredentialIssuer>>,

    events: broadcast::Sender<RegistryEvent>,
}

impl MemoryRegistry {
    pub fn new(config: MemoryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            verifier: None,
            events,
        }
    }

    /// Verify connection tokens against an in-memory issuer
    pub fn with_verifier(mut self, issuer: Arc<MemoryCredentialIssuer>) -> Self {
        self.verifier = Some(issuer);
        self
    }

    /// Whether `identity` currently holds a transport connection
    pub async fn is_connected(&self, identity: &str) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    fn emit(&self, event: RegistryEvent) {
        // No receivers is not an error
        let _ = self.events.send(event);
    }

    async fn authenticate(&self, user: &ChatUser, credential: &Credential) -> Result<()> {
        if credential.identity != user.id {
            return Err(ChatError::Transport(format!(
                "token for '{}' presented by '{}'",
                credential.identity, user.id
            )));
        }
        if credential.is_expired() {
            return Err(ChatError::Transport(format!(
                "token for '{}' has expired",
                user.id
            )));
        }
        if let Some(ref verifier) = self.verifier {
            match verifier.verify(&credential.token)? {
                Some(ref identity) if identity == &user.id => {}
                _ => {
                    return Err(ChatError::Transport(format!(
                        "token rejected for '{}'",
                        user.id
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl ChannelRegistry for MemoryRegistry {
    async fn connect(&self, user: &ChatUser, credential: &Credential) -> Result<()> {
        self.authenticate(user, credential).await?;

        let mut connections = self.connections.write().await;
        connections.insert(user.id.clone(), user.clone());

        tracing::debug!(user = %user.id, "User connected");
        Ok(())
    }

    async fn disconnect(&self, identity: &str) -> Result<()> {
        let removed = self.connections.write().await.remove(identity);
        if removed.is_some() {
            tracing::debug!(user = %identity, "User disconnected");
        }
        Ok(())
    }

    async fn create_or_join(
        &self,
        channel_id: &ChannelId,
        members: &[String],
        metadata: &ChannelMetadata,
    ) -> Result<Channel> {
        if channel_id.as_str().is_empty() {
            return Err(ChatError::channel("", "channel id must not be empty"));
        }
        if members.is_empty() {
            return Err(ChatError::channel(
                channel_id.as_str(),
                "channel needs at least one member",
            ));
        }

        let mut channels = self.channels.write().await;

        if let Some(record) = channels.get_mut(channel_id) {
            let mut joined = false;
            for member in members {
                if !record.channel.has_member(member) {
                    record.channel.members.push(member.clone());
                    joined = true;
                }
            }
            let channel = record.channel.clone();
            if joined {
                self.emit(RegistryEvent::ChannelUpdated {
                    channel: channel.clone(),
                });
            }
            tracing::debug!(channel = %channel_id, "Joined existing channel");
            return Ok(channel);
        }

        let mut unique: Vec<String> = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(member) {
                unique.push(member.clone());
            }
        }

        let channel = Channel {
            id: channel_id.clone(),
            channel_type: CHANNEL_TYPE.to_string(),
            members: unique,
            metadata: metadata.clone(),
            created_at: crate::types::now_millis(),
            last_message_at: None,
        };
        channels.insert(
            channel_id.clone(),
            ChannelRecord {
                channel: channel.clone(),
                messages: Vec::new(),
            },
        );
        self.emit(RegistryEvent::ChannelCreated {
            channel: channel.clone(),
        });

        tracing::debug!(channel = %channel_id, "Channel created");
        Ok(channel)
    }

    async fn get(&self, channel_id: &ChannelId) -> Result<Option<Channel>> {
        let channels = self.channels.read().await;
        Ok(channels.get(channel_id).map(|r| r.channel.clone()))
    }

    async fn list(
        &self,
        filter: &ChannelFilter,
        sort: ChannelSort,
        limit: usize,
    ) -> Result<Vec<Channel>> {
        let channels = self.channels.read().await;
        let mut matched: Vec<Channel> = channels
            .values()
            .map(|r| &r.channel)
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        drop(channels);

        sort.apply(&mut matched);
        matched.truncate(limit);
        Ok(matched)
    }

    async fn update_metadata(
        &self,
        channel_id: &ChannelId,
        patch: &MetadataPatch,
    ) -> Result<Channel> {
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(channel_id)
            .ok_or_else(|| ChatError::channel(channel_id.as_str(), "channel not found"))?;

        let metadata = &mut record.channel.metadata;
        if metadata.closed && patch.closed == Some(false) {
            return Err(ChatError::channel(
                channel_id.as_str(),
                "a closed channel cannot be reopened",
            ));
        }
        if metadata.closure_announced && patch.closure_announced == Some(false) {
            return Err(ChatError::channel(
                channel_id.as_str(),
                "a closure announcement cannot be withdrawn",
            ));
        }

        let mut changed = false;
        if let Some(closed) = patch.closed {
            changed |= metadata.closed != closed;
            metadata.closed = closed;
        }
        if let Some(announced) = patch.closure_announced {
            changed |= metadata.closure_announced != announced;
            metadata.closure_announced = announced;
        }

        let channel = record.channel.clone();
        if changed {
            self.emit(RegistryEvent::ChannelUpdated {
                channel: channel.clone(),
            });
        }
        Ok(channel)
    }

    async fn send_message(
        &self,
        channel_id: &ChannelId,
        user_id: &str,
        text: &str,
    ) -> Result<Message> {
        if !self.is_connected(user_id).await {
            return Err(ChatError::Transport(format!(
                "'{}' is not connected",
                user_id
            )));
        }

        let message = Message::regular(channel_id.clone(), user_id, text);
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(channel_id)
            .ok_or_else(|| ChatError::channel(channel_id.as_str(), "channel not found"))?;
        if !record.channel.has_member(user_id) {
            return Err(ChatError::channel(
                channel_id.as_str(),
                format!("'{}' is not a member", user_id),
            ));
        }

        self.append(record, message.clone());
        Ok(message)
    }

    async fn send_system_message(&self, channel_id: &ChannelId, text: &str) -> Result<Message> {
        let message = Message::system(channel_id.clone(), text);
        let mut channels = self.channels.write().await;
        let record = channels
            .get_mut(channel_id)
            .ok_or_else(|| ChatError::channel(channel_id.as_str(), "channel not found"))?;

        self.append(record, message.clone());
        Ok(message)
    }

    async fn messages(&self, channel_id: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        let channels = self.channels.read().await;
        let record = channels
            .get(channel_id)
            .ok_or_else(|| ChatError::NotFound(format!("Channel not found: {}", channel_id)))?;

        let skip = record.messages.len().saturating_sub(limit);
        Ok(record.messages[skip..].to_vec())
    }

    async fn subscribe(&self) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            stream: BroadcastStream::new(self.events.subscribe()),
        }))
    }

    async fn info(&self) -> Result<RegistryInfo> {
        let channels = self.channels.read().await;
        let connections = self.connections.read().await;
        Ok(RegistryInfo {
            provider: "memory".to_string(),
            channels: channels.len(),
            messages: channels.values().map(|r| r.messages.len()).sum(),
            connections: connections.len(),
            subscribers: self.events.receiver_count(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl MemoryRegistry {
    fn append(&self, record: &mut ChannelRecord, message: Message) {
        record.channel.last_message_at = Some(message.created_at);
        record.messages.push(message.clone());

        let max = self.config.max_messages_per_channel;
        if max > 0 && record.messages.len() > max {
            let drain_count = record.messages.len() - max;
            record.messages.drain(..drain_count);
        }

        self.emit(RegistryEvent::MessageNew { message });
    }
}

/// Live-update subscription on a `MemoryRegistry`
pub struct MemorySubscription {
    stream: BroadcastStream<RegistryEvent>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<RegistryEvent>> {
        loop {
            match self.stream.next().await {
                Some(Ok(event)) => return Ok(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Subscriber lagged, registry events dropped");
                }
                None => return Ok(None),
            }
        }
    }
}
