//! Agent console — the sales associate's side of support conversations
//!
//! Lists the open channels assigned to the configured agent identity,
//! keeps at most one of them selected, and closes conversations.

use crate::config::ChatConfig;
use crate::credential::Credential;
use crate::error::{ChatError, Result};
use crate::provider::ChannelRegistry;
use crate::types::{
    Channel, ChannelFilter, ChannelId, ChannelSort, ChatUser, Message, MetadataPatch, ProductInfo,
};
use crate::watch::{ChannelListWatch, MessageWatch};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Default cap on listed channels
const DEFAULT_LIST_LIMIT: usize = 100;

/// Console selection state
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Selection {
    #[default]
    NoSelection,
    Selected(Channel),
}

impl Selection {
    pub fn channel(&self) -> Option<&Channel> {
        match self {
            Self::NoSelection => None,
            Self::Selected(channel) => Some(channel),
        }
    }
}

/// The conversation currently displayed in the console
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveChannel {
    pub channel: Channel,
    pub info: ProductInfo,
}

/// Result of [`AgentConsole::close_channel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Channel closed and the closure notice appended
    Closed { notice: Message },
    /// Channel was already closed but its notice was missing; notice appended
    Announced { notice: Message },
    /// Channel was already closed and announced; nothing changed
    AlreadyClosed,
}

/// Agent-side console over a channel registry
pub struct AgentConsole {
    config: Arc<ChatConfig>,
    registry: Arc<dyn ChannelRegistry>,
    selection: RwLock<Selection>,

    /// Parent of every watch handed out by this console
    cancel: CancellationToken,
    list_limit: usize,
}

impl AgentConsole {
    pub fn new(config: ChatConfig, registry: Arc<dyn ChannelRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            selection: RwLock::new(Selection::NoSelection),
            cancel: CancellationToken::new(),
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    /// Override the maximum number of listed channels
    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }

    pub fn agent_identity(&self) -> &str {
        &self.config.agent_identity
    }

    /// Connect the agent identity to the transport
    pub async fn connect(&self, credential: &Credential) -> Result<()> {
        let agent = ChatUser::new(self.agent_identity(), "Sales Associate");
        self.registry.connect(&agent, credential).await?;
        tracing::info!(agent = %self.agent_identity(), "Agent console connected");
        Ok(())
    }

    /// Stop all watches and release the agent's connection
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        *self.selection.write().await = Selection::NoSelection;
        self.registry.disconnect(self.agent_identity()).await
    }

    fn open_filter(&self) -> ChannelFilter {
        ChannelFilter::open_for_agent(self.agent_identity())
    }

    /// Open conversations assigned to the agent, most recent activity first
    pub async fn list_open_channels(&self) -> Result<Vec<Channel>> {
        self.registry
            .list(
                &self.open_filter(),
                ChannelSort::LastActivityDesc,
                self.list_limit,
            )
            .await
    }

    /// Live version of [`list_open_channels`](Self::list_open_channels)
    pub async fn watch_open_channels(&self) -> Result<ChannelListWatch> {
        ChannelListWatch::start(
            self.registry.clone(),
            self.open_filter(),
            ChannelSort::LastActivityDesc,
            self.list_limit,
            self.cancel.child_token(),
        )
        .await
    }

    /// Make `channel` the displayed conversation, replacing any previous one
    pub async fn select_channel(&self, channel: &Channel) -> Result<ActiveChannel> {
        let current = self
            .registry
            .get(&channel.id)
            .await?
            .ok_or_else(|| ChatError::channel(channel.id.as_str(), "channel not found"))?;
        if !current.has_member(self.agent_identity()) {
            return Err(ChatError::channel(
                channel.id.as_str(),
                format!("channel is not assigned to '{}'", self.agent_identity()),
            ));
        }

        *self.selection.write().await = Selection::Selected(current.clone());
        tracing::debug!(channel = %current.id, "Channel selected");

        Ok(ActiveChannel {
            info: ProductInfo::from_channel(&current),
            channel: current,
        })
    }

    /// Clear the selection
    pub async fn deselect(&self) {
        *self.selection.write().await = Selection::NoSelection;
    }

    pub async fn selection(&self) -> Selection {
        self.selection.read().await.clone()
    }

    /// Currently displayed conversation, if any
    pub async fn active(&self) -> Option<ActiveChannel> {
        self.selection.read().await.channel().map(|channel| ActiveChannel {
            info: ProductInfo::from_channel(channel),
            channel: channel.clone(),
        })
    }

    /// Close a conversation
    ///
    /// Marks the channel closed, then appends the closure notice, then
    /// deselects it. The two registry writes are not transactional: if either
    /// fails the error is returned and the selection is kept for a manual
    /// retry. Retrying on a closed channel only appends a missing notice;
    /// a posted notice is recorded in the channel's `closure_announced` flag.
    pub async fn close_channel(&self, channel: &Channel) -> Result<CloseOutcome> {
        let channel_id = &channel.id;
        let current = self
            .registry
            .get(channel_id)
            .await
            .map_err(|e| into_channel_error(channel_id, e))?
            .ok_or_else(|| ChatError::channel(channel_id.as_str(), "channel not found"))?;
        if !current.has_member(self.agent_identity()) {
            return Err(ChatError::channel(
                channel_id.as_str(),
                format!("channel is not assigned to '{}'", self.agent_identity()),
            ));
        }

        if current.is_closed() {
            if current.metadata.closure_announced || self.has_notice(channel_id).await? {
                self.mark_announced(&current).await;
                tracing::debug!(channel = %channel_id, "Close requested on closed channel");
                return Ok(CloseOutcome::AlreadyClosed);
            }
            let notice = self.announce(&current).await?;
            self.deselect_if_active(channel_id).await;
            return Ok(CloseOutcome::Announced { notice });
        }

        self.registry
            .update_metadata(channel_id, &MetadataPatch::close())
            .await
            .map_err(|e| {
                tracing::warn!(channel = %channel_id, error = %e, "Failed to mark channel closed");
                into_channel_error(channel_id, e)
            })?;

        let notice = self.announce(&current).await?;
        self.deselect_if_active(channel_id).await;

        tracing::info!(
            channel = %channel_id,
            customer = %current.metadata.customer_id,
            "Channel closed"
        );
        Ok(CloseOutcome::Closed { notice })
    }

    /// Send an agent message on the selected conversation
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidInput("message text is empty".to_string()));
        }
        let channel_id = self.active_id().await?;
        self.registry
            .send_message(&channel_id, self.agent_identity(), text)
            .await
    }

    /// Live messages of the selected conversation
    pub async fn watch_active_messages(&self) -> Result<MessageWatch> {
        let channel_id = self.active_id().await?;
        MessageWatch::start(
            self.registry.as_ref(),
            channel_id,
            self.cancel.child_token(),
        )
        .await
    }

    async fn active_id(&self) -> Result<ChannelId> {
        self.selection
            .read()
            .await
            .channel()
            .map(|c| c.id.clone())
            .ok_or(ChatError::NoActiveChannel)
    }

    async fn announce(&self, channel: &Channel) -> Result<Message> {
        let channel_id = &channel.id;
        let notice = self
            .registry
            .send_system_message(channel_id, &self.config.closure_notice)
            .await
            .map_err(|e| {
                tracing::warn!(
                    channel = %channel_id,
                    error = %e,
                    "Channel closed but closure notice failed"
                );
                into_channel_error(channel_id, e)
            })?;
        self.mark_announced(channel).await;
        Ok(notice)
    }

    /// Record the posted notice on the channel; failure is logged only
    async fn mark_announced(&self, channel: &Channel) {
        if channel.metadata.closure_announced {
            return;
        }
        if let Err(e) = self
            .registry
            .update_metadata(&channel.id, &MetadataPatch::announced())
            .await
        {
            tracing::warn!(
                channel = %channel.id,
                error = %e,
                "Closure notice posted but not recorded"
            );
        }
    }

    /// Full-history check for a notice posted without being recorded
    async fn has_notice(&self, channel_id: &ChannelId) -> Result<bool> {
        let history = self
            .registry
            .messages(channel_id, usize::MAX)
            .await
            .map_err(|e| into_channel_error(channel_id, e))?;
        Ok(history
            .iter()
            .any(|m| m.is_system() && m.text == self.config.closure_notice))
    }

    async fn deselect_if_active(&self, channel_id: &ChannelId) {
        let mut selection = self.selection.write().await;
        if selection.channel().is_some_and(|c| &c.id == channel_id) {
            *selection = Selection::NoSelection;
        }
    }
}

fn into_channel_error(channel_id: &ChannelId, err: ChatError) -> ChatError {
    match err {
        ChatError::Channel { .. } => err,
        other => ChatError::channel(channel_id.as_str(), other.to_string()),
    }
}
