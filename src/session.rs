//! Customer-side session manager
//!
//! Allocates an anonymous identity per chat session, exchanges it for a
//! credential, connects it to the transport and creates-or-joins the
//! session's support channel.

use crate::config::ChatConfig;
use crate::credential::{Credential, CredentialIssuer};
use crate::error::{ChatError, Result};
use crate::provider::ChannelRegistry;
use crate::types::{
    Channel, ChannelId, ChannelMetadata, ChatUser, Message, ProductRef, SessionIdentity,
    DEFAULT_CUSTOMER_NAME,
};
use crate::watch::MessageWatch;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A started chat session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub identity: SessionIdentity,
    pub display_name: String,
    pub product: ProductRef,
    credential: Credential,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Deterministic channel id of this session
    pub fn channel_id(&self) -> ChannelId {
        ChannelId::for_identity(&self.identity)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct SessionState {
    credential: Credential,
    display_name: String,
    channel_id: Option<ChannelId>,
    cancel: CancellationToken,
}

/// Session manager for storefront chat widgets
///
/// Tracks live sessions (identity → credential, channel) so teardown can
/// release exactly what a session acquired.
pub struct SessionManager {
    config: Arc<ChatConfig>,
    issuer: Arc<dyn CredentialIssuer>,
    registry: Arc<dyn ChannelRegistry>,

    /// Live sessions (identity → state)
    sessions: Arc<RwLock<HashMap<SessionIdentity, SessionState>>>,
}

impl SessionManager {
    pub fn new(
        config: ChatConfig,
        issuer: Arc<dyn CredentialIssuer>,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            issuer,
            registry,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Start a session: fresh identity plus a credential for it
    pub async fn start_session(
        &self,
        display_name: &str,
        product: &ProductRef,
    ) -> Result<SessionHandle> {
        self.start_session_cancellable(display_name, product, CancellationToken::new())
            .await
    }

    /// Start a session that is abandoned when `cancel` fires
    ///
    /// A credential that arrives after cancellation is discarded and the
    /// session is never registered.
    pub async fn start_session_cancellable(
        &self,
        display_name: &str,
        product: &ProductRef,
        cancel: CancellationToken,
    ) -> Result<SessionHandle> {
        product.validate()?;
        let display_name = normalize_name(display_name);
        let identity = SessionIdentity::generate();

        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled(format!(
                "session {} cancelled before issuance",
                identity
            )));
        }

        let credential = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(identity = %identity, "Credential request abandoned");
                return Err(ChatError::Cancelled(format!(
                    "session {} cancelled during issuance",
                    identity
                )));
            }
            issued = self.issuer.issue_token(identity.as_str()) => issued?,
        };

        if credential.identity != identity.as_str() {
            return Err(ChatError::credential(
                identity.as_str(),
                format!("issuer returned a token for '{}'", credential.identity),
            ));
        }

        {
            let mut sessions = self.sessions.write().await;
            if cancel.is_cancelled() {
                tracing::debug!(identity = %identity, "Discarding credential for cancelled session");
                return Err(ChatError::Cancelled(format!(
                    "session {} cancelled after issuance",
                    identity
                )));
            }
            sessions.insert(
                identity.clone(),
                SessionState {
                    credential: credential.clone(),
                    display_name: display_name.clone(),
                    channel_id: None,
                    cancel: cancel.clone(),
                },
            );
        }

        tracing::info!(
            identity = %identity,
            issuer = self.issuer.name(),
            sku = %product.sku,
            "Chat session started"
        );

        Ok(SessionHandle {
            identity,
            display_name,
            product: product.clone(),
            credential,
            cancel,
        })
    }

    /// Connect the session identity and create-or-join its support channel
    ///
    /// Requires a credential from [`start_session`](Self::start_session).
    /// Joining an existing channel keeps the metadata its creator wrote.
    pub async fn open_channel(
        &self,
        identity: &SessionIdentity,
        product: &ProductRef,
        display_name: &str,
        referring_url: &str,
    ) -> Result<Channel> {
        product.validate()?;
        let (credential, cancel) = {
            let sessions = self.sessions.read().await;
            let state = sessions.get(identity).ok_or_else(|| {
                ChatError::credential(identity.as_str(), "no credential issued for this session")
            })?;
            (state.credential.clone(), state.cancel.clone())
        };
        let display_name = normalize_name(display_name);
        let cancelled = || ChatError::Cancelled(format!("session {} closed", identity));

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let user = ChatUser::new(identity.as_str(), display_name.clone());
        tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            connected = self.registry.connect(&user, &credential) => connected?,
        }
        // Teardown may have run while the connect was in flight
        if cancel.is_cancelled() {
            self.registry.disconnect(identity.as_str()).await?;
            return Err(cancelled());
        }

        let channel_id = ChannelId::for_identity(identity);
        let members = [
            identity.as_str().to_string(),
            self.config.agent_identity.clone(),
        ];
        let metadata = ChannelMetadata::for_session(
            self.config.channel_name.clone(),
            identity,
            product,
            &display_name,
            referring_url,
        );

        let channel = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            joined = self.registry.create_or_join(&channel_id, &members, &metadata) => {
                joined.map_err(|e| into_channel_error(&channel_id, e))?
            }
        };

        {
            let mut sessions = self.sessions.write().await;
            if let Some(state) = sessions.get_mut(identity) {
                state.channel_id = Some(channel.id.clone());
            }
        }

        tracing::info!(
            identity = %identity,
            channel = %channel.id,
            closed = channel.is_closed(),
            "Support channel opened"
        );
        Ok(channel)
    }

    /// Current registry view of the session's channel
    pub async fn channel(&self, identity: &SessionIdentity) -> Result<Option<Channel>> {
        let channel_id = self.channel_id_of(identity).await?;
        self.registry.get(&channel_id).await
    }

    /// Send a customer-authored message
    ///
    /// Rejected with `ChannelClosed` once the agent has closed the channel,
    /// regardless of what the transport would accept.
    pub async fn send_message(&self, identity: &SessionIdentity, text: &str) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidInput("message text is empty".to_string()));
        }
        let channel_id = self.channel_id_of(identity).await?;

        let channel = self
            .registry
            .get(&channel_id)
            .await?
            .ok_or_else(|| ChatError::channel(channel_id.as_str(), "channel not found"))?;
        if channel.is_closed() {
            tracing::debug!(channel = %channel_id, "Rejected message on closed channel");
            return Err(ChatError::ChannelClosed(channel_id.to_string()));
        }

        self.registry
            .send_message(&channel_id, identity.as_str(), text)
            .await
    }

    /// Live messages of the session's channel, cancelled on teardown
    pub async fn watch_messages(&self, identity: &SessionIdentity) -> Result<MessageWatch> {
        let (channel_id, cancel) = {
            let sessions = self.sessions.read().await;
            let state = sessions
                .get(identity)
                .ok_or_else(|| ChatError::NotFound(format!("Session not found: {}", identity)))?;
            let channel_id = state.channel_id.clone().ok_or_else(|| {
                ChatError::channel(
                    ChannelId::for_identity(identity).as_str(),
                    "channel has not been opened",
                )
            })?;
            (channel_id, state.cancel.child_token())
        };
        MessageWatch::start(self.registry.as_ref(), channel_id, cancel).await
    }

    /// Tear down a session: cancel pending work and release the connection
    ///
    /// The channel is left untouched for reopening or agent follow-up.
    pub async fn end_session(&self, identity: &SessionIdentity) -> Result<()> {
        let state = self.sessions.write().await.remove(identity);
        let Some(state) = state else {
            return Ok(());
        };

        state.cancel.cancel();
        self.registry.disconnect(identity.as_str()).await?;

        tracing::info!(
            identity = %identity,
            customer = %state.display_name,
            had_channel = state.channel_id.is_some(),
            "Chat session ended"
        );
        Ok(())
    }

    /// Number of live sessions
    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn channel_id_of(&self, identity: &SessionIdentity) -> Result<ChannelId> {
        let sessions = self.sessions.read().await;
        let state = sessions
            .get(identity)
            .ok_or_else(|| ChatError::NotFound(format!("Session not found: {}", identity)))?;
        state.channel_id.clone().ok_or_else(|| {
            ChatError::channel(
                ChannelId::for_identity(identity).as_str(),
                "channel has not been opened",
            )
        })
    }
}

fn normalize_name(display_name: &str) -> String {
    let trimmed = display_name.trim();
    if trimmed.is_empty() {
        DEFAULT_CUSTOMER_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Registry failures while opening a channel surface as channel errors
fn into_channel_error(channel_id: &ChannelId, err: ChatError) -> ChatError {
    match err {
        ChatError::Channel { .. } | ChatError::Cancelled(_) => err,
        other => ChatError::channel(channel_id.as_str(), other.to_string()),
    }
}
