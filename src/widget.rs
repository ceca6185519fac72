//! Storefront chat widget lifecycle
//!
//! Drives one customer conversation through `Closed → Connecting → Open`
//! (or `Failed`), and back to `Closed` on deactivation. Deactivation
//! cancels whatever is still pending.

use crate::error::{ChatError, Result};
use crate::session::SessionManager;
use crate::types::{Channel, Message, ProductRef, SessionIdentity};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Observable widget state
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetState {
    /// Not activated, or deactivated
    Closed,
    /// Waiting for credential issuance or channel join
    Connecting,
    /// Conversation ready
    Open {
        identity: SessionIdentity,
        channel: Channel,
    },
    /// Activation failed; `notice` is shown inline and activation may be retried
    Failed { notice: String },
}

struct WidgetInner {
    state: WidgetState,
    cancel: Option<CancellationToken>,
    identity: Option<SessionIdentity>,
}

/// Customer chat widget bound to one product page
pub struct ChatWidget {
    manager: Arc<SessionManager>,
    display_name: String,
    product: ProductRef,
    referring_url: String,
    inner: Mutex<WidgetInner>,
}

impl ChatWidget {
    pub fn new(
        manager: Arc<SessionManager>,
        display_name: impl Into<String>,
        product: ProductRef,
        referring_url: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            display_name: display_name.into(),
            product,
            referring_url: referring_url.into(),
            inner: Mutex::new(WidgetInner {
                state: WidgetState::Closed,
                cancel: None,
                identity: None,
            }),
        }
    }

    pub async fn state(&self) -> WidgetState {
        self.inner.lock().await.state.clone()
    }

    /// Open the chat: start a session, then open its channel
    ///
    /// Returns the channel when already open. Each activation after a
    /// deactivation or failure uses a fresh identity.
    pub async fn activate(&self) -> Result<Channel> {
        let cancel = {
            let mut inner = self.inner.lock().await;
            match &inner.state {
                WidgetState::Open { channel, .. } => return Ok(channel.clone()),
                WidgetState::Connecting => {
                    return Err(ChatError::InvalidInput(
                        "chat widget is already connecting".to_string(),
                    ))
                }
                WidgetState::Closed | WidgetState::Failed { .. } => {}
            }
            let cancel = CancellationToken::new();
            inner.state = WidgetState::Connecting;
            inner.cancel = Some(cancel.clone());
            inner.identity = None;
            cancel
        };

        let handle = match self
            .manager
            .start_session_cancellable(&self.display_name, &self.product, cancel.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(&cancel, e).await),
        };

        {
            let mut inner = self.inner.lock().await;
            if cancel.is_cancelled() {
                drop(inner);
                self.release(&handle.identity).await;
                return Err(ChatError::Cancelled(
                    "chat widget closed while connecting".to_string(),
                ));
            }
            inner.identity = Some(handle.identity.clone());
        }

        let channel = match self
            .manager
            .open_channel(
                &handle.identity,
                &self.product,
                &handle.display_name,
                &self.referring_url,
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                if !cancel.is_cancelled() {
                    self.release(&handle.identity).await;
                }
                return Err(self.fail(&cancel, e).await);
            }
        };

        let mut inner = self.inner.lock().await;
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled(
                "chat widget closed while connecting".to_string(),
            ));
        }
        inner.state = WidgetState::Open {
            identity: handle.identity,
            channel: channel.clone(),
        };
        Ok(channel)
    }

    /// Close the widget: cancel pending work and release the connection
    pub async fn deactivate(&self) -> Result<()> {
        let (cancel, identity) = {
            let mut inner = self.inner.lock().await;
            inner.state = WidgetState::Closed;
            (inner.cancel.take(), inner.identity.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(identity) = identity {
            self.manager.end_session(&identity).await?;
        }
        Ok(())
    }

    /// Send a customer message on the open conversation
    pub async fn send(&self, text: &str) -> Result<Message> {
        let identity = self.open_identity().await?;
        self.manager.send_message(&identity, text).await
    }

    /// Whether the agent has closed the conversation
    ///
    /// When true the input is replaced by the closure notice.
    pub async fn is_conversation_closed(&self) -> Result<bool> {
        let identity = self.open_identity().await?;
        let channel = self.manager.channel(&identity).await?;
        Ok(channel.is_some_and(|c| c.is_closed()))
    }

    async fn open_identity(&self) -> Result<SessionIdentity> {
        match &self.inner.lock().await.state {
            WidgetState::Open { identity, .. } => Ok(identity.clone()),
            _ => Err(ChatError::InvalidInput("chat widget is not open".to_string())),
        }
    }

    /// Tear down an abandoned session; failure is logged only
    async fn release(&self, identity: &SessionIdentity) {
        if let Err(e) = self.manager.end_session(identity).await {
            tracing::warn!(
                identity = %identity,
                error = %e,
                "Failed to release abandoned chat session"
            );
        }
    }

    /// Record a failed activation unless the widget was closed meanwhile
    async fn fail(&self, cancel: &CancellationToken, err: ChatError) -> ChatError {
        if cancel.is_cancelled() {
            return err;
        }
        let mut inner = self.inner.lock().await;
        tracing::warn!(error = %err, "Chat widget activation failed");
        inner.state = WidgetState::Failed {
            notice: failure_notice(&err),
        };
        inner.cancel = None;
        inner.identity = None;
        err
    }
}

fn failure_notice(err: &ChatError) -> String {
    match err {
        ChatError::Credential { .. } => {
            "We couldn't start the chat right now. Please try again.".to_string()
        }
        ChatError::Channel { .. } | ChatError::Transport(_) => {
            "We couldn't connect you to a sales associate. Please try again.".to_string()
        }
        other => format!("Chat unavailable: {}", other),
    }
}
