//! Memory registry integration tests
//!
//! End-to-end tests exercising the customer and agent sides together over
//! the in-memory registry. Covers the storefront scenario, idempotent
//! reopen, close semantics, partial close failures, live listing updates,
//! cancellation, and concurrency.

use a3s_livechat::{
    AgentConsole, Channel, ChannelFilter, ChannelId, ChannelMetadata, ChannelRegistry,
    ChannelSort, ChatConfig, ChatError, ChatUser, ChatWidget, CloseOutcome, Credential,
    CredentialIssuer, MemoryCredentialIssuer, MemoryRegistry, Message, MetadataPatch,
    ProductRef, RegistryInfo, Selection, SessionManager, Subscription, WidgetState,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const CLOSURE_TEXT: &str = "This chat has been closed by the sales associate.";

fn config() -> ChatConfig {
    ChatConfig::new("api-key", "https://shop.example/api/stream-token")
}

fn headphones() -> ProductRef {
    ProductRef::new("PREM-HDPH-001", "Premium Wireless Headphones", 299.99)
}

struct Harness {
    registry: Arc<MemoryRegistry>,
    sessions: Arc<SessionManager>,
    console: AgentConsole,
}

fn harness() -> Harness {
    let issuer = Arc::new(MemoryCredentialIssuer::new());
    let registry = Arc::new(MemoryRegistry::default().with_verifier(issuer.clone()));
    let sessions = Arc::new(SessionManager::new(config(), issuer, registry.clone()));
    let console = AgentConsole::new(config(), registry.clone());
    Harness {
        registry,
        sessions,
        console,
    }
}

// ─── Storefront Scenario ─────────────────────────────────────────

#[tokio::test]
async fn test_headphones_scenario_end_to_end() {
    let h = harness();
    let product = headphones();

    let session = h.sessions.start_session("Guest", &product).await.unwrap();
    let channel = h
        .sessions
        .open_channel(&session.identity, &product, "Guest", "https://shop.example/headphones")
        .await
        .unwrap();

    assert_eq!(channel.id.as_str(), format!("support-{}", session.identity));
    assert_eq!(channel.metadata.sku, "PREM-HDPH-001");
    assert_eq!(channel.metadata.product.name, "Premium Wireless Headphones");
    assert_eq!(channel.metadata.product.price, 299.99);
    assert_eq!(channel.metadata.customer_name, "Guest");
    assert!(!channel.is_closed());

    let mut watch = h.console.watch_open_channels().await.unwrap();
    let listed = watch.next_snapshot().await.unwrap().unwrap();
    assert!(listed.iter().any(|c| c.id == channel.id));

    h.sessions
        .send_message(&session.identity, "Do these come in silver?")
        .await
        .unwrap();

    let active = h.console.select_channel(&channel).await.unwrap();
    assert_eq!(active.info.product_name.as_deref(), Some("Premium Wireless Headphones"));
    assert_eq!(active.info.url.as_deref(), Some("https://shop.example/headphones"));

    let outcome = h.console.close_channel(&channel).await.unwrap();
    assert!(matches!(outcome, CloseOutcome::Closed { .. }));
    assert_eq!(h.console.selection().await, Selection::NoSelection);

    let stored = h.registry.get(&channel.id).await.unwrap().unwrap();
    assert!(stored.is_closed());
    let messages = h.registry.messages(&channel.id, 100).await.unwrap();
    let last = messages.last().unwrap();
    assert!(last.is_system());
    assert_eq!(last.text, CLOSURE_TEXT);

    let listed = h.console.list_open_channels().await.unwrap();
    assert!(listed.iter().all(|c| c.id != channel.id));

    let err = h
        .sessions
        .send_message(&session.identity, "Hello?")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ChannelClosed(_)));
    assert_eq!(h.registry.messages(&channel.id, 100).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_reopen_same_identity_does_not_duplicate() {
    let h = harness();
    let product = headphones();
    let session = h.sessions.start_session("Guest", &product).await.unwrap();

    let first = h
        .sessions
        .open_channel(&session.identity, &product, "Guest", "https://a.example")
        .await
        .unwrap();
    let second = h
        .sessions
        .open_channel(&session.identity, &product, "Guest", "https://b.example")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.members.len(), 2);
    assert_eq!(second.metadata.url, "https://a.example");
    assert_eq!(h.registry.info().await.unwrap().channels, 1);
}

#[tokio::test]
async fn test_listing_never_returns_closed_or_foreign_channels() {
    let h = harness();
    let product = headphones();

    let mut channels = Vec::new();
    for i in 0..6 {
        let session = h
            .sessions
            .start_session(&format!("Customer {}", i), &product)
            .await
            .unwrap();
        channels.push(
            h.sessions
                .open_channel(&session.identity, &product, "", "")
                .await
                .unwrap(),
        );
    }
    for channel in channels.iter().step_by(2) {
        h.console.close_channel(channel).await.unwrap();
    }

    // A channel of another agent
    let foreign_console = AgentConsole::new(
        config().with_agent_identity("other-agent"),
        h.registry.clone(),
    );
    let foreign = h
        .registry
        .create_or_join(
            &ChannelId::new("support-foreign"),
            &["foreign-customer".to_string(), "other-agent".to_string()],
            &channels[1].metadata,
        )
        .await
        .unwrap();

    let listed = h.console.list_open_channels().await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed
        .iter()
        .all(|c| !c.is_closed() && c.has_member("sales-agent")));
    assert!(listed.iter().all(|c| c.id != foreign.id));

    let theirs = foreign_console.list_open_channels().await.unwrap();
    assert_eq!(theirs.len(), 1);
    assert_eq!(theirs[0].id, foreign.id);
}

#[tokio::test]
async fn test_listing_orders_by_recent_activity() {
    let h = harness();
    let product = headphones();

    let mut ids = Vec::new();
    let mut identities = Vec::new();
    for _ in 0..3 {
        let session = h.sessions.start_session("Guest", &product).await.unwrap();
        let channel = h
            .sessions
            .open_channel(&session.identity, &product, "Guest", "")
            .await
            .unwrap();
        ids.push(channel.id);
        identities.push(session.identity);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Oldest channel gets the newest message
    h.sessions
        .send_message(&identities[0], "still there?")
        .await
        .unwrap();

    let listed = h.console.list_open_channels().await.unwrap();
    let order: Vec<_> = listed.iter().map(|c| c.id.clone()).collect();
    assert_eq!(order, vec![ids[0].clone(), ids[2].clone(), ids[1].clone()]);
}

// ─── Close Semantics ─────────────────────────────────────────────

#[tokio::test]
async fn test_close_twice_appends_one_notice() {
    let h = harness();
    let product = headphones();
    let session = h.sessions.start_session("Guest", &product).await.unwrap();
    let channel = h
        .sessions
        .open_channel(&session.identity, &product, "Guest", "")
        .await
        .unwrap();

    h.console.close_channel(&channel).await.unwrap();
    let again = h.console.close_channel(&channel).await.unwrap();
    assert_eq!(again, CloseOutcome::AlreadyClosed);

    let notices: Vec<Message> = h
        .registry
        .messages(&channel.id, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.is_system())
        .collect();
    assert_eq!(notices.len(), 1);
}

#[tokio::test]
async fn test_close_is_observed_by_customer_widget() {
    let h = harness();
    let widget = ChatWidget::new(
        h.sessions.clone(),
        "Guest",
        headphones(),
        "https://shop.example/headphones",
    );
    let channel = widget.activate().await.unwrap();
    assert!(!widget.is_conversation_closed().await.unwrap());

    let listed = h.console.list_open_channels().await.unwrap();
    let from_console = listed.iter().find(|c| c.id == channel.id).unwrap();
    h.console.select_channel(from_console).await.unwrap();
    h.console.close_channel(from_console).await.unwrap();

    assert!(widget.is_conversation_closed().await.unwrap());
    assert!(matches!(
        widget.send("wait!").await,
        Err(ChatError::ChannelClosed(_))
    ));
}

/// Registry wrapper that can fail selected writes
struct FaultyRegistry {
    inner: MemoryRegistry,
    fail_update: AtomicBool,
    fail_announce_mark: AtomicBool,
    fail_system_message: AtomicBool,
    system_messages: AtomicUsize,
}

impl FaultyRegistry {
    fn new() -> Self {
        Self {
            inner: MemoryRegistry::default(),
            fail_update: AtomicBool::new(false),
            fail_announce_mark: AtomicBool::new(false),
            fail_system_message: AtomicBool::new(false),
            system_messages: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChannelRegistry for FaultyRegistry {
    async fn connect(&self, user: &ChatUser, credential: &Credential) -> a3s_livechat::Result<()> {
        self.inner.connect(user, credential).await
    }

    async fn disconnect(&self, identity: &str) -> a3s_livechat::Result<()> {
        self.inner.disconnect(identity).await
    }

    async fn create_or_join(
        &self,
        channel_id: &ChannelId,
        members: &[String],
        metadata: &ChannelMetadata,
    ) -> a3s_livechat::Result<Channel> {
        self.inner.create_or_join(channel_id, members, metadata).await
    }

    async fn get(&self, channel_id: &ChannelId) -> a3s_livechat::Result<Option<Channel>> {
        self.inner.get(channel_id).await
    }

    async fn list(
        &self,
        filter: &ChannelFilter,
        sort: ChannelSort,
        limit: usize,
    ) -> a3s_livechat::Result<Vec<Channel>> {
        self.inner.list(filter, sort, limit).await
    }

    async fn update_metadata(
        &self,
        channel_id: &ChannelId,
        patch: &MetadataPatch,
    ) -> a3s_livechat::Result<Channel> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("update timed out".to_string()));
        }
        if patch.closure_announced.is_some() && self.fail_announce_mark.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("update timed out".to_string()));
        }
        self.inner.update_metadata(channel_id, patch).await
    }

    async fn send_message(
        &self,
        channel_id: &ChannelId,
        user_id: &str,
        text: &str,
    ) -> a3s_livechat::Result<Message> {
        self.inner.send_message(channel_id, user_id, text).await
    }

    async fn send_system_message(
        &self,
        channel_id: &ChannelId,
        text: &str,
    ) -> a3s_livechat::Result<Message> {
        if self.fail_system_message.load(Ordering::SeqCst) {
            return Err(ChatError::channel(channel_id.as_str(), "message rejected"));
        }
        self.system_messages.fetch_add(1, Ordering::SeqCst);
        self.inner.send_system_message(channel_id, text).await
    }

    async fn messages(
        &self,
        channel_id: &ChannelId,
        limit: usize,
    ) -> a3s_livechat::Result<Vec<Message>> {
        self.inner.messages(channel_id, limit).await
    }

    async fn subscribe(&self) -> a3s_livechat::Result<Box<dyn Subscription>> {
        self.inner.subscribe().await
    }

    async fn info(&self) -> a3s_livechat::Result<RegistryInfo> {
        self.inner.info().await
    }

    fn name(&self) -> &str {
        "faulty"
    }
}

async fn faulty_setup() -> (Arc<FaultyRegistry>, AgentConsole, Channel) {
    let issuer = Arc::new(MemoryCredentialIssuer::new());
    let registry = Arc::new(FaultyRegistry::new());
    let sessions = SessionManager::new(config(), issuer, registry.clone());
    let console = AgentConsole::new(config(), registry.clone());

    let product = headphones();
    let session = sessions.start_session("Guest", &product).await.unwrap();
    let channel = sessions
        .open_channel(&session.identity, &product, "Guest", "")
        .await
        .unwrap();
    (registry, console, channel)
}

#[tokio::test]
async fn test_failed_update_keeps_selection_and_sends_nothing() {
    let (registry, console, channel) = faulty_setup().await;
    console.select_channel(&channel).await.unwrap();
    registry.fail_update.store(true, Ordering::SeqCst);

    let err = console.close_channel(&channel).await.unwrap_err();
    assert!(matches!(err, ChatError::Channel { .. }));
    assert!(err.is_retryable());
    assert_eq!(console.active().await.unwrap().channel.id, channel.id);
    assert_eq!(registry.system_messages.load(Ordering::SeqCst), 0);
    assert!(!registry.get(&channel.id).await.unwrap().unwrap().is_closed());

    registry.fail_update.store(false, Ordering::SeqCst);
    let outcome = console.close_channel(&channel).await.unwrap();
    assert!(matches!(outcome, CloseOutcome::Closed { .. }));
    assert!(console.active().await.is_none());
}

#[tokio::test]
async fn test_failed_notice_is_surfaced_and_retry_announces_once() {
    let (registry, console, channel) = faulty_setup().await;
    console.select_channel(&channel).await.unwrap();
    registry.fail_system_message.store(true, Ordering::SeqCst);

    let err = console.close_channel(&channel).await.unwrap_err();
    assert!(matches!(err, ChatError::Channel { .. }));
    // Update went through; no rollback
    assert!(registry.get(&channel.id).await.unwrap().unwrap().is_closed());
    assert_eq!(console.active().await.unwrap().channel.id, channel.id);

    registry.fail_system_message.store(false, Ordering::SeqCst);
    let outcome = console.close_channel(&channel).await.unwrap();
    assert!(matches!(outcome, CloseOutcome::Announced { .. }));
    assert!(console.active().await.is_none());

    assert_eq!(
        console.close_channel(&channel).await.unwrap(),
        CloseOutcome::AlreadyClosed
    );
    assert_eq!(registry.system_messages.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unrecorded_notice_is_not_posted_twice() {
    let (registry, console, channel) = faulty_setup().await;
    registry.fail_announce_mark.store(true, Ordering::SeqCst);

    // Notice goes out even though recording it fails
    let outcome = console.close_channel(&channel).await.unwrap();
    assert!(matches!(outcome, CloseOutcome::Closed { .. }));
    let stored = registry.get(&channel.id).await.unwrap().unwrap();
    assert!(stored.is_closed());
    assert!(!stored.metadata.closure_announced);

    registry.fail_announce_mark.store(false, Ordering::SeqCst);
    assert_eq!(
        console.close_channel(&channel).await.unwrap(),
        CloseOutcome::AlreadyClosed
    );
    assert_eq!(registry.system_messages.load(Ordering::SeqCst), 1);
    assert!(
        registry
            .get(&channel.id)
            .await
            .unwrap()
            .unwrap()
            .metadata
            .closure_announced
    );
}

// ─── Live Listing ────────────────────────────────────────────────

#[tokio::test]
async fn test_watch_picks_up_new_and_drops_closed_channels() {
    let h = harness();
    let mut watch = h.console.watch_open_channels().await.unwrap();
    assert!(watch.next_snapshot().await.unwrap().unwrap().is_empty());

    let widget = ChatWidget::new(h.sessions.clone(), "Guest", headphones(), "https://shop.example");
    let channel = widget.activate().await.unwrap();

    // Creation and the customer's join may each produce a snapshot
    let snapshot = loop {
        let snap = tokio::time::timeout(Duration::from_secs(2), watch.next_snapshot())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if !snap.is_empty() {
            break snap;
        }
    };
    assert_eq!(snapshot[0].id, channel.id);

    h.console.close_channel(&channel).await.unwrap();
    let snapshot = loop {
        let snap = tokio::time::timeout(Duration::from_secs(2), watch.next_snapshot())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if snap.is_empty() {
            break snap;
        }
    };
    assert!(snapshot.is_empty());
}

#[tokio::test]
async fn test_agent_and_customer_exchange_messages() {
    let issuer = Arc::new(MemoryCredentialIssuer::new());
    let registry = Arc::new(MemoryRegistry::default().with_verifier(issuer.clone()));
    let sessions = SessionManager::new(config(), issuer.clone(), registry.clone());
    let console = AgentConsole::new(config(), registry.clone());

    let product = headphones();
    let session = sessions.start_session("Dana", &product).await.unwrap();
    let channel = sessions
        .open_channel(&session.identity, &product, "Dana", "")
        .await
        .unwrap();

    let agent_credential = issuer.issue_token("sales-agent").await.unwrap();
    console.connect(&agent_credential).await.unwrap();
    console.select_channel(&channel).await.unwrap();

    let mut customer_feed = sessions.watch_messages(&session.identity).await.unwrap();
    let mut agent_feed = console.watch_active_messages().await.unwrap();

    sessions
        .send_message(&session.identity, "Is there a warranty?")
        .await
        .unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(2), agent_feed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(seen.text, "Is there a warranty?");

    console.send_message("Two years, parts and labour.").await.unwrap();
    let first = customer_feed.next().await.unwrap().unwrap();
    let second = customer_feed.next().await.unwrap().unwrap();
    assert_eq!(first.text, "Is there a warranty?");
    assert_eq!(second.user_id.as_deref(), Some("sales-agent"));

    console.shutdown().await.unwrap();
    assert!(agent_feed.next().await.unwrap().is_none());
}

// ─── Cancellation ────────────────────────────────────────────────

/// Issuer that holds every request until released
struct GatedIssuer {
    inner: Arc<MemoryCredentialIssuer>,
    gate: Notify,
    waiting: Notify,
}

#[async_trait]
impl CredentialIssuer for GatedIssuer {
    async fn issue_token(&self, identity: &str) -> a3s_livechat::Result<Credential> {
        self.waiting.notify_one();
        self.gate.notified().await;
        self.inner.issue_token(identity).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}

#[tokio::test]
async fn test_deactivate_during_issuance_leaves_nothing_behind() {
    let inner = Arc::new(MemoryCredentialIssuer::new());
    let issuer = Arc::new(GatedIssuer {
        inner: inner.clone(),
        gate: Notify::new(),
        waiting: Notify::new(),
    });
    let registry = Arc::new(MemoryRegistry::default().with_verifier(inner));
    let sessions = Arc::new(SessionManager::new(config(), issuer.clone(), registry.clone()));
    let widget = Arc::new(ChatWidget::new(
        sessions.clone(),
        "Guest",
        headphones(),
        "https://shop.example",
    ));

    let activating = {
        let widget = widget.clone();
        tokio::spawn(async move { widget.activate().await })
    };

    issuer.waiting.notified().await;
    assert_eq!(widget.state().await, WidgetState::Connecting);
    widget.deactivate().await.unwrap();
    issuer.gate.notify_one();

    let result = tokio::time::timeout(Duration::from_secs(2), activating)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ChatError::Cancelled(_))));

    assert_eq!(widget.state().await, WidgetState::Closed);
    assert_eq!(sessions.active_sessions().await, 0);
    let info = registry.info().await.unwrap();
    assert_eq!(info.channels, 0);
    assert_eq!(info.connections, 0);
}

#[tokio::test]
async fn test_late_credential_is_discarded() {
    let inner = Arc::new(MemoryCredentialIssuer::new());
    let issuer = Arc::new(GatedIssuer {
        inner: inner.clone(),
        gate: Notify::new(),
        waiting: Notify::new(),
    });
    let registry = Arc::new(MemoryRegistry::default());
    let sessions = Arc::new(SessionManager::new(config(), issuer.clone(), registry.clone()));

    let token = tokio_util::sync::CancellationToken::new();
    let pending = {
        let sessions = sessions.clone();
        let token = token.clone();
        tokio::spawn(async move {
            sessions
                .start_session_cancellable("Guest", &headphones(), token)
                .await
        })
    };

    issuer.waiting.notified().await;
    token.cancel();
    issuer.gate.notify_one();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(ChatError::Cancelled(_))));
    assert_eq!(sessions.active_sessions().await, 0);
    assert_eq!(registry.info().await.unwrap().connections, 0);
}

// ─── Concurrency ─────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_sessions_get_distinct_channels() {
    let h = harness();
    let mut handles = Vec::new();
    for i in 0..25 {
        let sessions = h.sessions.clone();
        handles.push(tokio::spawn(async move {
            let product = headphones();
            let session = sessions
                .start_session(&format!("Customer {}", i), &product)
                .await
                .unwrap();
            sessions
                .open_channel(&session.identity, &product, "", "")
                .await
                .unwrap()
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().id);
    }
    assert_eq!(ids.len(), 25);
    assert_eq!(h.console.list_open_channels().await.unwrap().len(), 25);
    assert_eq!(h.registry.info().await.unwrap().connections, 25);
}

#[tokio::test]
async fn test_concurrent_repeat_close_is_noop() {
    let h = harness();
    let product = headphones();
    let session = h.sessions.start_session("Guest", &product).await.unwrap();
    let channel = h
        .sessions
        .open_channel(&session.identity, &product, "Guest", "")
        .await
        .unwrap();

    h.console.close_channel(&channel).await.unwrap();

    // Repeated closes after the first are all no-ops
    let console = Arc::new(h.console);
    let mut handles = Vec::new();
    for _ in 0..10 {
        let console = console.clone();
        let channel = channel.clone();
        handles.push(tokio::spawn(async move {
            console.close_channel(&channel).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), CloseOutcome::AlreadyClosed);
    }
    assert_eq!(h.registry.messages(&channel.id, 100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_and_info() {
    let h = harness();
    assert!(h.registry.health().await.unwrap());
    let info = h.registry.info().await.unwrap();
    assert_eq!(info.provider, "memory");
    assert_eq!(info.channels, 0);
}
