//! # a3s-livechat
//!
//! Customer-to-agent live chat session lifecycle over pluggable messaging backends.
//!
//! ## Overview
//!
//! `a3s-livechat` connects an anonymous storefront visitor to a single,
//! well-known sales-associate identity. Transport, storage and presence stay
//! with the messaging backend; this crate owns the session lifecycle: identity
//! allocation, credential exchange, idempotent channel creation, the agent's
//! filtered channel listing, and the monotonic close of a conversation.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_livechat::{AgentConsole, ChatConfig, MemoryCredentialIssuer, MemoryRegistry,
//!     ProductRef, SessionManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_livechat::Result<()> {
//! let config = ChatConfig::new("api-key", "https://shop.example/api/stream-token");
//! let issuer = Arc::new(MemoryCredentialIssuer::new());
//! let registry = Arc::new(MemoryRegistry::default().with_verifier(issuer.clone()));
//!
//! // Customer side
//! let sessions = SessionManager::new(config.clone(), issuer, registry.clone());
//! let product = ProductRef::new("PREM-HDPH-001", "Premium Wireless Headphones", 299.99);
//! let session = sessions.start_session("Guest", &product).await?;
//! let channel = sessions
//!     .open_channel(&session.identity, &product, "Guest", "https://shop.example/p/1")
//!     .await?;
//!
//! // Agent side
//! let console = AgentConsole::new(config, registry);
//! let open = console.list_open_channels().await?;
//! assert_eq!(open[0].id, channel.id);
//! console.close_channel(&channel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory** — In-memory registry for testing and single-process use
//!
//! ## Architecture
//!
//! - **ChannelRegistry** trait — core abstraction all messaging backends implement
//! - **CredentialIssuer** trait — trusted token issuance (HTTP or in-memory)
//! - **SessionManager** / **ChatWidget** — customer side of a conversation
//! - **AgentConsole** — agent side: listing, selection, close
//! - **ChannelListWatch** / **MessageWatch** — cancellable live updates

pub mod config;
pub mod console;
pub mod credential;
pub mod error;
pub mod provider;
pub mod session;
pub mod types;
pub mod watch;
pub mod widget;

// Re-export core types
pub use config::ChatConfig;
pub use console::{ActiveChannel, AgentConsole, CloseOutcome, Selection};
pub use credential::{Credential, CredentialIssuer, HttpCredentialIssuer, MemoryCredentialIssuer};
pub use error::{ChatError, Result};
pub use provider::{ChannelRegistry, RegistryInfo, Subscription};
pub use session::{SessionHandle, SessionManager};
pub use types::{
    Channel, ChannelFilter, ChannelId, ChannelMetadata, ChannelSort, ChatUser, Message,
    MessageKind, MetadataPatch, Product, ProductInfo, ProductRef, RegistryEvent,
    SessionIdentity,
};
pub use watch::{ChannelListWatch, MessageWatch};
pub use widget::{ChatWidget, WidgetState};

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryRegistry, MemorySubscription};
