//! Live watches over a channel registry
//!
//! `ChannelListWatch` turns the registry's push updates into a lazy sequence
//! of listing snapshots; `MessageWatch` yields the messages of one channel.
//! Both stop delivering and release their subscription once cancelled.

use crate::error::Result;
use crate::provider::{ChannelRegistry, Subscription};
use crate::types::{Channel, ChannelFilter, ChannelId, ChannelSort, Message, RegistryEvent};
use futures::Stream;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum Wake {
    Event(RegistryEvent),
    Closed,
    Cancelled,
}

async fn wait_event(
    subscription: &mut Option<Box<dyn Subscription>>,
    cancel: &CancellationToken,
) -> Result<Wake> {
    let Some(sub) = subscription.as_mut() else {
        return Ok(Wake::Closed);
    };
    tokio::select! {
        _ = cancel.cancelled() => Ok(Wake::Cancelled),
        event = sub.next() => Ok(match event? {
            Some(event) => Wake::Event(event),
            None => Wake::Closed,
        }),
    }
}

/// Restartable sequence of channel-list snapshots
///
/// The first call to [`next_snapshot`](Self::next_snapshot) returns the
/// current listing; each later call waits for a registry update that can
/// change the listing and returns a fresh query result.
pub struct ChannelListWatch {
    registry: Arc<dyn ChannelRegistry>,
    filter: ChannelFilter,
    sort: ChannelSort,
    limit: usize,
    subscription: Option<Box<dyn Subscription>>,
    cancel: CancellationToken,
    snapshot_due: bool,
    /// Channel ids in the last snapshot
    listed: HashSet<ChannelId>,
}

impl ChannelListWatch {
    /// Subscribe to the registry and prepare the initial snapshot
    pub async fn start(
        registry: Arc<dyn ChannelRegistry>,
        filter: ChannelFilter,
        sort: ChannelSort,
        limit: usize,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let subscription = registry.subscribe().await?;
        Ok(Self {
            registry,
            filter,
            sort,
            limit,
            subscription: Some(subscription),
            cancel,
            snapshot_due: true,
            listed: HashSet::new(),
        })
    }

    /// Next listing snapshot; `None` once cancelled or the registry is gone
    pub async fn next_snapshot(&mut self) -> Result<Option<Vec<Channel>>> {
        loop {
            if self.cancel.is_cancelled() {
                self.subscription = None;
                return Ok(None);
            }
            if self.snapshot_due {
                self.snapshot_due = false;
                return self.snapshot().await.map(Some);
            }

            match wait_event(&mut self.subscription, &self.cancel).await? {
                Wake::Event(event) => {
                    if self.affects_listing(&event).await? {
                        self.snapshot_due = true;
                    }
                }
                Wake::Closed | Wake::Cancelled => {
                    self.subscription = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Make the next call return a fresh snapshot immediately
    ///
    /// Re-subscribes if the previous subscription ended. A cancelled watch
    /// stays cancelled.
    pub async fn restart(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        if self.subscription.is_none() {
            self.subscription = Some(self.registry.subscribe().await?);
        }
        self.snapshot_due = true;
        Ok(())
    }

    /// Stop delivery and release the subscription
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.subscription = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Convert into a `Stream` of snapshots
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Channel>>> {
        futures::stream::unfold(self, |mut watch| async move {
            match watch.next_snapshot().await {
                Ok(Some(snapshot)) => Some((Ok(snapshot), watch)),
                Ok(None) => None,
                Err(e) => Some((Err(e), watch)),
            }
        })
    }

    async fn snapshot(&mut self) -> Result<Vec<Channel>> {
        let channels = self
            .registry
            .list(&self.filter, self.sort, self.limit)
            .await?;
        self.listed = channels.iter().map(|c| c.id.clone()).collect();
        Ok(channels)
    }

    async fn affects_listing(&self, event: &RegistryEvent) -> Result<bool> {
        match event {
            RegistryEvent::ChannelCreated { channel } | RegistryEvent::ChannelUpdated { channel } => {
                Ok(self.filter.matches(channel) || self.listed.contains(&channel.id))
            }
            RegistryEvent::MessageNew { message } => {
                if self.listed.contains(&message.channel_id) {
                    return Ok(true);
                }
                // A truncated listing can gain a channel that was cut off
                if self.listed.len() < self.limit {
                    return Ok(false);
                }
                Ok(self
                    .registry
                    .get(&message.channel_id)
                    .await?
                    .is_some_and(|channel| self.filter.matches(&channel)))
            }
        }
    }
}

/// Stream of new messages on one channel
pub struct MessageWatch {
    channel_id: ChannelId,
    subscription: Option<Box<dyn Subscription>>,
    cancel: CancellationToken,
}

impl MessageWatch {
    pub async fn start(
        registry: &dyn ChannelRegistry,
        channel_id: ChannelId,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let subscription = registry.subscribe().await?;
        Ok(Self {
            channel_id,
            subscription: Some(subscription),
            cancel,
        })
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Next message on the channel; `None` once cancelled or the registry is gone
    pub async fn next(&mut self) -> Result<Option<Message>> {
        loop {
            if self.cancel.is_cancelled() {
                self.subscription = None;
                return Ok(None);
            }
            match wait_event(&mut self.subscription, &self.cancel).await? {
                Wake::Event(RegistryEvent::MessageNew { message })
                    if message.channel_id == self.channel_id =>
                {
                    return Ok(Some(message));
                }
                Wake::Event(_) => {}
                Wake::Closed | Wake::Cancelled => {
                    self.subscription = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Stop delivery and release the subscription
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.subscription = None;
    }
}
