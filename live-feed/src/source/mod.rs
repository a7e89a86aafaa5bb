//! Data sources feeding a [`LiveFeedRenderer`](crate::renderer::LiveFeedRenderer).
//!
//! Every source runs in its own task and reports through a single `mpsc` channel of
//! [`FeedEvent`]s, which the renderer's consumer task drains in delivery order.
//!
//! - [`store::RealtimeStoreSource`]: real-time store subscription delivering full snapshots
//! - [`poll::PollingSource`]: HTTP endpoint polled on a fixed interval
//! - [`socket::SocketSource`]: WebSocket stream of candle / tick / signal messages
//! - [`manual::ManualSource`] and [`manual::ScriptedSource`]: in-process feeds

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FeedError;
use crate::types::{FeedItem, Signal};

pub mod manual;
pub mod poll;
pub mod socket;
pub mod store;
pub mod timeout;

/// Notification delivered by a source.
#[derive(Debug, Clone)]
pub enum FeedEvent<T> {
    /// Transport opened, or first successful fetch.
    Opened,
    /// Incremental points to merge into the window.
    Append(Vec<T>),
    /// Full snapshot replacing the window.
    Replace(Vec<T>),
    /// Out-of-band annotation.
    Signal(Signal),
    /// Data that could not be used. Logged and skipped.
    Invalid(FeedError),
    /// Transport closed or failed.
    Closed(FeedError),
}

impl<T> FeedEvent<T> {
    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::Opened => "opened",
            FeedEvent::Append(_) => "append",
            FeedEvent::Replace(_) => "replace",
            FeedEvent::Signal(_) => "signal",
            FeedEvent::Invalid(_) => "invalid",
            FeedEvent::Closed(_) => "closed",
        }
    }
}

/// A subscription that pushes [`FeedEvent`]s until it ends or the receiver is dropped.
#[async_trait]
pub trait FeedSource: Send + 'static {
    type Item: FeedItem;

    /// Drive the subscription, sending every notification to `tx`.
    ///
    /// Implementations return once `tx` is closed.
    async fn run(self, tx: mpsc::Sender<FeedEvent<Self::Item>>);
}
