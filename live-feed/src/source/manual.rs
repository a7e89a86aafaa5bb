//! In-process sources, used when the application already holds the data and by tests.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{FeedEvent, FeedSource};
use crate::error::FeedError;
use crate::types::{FeedItem, Signal};

type Link<T> = Option<mpsc::Sender<FeedEvent<T>>>;

/// Source fed by hand through a [`ManualFeed`].
///
/// Once the renderer subscribes, every [`ManualFeed`] call writes straight into the renderer's
/// queue, so a following [`RendererHandle::sync`](crate::renderer::RendererHandle::sync) observes
/// it. The source ends when every [`ManualFeed`] is dropped.
#[derive(Debug)]
pub struct ManualSource<T> {
    link: watch::Sender<Link<T>>,
}

/// Sending half of a [`ManualSource`].
#[derive(Debug, Clone)]
pub struct ManualFeed<T> {
    link: watch::Receiver<Link<T>>,
}

impl<T: FeedItem> ManualSource<T> {
    /// Create a source and the feed that drives it.
    pub fn channel() -> (ManualFeed<T>, Self) {
        let (link, link_rx) = watch::channel(None);
        (ManualFeed { link: link_rx }, Self { link })
    }
}

impl<T: FeedItem> ManualFeed<T> {
    /// Deliver `event`, waiting for the renderer to subscribe first.
    pub async fn send(&self, event: FeedEvent<T>) -> Result<(), FeedError> {
        let mut link = self.link.clone();
        let tx = link
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FeedError::RendererStopped)?
            .clone()
            .ok_or(FeedError::RendererStopped)?;

        tx.send(event).await.map_err(|_| FeedError::RendererStopped)
    }

    pub async fn open(&self) -> Result<(), FeedError> {
        self.send(FeedEvent::Opened).await
    }

    pub async fn append(&self, batch: Vec<T>) -> Result<(), FeedError> {
        self.send(FeedEvent::Append(batch)).await
    }

    pub async fn replace(&self, batch: Vec<T>) -> Result<(), FeedError> {
        self.send(FeedEvent::Replace(batch)).await
    }

    pub async fn signal(&self, signal: Signal) -> Result<(), FeedError> {
        self.send(FeedEvent::Signal(signal)).await
    }

    pub async fn close(&self, error: FeedError) -> Result<(), FeedError> {
        self.send(FeedEvent::Closed(error)).await
    }
}

#[async_trait]
impl<T: FeedItem> FeedSource for ManualSource<T> {
    type Item = T;

    async fn run(self, tx: mpsc::Sender<FeedEvent<T>>) {
        let renderer = tx.clone();
        self.link.send_replace(Some(tx));

        tokio::select! {
            _ = self.link.closed() => debug!("Manual feeds dropped, ending manual source"),
            _ = renderer.closed() => debug!("Renderer dropped, stopping manual source"),
        }
    }
}

/// Source that replays a fixed list of events and then ends.
#[derive(Debug, Clone)]
pub struct ScriptedSource<T> {
    events: Vec<FeedEvent<T>>,
}

impl<T: FeedItem> ScriptedSource<T> {
    pub fn new(events: impl IntoIterator<Item = FeedEvent<T>>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }
}

#[async_trait]
impl<T: FeedItem> FeedSource for ScriptedSource<T> {
    type Item = T;

    async fn run(self, tx: mpsc::Sender<FeedEvent<T>>) {
        for event in self.events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}
