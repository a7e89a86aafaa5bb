//! Real-time store subscription.
//!
//! Streams a Firebase Realtime Database path over its REST streaming protocol
//! (`Accept: text/event-stream`). The store pushes `put` and `patch` events that describe
//! changes to a JSON tree of `record-id -> record`. Every change is applied to a local copy of
//! the tree and the full snapshot is forwarded as a [`FeedEvent::Replace`], which the renderer
//! sorts by time key.

use std::{marker::PhantomData, time::Duration};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use reqwest::{Client, header};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    FeedEvent, FeedSource,
    timeout::{DEFAULT_READ_TIMEOUT, TimeoutStream},
};
use crate::error::FeedError;
use crate::types::FeedItem;

/// Real-time store subscription configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database URL, e.g. `https://<db>.firebaseio.com`
    pub base_url: String,
    /// Path of the record collection, e.g. `ticks/R_25`
    pub path: String,
    /// Child key the query orders by
    pub order_by: String,
    /// Number of newest records kept by the query
    pub limit_to_last: usize,
    /// Silence after which the stream counts as dead. The store sends `keep-alive` about
    /// every 30 seconds.
    pub read_timeout: Duration,
    /// Opt-in fixed delay before re-subscribing after the stream ends
    pub reconnect_delay: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            path: "ticks/R_25".to_string(),
            order_by: "epoch".to_string(),
            limit_to_last: 900,
            read_timeout: DEFAULT_READ_TIMEOUT,
            reconnect_delay: None,
        }
    }
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = order_by.into();
        self
    }

    pub fn with_limit_to_last(mut self, limit: usize) -> Self {
        self.limit_to_last = limit;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Streaming URL, e.g. `{base}/ticks/R_25.json?orderBy="epoch"&limitToLast=900`
    pub fn url(&self) -> Result<Url, FeedError> {
        if self.limit_to_last < 1 {
            return Err(FeedError::InvalidConfig(
                "store limitToLast must be at least 1".to_string(),
            ));
        }

        let mut url = Url::parse(&format!(
            "{}/{}.json",
            self.base_url.trim_end_matches('/'),
            self.path.trim_matches('/')
        ))?;
        url.query_pairs_mut()
            .append_pair("orderBy", &format!("\"{}\"", self.order_by))
            .append_pair("limitToLast", &self.limit_to_last.to_string());
        Ok(url)
    }
}

/// Event decoded from a `text/event-stream` body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes may be split anywhere across chunks; events are emitted on the blank line that ends
/// them.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let raw = self.buffer.split_to(newline);
            self.buffer.advance(1);

            let text = String::from_utf8_lossy(&raw);
            let line = text.strip_suffix('\r').unwrap_or(&*text);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Payload of `put` and `patch` events
#[derive(Debug, Deserialize)]
struct StoreChange {
    path: String,
    data: Value,
}

/// What a store event means for the subscription
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    /// Tree changed, a snapshot should be delivered.
    Changed,
    /// Nothing to deliver.
    Ignored,
    /// Store ended the subscription.
    Cancelled(String),
}

/// Local copy of the subscribed JSON tree.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    records: Map<String, Value>,
}

impl StoreSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one decoded stream event.
    pub fn apply(&mut self, event: &SseEvent) -> Result<StoreUpdate, FeedError> {
        match event.event.as_str() {
            "put" => {
                let change: StoreChange = serde_json::from_str(&event.data)?;
                self.put(&change.path, change.data);
                Ok(StoreUpdate::Changed)
            }
            "patch" => {
                let change: StoreChange = serde_json::from_str(&event.data)?;
                let Value::Object(children) = change.data else {
                    return Err(FeedError::Malformed(
                        "patch data is not an object".to_string(),
                    ));
                };
                let base = change.path.trim_end_matches('/');
                for (key, value) in children {
                    self.put(&format!("{base}/{key}"), value);
                }
                Ok(StoreUpdate::Changed)
            }
            "keep-alive" => Ok(StoreUpdate::Ignored),
            "cancel" | "auth_revoked" => Ok(StoreUpdate::Cancelled(format!(
                "{}: {}",
                event.event, event.data
            ))),
            other => {
                debug!(event = other, "Ignoring unknown store event");
                Ok(StoreUpdate::Ignored)
            }
        }
    }

    /// Set `data` at `path`, where `/` is the subscribed collection. `null` deletes.
    pub fn put(&mut self, path: &str, data: Value) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let Some((last, parents)) = segments.split_last() else {
            self.records = match data {
                Value::Object(records) => records,
                _ => Map::new(),
            };
            return;
        };

        let mut node = &mut self.records;
        for segment in parents {
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            let Some(map) = child.as_object_mut() else {
                return;
            };
            node = map;
        }

        if data.is_null() {
            node.remove(*last);
        } else {
            node.insert(last.to_string(), data);
        }
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decode every record, keep the `limit` newest and forget the rest.
    ///
    /// Records that do not decode are skipped and counted.
    pub fn points<T>(&mut self, limit: usize) -> (Vec<T>, usize)
    where
        T: FeedItem + DeserializeOwned,
    {
        let mut skipped = 0;
        let mut keyed: Vec<(String, T)> = Vec::with_capacity(self.records.len());
        for (id, record) in &self.records {
            match T::deserialize(record) {
                Ok(point) => keyed.push((id.clone(), point)),
                Err(error) => {
                    debug!(%id, %error, "Skipping undecodable store record");
                    skipped += 1;
                }
            }
        }

        keyed.sort_by_key(|(_, point)| point.time_key());
        let excess = keyed.len().saturating_sub(limit);
        for (id, _) in keyed.drain(..excess) {
            self.records.remove(&id);
        }

        (keyed.into_iter().map(|(_, point)| point).collect(), skipped)
    }
}

/// Subscription to a real-time store collection
#[derive(Debug, Clone)]
pub struct RealtimeStoreSource<T> {
    config: StoreConfig,
    url: Url,
    client: Client,
    _point: PhantomData<fn() -> T>,
}

impl<T> RealtimeStoreSource<T>
where
    T: FeedItem + DeserializeOwned,
{
    pub fn new(config: StoreConfig) -> Result<Self, FeedError> {
        if config.read_timeout.is_zero() {
            return Err(FeedError::InvalidConfig(
                "store read timeout must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            url: config.url()?,
            config,
            client: Client::new(),
            _point: PhantomData,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Stream until the connection ends. `Err(RendererStopped)` means stop for good.
    async fn stream_once(&self, tx: &mpsc::Sender<FeedEvent<T>>) -> Result<(), FeedError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        info!(url = %self.url, "Subscribed to real-time store");
        send(tx, FeedEvent::Opened).await?;

        let mut body = TimeoutStream::new(
            Box::pin(response.bytes_stream()),
            self.config.read_timeout,
        );
        let result = self.read_events(&mut body, tx).await;

        if body.timed_out() {
            return Err(FeedError::Transport(format!(
                "no data received for {:?}",
                body.timeout_duration()
            )));
        }
        result
    }

    async fn read_events<S>(
        &self,
        body: &mut S,
        tx: &mpsc::Sender<FeedEvent<T>>,
    ) -> Result<(), FeedError>
    where
        S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
    {
        let mut decoder = SseDecoder::new();
        let mut snapshot = StoreSnapshot::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| FeedError::Transport(error.to_string()))?;

            for event in decoder.decode(&chunk) {
                match snapshot.apply(&event) {
                    Ok(StoreUpdate::Changed) => {
                        let (points, skipped) = snapshot.points::<T>(self.config.limit_to_last);
                        if skipped > 0 {
                            warn!(skipped, "Store snapshot contained undecodable records");
                        }
                        let event = if points.is_empty() {
                            FeedEvent::Invalid(FeedError::EmptyBatch)
                        } else {
                            FeedEvent::Replace(points)
                        };
                        send(tx, event).await?;
                    }
                    Ok(StoreUpdate::Ignored) => {}
                    Ok(StoreUpdate::Cancelled(reason)) => {
                        warn!(%reason, "Real-time store cancelled the subscription");
                        return Err(FeedError::Closed);
                    }
                    Err(error) => send(tx, FeedEvent::Invalid(error)).await?,
                }
            }
        }

        Err(FeedError::Closed)
    }
}

async fn send<T>(tx: &mpsc::Sender<FeedEvent<T>>, event: FeedEvent<T>) -> Result<(), FeedError> {
    tx.send(event).await.map_err(|_| FeedError::RendererStopped)
}

#[async_trait]
impl<T> FeedSource for RealtimeStoreSource<T>
where
    T: FeedItem + DeserializeOwned,
{
    type Item = T;

    async fn run(self, tx: mpsc::Sender<FeedEvent<T>>) {
        info!(url = %self.url, "Starting real-time store feed");

        loop {
            let error = match self.stream_once(&tx).await {
                Err(FeedError::RendererStopped) => {
                    debug!("Renderer dropped, stopping real-time store feed");
                    return;
                }
                Err(error) => error,
                Ok(()) => FeedError::Closed,
            };

            error!(%error, url = %self.url, "Real-time store subscription ended");
            if tx.send(FeedEvent::Closed(error)).await.is_err() {
                return;
            }

            let Some(delay) = self.config.reconnect_delay else {
                return;
            };
            debug!(?delay, "Waiting before re-subscribing to real-time store");
            tokio::time::sleep(delay).await;
        }
    }
}
