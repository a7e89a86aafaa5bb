//! HTTP polling feed.
//!
//! `GET`s a JSON array of points on a fixed interval and forwards each successful response as a
//! [`FeedEvent::Append`]. The renderer's newest-key guard turns repeated identical responses
//! into no-ops.

use std::{collections::BTreeMap, marker::PhantomData, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info};
use url::Url;

use super::{FeedEvent, FeedSource};
use crate::error::FeedError;
use crate::types::FeedItem;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default bound on a single poll request, connect to last body byte
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response body accepted from the endpoint
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PollPayload<T> {
    List(Vec<T>),
    Keyed(BTreeMap<String, T>),
}

/// Decode a poll response: either a JSON array of points or an object keyed by record id.
pub fn parse_poll_body<T>(body: &[u8]) -> Result<Vec<T>, FeedError>
where
    T: DeserializeOwned,
{
    let value: serde_json::Value = serde_json::from_slice(body)?;
    if value.is_null() {
        return Err(FeedError::EmptyBatch);
    }

    let points = match serde_json::from_value::<PollPayload<T>>(value)? {
        PollPayload::List(points) => points,
        PollPayload::Keyed(records) => records.into_values().collect(),
    };

    if points.is_empty() {
        return Err(FeedError::EmptyBatch);
    }
    Ok(points)
}

/// Endpoint polled on a fixed interval
#[derive(Debug, Clone)]
pub struct PollingSource<T> {
    url: Url,
    interval: Duration,
    request_timeout: Duration,
    client: Client,
    _point: PhantomData<fn() -> T>,
}

impl<T> PollingSource<T>
where
    T: FeedItem + DeserializeOwned,
{
    pub fn new(url: &str, interval: Duration) -> Result<Self, FeedError> {
        if interval.is_zero() {
            return Err(FeedError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            url: Url::parse(url)?,
            interval,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client: Client::new(),
            _point: PhantomData,
        })
    }

    /// Bound each request so a stalled endpoint counts as a failed fetch. Rejects zero.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, FeedError> {
        if timeout.is_zero() {
            return Err(FeedError::InvalidConfig(
                "poll request timeout must be non-zero".to_string(),
            ));
        }
        self.request_timeout = timeout;
        Ok(self)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn fetch(&self) -> Result<bytes::Bytes, FeedError> {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl<T> FeedSource for PollingSource<T>
where
    T: FeedItem + DeserializeOwned,
{
    type Item = T;

    async fn run(self, tx: mpsc::Sender<FeedEvent<T>>) {
        info!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "Starting polling feed");

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(timer);
        let mut connected = false;

        while ticks.next().await.is_some() {
            let mut events = Vec::with_capacity(2);

            match self.fetch().await {
                Ok(body) => {
                    if !connected {
                        connected = true;
                        info!(url = %self.url, "Polling feed reachable");
                        events.push(FeedEvent::Opened);
                    }
                    match parse_poll_body::<T>(&body) {
                        Ok(points) => {
                            debug!(points = points.len(), "Polled batch");
                            events.push(FeedEvent::Append(points));
                        }
                        Err(error) => events.push(FeedEvent::Invalid(error)),
                    }
                }
                Err(error) => {
                    if connected {
                        error!(%error, url = %self.url, "Poll failed");
                    }
                    connected = false;
                    events.push(FeedEvent::Closed(error));
                }
            }

            for event in events {
                if tx.send(event).await.is_err() {
                    debug!("Renderer dropped, stopping polling feed");
                    return;
                }
            }
        }
    }
}
