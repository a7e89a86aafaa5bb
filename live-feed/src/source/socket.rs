//! Streaming socket feed.
//!
//! Connects to `ws(s)://{host}/ws/{instrument}/{timeframe}` and turns every text message into
//! [`FeedEvent`]s:
//!
//! - `{"candles": [...]}` replaces the window,
//! - `{"ticks": [...]}` is appended,
//! - `{"signal": {...}}` is forwarded as an annotation,
//! - `{"type": "welcome"}` is ignored.
//!
//! A single message may carry several of these keys; they are applied in the order above.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{FeedEvent, FeedSource, timeout::TimeoutStream};
use crate::error::FeedError;
use crate::types::{Candle, FeedPoint, Signal, Tick};

/// Socket client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SocketConfig {
    /// Server base URL, `ws://` or `wss://`
    pub base_url: String,
    pub instrument: String,
    pub timeframe: String,
    /// Ping interval to keep the connection alive
    pub ping_interval: Duration,
    /// Connection is treated as dead when nothing arrives for this long
    pub read_timeout: Duration,
    /// Re-dial delay after a disconnect, `None` to connect once
    pub reconnect_delay: Option<Duration>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8000".to_string(),
            instrument: "R_25".to_string(),
            timeframe: "1m".to_string(),
            ping_interval: Duration::from_secs(30),
            read_timeout: super::timeout::DEFAULT_READ_TIMEOUT,
            reconnect_delay: None,
        }
    }
}

impl SocketConfig {
    pub fn new(
        base_url: impl Into<String>,
        instrument: impl Into<String>,
        timeframe: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            instrument: instrument.into(),
            timeframe: timeframe.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
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

    /// Full stream URL for the configured instrument and timeframe.
    pub fn url(&self) -> Result<Url, FeedError> {
        let url = Url::parse(&format!(
            "{}/ws/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.instrument,
            self.timeframe
        ))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(FeedError::InvalidConfig(format!(
                "socket URL must use ws or wss, got: {other}"
            ))),
        }
    }
}

/// Text message pushed by the stream server
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SocketMessage {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub candles: Option<Vec<Candle>>,
    #[serde(default)]
    pub ticks: Option<Vec<Tick>>,
    #[serde(default)]
    pub signal: Option<Signal>,
}

impl SocketMessage {
    pub fn is_welcome(&self) -> bool {
        self.kind.as_deref() == Some("welcome")
    }

    /// Convert into renderer events.
    ///
    /// Returns [`FeedError::Malformed`] for a message carrying none of the known keys.
    pub fn into_events(self) -> Result<Vec<FeedEvent<FeedPoint>>, FeedError> {
        if self.is_welcome() {
            return Ok(Vec::new());
        }

        let mut events = Vec::with_capacity(3);
        if let Some(candles) = self.candles {
            events.push(FeedEvent::Replace(
                candles.into_iter().map(FeedPoint::from).collect(),
            ));
        }
        if let Some(ticks) = self.ticks {
            events.push(FeedEvent::Append(
                ticks.into_iter().map(FeedPoint::from).collect(),
            ));
        }
        if let Some(signal) = self.signal {
            events.push(FeedEvent::Signal(signal));
        }

        if events.is_empty() {
            return Err(FeedError::Malformed(format!(
                "message has no candles, ticks or signal (type: {:?})",
                self.kind
            )));
        }
        Ok(events)
    }
}

/// Decode a text frame into renderer events.
pub fn parse_socket_message(text: &str) -> Result<Vec<FeedEvent<FeedPoint>>, FeedError> {
    serde_json::from_str::<SocketMessage>(text)?.into_events()
}

/// WebSocket stream of candles, ticks and signals
#[derive(Debug, Clone)]
pub struct SocketSource {
    config: SocketConfig,
    url: Url,
}

impl SocketSource {
    pub fn new(config: SocketConfig) -> Result<Self, FeedError> {
        if config.ping_interval.is_zero() || config.read_timeout.is_zero() {
            return Err(FeedError::InvalidConfig(
                "socket ping interval and read timeout must be non-zero".to_string(),
            ));
        }

        let url = config.url()?;
        Ok(Self { config, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Run one connection until it closes, fails or the renderer goes away.
    async fn stream_once(&self, tx: &mpsc::Sender<FeedEvent<FeedPoint>>) -> Result<(), FeedError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "Connected to stream server");
        send(tx, FeedEvent::Opened).await?;

        let (mut write, read) = ws_stream.split();

        // Keep-alive pings run beside the read loop until it ends
        let ping_interval = self.config.ping_interval;
        let (ping_shutdown_tx, mut ping_shutdown_rx) = mpsc::channel::<()>(1);
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                            debug!("Failed to send ping, connection likely dead");
                            break;
                        }
                    }
                    _ = ping_shutdown_rx.recv() => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        });

        let mut read = TimeoutStream::new(read, self.config.read_timeout);
        let result = self.read_loop(&mut read, tx).await;

        let _ = ping_shutdown_tx.send(()).await;
        let _ = ping_task.await;

        if read.timed_out() {
            return Err(FeedError::Transport(format!(
                "no data received for {:?}",
                read.timeout_duration()
            )));
        }
        result
    }

    async fn read_loop<S>(
        &self,
        read: &mut S,
        tx: &mpsc::Sender<FeedEvent<FeedPoint>>,
    ) -> Result<(), FeedError>
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => match parse_socket_message(text.as_str()) {
                    Ok(events) if events.is_empty() => debug!("Received welcome message"),
                    Ok(events) => {
                        for event in events {
                            send(tx, event).await?;
                        }
                    }
                    Err(error) => {
                        debug!(raw = %text.as_str(), "Unusable stream message");
                        send(tx, FeedEvent::Invalid(error)).await?;
                    }
                },
                Message::Close(frame) => {
                    info!(?frame, "Server closed connection");
                    return Err(FeedError::Closed);
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) | Message::Frame(_) => {
                    debug!("Ignoring non-text stream message");
                }
            }
        }

        Err(FeedError::Closed)
    }
}

async fn send(
    tx: &mpsc::Sender<FeedEvent<FeedPoint>>,
    event: FeedEvent<FeedPoint>,
) -> Result<(), FeedError> {
    tx.send(event).await.map_err(|_| FeedError::RendererStopped)
}

#[async_trait]
impl FeedSource for SocketSource {
    type Item = FeedPoint;

    async fn run(self, tx: mpsc::Sender<FeedEvent<FeedPoint>>) {
        info!(url = %self.url, "Starting stream feed");

        loop {
            let error = match self.stream_once(&tx).await {
                Err(FeedError::RendererStopped) => {
                    debug!("Renderer dropped, stopping stream feed");
                    return;
                }
                Err(error) => error,
                Ok(()) => FeedError::Closed,
            };

            if error == FeedError::Closed {
                warn!(url = %self.url, "Stream connection closed");
            } else {
                error!(%error, url = %self.url, "Stream connection failed");
            }
            if tx.send(FeedEvent::Closed(error)).await.is_err() {
                return;
            }

            let Some(delay) = self.config.reconnect_delay else {
                return;
            };
            debug!(?delay, "Waiting before reconnecting to stream server");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalSide;

    #[test]
    fn test_socket_url() {
        struct TestCase {
            base_url: &'static str,
            expected: Result<&'static str, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: default server
                base_url: "ws://127.0.0.1:8000",
                expected: Ok("ws://127.0.0.1:8000/ws/R_25/1m"),
            },
            TestCase {
                // TC1: trailing slash trimmed
                base_url: "wss://stream.example.com/",
                expected: Ok("wss://stream.example.com/ws/R_25/1m"),
            },
            TestCase {
                // TC2: http is not a socket scheme
                base_url: "http://127.0.0.1:8000",
                expected: Err(()),
            },
            TestCase {
                // TC3: unparseable
                base_url: "::",
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let config = SocketConfig::new(test.base_url, "R_25", "1m");
            let actual = config.url();
            match test.expected {
                Ok(expected) => {
                    assert_eq!(actual.unwrap().as_str(), expected, "TC{} failed", index)
                }
                Err(()) => assert!(
                    matches!(actual, Err(FeedError::InvalidConfig(_))),
                    "TC{} failed",
                    index
                ),
            }
        }
    }

    #[test]
    fn test_socket_config_defaults() {
        let config = SocketConfig::default()
            .with_ping_interval(Duration::from_secs(5))
            .with_reconnect_delay(Some(Duration::from_secs(2)));

        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(120));
        assert_eq!(config.reconnect_delay, Some(Duration::from_secs(2)));

        let invalid = SocketSource::new(SocketConfig::default().with_read_timeout(Duration::ZERO));
        assert!(matches!(invalid, Err(FeedError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_socket_message() {
        struct TestCase {
            input: &'static str,
            expected: Vec<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: welcome is ignored
                input: r#"{"type":"welcome","message":"hi"}"#,
                expected: vec![],
            },
            TestCase {
                // TC1: candle snapshot
                input: r#"{"candles":[{"time":60,"open":1,"high":2,"low":0.5,"close":1.5}]}"#,
                expected: vec!["replace"],
            },
            TestCase {
                // TC2: tick append with signal
                input: r#"{"ticks":[{"epoch":61,"quote":1.6}],"signal":{"signal":"sell","entry":1.6,"tp":1.5,"sl":1.7,"timestamp":61}}"#,
                expected: vec!["append", "signal"],
            },
            TestCase {
                // TC3: null signal is absent
                input: r#"{"ticks":[{"epoch":62,"quote":1.7}],"signal":null}"#,
                expected: vec!["append"],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_socket_message(test.input)
                .unwrap()
                .iter()
                .map(FeedEvent::kind)
                .collect::<Vec<_>>();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_socket_message_payloads() {
        let events = parse_socket_message(
            r#"{"ticks":[{"epoch":61,"quote":1.6}],"signal":{"direction":"Bullish","entry_price":1.6,"timestamp":61}}"#,
        )
        .unwrap();

        match &events[0] {
            FeedEvent::Append(points) => {
                assert_eq!(points, &vec![FeedPoint::Tick(Tick::new(61, 1.6))])
            }
            other => panic!("expected append, got {}", other.kind()),
        }
        match &events[1] {
            FeedEvent::Signal(signal) => assert_eq!(signal.side, SignalSide::Buy),
            other => panic!("expected signal, got {}", other.kind()),
        }
    }

    #[test]
    fn test_parse_socket_message_errors() {
        let unknown = parse_socket_message(r#"{"type":"heartbeat"}"#);
        assert!(matches!(unknown, Err(FeedError::Malformed(_))));

        let bad_tick = parse_socket_message(r#"{"ticks":[{"epoch":"soon"}]}"#);
        assert!(matches!(bad_tick, Err(FeedError::Malformed(_))));

        let not_json = parse_socket_message("ping");
        assert!(matches!(not_json, Err(FeedError::Malformed(_))));
    }
}
