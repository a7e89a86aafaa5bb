//! Feed configuration.
//!
//! [`FeedConfig`] selects one of the three network sources and the window sizes, and can be
//! read from `LIVE_FEED_*` environment variables. Unparseable values fall back to defaults.

use std::{fmt, str::FromStr, time::Duration};

use derive_more::Display;
use tracing::info;

use crate::chart::ChartView;
use crate::error::FeedError;
use crate::renderer::{LiveFeedRenderer, RendererHandle};
use crate::source::{
    poll::{DEFAULT_POLL_INTERVAL, PollingSource},
    socket::{SocketConfig, SocketSource},
    store::{RealtimeStoreSource, StoreConfig},
};
use crate::types::{FeedItem, FeedPoint};
use crate::window::FeedWindow;

/// Default number of visible points
pub const DEFAULT_DISPLAY_CAP: usize = 100;

/// Default `limitToLast` for real-time store subscriptions
pub const DEFAULT_STORE_LIMIT: usize = 900;

/// Which network source to subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum SourceKind {
    #[display("store")]
    Store,
    #[display("poll")]
    Poll,
    #[default]
    #[display("socket")]
    Socket,
}

impl SourceKind {
    /// Base URL used when none is configured
    pub fn default_url(&self) -> &'static str {
        match self {
            SourceKind::Store => "http://127.0.0.1:9000",
            SourceKind::Poll => "http://127.0.0.1:8000/ticks/R_25",
            SourceKind::Socket => "ws://127.0.0.1:8000",
        }
    }

    fn accepts_scheme(&self, scheme: &str) -> bool {
        match self {
            SourceKind::Store | SourceKind::Poll => matches!(scheme, "http" | "https"),
            SourceKind::Socket => matches!(scheme, "ws" | "wss"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" | "firebase" => Ok(SourceKind::Store),
            "poll" | "http" => Ok(SourceKind::Poll),
            "socket" | "ws" | "websocket" => Ok(SourceKind::Socket),
            other => Err(FeedError::InvalidConfig(format!(
                "unknown source kind: {other}"
            ))),
        }
    }
}

/// Everything needed to subscribe a renderer to a network source
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub source: SourceKind,
    /// Source base URL, [`SourceKind::default_url`] when `None`
    pub url: Option<String>,
    /// Real-time store path
    pub path: String,
    pub instrument: String,
    pub timeframe: String,
    pub display_cap: usize,
    /// Points kept in memory, the display cap when `None`
    pub retention: Option<usize>,
    pub store_limit: usize,
    pub poll_interval: Duration,
    /// Opt-in fixed re-dial delay
    pub reconnect_delay: Option<Duration>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            url: None,
            path: "ticks/R_25".to_string(),
            instrument: "R_25".to_string(),
            timeframe: "1m".to_string(),
            display_cap: DEFAULT_DISPLAY_CAP,
            retention: None,
            store_limit: DEFAULT_STORE_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: None,
        }
    }
}

impl FeedConfig {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = instrument.into();
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }

    pub fn with_display_cap(mut self, display_cap: usize) -> Self {
        self.display_cap = display_cap;
        self
    }

    pub fn with_retention(mut self, retention: Option<usize>) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_store_limit(mut self, limit: usize) -> Self {
        self.store_limit = limit;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Read configuration from `LIVE_FEED_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            source: lookup("LIVE_FEED_SOURCE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.source),
            url: lookup("LIVE_FEED_URL").filter(|v| !v.trim().is_empty()),
            path: lookup("LIVE_FEED_PATH").unwrap_or(defaults.path),
            instrument: lookup("LIVE_FEED_INSTRUMENT").unwrap_or(defaults.instrument),
            timeframe: lookup("LIVE_FEED_TIMEFRAME").unwrap_or(defaults.timeframe),
            display_cap: parsed("LIVE_FEED_DISPLAY_CAP")
                .map(|v| v as usize)
                .unwrap_or(defaults.display_cap),
            retention: parsed("LIVE_FEED_RETENTION").map(|v| v as usize),
            store_limit: parsed("LIVE_FEED_STORE_LIMIT")
                .map(|v| v as usize)
                .unwrap_or(defaults.store_limit),
            poll_interval: parsed("LIVE_FEED_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            reconnect_delay: parsed("LIVE_FEED_RECONNECT_MS")
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis),
        }
    }

    /// Source base URL after applying the per-source default
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or(self.source.default_url())
    }

    /// Points kept in memory
    pub fn retention(&self) -> usize {
        self.retention.unwrap_or(self.display_cap).max(self.display_cap)
    }

    /// Check the configuration can be used to start a renderer.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.display_cap < 1 {
            return Err(FeedError::InvalidConfig(
                "display cap must be at least 1".to_string(),
            ));
        }
        if self.store_limit < 1 {
            return Err(FeedError::InvalidConfig(
                "store limit must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(FeedError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }

        let url = url::Url::parse(self.url())?;
        if !self.source.accepts_scheme(url.scheme()) {
            return Err(FeedError::InvalidConfig(format!(
                "{} source cannot use a {} URL",
                self.source,
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Empty window sized by the display cap and retention.
    pub fn window<T: FeedItem>(&self) -> Result<FeedWindow<T>, FeedError> {
        FeedWindow::with_retention(self.display_cap, self.retention())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.url(), self.path.clone())
            .with_limit_to_last(self.store_limit)
            .with_reconnect_delay(self.reconnect_delay)
    }

    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig::new(self.url(), self.instrument.clone(), self.timeframe.clone())
            .with_reconnect_delay(self.reconnect_delay)
    }

    /// Validate, subscribe the configured source and start rendering into `view`.
    pub fn start<V>(&self, view: V) -> Result<RendererHandle<FeedPoint, V>, FeedError>
    where
        V: ChartView,
    {
        self.validate()?;
        let renderer = LiveFeedRenderer::from_window(view, self.window()?);
        info!(config = %self, "Starting live feed");

        let handle = match self.source {
            SourceKind::Store => {
                renderer.spawn(RealtimeStoreSource::<FeedPoint>::new(self.store_config())?)
            }
            SourceKind::Poll => {
                renderer.spawn(PollingSource::<FeedPoint>::new(self.url(), self.poll_interval)?)
            }
            SourceKind::Socket => renderer.spawn(SocketSource::new(self.socket_config())?),
        };
        Ok(handle)
    }
}

impl fmt::Display for FeedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            SourceKind::Store => write!(f, "store {}/{}", self.url(), self.path)?,
            SourceKind::Poll => write!(f, "poll {} every {:?}", self.url(), self.poll_interval)?,
            SourceKind::Socket => write!(
                f,
                "socket {} {}/{}",
                self.url(),
                self.instrument,
                self.timeframe
            )?,
        }
        write!(f, " (display {}, retain {})", self.display_cap, self.retention())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_source_kind_from_str() {
        struct TestCase {
            input: &'static str,
            expected: Option<SourceKind>,
        }

        let tests = vec![
            TestCase {
                // TC0
                input: "store",
                expected: Some(SourceKind::Store),
            },
            TestCase {
                // TC1: case and whitespace insensitive
                input: " Poll ",
                expected: Some(SourceKind::Poll),
            },
            TestCase {
                // TC2: alias
                input: "ws",
                expected: Some(SourceKind::Socket),
            },
            TestCase {
                // TC3
                input: "carrier pigeon",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.parse::<SourceKind>().ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = FeedConfig::from_lookup(lookup(&[]));

        assert_eq!(config, FeedConfig::default());
        assert_eq!(config.url(), "ws://127.0.0.1:8000");
        assert_eq!(config.retention(), 100);
        assert_eq!(config.reconnect_delay, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = FeedConfig::from_lookup(lookup(&[
            ("LIVE_FEED_SOURCE", "store"),
            ("LIVE_FEED_URL", "https://db.example.com"),
            ("LIVE_FEED_PATH", "ticks/R_50"),
            ("LIVE_FEED_DISPLAY_CAP", "50"),
            ("LIVE_FEED_RETENTION", "500"),
            ("LIVE_FEED_STORE_LIMIT", "300"),
            ("LIVE_FEED_RECONNECT_MS", "2500"),
            ("LIVE_FEED_POLL_MS", "not a number"),
        ]));

        assert_eq!(config.source, SourceKind::Store);
        assert_eq!(config.url(), "https://db.example.com");
        assert_eq!(config.display_cap, 50);
        assert_eq!(config.retention(), 500);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.reconnect_delay, Some(Duration::from_millis(2500)));

        let store = config.store_config();
        assert_eq!(store.path, "ticks/R_50");
        assert_eq!(store.limit_to_last, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        struct TestCase {
            config: FeedConfig,
            valid: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: per-source default URLs are valid
                config: FeedConfig::new(SourceKind::Poll),
                valid: true,
            },
            TestCase {
                // TC1: zero display cap
                config: FeedConfig::default().with_display_cap(0),
                valid: false,
            },
            TestCase {
                // TC2: socket source over http
                config: FeedConfig::new(SourceKind::Socket).with_url("http://127.0.0.1:8000"),
                valid: false,
            },
            TestCase {
                // TC3: store source over ws
                config: FeedConfig::new(SourceKind::Store).with_url("ws://127.0.0.1:8000"),
                valid: false,
            },
            TestCase {
                // TC4: zero poll interval
                config: FeedConfig::new(SourceKind::Poll).with_poll_interval(Duration::ZERO),
                valid: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.config.validate();
            assert_eq!(actual.is_ok(), test.valid, "TC{} failed", index);
            if let Err(error) = actual {
                assert!(
                    matches!(error, FeedError::InvalidConfig(_)),
                    "TC{} failed",
                    index
                );
            }
        }
    }

    #[test]
    fn test_retention_never_below_display_cap() {
        let config = FeedConfig::default()
            .with_display_cap(200)
            .with_retention(Some(50));

        assert_eq!(config.retention(), 200);
        let window = config.window::<FeedPoint>().unwrap();
        assert_eq!(window.display_cap(), 200);
        assert_eq!(window.retention(), 200);
    }

    #[test]
    fn test_display() {
        let config = FeedConfig::default();
        assert_eq!(
            config.to_string(),
            "socket ws://127.0.0.1:8000 R_25/1m (display 100, retain 100)"
        );
    }
}
