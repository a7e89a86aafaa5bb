//! Core data types for live feeds
//!
//! These types match the JSON records written by the real-time store, returned by the polling
//! endpoint and carried inside streaming socket messages.

use chrono::{DateTime, Utc};
use derive_more::{Constructor, From};
use serde::{Deserialize, Serialize};

/// A point that can live in a [`FeedWindow`](crate::window::FeedWindow).
///
/// Points are identified and ordered by their time key (Unix seconds).
pub trait FeedItem: std::fmt::Debug + Clone + Send + Sync + 'static {
    /// Time key used for ordering and de-duplication.
    fn time_key(&self) -> i64;

    /// Convert into the shape the chart view draws.
    fn to_plot(&self) -> PlotPoint;
}

/// Single price observation
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Tick {
    /// Unix seconds
    #[serde(alias = "time")]
    pub epoch: i64,
    /// Observed price
    #[serde(alias = "price")]
    pub quote: f64,
}

impl FeedItem for Tick {
    fn time_key(&self) -> i64 {
        self.epoch
    }

    fn to_plot(&self) -> PlotPoint {
        PlotPoint::Line {
            x: self.epoch,
            y: self.quote,
        }
    }
}

/// OHLC aggregate over a fixed time bucket
///
/// `low <= min(open, close)` and `high >= max(open, close)` are guaranteed by the upstream
/// aggregator and not re-checked here.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    /// Bucket start, Unix seconds
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }
}

impl FeedItem for Candle {
    fn time_key(&self) -> i64 {
        self.time
    }

    fn to_plot(&self) -> PlotPoint {
        PlotPoint::Candle {
            x: self.time,
            o: self.open,
            h: self.high,
            l: self.low,
            c: self.close,
        }
    }
}

/// Either a tick or a candle.
///
/// The streaming socket mixes candle snapshots with tick appends on the same chart.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, From)]
#[serde(untagged)]
pub enum FeedPoint {
    Candle(Candle),
    Tick(Tick),
}

impl FeedItem for FeedPoint {
    fn time_key(&self) -> i64 {
        match self {
            FeedPoint::Candle(candle) => candle.time_key(),
            FeedPoint::Tick(tick) => tick.time_key(),
        }
    }

    fn to_plot(&self) -> PlotPoint {
        match self {
            FeedPoint::Candle(candle) => candle.to_plot(),
            FeedPoint::Tick(tick) => tick.to_plot(),
        }
    }
}

/// Shape handed to a [`ChartView`](crate::chart::ChartView)
///
/// Serialises to `{x, y}` for a line point and `{x, o, h, l, c}` for a candlestick.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PlotPoint {
    Candle { x: i64, o: f64, h: f64, l: f64, c: f64 },
    Line { x: i64, y: f64 },
}

impl PlotPoint {
    /// Timestamp in Unix seconds
    pub fn x(&self) -> i64 {
        match self {
            PlotPoint::Line { x, .. } | PlotPoint::Candle { x, .. } => *x,
        }
    }

    /// Last value of the point (line value or candle close)
    pub fn value(&self) -> f64 {
        match self {
            PlotPoint::Line { y, .. } => *y,
            PlotPoint::Candle { c, .. } => *c,
        }
    }

    /// Lowest and highest value drawn for this point
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            PlotPoint::Line { y, .. } => (*y, *y),
            PlotPoint::Candle { l, h, .. } => (*l, *h),
        }
    }

    /// Timestamp as UTC, `None` if out of range
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.x(), 0)
    }
}

/// Direction of a trade signal
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    #[serde(alias = "Buy", alias = "BUY", alias = "Bullish", alias = "bullish")]
    Buy,
    #[serde(alias = "Sell", alias = "SELL", alias = "Bearish", alias = "bearish")]
    Sell,
}

impl SignalSide {
    /// Convert to display string
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSide::Buy => "BUY",
            SignalSide::Sell => "SELL",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, SignalSide::Buy)
    }
}

impl std::fmt::Display for SignalSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Out-of-band trade annotation
///
/// Rendered beside the price series, never stored in the feed window.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Signal {
    #[serde(alias = "signal", alias = "direction")]
    pub side: SignalSide,
    #[serde(alias = "entry_price")]
    pub entry: f64,
    /// Take profit level
    #[serde(default, alias = "take_profit")]
    pub tp: Option<f64>,
    /// Stop loss level
    #[serde(default, alias = "stop_loss")]
    pub sl: Option<f64>,
    /// Unix seconds
    pub timestamp: i64,
    /// Chart pattern that produced the signal, if any
    #[serde(default)]
    pub pattern: Option<String>,
}
