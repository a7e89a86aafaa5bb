//! Live Feed - incremental chart rendering for streaming price data
//!
//! A [`LiveFeedRenderer`] keeps a bounded, time-ordered window of ticks or candles and redraws
//! a [`ChartView`] whenever a source delivers something new. Repeated notifications for the
//! same newest time key are dropped, and the renderer exposes a Connected / Disconnected
//! status.
//!
//! Sources:
//! - [`RealtimeStoreSource`]: real-time store subscription (REST streaming, full snapshots)
//! - [`PollingSource`]: HTTP endpoint polled on a fixed interval
//! - [`SocketSource`]: WebSocket stream of candles, ticks and signals
//! - [`ManualSource`] / [`ScriptedSource`]: in-process feeds

pub mod chart;
pub mod config;
pub mod error;
pub mod renderer;
pub mod source;
pub mod status;
pub mod types;
pub mod window;

// Re-export commonly used types for convenience
pub use chart::{ChartRecorder, ChartView};
pub use config::{FeedConfig, SourceKind};
pub use error::FeedError;
pub use renderer::{LiveFeedRenderer, RendererHandle, UpdateOutcome, initialize};
pub use source::{FeedEvent, FeedSource};
pub use status::ConnectionStatus;
pub use types::{Candle, FeedItem, FeedPoint, PlotPoint, Signal, SignalSide, Tick};
pub use window::FeedWindow;

pub use source::manual::{ManualFeed, ManualSource, ScriptedSource};
pub use source::poll::PollingSource;
pub use source::socket::{SocketConfig, SocketSource};
pub use source::store::{RealtimeStoreSource, StoreConfig};
