//! Chart view shared between the renderer task and the draw loop
//!
//! The renderer pushes full redraws into a [`ChartFrame`] behind a mutex; the draw loop takes a
//! snapshot every tick.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use itertools::{Itertools, MinMaxResult};
use live_feed::{ChartView, PlotPoint, Signal};
use parking_lot::Mutex;

/// Signals kept for the side panel
pub const MAX_SIGNALS: usize = 20;

/// Latest state handed over by the renderer
#[derive(Debug, Clone, Default)]
pub struct ChartFrame {
    /// Visible points, oldest first
    pub points: Vec<PlotPoint>,
    /// Newest first
    pub signals: VecDeque<Signal>,
    pub redraws: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl ChartFrame {
    /// Draw as candlesticks when the series carries any candle
    pub fn has_candles(&self) -> bool {
        self.points
            .iter()
            .any(|point| matches!(point, PlotPoint::Candle { .. }))
    }

    pub fn latest(&self) -> Option<&PlotPoint> {
        self.points.last()
    }

    /// Lowest and highest drawn value across the visible series
    pub fn price_bounds(&self) -> Option<(f64, f64)> {
        let values = self.points.iter().flat_map(|point| {
            let (low, high) = point.bounds();
            [low, high]
        });

        match values.minmax() {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(value) => Some((value, value)),
            MinMaxResult::MinMax(low, high) => Some((low, high)),
        }
    }

    /// `(x, value)` pairs for a line dataset
    pub fn line_data(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .map(|point| (point.x() as f64, point.value()))
            .collect()
    }

    /// Change of the last value against the first visible one
    pub fn change(&self) -> Option<f64> {
        let first = self.points.first()?.value();
        let last = self.points.last()?.value();
        Some(last - first)
    }
}

/// [`ChartView`] drawing into the terminal
#[derive(Debug, Clone, Default)]
pub struct TerminalChart {
    frame: Arc<Mutex<ChartFrame>>,
}

impl TerminalChart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ChartFrame {
        self.frame.lock().clone()
    }
}

impl ChartView for TerminalChart {
    fn set_data(&mut self, points: &[PlotPoint]) {
        let mut frame = self.frame.lock();
        frame.points.clear();
        frame.points.extend_from_slice(points);
        frame.redraws += 1;
        frame.last_update = Some(Utc::now());
    }

    fn annotate(&mut self, signal: &Signal) {
        let mut frame = self.frame.lock();
        frame.signals.push_front(signal.clone());
        frame.signals.truncate(MAX_SIGNALS);
        frame.last_update = Some(Utc::now());
    }
}
