//! Chart view contract.
//!
//! A chart view receives the full ordered set of visible points on every redraw and performs a
//! synchronous full redraw. There is no partial-update API. Signals arrive through a separate
//! annotation channel and never replace the price series.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{PlotPoint, Signal};

/// Something that can draw a price series.
pub trait ChartView: Send + 'static {
    /// Replace the drawn series with `points` (ascending by `x`) and redraw.
    fn set_data(&mut self, points: &[PlotPoint]);

    /// Draw an out-of-band annotation beside the series.
    fn annotate(&mut self, signal: &Signal);
}

impl<V: ChartView + ?Sized> ChartView for Box<V> {
    fn set_data(&mut self, points: &[PlotPoint]) {
        (**self).set_data(points)
    }

    fn annotate(&mut self, signal: &Signal) {
        (**self).annotate(signal)
    }
}

#[derive(Debug, Default)]
struct Recording {
    frames: Vec<Vec<PlotPoint>>,
    annotations: Vec<Signal>,
}

/// [`ChartView`] that records every redraw and annotation.
///
/// Clones share the same recording, so one clone can be handed to a renderer while another is
/// kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct ChartRecorder {
    inner: Arc<Mutex<Recording>>,
}

impl ChartRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set_data` calls observed
    pub fn redraw_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Points passed to the most recent redraw
    pub fn last_frame(&self) -> Option<Vec<PlotPoint>> {
        self.inner.lock().frames.last().cloned()
    }

    /// `x` values of the most recent redraw
    pub fn last_keys(&self) -> Vec<i64> {
        self.last_frame()
            .map(|frame| frame.iter().map(PlotPoint::x).collect())
            .unwrap_or_default()
    }

    pub fn annotations(&self) -> Vec<Signal> {
        self.inner.lock().annotations.clone()
    }
}

impl ChartView for ChartRecorder {
    fn set_data(&mut self, points: &[PlotPoint]) {
        self.inner.lock().frames.push(points.to_vec());
    }

    fn annotate(&mut self, signal: &Signal) {
        self.inner.lock().annotations.push(signal.clone());
    }
}
