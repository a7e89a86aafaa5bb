//! Bounded, time-ordered buffer of recent feed points.
//!
//! Points are kept ascending by time key. Batches are sorted before they are merged, and the
//! oldest points are evicted first once `retention` is exceeded. The chart is drawn from the
//! trailing `display_cap` points.

use std::collections::VecDeque;

use crate::error::FeedError;
use crate::types::{FeedItem, PlotPoint};

/// Sort a batch ascending by time key, dropping repeated keys (first occurrence wins).
///
/// Already sorted batches are left untouched apart from de-duplication.
pub fn sort_batch<T: FeedItem>(batch: &mut Vec<T>) {
    if !batch.is_sorted_by_key(FeedItem::time_key) {
        batch.sort_by_key(FeedItem::time_key);
    }
    batch.dedup_by_key(|point| point.time_key());
}

/// Ring buffer for the N most recent feed points
#[derive(Debug, Clone)]
pub struct FeedWindow<T> {
    points: VecDeque<T>,
    display_cap: usize,
    retention: usize,
}

impl<T: FeedItem> FeedWindow<T> {
    /// Window that keeps and renders at most `display_cap` points.
    pub fn new(display_cap: usize) -> Result<Self, FeedError> {
        Self::with_retention(display_cap, display_cap)
    }

    /// Window that keeps up to `retention` points but renders only the trailing
    /// `display_cap`. A `retention` below `display_cap` is raised to `display_cap`.
    pub fn with_retention(display_cap: usize, retention: usize) -> Result<Self, FeedError> {
        if display_cap < 1 {
            return Err(FeedError::InvalidDisplayCap(display_cap));
        }
        let retention = retention.max(display_cap);

        Ok(Self {
            points: VecDeque::with_capacity(retention),
            display_cap,
            retention,
        })
    }

    /// Merge a batch into the window.
    ///
    /// Points not newer than the current newest point are treated as already seen and
    /// skipped. Returns the number of points appended.
    pub fn merge(&mut self, mut batch: Vec<T>) -> usize {
        sort_batch(&mut batch);

        let mut appended = 0;
        for point in batch {
            if self
                .newest_key()
                .is_some_and(|newest| point.time_key() <= newest)
            {
                continue;
            }
            self.points.push_back(point);
            appended += 1;
        }

        self.evict();
        appended
    }

    /// Replace the window contents with the trailing points of `batch`.
    pub fn replace(&mut self, mut batch: Vec<T>) {
        sort_batch(&mut batch);

        let start = batch.len().saturating_sub(self.retention);
        self.points.clear();
        self.points.extend(batch.into_iter().skip(start));
    }

    /// Change the number of rendered points, re-slicing from the tail.
    pub fn set_display_cap(&mut self, display_cap: usize) -> Result<(), FeedError> {
        if display_cap < 1 {
            return Err(FeedError::InvalidDisplayCap(display_cap));
        }
        self.display_cap = display_cap;
        self.retention = self.retention.max(display_cap);
        Ok(())
    }

    /// Drop oldest points beyond `retention`
    fn evict(&mut self) {
        while self.points.len() > self.retention {
            self.points.pop_front();
        }
    }

    /// Trailing `display_cap` points, oldest first
    pub fn visible(&self) -> impl Iterator<Item = &T> {
        let start = self.points.len().saturating_sub(self.display_cap);
        self.points.range(start..)
    }

    /// Visible points in chart shape
    pub fn plot(&self) -> Vec<PlotPoint> {
        self.visible().map(FeedItem::to_plot).collect()
    }

    /// Time keys of the visible points
    pub fn visible_keys(&self) -> Vec<i64> {
        self.visible().map(FeedItem::time_key).collect()
    }

    pub fn newest_key(&self) -> Option<i64> {
        self.points.back().map(FeedItem::time_key)
    }

    pub fn oldest_key(&self) -> Option<i64> {
        self.points.front().map(FeedItem::time_key)
    }

    /// Number of visible points
    pub fn visible_len(&self) -> usize {
        self.points.len().min(self.display_cap)
    }

    /// Number of retained points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn display_cap(&self) -> usize {
        self.display_cap
    }

    pub fn retention(&self) -> usize {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, Tick};

    fn ticks(epochs: &[i64]) -> Vec<Tick> {
        epochs
            .iter()
            .map(|&epoch| Tick::new(epoch, epoch as f64 / 100.0))
            .collect()
    }

    #[test]
    fn test_zero_display_cap_rejected() {
        assert_eq!(
            FeedWindow::<Tick>::new(0).unwrap_err(),
            FeedError::InvalidDisplayCap(0)
        );

        let mut window = FeedWindow::<Tick>::new(3).unwrap();
        assert_eq!(
            window.set_display_cap(0).unwrap_err(),
            FeedError::InvalidDisplayCap(0)
        );
        assert_eq!(window.display_cap(), 3);
    }

    #[test]
    fn test_merge_evicts_oldest_first() {
        let mut window = FeedWindow::new(2).unwrap();

        assert_eq!(window.merge(ticks(&[100, 101, 102])), 3);
        assert_eq!(window.visible_keys(), vec![101, 102]);

        window.merge(ticks(&[103]));
        assert_eq!(window.visible_keys(), vec![102, 103]);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_merge_sorts_unsorted_batch() {
        let mut window = FeedWindow::new(10).unwrap();
        window.merge(ticks(&[5, 3, 9, 1, 7]));

        let keys = window.visible_keys();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
        assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_merge_skips_already_seen() {
        struct TestCase {
            initial: Vec<i64>,
            batch: Vec<i64>,
            expected_appended: usize,
            expected_keys: Vec<i64>,
        }

        let tests = vec![
            TestCase {
                // TC0: overlapping snapshot only appends the new tail
                initial: vec![1, 2, 3],
                batch: vec![2, 3, 4, 5],
                expected_appended: 2,
                expected_keys: vec![1, 2, 3, 4, 5],
            },
            TestCase {
                // TC1: stale batch appends nothing
                initial: vec![10, 11],
                batch: vec![3, 4],
                expected_appended: 0,
                expected_keys: vec![10, 11],
            },
            TestCase {
                // TC2: duplicate epochs inside a batch collapse to one point
                initial: vec![],
                batch: vec![7, 7, 8],
                expected_appended: 2,
                expected_keys: vec![7, 8],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut window = FeedWindow::new(10).unwrap();
            window.merge(ticks(&test.initial));

            let appended = window.merge(ticks(&test.batch));

            assert_eq!(appended, test.expected_appended, "TC{} failed", index);
            assert_eq!(window.visible_keys(), test.expected_keys, "TC{} failed", index);
        }
    }

    #[test]
    fn test_replace_keeps_trailing_points() {
        let mut window = FeedWindow::new(3).unwrap();
        window.merge(ticks(&[1, 2]));

        window.replace(ticks(&[50, 10, 40, 20, 30]));

        assert_eq!(window.visible_keys(), vec![30, 40, 50]);
        assert_eq!(window.newest_key(), Some(50));
    }

    #[test]
    fn test_retention_larger_than_display_cap() {
        let mut window = FeedWindow::with_retention(2, 4).unwrap();
        window.merge(ticks(&[1, 2, 3, 4, 5]));

        assert_eq!(window.len(), 4);
        assert_eq!(window.visible_keys(), vec![4, 5]);

        // Raising the cap re-slices from retained history
        window.set_display_cap(3).unwrap();
        assert_eq!(window.visible_keys(), vec![3, 4, 5]);

        // Raising beyond retention lifts retention, nothing is refetched
        window.set_display_cap(10).unwrap();
        assert_eq!(window.retention(), 10);
        assert_eq!(window.visible_keys(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_set_display_cap_reslices_tail() {
        let mut window = FeedWindow::new(100).unwrap();
        window.merge(ticks(&(1..=100).collect::<Vec<_>>()));

        window.set_display_cap(50).unwrap();

        assert_eq!(window.visible_len(), 50);
        assert_eq!(window.oldest_key(), Some(1));
        assert_eq!(window.visible_keys().first(), Some(&51));
        assert_eq!(window.visible_keys().last(), Some(&100));
    }

    #[test]
    fn test_candle_plot() {
        let mut window = FeedWindow::new(5).unwrap();
        window.merge(vec![
            Candle::new(120, 2.0, 3.0, 1.5, 2.5),
            Candle::new(60, 1.0, 2.0, 0.5, 1.5),
        ]);

        let plot = window.plot();
        assert_eq!(plot.len(), 2);
        assert_eq!(plot[0].x(), 60);
        assert_eq!(plot[1].value(), 2.5);
    }
}
