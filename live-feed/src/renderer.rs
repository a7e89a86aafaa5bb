//! Live Feed Renderer.
//!
//! Owns a [`FeedWindow`] and a [`ChartView`] and keeps the view in sync with the window as
//! [`FeedEvent`]s arrive. Redraws happen at most once per distinct newest time key.
//!
//! [`initialize`] moves a renderer into a single consumer task that drains the source channel,
//! so updates are never processed concurrently for the same renderer. The returned
//! [`RendererHandle`] is the only way to talk to the task afterwards.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::chart::ChartView;
use crate::error::FeedError;
use crate::source::{FeedEvent, FeedSource};
use crate::status::ConnectionStatus;
use crate::types::{FeedItem, Signal};
use crate::window::{FeedWindow, sort_batch};

/// Channel buffer between a source task and the consumer task
pub const DEFAULT_FEED_BUFFER_SIZE: usize = 1024;

/// Result of handing one notification to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Window changed and the chart was redrawn.
    Rendered,
    /// Newest time key already rendered, or nothing new to merge.
    Unchanged,
    /// Annotation forwarded to the chart.
    Annotated,
    /// Connection status changed, window untouched.
    StatusChanged,
    /// Empty or malformed data, window untouched.
    Skipped,
    /// Renderer was torn down, nothing mutated.
    Disposed,
}

/// Bounded, de-duplicating chart feed
#[derive(Debug)]
pub struct LiveFeedRenderer<T, V> {
    window: FeedWindow<T>,
    view: V,
    status_tx: watch::Sender<ConnectionStatus>,
    last_rendered: Option<i64>,
    redraws: u64,
    disposed: Arc<AtomicBool>,
}

impl<T, V> LiveFeedRenderer<T, V>
where
    T: FeedItem,
    V: ChartView,
{
    /// Renderer drawing at most `display_cap` points into `view`.
    pub fn new(view: V, display_cap: usize) -> Result<Self, FeedError> {
        Ok(Self::from_window(view, FeedWindow::new(display_cap)?))
    }

    /// Renderer over a pre-configured window (e.g. retention larger than the display cap).
    pub fn from_window(view: V, window: FeedWindow<T>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            window,
            view,
            status_tx,
            last_rendered: None,
            redraws: 0,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Dispatch a source notification.
    pub fn handle_event(&mut self, event: FeedEvent<T>) -> UpdateOutcome {
        debug!(kind = event.kind(), "Feed event");
        match event {
            FeedEvent::Opened => self.on_open(),
            FeedEvent::Append(batch) => self.on_update(batch),
            FeedEvent::Replace(batch) => self.on_replace(batch),
            FeedEvent::Signal(signal) => self.on_signal(signal),
            // A source still running can surface a transport failure without closing
            FeedEvent::Invalid(error) if error.is_transport() => self.on_close(&error),
            FeedEvent::Invalid(error) => {
                if self.is_disposed() {
                    return UpdateOutcome::Disposed;
                }
                warn!(%error, "Skipping invalid feed data");
                UpdateOutcome::Skipped
            }
            FeedEvent::Closed(error) => self.on_close(&error),
        }
    }

    /// Merge an incremental batch into the window and redraw if the newest time key moved.
    pub fn on_update(&mut self, batch: Vec<T>) -> UpdateOutcome {
        let batch = match self.prepare_batch(batch) {
            Ok(batch) => batch,
            Err(outcome) => return outcome,
        };

        if self.window.merge(batch) == 0 {
            debug!("Batch contained no points newer than the window");
            return UpdateOutcome::Unchanged;
        }

        self.redraw();
        UpdateOutcome::Rendered
    }

    /// Replace the window with a full snapshot and redraw if the newest time key moved.
    pub fn on_replace(&mut self, batch: Vec<T>) -> UpdateOutcome {
        let batch = match self.prepare_batch(batch) {
            Ok(batch) => batch,
            Err(outcome) => return outcome,
        };

        self.window.replace(batch);
        self.redraw();
        UpdateOutcome::Rendered
    }

    /// Forward an annotation to the chart, leaving the price series as is.
    pub fn on_signal(&mut self, signal: Signal) -> UpdateOutcome {
        if self.is_disposed() {
            return UpdateOutcome::Disposed;
        }

        info!(
            side = %signal.side,
            entry = signal.entry,
            timestamp = signal.timestamp,
            pattern = signal.pattern.as_deref().unwrap_or("-"),
            "Signal received"
        );
        self.view.annotate(&signal);
        UpdateOutcome::Annotated
    }

    /// Source opened.
    pub fn on_open(&mut self) -> UpdateOutcome {
        if self.is_disposed() {
            return UpdateOutcome::Disposed;
        }
        self.set_status(ConnectionStatus::Connected)
    }

    /// Source closed or failed. The window is kept so the last view stays visible.
    pub fn on_close(&mut self, reason: &FeedError) -> UpdateOutcome {
        if self.is_disposed() {
            return UpdateOutcome::Disposed;
        }
        if self.status().is_connected() {
            error!(%reason, "Feed disconnected");
        } else {
            debug!(%reason, "Feed still disconnected");
        }
        self.set_status(ConnectionStatus::Disconnected)
    }

    /// Change the number of visible points and redraw immediately. Nothing is refetched.
    pub fn set_display_cap(&mut self, display_cap: usize) -> Result<UpdateOutcome, FeedError> {
        if display_cap < 1 {
            return Err(FeedError::InvalidDisplayCap(display_cap));
        }
        if self.is_disposed() {
            return Ok(UpdateOutcome::Disposed);
        }

        self.window.set_display_cap(display_cap)?;
        info!(display_cap, "Display cap changed");
        self.redraw();
        Ok(UpdateOutcome::Rendered)
    }

    /// Stop accepting notifications. Idempotent.
    pub fn teardown(&mut self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            info!("Renderer torn down");
        }
    }

    /// Sort the batch and apply the no-op guard.
    ///
    /// Returns the outcome to report when the batch must not touch the window. The guard only
    /// compares the newest time key, so revisions of older points carried with an unchanged
    /// newest key are dropped.
    fn prepare_batch(&mut self, mut batch: Vec<T>) -> Result<Vec<T>, UpdateOutcome> {
        if self.is_disposed() {
            return Err(UpdateOutcome::Disposed);
        }
        if batch.is_empty() {
            warn!(error = %FeedError::EmptyBatch, "Skipping feed update");
            return Err(UpdateOutcome::Skipped);
        }

        sort_batch(&mut batch);
        let newest = batch.last().map(FeedItem::time_key);

        // Data arriving means the source is delivering
        if !self.status().is_connected() {
            self.set_status(ConnectionStatus::Connected);
        }

        if newest.is_some() && newest == self.last_rendered {
            debug!(?newest, "Newest time key already rendered");
            return Err(UpdateOutcome::Unchanged);
        }

        Ok(batch)
    }

    fn redraw(&mut self) {
        let points = self.window.plot();
        self.view.set_data(&points);
        self.redraws += 1;
        self.last_rendered = self.window.newest_key();
        debug!(
            points = points.len(),
            newest = ?self.last_rendered,
            redraws = self.redraws,
            "Chart redrawn"
        );
    }

    fn set_status(&mut self, status: ConnectionStatus) -> UpdateOutcome {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            info!(%status, "Connection status changed");
            UpdateOutcome::StatusChanged
        } else {
            UpdateOutcome::Unchanged
        }
    }

    /// Spawn the consumer task and subscribe to `source`.
    pub fn spawn<S>(self, source: S) -> RendererHandle<T, V>
    where
        S: FeedSource<Item = T>,
    {
        self.spawn_with_buffer(source, DEFAULT_FEED_BUFFER_SIZE)
    }

    /// As [`spawn`](Self::spawn), with a custom source channel buffer size.
    pub fn spawn_with_buffer<S>(self, source: S, buffer_size: usize) -> RendererHandle<T, V>
    where
        S: FeedSource<Item = T>,
    {
        let (feed_tx, feed_rx) = mpsc::channel(buffer_size.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let status_rx = self.subscribe_status();
        let disposed = Arc::clone(&self.disposed);

        let source_task = tokio::spawn(source.run(feed_tx));
        let consumer = tokio::spawn(run_consumer(self, feed_rx, command_rx));

        RendererHandle {
            command_tx,
            status_rx,
            disposed,
            source_task: Some(source_task),
            consumer: Some(consumer),
        }
    }

    pub fn window(&self) -> &FeedWindow<T> {
        &self.window
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Receiver following every status transition
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Number of redraws issued so far
    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }

    /// Newest time key handed to the chart
    pub fn last_rendered(&self) -> Option<i64> {
        self.last_rendered
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Subscribe `source` and start rendering into `view`.
///
/// Fails only if `display_cap < 1`. Subscription failures are reported through the status
/// channel of the returned handle.
pub fn initialize<S, V>(
    source: S,
    view: V,
    display_cap: usize,
) -> Result<RendererHandle<S::Item, V>, FeedError>
where
    S: FeedSource,
    V: ChartView,
{
    Ok(LiveFeedRenderer::new(view, display_cap)?.spawn(source))
}

#[derive(Debug)]
enum Command {
    SetDisplayCap(usize),
    Sync(oneshot::Sender<()>),
    Teardown,
}

/// Control handle for a spawned renderer.
///
/// Dropping the handle tears the renderer down.
#[derive(Debug)]
pub struct RendererHandle<T, V> {
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    disposed: Arc<AtomicBool>,
    source_task: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<LiveFeedRenderer<T, V>>>,
}

impl<T, V> RendererHandle<T, V> {
    /// Change the number of visible points. Rejects `0` immediately, and any value after
    /// teardown.
    pub fn set_display_cap(&self, display_cap: usize) -> Result<(), FeedError> {
        if display_cap < 1 {
            return Err(FeedError::InvalidDisplayCap(display_cap));
        }
        if self.is_torn_down() {
            return Err(FeedError::RendererStopped);
        }
        self.command_tx
            .send(Command::SetDisplayCap(display_cap))
            .map_err(|_| FeedError::RendererStopped)
    }

    /// Wait until the consumer has processed every feed event already queued.
    pub async fn sync(&self) -> Result<(), FeedError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Sync(tx))
            .map_err(|_| FeedError::RendererStopped)?;
        rx.await.map_err(|_| FeedError::RendererStopped)
    }

    /// Wait for the source task to finish delivering. Returns immediately after teardown.
    pub async fn source_finished(&mut self) {
        if let Some(task) = self.source_task.take() {
            let _ = task.await;
        }
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Receiver following every status transition
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Unsubscribe from the source and stop the consumer. Idempotent.
    ///
    /// Any notification still in flight is discarded without mutating the window.
    pub fn teardown(&mut self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.source_task.take() {
            task.abort();
        }
        let _ = self.command_tx.send(Command::Teardown);
        info!("Renderer teardown requested");
    }

    /// [`teardown`](Self::teardown), then wait until the consumer task has exited.
    ///
    /// Once this returns the chart view receives no further calls.
    pub async fn shutdown(&mut self) {
        self.teardown();

        // Queued behind Teardown, so the ack is dropped unanswered when the consumer exits
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(Command::Sync(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Tear the renderer down, wait for the consumer task to exit and take the renderer back.
    ///
    /// Returns `None` if the renderer was already taken or its task panicked.
    pub async fn join(mut self) -> Option<LiveFeedRenderer<T, V>> {
        self.teardown();
        let consumer = self.consumer.take()?;
        consumer.await.ok()
    }
}

impl<T, V> Drop for RendererHandle<T, V> {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_consumer<T, V>(
    mut renderer: LiveFeedRenderer<T, V>,
    mut feed_rx: mpsc::Receiver<FeedEvent<T>>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) -> LiveFeedRenderer<T, V>
where
    T: FeedItem,
    V: ChartView,
{
    let mut feed_open = true;

    loop {
        // Feed events first so Sync only resolves once the queue is drained
        tokio::select! {
            biased;

            event = feed_rx.recv(), if feed_open => match event {
                Some(event) => {
                    renderer.handle_event(event);
                }
                None => {
                    debug!("Feed source ended");
                    feed_open = false;
                    renderer.on_close(&FeedError::Closed);
                }
            },

            command = command_rx.recv() => match command {
                Some(Command::SetDisplayCap(display_cap)) => {
                    if let Err(error) = renderer.set_display_cap(display_cap) {
                        warn!(%error, "Rejected display cap");
                    }
                }
                Some(Command::Sync(ack)) => {
                    let _ = ack.send(());
                }
                Some(Command::Teardown) | None => {
                    renderer.teardown();
                }
            },
        }

        if renderer.is_disposed() {
            break;
        }
    }

    debug!(redraws = renderer.redraw_count(), "Renderer consumer stopped");
    renderer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartRecorder;
    use crate::types::{Candle, FeedPoint, SignalSide, Tick};

    fn ticks(epochs: &[i64]) -> Vec<Tick> {
        epochs.iter().map(|&epoch| Tick::new(epoch, 1.0)).collect()
    }

    fn renderer(display_cap: usize) -> (LiveFeedRenderer<Tick, ChartRecorder>, ChartRecorder) {
        let recorder = ChartRecorder::new();
        (
            LiveFeedRenderer::new(recorder.clone(), display_cap).unwrap(),
            recorder,
        )
    }

    #[test]
    fn test_zero_display_cap_rejected() {
        let result = LiveFeedRenderer::<Tick, _>::new(ChartRecorder::new(), 0);
        assert_eq!(result.unwrap_err(), FeedError::InvalidDisplayCap(0));
    }

    #[test]
    fn test_window_keeps_newest_within_cap() {
        let (mut renderer, recorder) = renderer(2);

        assert_eq!(
            renderer.on_update(ticks(&[100, 101, 102])),
            UpdateOutcome::Rendered
        );
        assert_eq!(recorder.last_keys(), vec![101, 102]);
    }

    #[test]
    fn test_identical_batch_redraws_once() {
        let (mut renderer, recorder) = renderer(10);
        let batch = ticks(&[1, 2, 3]);

        assert_eq!(renderer.on_update(batch.clone()), UpdateOutcome::Rendered);
        assert_eq!(renderer.on_update(batch), UpdateOutcome::Unchanged);
        assert_eq!(recorder.redraw_count(), 1);
        assert_eq!(renderer.redraw_count(), 1);
    }

    #[test]
    fn test_revision_with_same_newest_key_is_dropped() {
        let (mut renderer, recorder) = renderer(10);
        renderer.on_update(vec![Tick::new(1, 1.0), Tick::new(2, 2.0)]);

        // Older point revised, newest key unchanged
        let outcome = renderer.on_update(vec![Tick::new(1, 9.0), Tick::new(2, 2.0)]);

        assert_eq!(outcome, UpdateOutcome::Unchanged);
        assert_eq!(recorder.redraw_count(), 1);
        assert_eq!(renderer.window().visible().next(), Some(&Tick::new(1, 1.0)));
    }

    #[test]
    fn test_stale_batch_does_not_redraw() {
        let (mut renderer, recorder) = renderer(10);
        renderer.on_update(ticks(&[10, 11]));

        assert_eq!(renderer.on_update(ticks(&[3, 4])), UpdateOutcome::Unchanged);
        assert_eq!(recorder.redraw_count(), 1);
        assert_eq!(recorder.last_keys(), vec![10, 11]);
    }

    #[test]
    fn test_unsorted_batch_rendered_in_order() {
        let (mut renderer, recorder) = renderer(10);
        renderer.on_update(ticks(&[7, 3, 5]));
        renderer.on_update(ticks(&[9, 8]));

        let keys = recorder.last_keys();
        assert_eq!(keys, vec![3, 5, 7, 8, 9]);
    }

    #[test]
    fn test_empty_batch_skipped() {
        let (mut renderer, recorder) = renderer(10);
        renderer.on_update(ticks(&[1]));

        assert_eq!(renderer.on_update(vec![]), UpdateOutcome::Skipped);
        assert_eq!(
            renderer.handle_event(FeedEvent::Invalid(FeedError::Malformed(
                "missing field `quote`".to_string()
            ))),
            UpdateOutcome::Skipped
        );
        assert_eq!(recorder.redraw_count(), 1);
        assert_eq!(renderer.window().len(), 1);
    }

    #[test]
    fn test_set_display_cap_reslices_and_redraws() {
        let (mut renderer, recorder) = renderer(100);
        renderer.on_update(ticks(&(1..=100).collect::<Vec<_>>()));

        assert_eq!(renderer.set_display_cap(50), Ok(UpdateOutcome::Rendered));

        assert_eq!(recorder.redraw_count(), 2);
        let keys = recorder.last_keys();
        assert_eq!(keys.len(), 50);
        assert_eq!(keys.first(), Some(&51));
        assert_eq!(
            renderer.set_display_cap(0),
            Err(FeedError::InvalidDisplayCap(0))
        );
    }

    #[test]
    fn test_status_transitions_keep_window() {
        let (mut renderer, recorder) = renderer(10);
        let status_rx = renderer.subscribe_status();
        assert_eq!(*status_rx.borrow(), ConnectionStatus::Disconnected);

        assert_eq!(renderer.on_open(), UpdateOutcome::StatusChanged);
        assert_eq!(*status_rx.borrow(), ConnectionStatus::Connected);

        renderer.on_update(ticks(&[1, 2]));
        assert_eq!(
            renderer.on_close(&FeedError::Transport("reset".to_string())),
            UpdateOutcome::StatusChanged
        );

        assert_eq!(*status_rx.borrow(), ConnectionStatus::Disconnected);
        assert_eq!(renderer.window().len(), 2);
        assert_eq!(recorder.redraw_count(), 1);
    }

    #[test]
    fn test_invalid_event_classification() {
        struct TestCase {
            error: FeedError,
            expected: UpdateOutcome,
            status: ConnectionStatus,
        }

        let tests = vec![
            TestCase {
                // TC0: undecodable payload is skipped
                error: FeedError::Malformed("missing field `epoch`".to_string()),
                expected: UpdateOutcome::Skipped,
                status: ConnectionStatus::Connected,
            },
            TestCase {
                // TC1: empty batch is skipped
                error: FeedError::EmptyBatch,
                expected: UpdateOutcome::Skipped,
                status: ConnectionStatus::Connected,
            },
            TestCase {
                // TC2: request failure disconnects
                error: FeedError::Http("operation timed out".to_string()),
                expected: UpdateOutcome::StatusChanged,
                status: ConnectionStatus::Disconnected,
            },
            TestCase {
                // TC3: stream failure disconnects
                error: FeedError::Transport("reset".to_string()),
                expected: UpdateOutcome::StatusChanged,
                status: ConnectionStatus::Disconnected,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let (mut renderer, recorder) = renderer(10);
            renderer.on_update(ticks(&[1, 2]));

            let actual = renderer.handle_event(FeedEvent::Invalid(test.error));
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(renderer.status(), test.status, "TC{} failed", index);
            assert_eq!(recorder.last_keys(), vec![1, 2], "TC{} failed", index);
        }
    }

    #[test]
    fn test_first_batch_connects() {
        let (mut renderer, _recorder) = renderer(10);
        renderer.on_update(ticks(&[1]));
        assert_eq!(renderer.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_teardown_blocks_mutation() {
        let (mut renderer, recorder) = renderer(10);
        renderer.on_update(ticks(&[1]));

        renderer.teardown();
        renderer.teardown();

        assert_eq!(renderer.on_update(ticks(&[2])), UpdateOutcome::Disposed);
        assert_eq!(renderer.on_replace(ticks(&[3])), UpdateOutcome::Disposed);
        assert_eq!(renderer.on_open(), UpdateOutcome::Disposed);
        assert_eq!(renderer.set_display_cap(5), Ok(UpdateOutcome::Disposed));
        assert_eq!(recorder.redraw_count(), 1);
        assert_eq!(renderer.window().newest_key(), Some(1));
    }

    #[test]
    fn test_replace_then_append_then_signal() {
        let recorder = ChartRecorder::new();
        let mut renderer = LiveFeedRenderer::<FeedPoint, _>::new(recorder.clone(), 10).unwrap();

        let candles = vec![
            FeedPoint::from(Candle::new(120, 2.0, 3.0, 1.5, 2.5)),
            FeedPoint::from(Candle::new(60, 1.0, 2.0, 0.5, 1.5)),
        ];
        assert_eq!(renderer.on_replace(candles), UpdateOutcome::Rendered);
        assert_eq!(
            renderer.on_update(vec![FeedPoint::from(Tick::new(150, 2.6))]),
            UpdateOutcome::Rendered
        );

        let signal = Signal {
            side: SignalSide::Buy,
            entry: 2.6,
            tp: Some(2.7),
            sl: None,
            timestamp: 150,
            pattern: None,
        };
        assert_eq!(renderer.on_signal(signal.clone()), UpdateOutcome::Annotated);

        assert_eq!(recorder.redraw_count(), 2);
        assert_eq!(recorder.last_keys(), vec![60, 120, 150]);
        assert_eq!(recorder.annotations(), vec![signal]);
    }

    #[test]
    fn test_replace_with_same_newest_key_is_noop() {
        let (mut renderer, recorder) = renderer(10);
        renderer.on_replace(ticks(&[1, 2, 3]));

        assert_eq!(renderer.on_replace(ticks(&[2, 3])), UpdateOutcome::Unchanged);
        assert_eq!(recorder.redraw_count(), 1);
        assert_eq!(recorder.last_keys(), vec![1, 2, 3]);
    }
}
