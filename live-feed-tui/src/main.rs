//! Live Feed Terminal
//!
//! Draws a live tick or candle chart from a real-time store, HTTP poll or WebSocket stream.
//! Configured through `LIVE_FEED_*` environment variables; logs go to `LIVE_FEED_LOG`
//! (default `live-feed.log`) since the terminal is in raw mode.
//!
//! Keys: `+` / `-` change the number of visible points, `q` / `Esc` quit.

mod ui;
mod view;

use std::{fs::File, io, sync::Mutex, time::Duration};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use live_feed::{FeedConfig, FeedPoint, RendererHandle};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{info, warn};

use crate::{
    ui::{App, ui},
    view::TerminalChart,
};

/// Step applied to the display cap by `+` / `-`
const DISPLAY_CAP_STEP: usize = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    let config = FeedConfig::from_env();
    let chart = TerminalChart::new();
    // Start before touching the terminal so configuration errors print normally
    let mut handle = config.start(chart.clone())?;
    info!(%config, "Live feed terminal starting");

    install_panic_hook();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &handle, &chart, &config).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    handle.shutdown().await;
    info!("Live feed terminal stopped");

    res?;
    Ok(())
}

fn init_logging() -> io::Result<()> {
    let path = std::env::var("LIVE_FEED_LOG").unwrap_or_else(|_| "live-feed.log".to_string());
    let file = File::create(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Leave raw mode before the default hook prints, so panics stay readable
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        default_hook(info);
    }));
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    handle: &RendererHandle<FeedPoint, TerminalChart>,
    chart: &TerminalChart,
    config: &FeedConfig,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = std::time::Instant::now();
    let mut display_cap = config.display_cap;
    let source = config.to_string();

    loop {
        let frame = chart.snapshot();
        let app = App {
            status: handle.status(),
            source: &source,
            display_cap,
            frame: &frame,
        };

        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let requested = match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        Some(display_cap.saturating_add(DISPLAY_CAP_STEP))
                    }
                    KeyCode::Char('-') => {
                        Some(display_cap.saturating_sub(DISPLAY_CAP_STEP).max(1))
                    }
                    _ => None,
                };

                if let Some(requested) = requested.filter(|&cap| cap != display_cap) {
                    match handle.set_display_cap(requested) {
                        Ok(()) => display_cap = requested,
                        Err(error) => warn!(%error, requested, "Display cap change rejected"),
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = std::time::Instant::now();
        }
    }
}
