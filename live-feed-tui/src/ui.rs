//! Layout and widgets for the live chart terminal

use chrono::DateTime;
use live_feed::{ConnectionStatus, PlotPoint, Signal};
use ratatui::{
    Frame,
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Axis, Block, BorderType, Borders, Chart, Dataset, GraphType, List, ListItem, Paragraph,
        Widget,
    },
};

use crate::view::ChartFrame;

/// Everything one draw needs
#[derive(Debug)]
pub struct App<'a> {
    pub status: ConnectionStatus,
    pub source: &'a str,
    pub display_cap: usize,
    pub frame: &'a ChartFrame,
}

pub fn ui(f: &mut Frame, app: &App) {
    let size = f.area();

    // Status bar on top, chart and signals below
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(size);

    render_status_bar(f, chunks[0], app);

    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(75), Constraint::Percentage(25)])
        .split(chunks[1]);

    render_chart(f, main_chunks[0], app);
    render_signals(f, main_chunks[1], app.frame);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let connected = app.status.is_connected();
    let status_symbol = if connected { "●" } else { "○" };
    let status_color = if connected {
        Color::Rgb(0, 255, 127)
    } else {
        Color::Rgb(255, 69, 58)
    };

    let status = Span::styled(
        format!(" {} {} ", status_symbol, app.status),
        Style::default()
            .fg(status_color)
            .add_modifier(Modifier::BOLD),
    );

    let updated = app
        .frame
        .last_update
        .map(|time| time.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let time = Span::styled(
        format!(" ⏱  {} ", updated),
        Style::default().fg(Color::Rgb(100, 149, 237)),
    );

    let source = Span::styled(
        format!(" ◆ {} ◆ ", app.source),
        Style::default()
            .fg(Color::Rgb(255, 215, 0))
            .add_modifier(Modifier::BOLD),
    );

    let cap = Span::styled(
        format!(
            " {}/{} pts ",
            app.frame.points.len(),
            app.display_cap
        ),
        Style::default().fg(Color::White),
    );

    let help = Span::styled(
        " [+/-] Points [Q] Quit ",
        Style::default().fg(Color::Rgb(128, 128, 128)),
    );

    let status_line = Line::from(vec![status, time, source, cap, help]);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(Color::Rgb(138, 43, 226)))
        .style(Style::default().bg(Color::Rgb(18, 18, 28)));

    let paragraph = Paragraph::new(status_line)
        .block(block)
        .alignment(Alignment::Center);

    f.render_widget(paragraph, area);
}

fn chart_title(frame: &ChartFrame) -> Line<'static> {
    let Some(latest) = frame.latest() else {
        return Line::from(" PRICE ");
    };

    let change = frame.change().unwrap_or(0.0);
    let change_color = if change >= 0.0 { Color::Green } else { Color::Red };

    Line::from(vec![
        Span::styled(" PRICE ", Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(
            format!("{:.4} ", latest.value()),
            Style::default().fg(Color::White),
        ),
        Span::styled(format!("({:+.4}) ", change), Style::default().fg(change_color)),
    ])
}

fn render_chart(f: &mut Frame, area: Rect, app: &App) {
    let frame = app.frame;
    let block = Block::default()
        .title(chart_title(frame))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(70, 70, 90)));

    let Some((low, high)) = frame.price_bounds() else {
        let waiting = Paragraph::new("Waiting for data...")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(waiting, area);
        return;
    };

    // Keep a flat series off the borders
    let pad = ((high - low) * 0.05).max(high.abs() * 1e-4).max(1e-6);
    let (y_min, y_max) = (low - pad, high + pad);

    if frame.has_candles() {
        let inner = block.inner(area);
        f.render_widget(block, area);
        f.render_widget(CandleChart::new(&frame.points, y_min, y_max), inner);
        return;
    }

    let data = frame.line_data();
    let x_min = data.first().map(|(x, _)| *x).unwrap_or(0.0);
    let x_max = data.last().map(|(x, _)| *x).unwrap_or(0.0).max(x_min + 1.0);

    let dataset = Dataset::default()
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&data);

    let x_labels = [x_min, x_max]
        .into_iter()
        .map(|x| {
            DateTime::from_timestamp(x as i64, 0)
                .map(|time| time.format("%H:%M:%S").to_string())
                .unwrap_or_default()
        })
        .map(Span::from)
        .collect::<Vec<_>>();

    let chart = Chart::new(vec![dataset])
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([x_min, x_max])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds([y_min, y_max])
                .labels([
                    Span::from(format!("{:.4}", y_min)),
                    Span::from(format!("{:.4}", (y_min + y_max) / 2.0)),
                    Span::from(format!("{:.4}", y_max)),
                ]),
        );

    f.render_widget(chart, area);
}

fn signal_item(signal: &Signal) -> ListItem<'static> {
    let color = if signal.side.is_buy() {
        Color::Green
    } else {
        Color::Red
    };
    let time = DateTime::from_timestamp(signal.timestamp, 0)
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| signal.timestamp.to_string());

    let mut header = vec![
        Span::styled(
            format!("{:<4}", signal.side.as_str()),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" @ {:.4}", signal.entry)),
        Span::styled(format!("  {}", time), Style::default().fg(Color::DarkGray)),
    ];
    if let Some(pattern) = &signal.pattern {
        header.push(Span::styled(
            format!("  {}", pattern),
            Style::default().fg(Color::Rgb(255, 215, 0)),
        ));
    }

    let levels = |label: &str, level: Option<f64>| {
        level
            .map(|level| format!("{} {:.4}", label, level))
            .unwrap_or_else(|| format!("{} -", label))
    };
    let targets = Line::from(Span::styled(
        format!("  {}  {}", levels("TP", signal.tp), levels("SL", signal.sl)),
        Style::default().fg(Color::Gray),
    ));

    ListItem::new(vec![Line::from(header), targets])
}

fn render_signals(f: &mut Frame, area: Rect, frame: &ChartFrame) {
    let block = Block::default()
        .title(" SIGNALS ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(70, 70, 90)));

    if frame.signals.is_empty() {
        let empty = Paragraph::new("No signals yet")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let items = frame.signals.iter().map(signal_item).collect::<Vec<_>>();
    f.render_widget(List::new(items).block(block), area);
}

/// Candlesticks with grid lines, one column per point
///
/// Tick points in a mixed series are drawn as a dot at their value.
pub struct CandleChart<'a> {
    points: &'a [PlotPoint],
    y_min: f64,
    y_max: f64,
}

impl<'a> CandleChart<'a> {
    pub fn new(points: &'a [PlotPoint], y_min: f64, y_max: f64) -> Self {
        Self {
            points,
            y_min,
            y_max,
        }
    }
}

impl Widget for CandleChart<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if self.points.is_empty() || area.width == 0 || area.height == 0 {
            return;
        }

        let height = area.height as i32;
        let width = area.width as usize;
        let start = self.points.len().saturating_sub(width);

        let y_min = self.y_min;
        let span = (self.y_max - y_min).max(1e-6);

        let price_to_row = |price: f64| -> i32 {
            let ratio = ((price - y_min) / span).clamp(0.0, 1.0);
            let rel = (ratio * (height as f64 - 1.0)).round() as i32;
            (area.y as i32 + (height - 1)) - rel
        };

        let row_min = area.y as i32;
        let row_max = area.y as i32 + height - 1;

        let grid_lines = 4;
        for i in 0..=grid_lines {
            let price = y_min + (span * i as f64 / grid_lines as f64);
            let row = price_to_row(price).clamp(row_min, row_max);
            for x in area.x..(area.x + area.width) {
                if let Some(cell) = buf.cell_mut((x, row as u16)) {
                    if cell.symbol() == " " {
                        cell.set_symbol("─").set_fg(Color::DarkGray);
                    }
                }
            }
        }

        for (i, point) in self.points[start..].iter().enumerate() {
            let x = area.x + i as u16;

            match *point {
                PlotPoint::Candle { o, h, l, c, .. } => {
                    let color = if c >= o { Color::Green } else { Color::Red };

                    let (high_row, low_row) = (price_to_row(h), price_to_row(l));
                    let (open_row, close_row) = (price_to_row(o), price_to_row(c));

                    let wick_start = high_row.min(low_row).max(row_min);
                    let wick_end = high_row.max(low_row).min(row_max);
                    for y in wick_start..=wick_end {
                        if let Some(cell) = buf.cell_mut((x, y as u16)) {
                            cell.set_symbol("│").set_fg(color);
                        }
                    }

                    let body_start = open_row.min(close_row).max(row_min);
                    let body_end = open_row.max(close_row).min(row_max);
                    for y in body_start..=body_end {
                        if let Some(cell) = buf.cell_mut((x, y as u16)) {
                            cell.set_symbol("█").set_fg(color);
                        }
                    }
                }
                PlotPoint::Line { y, .. } => {
                    let row = price_to_row(y).clamp(row_min, row_max);
                    if let Some(cell) = buf.cell_mut((x, row as u16)) {
                        cell.set_symbol("•").set_fg(Color::Yellow);
                    }
                }
            }
        }
    }
}
