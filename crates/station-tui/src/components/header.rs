//! Header: station name and status badge on the left, volume gauge on the
//! right.  Single row, not focusable.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use station_proto::protocol::{PlaybackStatus, StreamState};

use crate::theme::{badge_color, style_muted, style_secondary, style_title, C_PLAYING};

const GAUGE_WIDTH: usize = 10;

pub fn draw(frame: &mut Frame, area: Rect, station_name: &str, state: &StreamState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(GAUGE_WIDTH as u16 + 10)])
        .split(area);

    frame.render_widget(Paragraph::new(title_line(station_name, state.status)), cols[0]);
    frame.render_widget(Paragraph::new(volume_line(state.volume)), cols[1]);
}

fn title_line(station_name: &str, status: PlaybackStatus) -> Line<'static> {
    let bulb = if status == PlaybackStatus::Playing { "● " } else { "○ " };
    Line::from(vec![
        Span::styled(bulb, Style::default().fg(badge_color(status))),
        Span::styled(station_name.to_string(), style_title()),
        Span::raw("  "),
        Span::styled(
            format!(" {} ", status.badge_label()),
            Style::default()
                .fg(Color::Black)
                .bg(badge_color(status))
                .add_modifier(Modifier::BOLD),
        ),
    ])
}

fn volume_line(volume: f32) -> Line<'static> {
    let (filled, empty) = gauge(volume, GAUGE_WIDTH);
    Line::from(vec![
        Span::styled("vol ", style_secondary()),
        Span::styled(filled, Style::default().fg(C_PLAYING)),
        Span::styled(empty, style_muted()),
        Span::styled(format!(" {:>3}%", (volume * 100.0).round() as u32), style_secondary()),
    ])
}

/// Filled and empty halves of a `width`-cell gauge.
pub fn gauge(volume: f32, width: usize) -> (String, String) {
    let filled = ((volume.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
    ("█".repeat(filled), "░".repeat(width - filled))
}
