//! Now-playing panel: song, artist, album, clock, and the last playback
//! error when there is one.

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use station_proto::protocol::{PlaybackStatus, StreamState};

use crate::format::time_display;
use crate::theme::{style_border, style_default, style_muted, style_secondary, C_ERROR, C_TAG};

pub fn draw(frame: &mut Frame, area: Rect, state: &StreamState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border())
        .title(Span::styled(" now playing ", style_secondary()));
    frame.render_widget(Paragraph::new(lines(state)).block(block), area);
}

pub fn lines(state: &StreamState) -> Vec<Line<'static>> {
    let metadata = &state.metadata;
    let mut lines = Vec::new();

    match &metadata.title {
        Some(title) => lines.push(Line::from(Span::styled(
            title.clone(),
            style_default().add_modifier(Modifier::BOLD),
        ))),
        None => lines.push(Line::from(Span::styled("Unknown track", style_muted()))),
    }
    if let Some(artist) = &metadata.artist {
        lines.push(Line::from(Span::styled(artist.clone(), Style::default().fg(C_TAG))));
    }
    if let Some(album) = &metadata.album {
        lines.push(Line::from(Span::styled(album.clone(), style_secondary())));
    }
    if let Some(clock) = time_display(metadata.elapsed, metadata.duration) {
        lines.push(Line::from(Span::styled(clock, style_secondary())));
    }

    if state.status == PlaybackStatus::Error {
        let message = state.error.as_deref().unwrap_or("playback failed");
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            format!("error: {}", message),
            Style::default().fg(C_ERROR),
        )));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use station_proto::protocol::StreamMetadata;

    fn text(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn test_lines_with_full_metadata() {
        let state = StreamState {
            status: PlaybackStatus::Playing,
            metadata: StreamMetadata {
                title: Some("Song".into()),
                artist: Some("Artist".into()),
                album: Some("Album".into()),
                elapsed: Some(65),
                duration: Some(200),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(text(&lines(&state)), ["Song", "Artist", "Album", "1:05 / 3:20"]);
    }

    #[test]
    fn test_clock_hidden_before_song_starts() {
        let state = StreamState {
            metadata: StreamMetadata {
                title: Some("Song".into()),
                elapsed: Some(0),
                duration: Some(200),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(text(&lines(&state)), ["Song"]);
    }

    #[test]
    fn test_error_line() {
        let state = StreamState {
            status: PlaybackStatus::Error,
            error: Some("NotAllowedError".into()),
            ..Default::default()
        };
        assert_eq!(
            text(&lines(&state)),
            ["Unknown track", "", "error: NotAllowedError"]
        );
    }
}
