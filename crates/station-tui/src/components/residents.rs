//! Resident DJs from the station's roster, loaded once at startup.  Only
//! shown when a roster key is configured.  Selecting a resident fetches
//! their profile and the shows they host over the coming week.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use station_proto::roster::{Artist, RosterClient, RosterError, ScheduleItem};

use crate::theme::{style_border, style_default, style_muted, style_secondary, style_title, C_ERROR, C_TAG};

/// How many days ahead upcoming shows are listed.
pub const SCHEDULE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum Residents {
    Hidden,
    Loading,
    Loaded(ResidentList),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resident {
    pub id: String,
    pub slug: Option<String>,
    pub name: String,
    pub genres: String,
}

impl From<&Artist> for Resident {
    fn from(artist: &Artist) -> Self {
        Self {
            id: artist.id.clone(),
            slug: artist.slug.clone().filter(|s| !s.is_empty()),
            name: artist.name.clone(),
            genres: artist.genres.join(", "),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidentList {
    pub residents: Vec<Resident>,
    pub selected: Option<usize>,
    pub detail: Detail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Detail {
    Idle,
    Loading,
    Loaded(ResidentDetail),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidentDetail {
    pub about: Option<String>,
    pub shows: Vec<Show>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Show {
    pub start: DateTime<Utc>,
    pub title: String,
}

impl ResidentDetail {
    /// Shows come back in start order.
    pub fn new(about: Option<String>, schedule: Vec<ScheduleItem>) -> Self {
        let mut shows: Vec<Show> = schedule
            .into_iter()
            .map(|item| Show {
                start: item.start,
                title: item.title,
            })
            .collect();
        shows.sort_by_key(|show| show.start);
        Self {
            about: about.map(|text| text.trim().to_string()).filter(|text| !text.is_empty()),
            shows,
        }
    }
}

/// Profile text (when the resident has a slug) and the shows starting
/// within `SCHEDULE_DAYS` of `now`.
pub async fn fetch_detail(
    client: &RosterClient,
    resident: &Resident,
    now: DateTime<Utc>,
) -> Result<ResidentDetail, RosterError> {
    let about = match &resident.slug {
        Some(slug) => client
            .artist_by_slug(slug)
            .await?
            .description
            .map(|description| description.plain_text()),
        None => None,
    };
    let schedule = client
        .artist_schedule(&resident.id, now, now + Duration::days(SCHEDULE_DAYS))
        .await?;
    Ok(ResidentDetail::new(about, schedule))
}

impl Residents {
    pub fn loaded(artists: &[Artist]) -> Self {
        let mut residents: Vec<Resident> = artists.iter().map(Resident::from).collect();
        residents.sort_by_key(|r| r.name.to_lowercase());
        Residents::Loaded(ResidentList {
            residents,
            selected: None,
            detail: Detail::Idle,
        })
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self, Residents::Hidden)
    }

    pub fn selected(&self) -> Option<&Resident> {
        match self {
            Residents::Loaded(list) => list.selected.and_then(|i| list.residents.get(i)),
            _ => None,
        }
    }

    /// Move the selection, wrapping at either end.  Returns the newly
    /// selected resident, whose detail is now loading.
    pub fn select_next(&mut self) -> Option<Resident> {
        self.step(1)
    }

    pub fn select_prev(&mut self) -> Option<Resident> {
        self.step(-1)
    }

    fn step(&mut self, delta: isize) -> Option<Resident> {
        let Residents::Loaded(list) = self else {
            return None;
        };
        let len = list.residents.len();
        if len == 0 {
            return None;
        }
        let next = match list.selected {
            None if delta < 0 => len - 1,
            None => 0,
            Some(i) => (i as isize + delta).rem_euclid(len as isize) as usize,
        };
        list.selected = Some(next);
        list.detail = Detail::Loading;
        list.residents.get(next).cloned()
    }

    /// Results for anyone but the current selection are dropped.  Returns
    /// whether the detail changed.
    pub fn apply_detail(&mut self, id: &str, result: Result<ResidentDetail, String>) -> bool {
        if self.selected().map(|r| r.id.as_str()) != Some(id) {
            return false;
        }
        let Residents::Loaded(list) = self else {
            return false;
        };
        list.detail = match result {
            Ok(detail) => Detail::Loaded(detail),
            Err(e) => Detail::Failed(e),
        };
        true
    }
}

pub fn draw(frame: &mut Frame, area: Rect, residents: &Residents) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border())
        .title(Span::styled(" residents ", style_secondary()));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Residents::Loaded(list) = residents else {
        frame.render_widget(Paragraph::new(lines(residents)), inner);
        return;
    };
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(inner);

    // keep the selection in view
    let offset = list
        .selected
        .unwrap_or(0)
        .saturating_sub(usize::from(cols[0].height.saturating_sub(1)));
    frame.render_widget(
        Paragraph::new(lines(residents)).scroll((offset as u16, 0)),
        cols[0],
    );
    frame.render_widget(
        Paragraph::new(detail_lines(&list.detail, &chrono::Local)).wrap(Wrap { trim: true }),
        cols[1],
    );
}

pub fn lines(residents: &Residents) -> Vec<Line<'static>> {
    match residents {
        Residents::Hidden => Vec::new(),
        Residents::Loading => vec![Line::from(Span::styled("loading…", style_muted()))],
        Residents::Failed(e) => vec![Line::from(Span::styled(
            format!("roster unavailable: {}", e),
            Style::default().fg(C_ERROR),
        ))],
        Residents::Loaded(list) if list.residents.is_empty() => {
            vec![Line::from(Span::styled("no residents listed", style_muted()))]
        }
        Residents::Loaded(list) => list
            .residents
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut spans = if list.selected == Some(i) {
                    vec![Span::styled(format!("▸ {}", r.name), style_title())]
                } else {
                    vec![Span::styled(format!("  {}", r.name), style_default())]
                };
                if !r.genres.is_empty() {
                    spans.push(Span::styled(format!("  {}", r.genres), style_muted()));
                }
                Line::from(spans)
            })
            .collect(),
    }
}

/// Start time in `tz`, then the title.
pub fn show_line<Tz: TimeZone>(show: &Show, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}  {}",
        show.start.with_timezone(tz).format("%a %d %b %H:%M"),
        show.title
    )
}

pub fn detail_lines<Tz: TimeZone>(detail: &Detail, tz: &Tz) -> Vec<Line<'static>>
where
    Tz::Offset: std::fmt::Display,
{
    match detail {
        Detail::Idle => vec![Line::from(Span::styled(
            "[ / ] pick a resident",
            style_muted(),
        ))],
        Detail::Loading => vec![Line::from(Span::styled("loading…", style_muted()))],
        Detail::Failed(e) => vec![Line::from(Span::styled(
            format!("schedule unavailable: {}", e),
            Style::default().fg(C_ERROR),
        ))],
        Detail::Loaded(detail) => {
            let mut lines = Vec::new();
            if let Some(about) = &detail.about {
                lines.push(Line::from(Span::styled(about.clone(), style_secondary())));
            }
            if detail.shows.is_empty() {
                lines.push(Line::from(Span::styled(
                    "no shows this week",
                    style_muted(),
                )));
            }
            for show in &detail.shows {
                lines.push(Line::from(Span::styled(
                    show_line(show, tz),
                    Style::default().fg(C_TAG),
                )));
            }
            lines
        }
    }
}
