//! Terminal application: owns the terminal, turns keys into coordinator
//! commands and redraws on state changes and spectrum frames.

use std::io;
use std::time::Duration;

use chrono::Utc;
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use station_player::StreamHandle;
use station_proto::config::Config;
use station_proto::protocol::{clamp_volume, StreamState};
use station_proto::roster::{Artist, RosterClient};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::components::{
    header, now_playing,
    residents::{self, Resident, ResidentDetail, Residents},
};
use crate::spectrum::{draw_spectrum, SpectrumRenderer};
use crate::theme::{style_border, style_muted, style_secondary};

pub const VOLUME_STEP: f32 = 0.05;

#[derive(Debug)]
pub enum AppMessage {
    Event(Event),
    Roster(Result<Vec<Artist>, String>),
    ResidentDetail {
        id: String,
        result: Result<ResidentDetail, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TogglePlayback,
    VolumeUp,
    VolumeDown,
    NextResident,
    PrevResident,
    Quit,
}

pub fn key_action(key: KeyEvent) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char(' ') | KeyCode::Enter => Some(Action::TogglePlayback),
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => Some(Action::VolumeUp),
        KeyCode::Char('-') | KeyCode::Down => Some(Action::VolumeDown),
        KeyCode::Char(']') | KeyCode::Char('j') => Some(Action::NextResident),
        KeyCode::Char('[') | KeyCode::Char('k') => Some(Action::PrevResident),
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        _ => None,
    }
}

/// One volume step up or down, snapped to whole percents.
pub fn step_volume(volume: f32, delta: f32) -> f32 {
    clamp_volume(((volume + delta) * 100.0).round() / 100.0)
}

pub struct App {
    station_name: String,
    handle: StreamHandle,
    spectrum: SpectrumRenderer,
    frame_period: Duration,
    roster: Option<RosterClient>,
    messages: Option<mpsc::Sender<AppMessage>>,

    state: StreamState,
    bars: Vec<f32>,
    residents: Residents,
    should_quit: bool,
}

impl App {
    pub fn new(config: &Config, handle: StreamHandle, spectrum: SpectrumRenderer) -> Self {
        let roster = config
            .roster
            .is_configured()
            .then(|| RosterClient::new(&config.roster.api_key, &config.roster.station_id));
        let residents = if roster.is_some() {
            Residents::Loading
        } else {
            Residents::Hidden
        };
        Self {
            station_name: config.station.name.clone(),
            state: handle.state(),
            handle,
            spectrum,
            frame_period: config.player.frame_period(),
            roster,
            messages: None,
            bars: Vec::new(),
            residents,
            should_quit: false,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(mut self) -> anyhow::Result<()> {
        debug!("run(): enabling raw mode");
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal).await;

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<AppMessage>(256);

        // ── Background task: keyboard events ──────────────────────────────────
        let event_tx = tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if event_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Background task: roster ───────────────────────────────────────────
        if let Some(client) = self.roster.clone() {
            let roster_tx = tx.clone();
            tokio::spawn(async move {
                let result = client.artists().await.map_err(|e| e.to_string());
                if let Err(e) = &result {
                    warn!("roster: {}", e);
                }
                let _ = roster_tx.send(AppMessage::Roster(result)).await;
            });
        }
        self.messages = Some(tx);

        let mut state_rx = self.handle.watch();
        let mut bars_rx = self.spectrum.subscribe();

        let mut frame_tick = tokio::time::interval(self.frame_period);
        frame_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(msg) = rx.recv() => {
                    needs_redraw = self.handle_message(msg);
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        info!("coordinator closed, leaving");
                        break;
                    }
                    self.state = state_rx.borrow_and_update().clone();
                    needs_redraw = true;
                }
                _ = frame_tick.tick() => {
                    if bars_rx.has_changed().unwrap_or(false) {
                        self.bars = bars_rx.borrow_and_update().clone();
                        needs_redraw = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns whether the screen needs a redraw.
    fn handle_message(&mut self, msg: AppMessage) -> bool {
        match msg {
            AppMessage::Event(Event::Key(key)) => match key_action(key) {
                Some(action) => {
                    self.apply(action);
                    true
                }
                None => false,
            },
            AppMessage::Event(Event::Resize(..)) => true,
            AppMessage::Event(_) => false,
            AppMessage::Roster(Ok(artists)) => {
                info!("roster: {} residents", artists.len());
                self.residents = Residents::loaded(&artists);
                true
            }
            AppMessage::Roster(Err(e)) => {
                self.residents = Residents::Failed(e);
                true
            }
            AppMessage::ResidentDetail { id, result } => self.residents.apply_detail(&id, result),
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::TogglePlayback => {
                if self.handle.is_active() {
                    self.handle.stop();
                } else {
                    self.handle.start();
                }
            }
            Action::VolumeUp => self.handle.set_volume(step_volume(self.state.volume, VOLUME_STEP)),
            Action::VolumeDown => {
                self.handle.set_volume(step_volume(self.state.volume, -VOLUME_STEP))
            }
            Action::NextResident => {
                if let Some(resident) = self.residents.select_next() {
                    self.load_resident(resident);
                }
            }
            Action::PrevResident => {
                if let Some(resident) = self.residents.select_prev() {
                    self.load_resident(resident);
                }
            }
            Action::Quit => self.should_quit = true,
        }
    }

    /// Profile and upcoming shows for `resident`, delivered as a message.
    fn load_resident(&self, resident: Resident) {
        let (Some(client), Some(tx)) = (self.roster.clone(), self.messages.clone()) else {
            return;
        };
        tokio::spawn(async move {
            let result = residents::fetch_detail(&client, &resident, Utc::now())
                .await
                .map_err(|e| e.to_string());
            if let Err(e) = &result {
                warn!("roster: {}: {}", resident.name, e);
            }
            let _ = tx
                .send(AppMessage::ResidentDetail {
                    id: resident.id,
                    result,
                })
                .await;
        });
    }

    // ── Drawing ───────────────────────────────────────────────────────────────

    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let residents_height = if self.residents.is_visible() { 8 } else { 0 };
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(7),
                Constraint::Min(4),
                Constraint::Length(residents_height),
                Constraint::Length(1),
            ])
            .split(area);

        header::draw(frame, rows[0], &self.station_name, &self.state);
        now_playing::draw(frame, rows[1], &self.state);

        let spectrum_block = Block::default()
            .borders(Borders::ALL)
            .border_style(style_border())
            .title(Span::styled(" spectrum ", style_secondary()));
        let inner = spectrum_block.inner(rows[2]);
        frame.render_widget(spectrum_block, rows[2]);
        draw_spectrum(frame, inner, &self.bars);

        if self.residents.is_visible() {
            residents::draw(frame, rows[3], &self.residents);
        }

        let hint = if self.handle.is_active() { "stop" } else { "play" };
        let roster_hint = if self.residents.is_visible() { "  ·  [/] resident" } else { "" };
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                format!(" space {}  ·  +/- volume{}  ·  q quit", hint, roster_hint),
                style_muted(),
            ))),
            rows[4],
        );
    }
}
