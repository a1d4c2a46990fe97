//! The one interface the front end talks to.
//!
//! Three producers write the stream state: the playback engine's emissions,
//! a background now-playing poll, and a one-second elapsed ticker.  All of
//! them, plus user commands, are events on a single channel consumed by one
//! task that owns the [`StreamState`], so every read-modify-write runs to
//! completion before the next one starts.
//!
//! ```text
//!   StreamHandle ──Start/Stop/SetVolume/Analyser──┐
//!   engine callback ──EngineState{generation}─────┤
//!   poll task ──PollResult────────────────────────┼──▶ StreamCoordinator::run
//!   ticker ──Tick─────────────────────────────────┤        │
//!   frame timer ──DeferredStart{generation}───────┘        ├──▶ watch<StreamState>
//!                                                          └──▶ broadcast<StreamChangeEvent>
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use station_proto::config::StationConfig;
use station_proto::protocol::{clamp_volume, PlaybackStatus, StreamChangeEvent, StreamMetadata, StreamState};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::analyser::Analyser;
use crate::engine::{PlaybackEngine, StateCallback};
use crate::error::FetchError;
use crate::fetcher::fetch_now_playing;
use crate::media::MediaResource;
use crate::mpv::MpvMedia;

pub const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// One display frame; the engine starts this long after `start()`.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

const CHANGE_CHANNEL_CAPACITY: usize = 64;

// ── seams ─────────────────────────────────────────────────────────────────────

/// What the coordinator needs from a mounted player.
pub trait StationPlayer: Send + 'static {
    fn start(&mut self);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn analyser(&self) -> Option<Analyser>;
    fn release(&mut self);
}

impl<M: MediaResource> StationPlayer for PlaybackEngine<M> {
    fn start(&mut self) {
        PlaybackEngine::start(self);
    }

    fn stop(&mut self) {
        PlaybackEngine::stop(self);
    }

    fn set_volume(&mut self, volume: f32) {
        PlaybackEngine::set_volume(self, volume);
    }

    fn analyser(&self) -> Option<Analyser> {
        PlaybackEngine::analyser(self)
    }

    fn release(&mut self) {
        PlaybackEngine::release(self);
    }
}

/// Builds a fresh player each time the stream becomes active.
pub trait PlayerLauncher: Send + 'static {
    type Player: StationPlayer;

    fn mount(&mut self, station: &StationConfig, on_change: StateCallback) -> Self::Player;
}

/// Mounts a [`PlaybackEngine`] over an mpv child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct MpvLauncher;

impl PlayerLauncher for MpvLauncher {
    type Player = PlaybackEngine<MpvMedia>;

    fn mount(&mut self, station: &StationConfig, on_change: StateCallback) -> Self::Player {
        PlaybackEngine::new(MpvMedia::new(), station, on_change)
    }
}

/// Source of the coordinator's own background now-playing poll.
pub trait NowPlayingSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Option<StreamMetadata>, FetchError>> + Send;
}

/// Polls the station's now-playing endpoint directly over HTTP.
pub struct HttpNowPlaying {
    client: reqwest::Client,
    url: String,
}

impl HttpNowPlaying {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl NowPlayingSource for HttpNowPlaying {
    fn fetch(&self) -> impl Future<Output = Result<Option<StreamMetadata>, FetchError>> + Send {
        fetch_now_playing(&self.client, &self.url)
    }
}

// ── events ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum CoordinatorEvent {
    Start,
    Stop,
    SetVolume(f32),
    Analyser(oneshot::Sender<Option<Analyser>>),
    /// Emission of the player mounted as `generation`.
    EngineState { generation: u64, state: StreamState },
    DeferredStart { generation: u64 },
    PollResult(StreamMetadata),
    Tick,
    Shutdown,
}

type EventSender = mpsc::UnboundedSender<CoordinatorEvent>;
type WeakEventSender = mpsc::WeakUnboundedSender<CoordinatorEvent>;

/// Send from a background task.  False once the coordinator is gone.
fn send_weak(tx: &WeakEventSender, event: CoordinatorEvent) -> bool {
    match tx.upgrade() {
        Some(tx) => tx.send(event).is_ok(),
        None => false,
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable front-end handle.  The coordinator shuts down when the last
/// handle is dropped.
#[derive(Clone)]
pub struct StreamHandle {
    tx: EventSender,
    state: watch::Receiver<StreamState>,
    changes: broadcast::Sender<StreamChangeEvent>,
    active: Arc<AtomicBool>,
}

impl StreamHandle {
    fn send(&self, event: CoordinatorEvent) {
        if self.tx.send(event).is_err() {
            debug!("coordinator gone, command dropped");
        }
    }

    pub fn start(&self) {
        self.send(CoordinatorEvent::Start);
    }

    pub fn stop(&self) {
        self.send(CoordinatorEvent::Stop);
    }

    pub fn set_volume(&self, volume: f32) {
        self.send(CoordinatorEvent::SetVolume(volume));
    }

    /// Analysis node of the mounted player; `None` while inactive or before
    /// the player first started.
    pub async fn analyser(&self) -> Option<Analyser> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordinatorEvent::Analyser(reply_tx));
        reply_rx.await.ok().flatten()
    }

    /// Latest published snapshot.
    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Every change as `{state, previous_state}`.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamChangeEvent> {
        self.changes.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    pub fn shutdown(&self) {
        self.send(CoordinatorEvent::Shutdown);
    }
}

// ── coordinator ───────────────────────────────────────────────────────────────

pub struct StreamCoordinator<L: PlayerLauncher, S: NowPlayingSource> {
    station: StationConfig,
    launcher: L,
    source: Arc<S>,

    state: StreamState,
    active: Arc<AtomicBool>,
    player: Option<L::Player>,
    /// Bumped on every mount and unmount; emissions tagged with an older
    /// generation come from a released player.
    generation: u64,

    events_rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
    events_tx: WeakEventSender,
    state_tx: watch::Sender<StreamState>,
    changes: broadcast::Sender<StreamChangeEvent>,

    poll: Option<AbortHandle>,
    ticker: Option<AbortHandle>,
    deferred_start: Option<AbortHandle>,
}

impl<L: PlayerLauncher, S: NowPlayingSource> StreamCoordinator<L, S> {
    pub fn new(station: StationConfig, launcher: L, source: S) -> (Self, StreamHandle) {
        let (tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(StreamState::default());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let active = Arc::new(AtomicBool::new(false));

        let coordinator = Self {
            station,
            launcher,
            source: Arc::new(source),
            state: StreamState::default(),
            active: active.clone(),
            player: None,
            generation: 0,
            events_rx,
            events_tx: tx.downgrade(),
            state_tx,
            changes: changes.clone(),
            poll: None,
            ticker: None,
            deferred_start: None,
        };
        let handle = StreamHandle {
            tx,
            state: state_rx,
            changes,
            active,
        };
        (coordinator, handle)
    }

    /// Build the coordinator and run it on its own task.
    pub fn spawn(station: StationConfig, launcher: L, source: S) -> StreamHandle {
        let (coordinator, handle) = Self::new(station, launcher, source);
        tokio::spawn(coordinator.run());
        handle
    }

    pub async fn run(mut self) {
        info!("coordinator: running for {}", self.station.name);
        self.restart_poll();
        while let Some(event) = self.events_rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.teardown();
        info!("coordinator: stopped");
    }

    fn handle_event(&mut self, event: CoordinatorEvent) -> bool {
        match event {
            CoordinatorEvent::Start => self.start(),
            CoordinatorEvent::Stop => self.stop(),
            CoordinatorEvent::SetVolume(volume) => self.set_volume(volume),
            CoordinatorEvent::Analyser(reply) => {
                let _ = reply.send(self.player.as_ref().and_then(|player| player.analyser()));
            }
            CoordinatorEvent::EngineState { generation, state } => {
                self.merge_engine_state(generation, state)
            }
            CoordinatorEvent::DeferredStart { generation } => {
                if generation == self.generation && self.is_active() {
                    self.deferred_start = None;
                    if let Some(player) = self.player.as_mut() {
                        player.start();
                    }
                }
            }
            CoordinatorEvent::PollResult(metadata) => {
                let mut next = self.state.clone();
                next.metadata = metadata;
                self.publish(next);
            }
            CoordinatorEvent::Tick => self.tick(),
            CoordinatorEvent::Shutdown => return false,
        }
        true
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn start(&mut self) {
        if self.is_active() {
            // A failed attempt is retried by starting again.
            if self.state.status == PlaybackStatus::Error && self.deferred_start.is_none() {
                self.schedule_engine_start();
            }
            return;
        }
        info!("coordinator: activating");
        self.active.store(true, Ordering::SeqCst);
        self.generation += 1;

        let mut player = self.launcher.mount(&self.station, self.engine_callback());
        player.set_volume(self.state.volume);
        self.player = Some(player);

        self.schedule_engine_start();
        self.start_ticker();
        self.restart_poll();
    }

    fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        info!("coordinator: deactivating");
        self.unmount();
        self.abort_timers();
        self.active.store(false, Ordering::SeqCst);

        // Undo the engine's metadata clear.
        let next = StreamState {
            volume: self.state.volume,
            metadata: self.state.metadata.clone(),
            ..StreamState::default()
        };
        self.publish(next);
        self.restart_poll();
    }

    fn set_volume(&mut self, volume: f32) {
        let volume = clamp_volume(volume);
        if let Some(player) = self.player.as_mut() {
            player.set_volume(volume);
        }
        let mut next = self.state.clone();
        next.volume = volume;
        self.publish(next);
    }

    fn merge_engine_state(&mut self, generation: u64, engine: StreamState) {
        if generation != self.generation || self.player.is_none() {
            debug!("coordinator: dropping emission from unmounted player");
            return;
        }
        let mut next = self.state.clone();
        next.status = engine.status;
        next.volume = engine.volume;
        next.error = engine.error;
        // elapsed/duration stay ours: the engine does not track position.
        if engine.metadata.has_song() {
            next.metadata.title = engine.metadata.title;
            next.metadata.artist = engine.metadata.artist;
            next.metadata.album = engine.metadata.album;
            next.metadata.art = engine.metadata.art;
        }
        self.publish(next);
    }

    fn tick(&mut self) {
        if !self.is_active() {
            return;
        }
        let Some(elapsed) = self.state.metadata.elapsed else {
            return;
        };
        let mut next = self.state.clone();
        next.metadata.elapsed = Some(elapsed.saturating_add(1));
        self.publish(next);
    }

    fn publish(&mut self, next: StreamState) {
        let previous_state = std::mem::replace(&mut self.state, next.clone());
        self.state_tx.send_replace(next.clone());
        // No subscribers is fine.
        let _ = self.changes.send(StreamChangeEvent {
            state: next,
            previous_state,
        });
    }

    fn engine_callback(&self) -> StateCallback {
        let tx = self.events_tx.clone();
        let generation = self.generation;
        Arc::new(move |state: StreamState| {
            send_weak(&tx, CoordinatorEvent::EngineState { generation, state });
        })
    }

    fn unmount(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.stop();
            player.release();
        }
        self.generation += 1;
    }

    // ── timers ──

    fn schedule_engine_start(&mut self) {
        let tx = self.events_tx.clone();
        let generation = self.generation;
        let task = tokio::spawn(async move {
            tokio::time::sleep(FRAME_INTERVAL).await;
            send_weak(&tx, CoordinatorEvent::DeferredStart { generation });
        });
        self.deferred_start = Some(task.abort_handle());
    }

    fn start_ticker(&mut self) {
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !send_weak(&tx, CoordinatorEvent::Tick) {
                    break;
                }
            }
        });
        if let Some(old) = self.ticker.replace(task.abort_handle()) {
            old.abort();
        }
    }

    /// Fetch now, then on the cadence for the current activation state.
    fn restart_poll(&mut self) {
        let period = if self.is_active() {
            ACTIVE_POLL_INTERVAL
        } else {
            IDLE_POLL_INTERVAL
        };
        debug!("coordinator: polling every {:?}", period);
        let tx = self.events_tx.clone();
        let source = self.source.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match source.fetch().await {
                    Ok(Some(metadata)) => {
                        if !send_weak(&tx, CoordinatorEvent::PollResult(metadata)) {
                            break;
                        }
                    }
                    Ok(None) => debug!("coordinator: poll returned no song"),
                    Err(e) => debug!("coordinator: poll failed: {}", e),
                }
            }
        });
        if let Some(old) = self.poll.replace(task.abort_handle()) {
            old.abort();
        }
    }

    fn abort_timers(&mut self) {
        for task in [self.deferred_start.take(), self.ticker.take()].into_iter().flatten() {
            task.abort();
        }
    }

    fn teardown(&mut self) {
        self.abort_timers();
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
        if self.player.is_some() {
            self.unmount();
        }
        self.active.store(false, Ordering::SeqCst);
    }
}

impl<L: PlayerLauncher, S: NowPlayingSource> Drop for StreamCoordinator<L, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
