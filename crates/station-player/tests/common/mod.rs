#![allow(dead_code)]

//! In-memory stand-ins for the media backend, the engine's fetcher and the
//! coordinator's now-playing source.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use station_player::analyser::Analyser;
use station_player::coordinator::{NowPlayingSource, PlayerLauncher};
use station_player::engine::{PlaybackEngine, StateCallback};
use station_player::error::{FetchError, PlaybackError};
use station_player::fetcher::{MetadataCallback, MetadataFetcher};
use station_player::media::MediaResource;
use station_proto::config::StationConfig;
use station_proto::protocol::{StreamMetadata, StreamState};
use tokio::sync::Notify;

// ── media ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum PlayOutcome {
    Succeed,
    Fail(String),
    /// Resolves `Ok` only once `FakeMedia::finish_play` is called.
    Hold,
}

struct FakeMediaInner {
    calls: Mutex<Vec<String>>,
    plays: AtomicUsize,
    outcome: Mutex<PlayOutcome>,
    gate: Notify,
    available: AtomicBool,
    volume: Mutex<Option<f32>>,
    source: Mutex<String>,
    taps: Mutex<Vec<Analyser>>,
}

#[derive(Clone)]
pub struct FakeMedia {
    inner: Arc<FakeMediaInner>,
}

impl FakeMedia {
    pub fn new(outcome: PlayOutcome) -> Self {
        Self {
            inner: Arc::new(FakeMediaInner {
                calls: Mutex::new(Vec::new()),
                plays: AtomicUsize::new(0),
                outcome: Mutex::new(outcome),
                gate: Notify::new(),
                available: AtomicBool::new(true),
                volume: Mutex::new(None),
                source: Mutex::new(String::new()),
                taps: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn unavailable() -> Self {
        let media = Self::new(PlayOutcome::Succeed);
        media.inner.available.store(false, Ordering::SeqCst);
        media
    }

    fn record(&self, call: &str) {
        self.inner.calls.lock().unwrap().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn plays(&self) -> usize {
        self.inner.plays.load(Ordering::SeqCst)
    }

    pub fn set_outcome(&self, outcome: PlayOutcome) {
        *self.inner.outcome.lock().unwrap() = outcome;
    }

    pub fn finish_play(&self) {
        self.inner.gate.notify_one();
    }

    pub fn volume(&self) -> Option<f32> {
        *self.inner.volume.lock().unwrap()
    }

    pub fn source(&self) -> String {
        self.inner.source.lock().unwrap().clone()
    }

    pub fn tap_count(&self) -> usize {
        self.inner.taps.lock().unwrap().len()
    }

    pub fn is_released(&self) -> bool {
        self.calls().iter().any(|c| c == "release")
    }
}

impl MediaResource for FakeMedia {
    fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    fn set_source(&self, url: &str) {
        *self.inner.source.lock().unwrap() = url.to_string();
    }

    fn play(&self) -> impl Future<Output = Result<(), PlaybackError>> + Send {
        let media = self.clone();
        async move {
            media.inner.plays.fetch_add(1, Ordering::SeqCst);
            media.record("play");
            let outcome = media.inner.outcome.lock().unwrap().clone();
            match outcome {
                PlayOutcome::Succeed => Ok(()),
                PlayOutcome::Fail(message) => Err(PlaybackError::Media(message)),
                PlayOutcome::Hold => {
                    media.inner.gate.notified().await;
                    Ok(())
                }
            }
        }
    }

    fn pause(&self) {
        self.record("pause");
    }

    fn rewind(&self) {
        self.record("rewind");
    }

    fn set_volume(&self, volume: f32) {
        *self.inner.volume.lock().unwrap() = Some(volume);
    }

    fn attach_tap(&self, analyser: Analyser) {
        self.inner.taps.lock().unwrap().push(analyser);
    }

    fn release(&self) {
        self.inner.available.store(false, Ordering::SeqCst);
        self.record("release");
    }
}

// ── engine fetcher ────────────────────────────────────────────────────────────

/// Observes a [`FakeFetcher`] and lets tests push metadata through it.
#[derive(Clone, Default)]
pub struct FetcherSpy {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    callback: Arc<Mutex<Option<MetadataCallback>>>,
}

impl FetcherSpy {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deliver metadata as if it came from the station backend.
    pub fn emit(&self, metadata: StreamMetadata) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(metadata);
        }
    }

    pub fn fetcher(&self, on_metadata: MetadataCallback) -> Box<dyn MetadataFetcher> {
        *self.callback.lock().unwrap() = Some(on_metadata);
        Box::new(FakeFetcher {
            spy: self.clone(),
        })
    }
}

pub struct FakeFetcher {
    spy: FetcherSpy,
}

impl MetadataFetcher for FakeFetcher {
    fn start(&mut self) {
        if !self.spy.running.swap(true, Ordering::SeqCst) {
            self.spy.starts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stop(&mut self) {
        self.spy.stops.fetch_add(1, Ordering::SeqCst);
        self.spy.running.store(false, Ordering::SeqCst);
    }
}

// ── engine helpers ────────────────────────────────────────────────────────────

pub type Emissions = Arc<Mutex<Vec<StreamState>>>;

pub fn recorder() -> (Emissions, StateCallback) {
    let emissions: Emissions = Arc::new(Mutex::new(Vec::new()));
    let sink = emissions.clone();
    let callback: StateCallback = Arc::new(move |state: StreamState| sink.lock().unwrap().push(state));
    (emissions, callback)
}

pub fn engine_with(
    media: FakeMedia,
    spy: &FetcherSpy,
    on_change: StateCallback,
) -> PlaybackEngine<FakeMedia> {
    let spy = spy.clone();
    PlaybackEngine::with_fetcher(
        media,
        "http://radio.test/listen/tasty/radio.mp3",
        on_change,
        move |on_metadata| spy.fetcher(on_metadata),
    )
}

/// Let spawned tasks run.  Under a paused clock this also advances time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── coordinator launcher ──────────────────────────────────────────────────────

/// Mounts engines over fake media; every mount gets a fresh media and spy.
#[derive(Clone)]
pub struct FakeLauncher {
    outcome: PlayOutcome,
    mounted: Arc<Mutex<Vec<(FakeMedia, FetcherSpy)>>>,
}

impl FakeLauncher {
    pub fn new(outcome: PlayOutcome) -> Self {
        Self {
            outcome,
            mounted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn mounts(&self) -> usize {
        self.mounted.lock().unwrap().len()
    }

    pub fn media(&self, index: usize) -> FakeMedia {
        self.mounted.lock().unwrap()[index].0.clone()
    }

    pub fn spy(&self, index: usize) -> FetcherSpy {
        self.mounted.lock().unwrap()[index].1.clone()
    }

    pub fn last_media(&self) -> FakeMedia {
        let index = self.mounts() - 1;
        self.media(index)
    }

    pub fn last_spy(&self) -> FetcherSpy {
        let index = self.mounts() - 1;
        self.spy(index)
    }
}

impl PlayerLauncher for FakeLauncher {
    type Player = PlaybackEngine<FakeMedia>;

    fn mount(&mut self, station: &StationConfig, on_change: StateCallback) -> Self::Player {
        let media = FakeMedia::new(self.outcome.clone());
        let spy = FetcherSpy::default();
        self.mounted
            .lock()
            .unwrap()
            .push((media.clone(), spy.clone()));
        let fetcher_spy = spy.clone();
        PlaybackEngine::with_fetcher(media, &station.playback_url, on_change, move |on_metadata| {
            fetcher_spy.fetcher(on_metadata)
        })
    }
}

// ── coordinator poll source ───────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeNowPlaying {
    response: Arc<Mutex<Option<StreamMetadata>>>,
    failing: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
}

impl FakeNowPlaying {
    pub fn returning(metadata: StreamMetadata) -> Self {
        let source = Self::default();
        source.set_response(Some(metadata));
        source
    }

    pub fn set_response(&self, metadata: Option<StreamMetadata>) {
        *self.response.lock().unwrap() = metadata;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl NowPlayingSource for FakeNowPlaying {
    fn fetch(&self) -> impl Future<Output = Result<Option<StreamMetadata>, FetchError>> + Send {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(FetchError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        } else {
            Ok(self.response.lock().unwrap().clone())
        };
        std::future::ready(result)
    }
}

pub fn song(title: &str) -> StreamMetadata {
    StreamMetadata {
        title: Some(title.to_string()),
        ..Default::default()
    }
}
