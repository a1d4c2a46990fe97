use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use station_proto::config::StationConfig;
use station_proto::protocol::{clamp_volume, PlaybackStatus, StreamMetadata, StreamState};
use tracing::{debug, info, warn};

use crate::analyser::{Analyser, AudioGraph, ContextState, DEFAULT_SAMPLE_RATE, FFT_SIZE, SMOOTHING_TIME_CONSTANT};
use crate::fetcher::{create_metadata_fetcher, MetadataCallback, MetadataFetcher};
use crate::media::MediaResource;

/// Receives a full snapshot after every engine state change.
pub type StateCallback = Arc<dyn Fn(StreamState) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine state plus its observer.  The callback runs under the lock so
/// emissions leave in the order the changes were made.
struct StateCell {
    state: Mutex<StreamState>,
    on_change: StateCallback,
}

impl StateCell {
    fn status(&self) -> PlaybackStatus {
        lock(&self.state).status
    }

    fn update(&self, apply: impl FnOnce(&mut StreamState)) {
        let mut state = lock(&self.state);
        apply(&mut state);
        (self.on_change)(state.clone());
    }
}

/// Play attempts and the fetcher move together: a result is only applied if
/// its attempt is still current, and the fetcher is only started then.
struct Control {
    attempt: u64,
    fetcher: Box<dyn MetadataFetcher>,
}

/// Owns one media resource and, from the first `start()` on, one analysis
/// graph.
///
/// ```text
///   Stopped ──start──▶ Loading ──ok──▶ Playing ──stop──▶ Stopped
///                         └──err──▶ Error ──start──▶ Loading
/// ```
pub struct PlaybackEngine<M: MediaResource> {
    media: M,
    cell: Arc<StateCell>,
    control: Arc<Mutex<Control>>,
    graph: Option<AudioGraph>,
    released: bool,
}

impl<M: MediaResource> PlaybackEngine<M> {
    /// Engine for `station`, with the station's metadata provider.
    pub fn new(media: M, station: &StationConfig, on_change: StateCallback) -> Self {
        let provider = station.metadata_provider;
        let metadata_url = station.metadata_url.clone();
        Self::with_fetcher(media, &station.playback_url, on_change, move |on_metadata| {
            create_metadata_fetcher(provider, &metadata_url, on_metadata)
        })
    }

    /// `make_fetcher` gets the callback through which the fetcher feeds
    /// metadata back into this engine.
    pub fn with_fetcher<F>(media: M, playback_url: &str, on_change: StateCallback, make_fetcher: F) -> Self
    where
        F: FnOnce(MetadataCallback) -> Box<dyn MetadataFetcher>,
    {
        let cell = Arc::new(StateCell {
            state: Mutex::new(StreamState::default()),
            on_change,
        });

        let metadata_cell = Arc::downgrade(&cell);
        let on_metadata: MetadataCallback = Arc::new(move |metadata: StreamMetadata| {
            let Some(cell) = metadata_cell.upgrade() else {
                return;
            };
            let mut state = lock(&cell.state);
            // late updates after a stop are dropped
            if state.status != PlaybackStatus::Playing {
                return;
            }
            state.metadata = metadata;
            (cell.on_change)(state.clone());
        });

        media.set_source(playback_url);

        Self {
            media,
            cell,
            control: Arc::new(Mutex::new(Control {
                attempt: 0,
                fetcher: make_fetcher(on_metadata),
            })),
            graph: None,
            released: false,
        }
    }

    pub fn state(&self) -> StreamState {
        lock(&self.cell.state).clone()
    }

    fn usable(&self) -> bool {
        !self.released && self.media.is_available()
    }

    pub fn start(&mut self) {
        if !self.usable() {
            return;
        }

        let attempt = {
            let mut control = lock(&self.control);
            if matches!(self.cell.status(), PlaybackStatus::Loading | PlaybackStatus::Playing) {
                debug!("engine: start ignored, already {:?}", self.cell.status());
                return;
            }
            control.attempt += 1;
            self.cell.update(|state| {
                state.status = PlaybackStatus::Loading;
                state.error = None;
            });
            control.attempt
        };

        let media = &self.media;
        let graph = self.graph.get_or_insert_with(|| {
            let graph = AudioGraph::new(FFT_SIZE, DEFAULT_SAMPLE_RATE, SMOOTHING_TIME_CONSTANT);
            media.attach_tap(graph.analyser().clone());
            graph
        });
        if graph.state() == ContextState::Suspended {
            graph.resume();
        }

        info!("engine: play attempt {}", attempt);
        let media = self.media.clone();
        let cell = self.cell.clone();
        let control = self.control.clone();
        tokio::spawn(async move {
            let result = media.play().await;
            let mut control = lock(&control);
            if control.attempt != attempt {
                debug!("engine: discarding result of stale attempt {}", attempt);
                return;
            }
            match result {
                Ok(()) => {
                    cell.update(|state| {
                        state.status = PlaybackStatus::Playing;
                        state.error = None;
                    });
                    control.fetcher.start();
                }
                Err(e) => {
                    warn!("engine: playback failed: {}", e);
                    cell.update(|state| {
                        state.status = PlaybackStatus::Error;
                        state.error = Some(e.to_string());
                    });
                }
            }
        });
    }

    pub fn stop(&mut self) {
        if !self.usable() {
            return;
        }
        let mut control = lock(&self.control);
        control.attempt += 1;
        self.media.pause();
        self.media.rewind();
        control.fetcher.stop();
        self.cell.update(|state| {
            state.status = PlaybackStatus::Stopped;
            state.metadata = StreamMetadata::default();
            state.error = None;
        });
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = clamp_volume(volume);
        self.media.set_volume(volume);
        self.cell.update(|state| state.volume = volume);
    }

    /// `None` until the first `start()`.
    pub fn analyser(&self) -> Option<Analyser> {
        self.graph.as_ref().map(|graph| graph.analyser().clone())
    }

    /// Tear everything down, whatever the status.  Terminal.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        {
            let mut control = lock(&self.control);
            control.attempt += 1;
            control.fetcher.stop();
        }
        self.media.release();
        if let Some(graph) = self.graph.as_mut() {
            graph.close();
        }
        debug!("engine: released");
    }
}

impl<M: MediaResource> Drop for PlaybackEngine<M> {
    fn drop(&mut self) {
        self.release();
    }
}
