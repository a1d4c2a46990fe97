//! Now-playing metadata acquisition.
//!
//! The AzuraCast strategy prefers the live push channel (a Centrifugo
//! websocket next to the HTTP API) and falls back to polling the
//! now-playing endpoint.  Once the push channel has failed, the fetcher
//! polls for the rest of its life, across stop/start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use station_proto::config::MetadataProvider;
use station_proto::protocol::{NowPlayingResponse, PushMessage, StreamMetadata, SubscribeMessage};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;

pub const POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the live now-playing websocket on an AzuraCast host.
pub const PUSH_PATH: &str = "/api/live/nowplaying/websocket";

pub type MetadataCallback = Arc<dyn Fn(StreamMetadata) + Send + Sync>;

pub trait MetadataFetcher: Send {
    /// Begin acquiring metadata.  No-op while already running.
    fn start(&mut self);
    /// Cease acquisition and cancel whatever is in flight.  Safe to call
    /// when never started.
    fn stop(&mut self);
}

/// Build the fetcher strategy for `provider`.
pub fn create_metadata_fetcher(
    provider: MetadataProvider,
    metadata_url: &str,
    on_metadata: MetadataCallback,
) -> Box<dyn MetadataFetcher> {
    match provider {
        MetadataProvider::Azuracast => Box::new(AzuracastFetcher::new(metadata_url, on_metadata)),
    }
}

/// GET the now-playing endpoint once.  `Ok(None)` when the body has no song.
pub async fn fetch_now_playing(
    client: &reqwest::Client,
    url: &str,
) -> Result<Option<StreamMetadata>, FetchError> {
    let response = client.get(url).timeout(HTTP_TIMEOUT).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }
    let bytes = response.bytes().await?;
    let body: NowPlayingResponse = serde_json::from_slice(&bytes)?;
    Ok(body.metadata())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEndpoint {
    pub url: String,
    /// Station short name, used for the `station:<name>` channel.
    pub station: String,
}

/// Derive the push channel from a now-playing URL: same host, fixed path,
/// `https` → `wss` and `http` → `ws`.  The station is the last path segment.
pub fn push_endpoint(metadata_url: &str) -> Option<PushEndpoint> {
    let mut url = reqwest::Url::parse(metadata_url).ok()?;
    let station = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()?
        .to_string();
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    url.set_path(PUSH_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Some(PushEndpoint {
        url: url.to_string(),
        station,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherTiming {
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for FetcherTiming {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

struct FetcherShared {
    metadata_url: String,
    client: reqwest::Client,
    on_metadata: MetadataCallback,
    timing: FetcherTiming,
    use_push: AtomicBool,
}

pub struct AzuracastFetcher {
    shared: Arc<FetcherShared>,
    run: Option<CancellationToken>,
}

impl AzuracastFetcher {
    pub fn new(metadata_url: &str, on_metadata: MetadataCallback) -> Self {
        Self::with_timing(metadata_url, on_metadata, FetcherTiming::default())
    }

    pub fn with_timing(
        metadata_url: &str,
        on_metadata: MetadataCallback,
        timing: FetcherTiming,
    ) -> Self {
        Self {
            shared: Arc::new(FetcherShared {
                metadata_url: metadata_url.to_string(),
                client: reqwest::Client::new(),
                on_metadata,
                timing,
                use_push: AtomicBool::new(true),
            }),
            run: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|token| !token.is_cancelled())
    }

    /// False once the push channel has failed and the fetcher polls instead.
    pub fn uses_push(&self) -> bool {
        self.shared.use_push.load(Ordering::SeqCst)
    }
}

impl MetadataFetcher for AzuracastFetcher {
    fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let token = CancellationToken::new();
        self.run = Some(token.clone());
        tokio::spawn(run_fetcher(self.shared.clone(), token));
    }

    fn stop(&mut self) {
        if let Some(token) = self.run.take() {
            debug!("fetcher: stopping");
            token.cancel();
        }
    }
}

impl Drop for AzuracastFetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

enum PushOutcome {
    Cancelled,
    /// Server ended the session cleanly; worth reconnecting.
    Closed,
    /// Could not derive, connect or read; poll from now on.
    Failed(String),
}

async fn run_fetcher(shared: Arc<FetcherShared>, token: CancellationToken) {
    while shared.use_push.load(Ordering::SeqCst) {
        match push_session(&shared, &token).await {
            PushOutcome::Cancelled => return,
            PushOutcome::Failed(reason) => {
                warn!("fetcher: push channel unavailable ({}), polling instead", reason);
                shared.use_push.store(false, Ordering::SeqCst);
            }
            PushOutcome::Closed => {
                debug!(
                    "fetcher: push channel closed, reconnecting in {:?}",
                    shared.timing.reconnect_delay
                );
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(shared.timing.reconnect_delay) => {}
                }
            }
        }
    }
    poll_loop(&shared, &token).await;
}

async fn push_session(shared: &FetcherShared, token: &CancellationToken) -> PushOutcome {
    let Some(endpoint) = push_endpoint(&shared.metadata_url) else {
        return PushOutcome::Failed(format!("no push endpoint for {}", shared.metadata_url));
    };

    let connected = tokio::select! {
        _ = token.cancelled() => return PushOutcome::Cancelled,
        result = tokio_tungstenite::connect_async(endpoint.url.as_str()) => result,
    };
    let (socket, _) = match connected {
        Ok(ok) => ok,
        Err(e) => return PushOutcome::Failed(e.to_string()),
    };
    info!("fetcher: push channel open at {}", endpoint.url);

    let (mut sink, mut stream) = socket.split();
    let subscribe = match serde_json::to_string(&SubscribeMessage::station(&endpoint.station)) {
        Ok(text) => text,
        Err(e) => return PushOutcome::Failed(e.to_string()),
    };
    if let Err(e) = sink.send(Message::Text(subscribe)).await {
        return PushOutcome::Failed(e.to_string());
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return PushOutcome::Cancelled;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    // Keep-alives and garbage decode to nothing.
                    let Some(message) = PushMessage::parse(&text) else {
                        continue;
                    };
                    for metadata in message.metadata_updates() {
                        if token.is_cancelled() {
                            return PushOutcome::Cancelled;
                        }
                        (shared.on_metadata)(metadata);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return PushOutcome::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return PushOutcome::Failed(e.to_string()),
            }
        }
    }
}

async fn poll_loop(shared: &Arc<FetcherShared>, token: &CancellationToken) {
    let mut interval = tokio::time::interval(shared.timing.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {
                // Requests overlap freely; only stop() cancels them.
                let shared = shared.clone();
                let request = token.child_token();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = request.cancelled() => debug!("fetcher: request cancelled"),
                        result = fetch_now_playing(&shared.client, &shared.metadata_url) => match result {
                            Ok(Some(metadata)) => (shared.on_metadata)(metadata),
                            Ok(None) => debug!("fetcher: no song in now-playing"),
                            Err(e) => debug!("fetcher: poll failed: {}", e),
                        },
                    }
                });
            }
        }
    }
}
