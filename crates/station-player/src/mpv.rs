//! mpv-backed [`MediaResource`].
//!
//! Architecture:
//!
//! ```text
//!   MpvMedia::play()
//!         │
//!         ├── ensure_process()   spawn `mpv --idle` with a JSON IPC socket
//!         │        ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
//!         │        └── reader_task   ← reads JSON lines from socket
//!         │                               ├── response (has request_id) → matched oneshot::Sender
//!         │                               └── event / property-change   → broadcast channel
//!         ├── loadfile, then wait for core-idle=false (or end-file error / timeout)
//!         └── pcm tap: ffmpeg decodes the same URL → s16le → Analyser::push_samples
//! ```
//!
//! Unix only: the IPC transport is a unix domain socket.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use station_proto::platform;

use crate::analyser::Analyser;
use crate::error::PlaybackError;
use crate::media::MediaResource;

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id for `core-idle`; false means audio is flowing.
pub const OBS_CORE_IDLE: u64 = 1;

const PLAY_TIMEOUT_SECS: u64 = 15;
const IPC_TIMEOUT: Duration = Duration::from_secs(5);
const TAP_WINDOW_SAMPLES: usize = 512;
const TAP_RESTART_DELAY: Duration = Duration::from_secs(2);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// For an `end-file` caused by a failure, the reason mpv gives.
    pub fn end_file_error(&self) -> Option<String> {
        if self.event_name()? != "end-file" {
            return None;
        }
        if self.raw.get("reason").and_then(Value::as_str) != Some("error") {
            return None;
        }
        let detail = self
            .raw
            .get("file_error")
            .and_then(Value::as_str)
            .unwrap_or("playback failed");
        Some(format!("mpv: {}", detail))
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        self.set_volume(volume).await?;
        self.set_pause(false).await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Ask mpv to push `core-idle` changes.  Once per connection.
    pub async fn observe_core_idle(&self) -> anyhow::Result<()> {
        self.send(json!(["observe_property", OBS_CORE_IDLE, "core-idle"]))
            .await?;
        Ok(())
    }
}

// ── process ───────────────────────────────────────────────────────────────────

struct MpvProcess {
    child: tokio::process::Child,
    handle: MpvHandle,
    events: broadcast::Sender<MpvEvent>,
}

impl MpvProcess {
    fn alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("mpv process exited: {}", status);
                false
            }
            Err(e) => {
                warn!("mpv liveness check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(unix)]
async fn spawn_mpv(socket_name: &str, volume: f32) -> anyhow::Result<MpvProcess> {
    use tokio::net::UnixStream;

    let socket_path = std::path::PathBuf::from(socket_name);
    let _ = tokio::fs::remove_file(&socket_path).await;

    let mpv_binary =
        platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
    info!("mpv: spawning {}", mpv_binary.display());

    let child = tokio::process::Command::new(&mpv_binary)
        .arg("--no-video")
        .arg("--idle=yes")
        .arg(format!("--input-ipc-server={}", socket_name))
        .arg("--quiet")
        .arg(format!(
            "--volume={}",
            (volume * 100.0).clamp(0.0, 100.0).round() as i64
        ))
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    // Wait for socket to appear
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if !socket_path.exists() {
        anyhow::bail!("mpv IPC socket did not appear");
    }

    let stream = UnixStream::connect(&socket_path).await?;
    info!("mpv: connected to IPC socket");
    let (read_half, write_half) = stream.into_split();

    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
    let (events, _) = broadcast::channel::<MpvEvent>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, events.clone()));

    let handle = MpvHandle { tx: cmd_tx };
    if let Err(e) = handle.observe_core_idle().await {
        warn!("mpv: observe core-idle failed: {}", e);
    }

    Ok(MpvProcess {
        child,
        handle,
        events,
    })
}

#[cfg(not(unix))]
async fn spawn_mpv(_socket_name: &str, _volume: f32) -> anyhow::Result<MpvProcess> {
    anyhow::bail!("mpv IPC needs unix domain sockets")
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    events: broadcast::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    // No subscribers is fine: nobody is waiting on playback.
                    let _ = events.send(MpvEvent { raw: val });
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        pending.lock().await.insert(req.req_id, req.reply);
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── pcm tap ───────────────────────────────────────────────────────────────────

/// Decode `url` with ffmpeg to mono s16le at the analyser's sample rate and
/// feed it to the analyser until the stream ends.
async fn run_pcm_tap(
    ffmpeg: &std::path::Path,
    url: &str,
    analyser: &Analyser,
) -> anyhow::Result<()> {
    let rate = analyser.sample_rate().to_string();
    let mut child = tokio::process::Command::new(ffmpeg)
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-probesize",
            "64k",
            "-analyzeduration",
            "200000",
            "-i",
            url,
            "-vn",
            "-ac",
            "1",
            "-ar",
            &rate,
            "-f",
            "s16le",
            "pipe:1",
        ])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("ffmpeg stdout not captured"))?;
    let mut reader = BufReader::new(stdout);
    let mut chunk: Vec<f32> = Vec::with_capacity(TAP_WINDOW_SAMPLES);

    loop {
        match reader.read_i16_le().await {
            Ok(sample) => {
                chunk.push(sample as f32 / 32768.0);
                if chunk.len() >= TAP_WINDOW_SAMPLES {
                    analyser.push_samples(&chunk);
                    chunk.clear();
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        anyhow::bail!("ffmpeg exited: {}", status);
    }
    Ok(())
}

// ── media resource ────────────────────────────────────────────────────────────

struct MpvShared {
    socket_name: String,
    source: StdMutex<String>,
    volume: StdMutex<f32>,
    /// Held across the spawn so two play attempts never start two processes.
    process: Mutex<Option<MpvProcess>>,
    handle: StdMutex<Option<MpvHandle>>,
    analyser: StdMutex<Option<Analyser>>,
    tap: StdMutex<Option<tokio::task::AbortHandle>>,
    released: AtomicBool,
}

/// Audible playback through an mpv child process.  Clones share the process.
#[derive(Clone)]
pub struct MpvMedia {
    inner: Arc<MpvShared>,
}

impl Default for MpvMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl MpvMedia {
    pub fn new() -> Self {
        Self::with_socket(platform::mpv_socket_name())
    }

    pub fn with_socket(socket_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MpvShared {
                socket_name: socket_name.into(),
                source: StdMutex::new(String::new()),
                volume: StdMutex::new(1.0),
                process: Mutex::new(None),
                handle: StdMutex::new(None),
                analyser: StdMutex::new(None),
                tap: StdMutex::new(None),
                released: AtomicBool::new(false),
            }),
        }
    }

    fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    async fn ensure_process(&self) -> Result<(MpvHandle, broadcast::Sender<MpvEvent>), PlaybackError> {
        let mut guard = self.inner.process.lock().await;

        if let Some(process) = guard.as_mut() {
            if !process.alive() {
                *guard = None;
                *lock(&self.inner.handle) = None;
            }
        }

        if guard.is_none() {
            let volume = *lock(&self.inner.volume);
            let process = spawn_mpv(&self.inner.socket_name, volume)
                .await
                .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;
            *lock(&self.inner.handle) = Some(process.handle.clone());
            *guard = Some(process);
        }

        // released while we were spawning
        if self.is_released() {
            *guard = None;
            *lock(&self.inner.handle) = None;
            return Err(PlaybackError::Unavailable("media released".to_string()));
        }

        match guard.as_ref() {
            Some(process) => Ok((process.handle.clone(), process.events.clone())),
            None => Err(PlaybackError::Unavailable("mpv not running".to_string())),
        }
    }

    /// Run an IPC command without waiting for it.
    fn fire<F, Fut>(&self, what: &'static str, f: F)
    where
        F: FnOnce(MpvHandle) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Some(handle) = lock(&self.inner.handle).clone() else {
            return;
        };
        let fut = f(handle);
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                debug!("mpv: {} failed: {}", what, e);
            }
        });
    }

    fn start_tap(&self, url: &str) {
        self.stop_tap();
        let Some(analyser) = lock(&self.inner.analyser).clone() else {
            return;
        };
        let Some(ffmpeg) = platform::find_ffmpeg_binary() else {
            warn!("ffmpeg not found, spectrum tap disabled");
            return;
        };
        let url = url.to_string();
        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = run_pcm_tap(&ffmpeg, &url, &analyser).await {
                    debug!("pcm tap exited: {}", e);
                }
                tokio::time::sleep(TAP_RESTART_DELAY).await;
            }
        });
        *lock(&self.inner.tap) = Some(task.abort_handle());
    }

    fn stop_tap(&self) {
        if let Some(task) = lock(&self.inner.tap).take() {
            task.abort();
        }
    }
}

async fn wait_for_audio(rx: &mut broadcast::Receiver<MpvEvent>) -> Result<(), PlaybackError> {
    loop {
        match rx.recv().await {
            Ok(evt) => {
                if let Some((OBS_CORE_IDLE, data)) = evt.as_property_change() {
                    if data.as_bool() == Some(false) {
                        return Ok(());
                    }
                }
                if let Some(err) = evt.end_file_error() {
                    return Err(PlaybackError::Media(err));
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("mpv: playback waiter lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(PlaybackError::Media("mpv exited".to_string()));
            }
        }
    }
}

impl MediaResource for MpvMedia {
    fn is_available(&self) -> bool {
        !self.is_released()
    }

    fn set_source(&self, url: &str) {
        *lock(&self.inner.source) = url.to_string();
    }

    fn play(&self) -> impl std::future::Future<Output = Result<(), PlaybackError>> + Send {
        let media = self.clone();
        async move {
            if media.is_released() {
                return Err(PlaybackError::Unavailable("media released".to_string()));
            }
            let url = lock(&media.inner.source).clone();
            if url.is_empty() {
                return Err(PlaybackError::Media("no source set".to_string()));
            }

            let (handle, events) = media.ensure_process().await?;
            // Subscribe before loading so the core-idle flip cannot be missed.
            let mut rx = events.subscribe();
            let volume = *lock(&media.inner.volume);
            handle
                .load(&url, volume)
                .await
                .map_err(|e| PlaybackError::Media(e.to_string()))?;

            match tokio::time::timeout(
                Duration::from_secs(PLAY_TIMEOUT_SECS),
                wait_for_audio(&mut rx),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!("mpv: audio flowing from {}", url);
                    media.start_tap(&url);
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!("mpv: no audio after {}s", PLAY_TIMEOUT_SECS);
                    let _ = handle.stop().await;
                    Err(PlaybackError::Timeout(PLAY_TIMEOUT_SECS))
                }
            }
        }
    }

    fn pause(&self) {
        self.stop_tap();
        self.fire("pause", |h| async move { h.set_pause(true).await });
    }

    fn rewind(&self) {
        // `stop` unloads the stream: the next play starts at the live edge.
        self.fire("stop", |h| async move { h.stop().await });
    }

    fn set_volume(&self, volume: f32) {
        *lock(&self.inner.volume) = volume;
        self.fire("volume", move |h| async move { h.set_volume(volume).await });
    }

    fn attach_tap(&self, analyser: Analyser) {
        *lock(&self.inner.analyser) = Some(analyser);
    }

    fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("mpv: releasing media");
        self.stop_tap();
        *lock(&self.inner.analyser) = None;
        *lock(&self.inner.handle) = None;
        // A spawn in flight notices `released` and drops its process itself.
        if let Ok(mut guard) = self.inner.process.try_lock() {
            // kill_on_drop terminates the child
            guard.take();
        }
        let _ = std::fs::remove_file(&self.inner.socket_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_change_parsing() {
        let evt = MpvEvent {
            raw: json!({"event": "property-change", "id": 1, "name": "core-idle", "data": false}),
        };
        let (id, data) = evt.as_property_change().unwrap();
        assert_eq!(id, OBS_CORE_IDLE);
        assert_eq!(data.as_bool(), Some(false));
        assert_eq!(evt.event_name(), Some("property-change"));
        assert!(evt.end_file_error().is_none());
    }

    #[test]
    fn test_end_file_error() {
        let failed = MpvEvent {
            raw: json!({"event": "end-file", "reason": "error", "file_error": "loading failed"}),
        };
        assert_eq!(failed.end_file_error().as_deref(), Some("mpv: loading failed"));

        let finished = MpvEvent {
            raw: json!({"event": "end-file", "reason": "eof"}),
        };
        assert!(finished.end_file_error().is_none());
    }

    #[tokio::test]
    async fn test_reader_routes_replies_and_events() {
        let (mut server, client) = tokio::io::duplex(1024);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, mut events_rx) = broadcast::channel(8);
        let (reply_tx, reply_rx) = oneshot::channel();
        pending.lock().await.insert(7, reply_tx);

        tokio::spawn(reader_task(BufReader::new(client), pending.clone(), events));
        server
            .write_all(
                b"{\"request_id\":7,\"error\":\"success\",\"data\":1}\n\
                  not json\n\
                  {\"event\":\"property-change\",\"id\":1,\"data\":false}\n",
            )
            .await
            .unwrap();

        let reply = reply_rx.await.unwrap().unwrap();
        assert_eq!(reply["data"], 1);
        let evt = events_rx.recv().await.unwrap();
        assert_eq!(evt.as_property_change().map(|(id, _)| id), Some(OBS_CORE_IDLE));
    }

    #[tokio::test]
    async fn test_reader_fails_pending_on_close() {
        let (server, client) = tokio::io::duplex(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(8);
        let (reply_tx, reply_rx) = oneshot::channel();
        pending.lock().await.insert(1, reply_tx);

        let reader = tokio::spawn(reader_task(BufReader::new(client), pending, events));
        drop(server);
        reader.await.unwrap();
        assert!(reply_rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_wait_for_audio_outcomes() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(MpvEvent {
            raw: json!({"event": "start-file"}),
        })
        .unwrap();
        tx.send(MpvEvent {
            raw: json!({"event": "property-change", "id": 1, "data": false}),
        })
        .unwrap();
        assert_eq!(wait_for_audio(&mut rx).await, Ok(()));

        tx.send(MpvEvent {
            raw: json!({"event": "end-file", "reason": "error", "file_error": "unrecognized file format"}),
        })
        .unwrap();
        assert_eq!(
            wait_for_audio(&mut rx).await,
            Err(PlaybackError::Media("mpv: unrecognized file format".into()))
        );

        drop(tx);
        assert!(matches!(
            wait_for_audio(&mut rx).await,
            Err(PlaybackError::Media(_))
        ));
    }

    #[tokio::test]
    async fn test_released_media_refuses_to_play() {
        let media = MpvMedia::with_socket(format!(
            "{}/station-mpv-test-{}.sock",
            std::env::temp_dir().display(),
            std::process::id()
        ));
        media.set_source("http://127.0.0.1:9/stream.mp3");
        assert!(media.is_available());
        media.release();
        media.release();
        assert!(!media.is_available());
        assert!(matches!(
            media.play().await,
            Err(PlaybackError::Unavailable(_))
        ));
    }
}
