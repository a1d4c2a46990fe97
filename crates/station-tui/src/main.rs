mod app;
mod components;
mod format;
mod spectrum;
mod theme;

use station_player::{HttpNowPlaying, MpvLauncher, StreamCoordinator};
use station_proto::config::{Config, ConfigError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = station_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("station.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("station log: {}", log_path.display());

    tracing::info!("station starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    // A bad config (unknown provider included) is fatal; an unwritable config
    // directory only costs us the defaults file.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e @ ConfigError::Parse(_)) | Err(e @ ConfigError::Read { .. }) => return Err(e.into()),
        Err(e) => {
            tracing::warn!("{}, using defaults", e);
            Config::default()
        }
    };

    // ── Coordinator + spectrum ───────────────────────────────────────────────
    let handle = StreamCoordinator::spawn(
        config.station.clone(),
        MpvLauncher,
        HttpNowPlaying::new(config.station.metadata_url.clone()),
    );
    handle.set_volume(config.player.default_volume);
    let spectrum = spectrum::SpectrumRenderer::spawn(
        handle.clone(),
        config.player.bar_count,
        config.player.frame_period(),
    );

    // ── Run TUI ──────────────────────────────────────────────────────────────
    let app = app::App::new(&config, handle.clone(), spectrum);
    let result = app.run().await;

    handle.shutdown();
    result
}
