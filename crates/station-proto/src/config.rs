use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::platform;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise config: {0}")]
    Serialise(#[from] toml::ser::Error),
}

/// Raised when a station names a metadata provider we have no strategy for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metadata provider: {0}")]
pub struct UnknownProvider(pub String);

/// Where now-playing metadata comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum MetadataProvider {
    #[default]
    Azuracast,
}

impl MetadataProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataProvider::Azuracast => "azuracast",
        }
    }
}

impl FromStr for MetadataProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azuracast" => Ok(MetadataProvider::Azuracast),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

impl TryFrom<String> for MetadataProvider {
    type Error = UnknownProvider;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetadataProvider> for String {
    fn from(provider: MetadataProvider) -> Self {
        provider.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub roster: RosterConfig,
}

/// The station being played.  Immutable for a session; handed to the player
/// by value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    #[serde(default = "default_playback_url")]
    pub playback_url: String,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    #[serde(default)]
    pub metadata_provider: MetadataProvider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Initial volume, clamped to 0.0..=1.0 on use.
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Number of spectrum bars.
    #[serde(default = "default_bar_count")]
    pub bar_count: usize,
    /// Spectrum redraw rate in frames per second.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
}

/// Redraws faster than one per millisecond are capped.
pub const MAX_FRAME_RATE: u32 = 1000;

impl PlayerConfig {
    /// Time between redraws, with `frame_rate` clamped to `1..=MAX_FRAME_RATE`.
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frame_rate.clamp(1, MAX_FRAME_RATE)))
    }
}

/// Credentials for the DJ roster API.  Both empty disables the roster.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RosterConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub station_id: String,
}

impl RosterConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.station_id.is_empty()
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            playback_url: default_playback_url(),
            metadata_url: default_metadata_url(),
            metadata_provider: MetadataProvider::default(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            bar_count: default_bar_count(),
            frame_rate: default_frame_rate(),
        }
    }
}

fn default_station_name() -> String {
    "Radio Tasty".to_string()
}

fn default_playback_url() -> String {
    "https://listen.radiotasty.com/listen/radio_tasty/radio-192.mp3".to_string()
}

fn default_metadata_url() -> String {
    "https://listen.radiotasty.com/api/nowplaying/radio_tasty".to_string()
}

fn default_volume() -> f32 {
    1.0
}

fn default_bar_count() -> usize {
    16
}

fn default_frame_rate() -> u32 {
    30
}

impl Config {
    /// Load from the default location, writing a default config on first run.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
