//! Station stream player core: metadata fetching, playback with an analysis
//! tap, and the coordinator that merges it all into one observable state.

pub mod analyser;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod media;
pub mod mpv;

pub use analyser::Analyser;
pub use coordinator::{HttpNowPlaying, MpvLauncher, StreamCoordinator, StreamHandle};
pub use engine::PlaybackEngine;
pub use error::{FetchError, PlaybackError};
