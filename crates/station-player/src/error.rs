/// A playback attempt that failed.  Surfaced to the UI as `status = error`
/// with the display string as message; the user has to start again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// The media backend refused or failed to play (decode error, blocked
    /// autoplay, network error reported by the player, ...).
    #[error("{0}")]
    Media(String),
    #[error("no audio after {0}s")]
    Timeout(u64),
    #[error("media backend unavailable: {0}")]
    Unavailable(String),
}

/// A failed now-playing fetch.  Always transient: logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid now-playing body: {0}")]
    Decode(#[from] serde_json::Error),
}
