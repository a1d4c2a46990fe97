use std::future::Future;

use crate::analyser::Analyser;
use crate::error::PlaybackError;

/// One playable media resource, the Rust side of an `<audio>` element.
///
/// Implementations are cheap handles (`Clone`) onto shared backend state so
/// a play attempt can run on its own task while the owner keeps control.
/// Everything except `play` is fire-and-forget.
pub trait MediaResource: Clone + Send + Sync + 'static {
    /// False once released, or when the backend cannot exist at all.
    fn is_available(&self) -> bool;

    fn set_source(&self, url: &str);

    /// Resolves once audio is actually flowing, or with the reason it never
    /// will.
    fn play(&self) -> impl Future<Output = Result<(), PlaybackError>> + Send;

    fn pause(&self);

    /// Reset the playback position to zero.
    fn rewind(&self);

    /// `volume` is already clamped to 0.0..=1.0.
    fn set_volume(&self, volume: f32);

    /// Route a copy of the decoded PCM into `analyser`.  Must not change
    /// what is heard.
    fn attach_tap(&self, analyser: Analyser);

    /// Stop and detach everything.  Terminal.
    fn release(&self);
}
