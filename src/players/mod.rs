/// Apple Music poller over the osascript bridge
pub mod apple_music;

/// Spotify Web API poller
pub mod spotify;

use std::sync::Arc;

use crate::config::Settings;
use crate::data::track::{PlaybackSource, TrackSnapshot};

/// Poller trait - abstract interface for player sources
///
/// One implementation per integration; the engine is source-agnostic
/// and only ever sees [`TrackSnapshot`]s.
#[async_trait::async_trait]
pub trait Poller: Send + Sync {
    /// Which integration this poller reads
    fn source(&self) -> PlaybackSource;

    /// Observe the player once. `None` means nothing is playing, the
    /// payload was unusable (placeholder track, missing artist) or the
    /// source could not be reached; the engine treats all three the
    /// same. Never returns an error.
    async fn poll(&self) -> Option<TrackSnapshot>;
}

/// Build the poller for the integration selected on the command line.
pub fn create_poller(
    source: PlaybackSource,
    settings: &Settings,
) -> Result<Arc<dyn Poller>, String> {
    match source {
        PlaybackSource::AppleMusic => Ok(Arc::new(apple_music::AppleMusicPoller::new())),
        PlaybackSource::Spotify => match &settings.spotify {
            Some(spotify) => Ok(Arc::new(spotify::SpotifyPoller::new(spotify.clone()))),
            None => Err(
                "Spotify integration selected but SPOTIFY_* credentials are not configured"
                    .to_string(),
            ),
        },
    }
}
