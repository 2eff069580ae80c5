use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::SpotifySettings;
use crate::constants::POLLER_TIMEOUT_SECS;
use crate::data::track::{PlaybackSource, TrackSnapshot};

use super::Poller;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const CURRENTLY_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";

/// Refresh slightly before the token actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    item: Option<SpotifyTrack>,
    is_playing: bool,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    duration_ms: u64,
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    name: String,
}

struct AccessToken {
    token: String,
    expires_at: Instant,
}

struct SpotifyInner {
    settings: SpotifySettings,
    agent: ureq::Agent,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyInner {
    /// Return a usable bearer token, refreshing through the stored
    /// refresh token when the cached one is gone or about to expire.
    fn ensure_token(&self) -> Result<String, String> {
        {
            let guard = self.token.lock();
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                    return Ok(token.token.clone());
                }
            }
        }
        self.refresh_token()
    }

    fn refresh_token(&self) -> Result<String, String> {
        debug!("Refreshing Spotify access token");
        let response = self
            .agent
            .post(TOKEN_URL)
            .send_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &self.settings.refresh_token),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
            ])
            .map_err(|e| format!("token refresh failed: {e}"))?;

        let parsed: TokenResponse = response
            .into_json()
            .map_err(|e| format!("token response unreadable: {e}"))?;

        let token = parsed.access_token.clone();
        *self.token.lock() = Some(AccessToken {
            token: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        });
        Ok(token)
    }

    fn fetch_currently_playing(&self) -> Result<Option<TrackSnapshot>, String> {
        let token = self.ensure_token()?;
        match self.request_currently_playing(&token) {
            // an expired token gets one refresh-and-retry
            Err(RequestError::Unauthorized) => {
                let token = self.refresh_token()?;
                self.request_currently_playing(&token)
                    .map_err(|e| e.to_string())
            }
            other => other.map_err(|e| e.to_string()),
        }
    }

    fn request_currently_playing(
        &self,
        token: &str,
    ) -> Result<Option<TrackSnapshot>, RequestError> {
        let response = self
            .agent
            .get(CURRENTLY_PLAYING_URL)
            .set("Authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(401, _) => RequestError::Unauthorized,
                ureq::Error::Status(code, _) => RequestError::Http(code),
                other => RequestError::Transport(other.to_string()),
            })?;

        // 204: nothing playing
        if response.status() == 204 {
            return Ok(None);
        }

        let parsed: CurrentlyPlaying = response
            .into_json()
            .map_err(|e| RequestError::Transport(format!("unreadable payload: {e}")))?;
        Ok(snapshot_from_payload(parsed))
    }
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("access token rejected")]
    Unauthorized,
    #[error("HTTP error {0}")]
    Http(u16),
    #[error("{0}")]
    Transport(String),
}

fn snapshot_from_payload(payload: CurrentlyPlaying) -> Option<TrackSnapshot> {
    let item = payload.item?;
    let artist = item.artists.first().map(|a| a.name.clone())?;
    if artist.is_empty() {
        return None;
    }
    // milliseconds from the API, seconds everywhere past this point
    let duration = Some(((item.duration_ms + 500) / 1000) as u32).filter(|d| *d > 0);
    Some(TrackSnapshot::new(
        item.name,
        artist,
        item.album.map(|a| a.name).filter(|name| !name.is_empty()),
        payload.is_playing,
        duration,
        PlaybackSource::Spotify,
    ))
}

/// Reads the account's currently-playing track from the Spotify Web
/// API. The blocking HTTP work runs on the blocking pool.
pub struct SpotifyPoller {
    inner: Arc<SpotifyInner>,
}

impl SpotifyPoller {
    pub fn new(settings: SpotifySettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(POLLER_TIMEOUT_SECS))
            .timeout(Duration::from_secs(POLLER_TIMEOUT_SECS))
            .build();
        SpotifyPoller {
            inner: Arc::new(SpotifyInner {
                settings,
                agent,
                token: Mutex::new(None),
            }),
        }
    }
}

#[async_trait::async_trait]
impl Poller for SpotifyPoller {
    fn source(&self) -> PlaybackSource {
        PlaybackSource::Spotify
    }

    async fn poll(&self) -> Option<TrackSnapshot> {
        let inner = self.inner.clone();
        let result =
            tokio::task::spawn_blocking(move || inner.fetch_currently_playing()).await;
        match result {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                info!("Spotify poll failed: {}", e);
                None
            }
            Err(e) => {
                info!("Spotify poll task failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> CurrentlyPlaying {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn maps_a_playing_track() {
        let parsed = payload(
            r#"{
                "is_playing": true,
                "item": {
                    "name": "Song",
                    "duration_ms": 201500,
                    "artists": [{"name": "Artist"}, {"name": "Feature"}],
                    "album": {"name": "Album"}
                }
            }"#,
        );
        let snapshot = snapshot_from_payload(parsed).unwrap();
        assert_eq!(snapshot.name, "Song");
        assert_eq!(snapshot.artist, "Artist");
        assert_eq!(snapshot.album.as_deref(), Some("Album"));
        // 201500 ms rounds to 202 s
        assert_eq!(snapshot.duration, Some(202));
        assert!(snapshot.playing);
        assert_eq!(snapshot.source, PlaybackSource::Spotify);
    }

    #[test]
    fn empty_item_means_nothing_playing() {
        let parsed = payload(r#"{"is_playing": false, "item": null}"#);
        assert!(snapshot_from_payload(parsed).is_none());
    }

    #[test]
    fn missing_artist_is_filtered() {
        let parsed = payload(
            r#"{
                "is_playing": true,
                "item": {"name": "Song", "duration_ms": 1000, "artists": [], "album": null}
            }"#,
        );
        assert!(snapshot_from_payload(parsed).is_none());
    }
}
