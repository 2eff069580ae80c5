use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::helpers::normalize::clean_up_title;

/// Player integration supplying snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlaybackSource {
    AppleMusic,
    Spotify,
}

/// One-line status string shown by the API and logs, derived from the
/// engine state. These are the only user-visible failure signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Waiting,
    Playing,
    Paused,
    Scrobbled,
    Pending,
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PlaybackStatus::Waiting => "Waiting",
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Scrobbled => "Scrobbled",
            PlaybackStatus::Pending => "Pending (no internet)",
        };
        f.write_str(text)
    }
}

/// Identity of a play: normalized title plus artist. Used uniformly for
/// comparator sameness, ledger membership and pending dedup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub clean_name: String,
    pub artist: String,
}

/// An immutable observation of the player at one instant.
///
/// Durations are whole seconds; sources reporting milliseconds convert
/// at the poller boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub clean_name: String,
    pub clean_album: Option<String>,
    pub playing: bool,
    pub duration: Option<u32>,
    pub source: PlaybackSource,
}

impl TrackSnapshot {
    /// Build a snapshot, deriving the normalized title fields.
    pub fn new(
        name: String,
        artist: String,
        album: Option<String>,
        playing: bool,
        duration: Option<u32>,
        source: PlaybackSource,
    ) -> Self {
        let clean_name = clean_up_title(&name);
        let clean_album = album.as_deref().map(clean_up_title);
        TrackSnapshot {
            name,
            artist,
            album,
            clean_name,
            clean_album,
            playing,
            duration,
            source,
        }
    }

    pub fn key(&self) -> TrackKey {
        TrackKey {
            clean_name: self.clean_name.clone(),
            artist: self.artist.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("'{}' by {}", self.name, self.artist)
    }
}

/// The engine's mutable model of the current play.
///
/// A new instance is created whenever identity changes; `time_played`,
/// `scrobbled` and `now_playing_pushed` never survive an identity change.
#[derive(Debug, Clone, Serialize)]
pub struct TrackState {
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub clean_name: String,
    pub clean_album: Option<String>,
    pub playing: bool,
    pub duration: Option<u32>,
    pub source: PlaybackSource,
    /// Accumulated seconds of observed play for this instance
    pub time_played: u32,
    /// Whether this play instance has been delivered to Last.fm
    pub scrobbled: bool,
    /// Whether a now-playing update has been pushed for this instance
    pub now_playing_pushed: bool,
}

impl From<&TrackSnapshot> for TrackState {
    fn from(snapshot: &TrackSnapshot) -> Self {
        TrackState {
            name: snapshot.name.clone(),
            artist: snapshot.artist.clone(),
            album: snapshot.album.clone(),
            clean_name: snapshot.clean_name.clone(),
            clean_album: snapshot.clean_album.clone(),
            playing: snapshot.playing,
            duration: snapshot.duration,
            source: snapshot.source,
            time_played: 0,
            scrobbled: false,
            now_playing_pushed: false,
        }
    }
}

impl TrackState {
    pub fn key(&self) -> TrackKey {
        TrackKey {
            clean_name: self.clean_name.clone(),
            artist: self.artist.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("'{}' by {}", self.name, self.artist)
    }
}

/// A scrobble acknowledged by Last.fm, as kept in the session ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LastFmTrack {
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub scrobbled_at: DateTime<Utc>,
}

/// One user.getRecentTracks entry, consumed by the history backfill.
#[derive(Debug, Clone)]
pub struct PlayedTrack {
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub scrobbled_at: DateTime<Utc>,
}

/// Album metadata from album.getInfo, cached next to the engine state
/// for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct AlbumInfo {
    pub title: String,
    pub artist_name: String,
    pub url: Option<String>,
    pub mbid: Option<String>,
    pub playcount: Option<u64>,
    pub user_playcount: Option<u64>,
    pub listener_count: Option<u64>,
    pub wiki: Option<String>,
    pub tracks: Option<Vec<AlbumTrack>>,
    pub tags: Option<Vec<AlbumTag>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlbumTrack {
    pub title: String,
    pub duration: Option<u32>,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlbumTag {
    pub name: String,
    pub weight: u32,
}

/// Last.fm account summary shown on `/state/`. Counts arrive as raw
/// integers and are kept formatted with thousands separators, matching
/// what the UI renders.
#[derive(Debug, Clone, Serialize)]
pub struct LastFmUser {
    pub name: String,
    pub realname: Option<String>,
    pub url: String,
    pub country: Option<String>,
    pub image_url: Option<String>,
    pub playcount: String,
    pub track_count: String,
    pub album_count: String,
    pub artist_count: String,
    pub registered: Option<DateTime<Utc>>,
}

/// A persisted scrobble row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scrobble {
    pub id: Option<i64>,
    pub track_name: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub scrobbled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Natural key for scrobble dedup: `(track_name, artist_name,
/// scrobbled_at)` with the timestamp at second precision. Names are
/// case-folded, matching the store's case-insensitive comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScrobbleKey {
    pub track_name: String,
    pub artist_name: String,
    pub scrobbled_at: i64,
}

impl ScrobbleKey {
    pub fn new(track_name: &str, artist_name: &str, scrobbled_at: DateTime<Utc>) -> Self {
        ScrobbleKey {
            track_name: track_name.to_lowercase(),
            artist_name: artist_name.to_lowercase(),
            scrobbled_at: scrobbled_at.timestamp(),
        }
    }
}

/// Format an integer count with thousands separators, the way the
/// Last.fm profile page shows it.
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(c);
    }
    formatted
}
