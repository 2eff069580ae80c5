use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, info, warn};
use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;

use crate::config::Settings;
use crate::constants::{LASTFM_READ_TIMEOUT_SECS, LASTFM_SCROBBLE_TIMEOUT_SECS};
use crate::data::track::{
    format_count, AlbumInfo, AlbumTag, AlbumTrack, LastFmTrack, LastFmUser, PlayedTrack,
};
use crate::helpers::normalize::lastfm_friendly;
use crate::helpers::ratelimit;

/// Error codes Last.fm documents as retryable
const TRANSIENT_API_CODES: [i32; 3] = [11, 16, 29]; // offline, temporary failure, rate limited

#[derive(Debug, thiserror::Error)]
pub enum LastfmError {
    #[error("Last.fm API error ({1}): {0}")]
    Api(String, i32),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request deadline exceeded")]
    Timeout,
    #[error("Parsing error: {0}")]
    Parsing(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LastfmError {
    /// Whether a retry later could reasonably succeed. Auth and most API
    /// errors are permanent for the life of the process.
    pub fn is_transient(&self) -> bool {
        match self {
            LastfmError::Network(_) | LastfmError::Timeout => true,
            LastfmError::Api(_, code) => TRANSIENT_API_CODES.contains(code),
            LastfmError::Parsing(_) | LastfmError::Auth(_) | LastfmError::Config(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct Session {
    name: String,
    key: String,
}

/// Accepts the counts Last.fm serializes sometimes as numbers, sometimes
/// as decimal strings.
fn lenient_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
        Null,
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(Some(n)),
        Raw::Text(s) if s.is_empty() => Ok(None),
        Raw::Text(s) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected integer, got '{s}'"))),
        Raw::Null => Ok(None),
    }
}

/// `track` (and friends) arrive as an array normally but as a bare
/// object when the result set has exactly one entry.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Many(Vec<T>),
        One(T),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Many(items) => items,
        Raw::One(item) => vec![item],
    })
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user: UserInfo,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    name: String,
    realname: Option<String>,
    url: String,
    country: Option<String>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    playcount: Option<u64>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    track_count: Option<u64>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    album_count: Option<u64>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    artist_count: Option<u64>,
    #[serde(default)]
    image: Vec<SizedImage>,
    registered: Option<Registered>,
}

#[derive(Debug, Deserialize)]
struct SizedImage {
    #[serde(rename = "#text")]
    url: String,
    #[allow(dead_code)]
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Registered {
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    unixtime: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RecentTracksResponse {
    recenttracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(deserialize_with = "one_or_many", default)]
    track: Vec<RecentTrack>,
}

#[derive(Debug, Deserialize)]
struct TrackScrobblesResponse {
    trackscrobbles: RecentTracks,
}

#[derive(Debug, Deserialize)]
struct RecentTrack {
    name: String,
    artist: TextRef,
    album: Option<TextRef>,
    date: Option<UtsDate>,
    #[serde(rename = "@attr")]
    attr: Option<RecentTrackAttr>,
}

#[derive(Debug, Deserialize)]
struct RecentTrackAttr {
    nowplaying: Option<String>,
}

/// Artist/album references come back as `{"#text": ...}` in the default
/// response shape and as `{"name": ...}` in the extended one.
#[derive(Debug, Deserialize)]
struct TextRef {
    #[serde(rename = "#text")]
    text: Option<String>,
    name: Option<String>,
}

impl TextRef {
    fn value(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or(self.name.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct UtsDate {
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    uts: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AlbumInfoResponse {
    album: AlbumInfoBody,
}

#[derive(Debug, Deserialize)]
struct AlbumInfoBody {
    name: String,
    artist: String,
    url: Option<String>,
    mbid: Option<String>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    playcount: Option<u64>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    userplaycount: Option<u64>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    listeners: Option<u64>,
    tracks: Option<AlbumTracksBody>,
    tags: Option<AlbumTagsBody>,
    wiki: Option<WikiBody>,
}

#[derive(Debug, Deserialize)]
struct AlbumTracksBody {
    #[serde(deserialize_with = "one_or_many", default)]
    track: Vec<AlbumTrackBody>,
}

#[derive(Debug, Deserialize)]
struct AlbumTrackBody {
    name: String,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AlbumTagsBody {
    #[serde(deserialize_with = "one_or_many", default)]
    tag: Vec<AlbumTagBody>,
}

#[derive(Debug, Deserialize)]
struct AlbumTagBody {
    name: String,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WikiBody {
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeeklyAlbumChartResponse {
    weeklyalbumchart: WeeklyAlbumChart,
}

#[derive(Debug, Deserialize)]
struct WeeklyAlbumChart {
    #[serde(deserialize_with = "one_or_many", default)]
    album: Vec<WeeklyAlbumBody>,
}

#[derive(Debug, Deserialize)]
struct WeeklyAlbumBody {
    name: String,
    artist: TextRef,
    url: Option<String>,
    #[serde(deserialize_with = "lenient_u64_opt", default)]
    playcount: Option<u64>,
}

/// One row of a weekly album chart passthrough.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WeeklyAlbum {
    pub title: String,
    pub artist_name: String,
    pub url: Option<String>,
    pub playcount: u64,
}

/// Blocking Last.fm wire client.
///
/// Signs write calls with the MD5 scheme the API requires and
/// authenticates once at construction through auth.getMobileSession
/// (username + MD5 password hash). All calls block; use
/// [`LastfmService`] from async code.
pub struct LastfmClient {
    api_url: String,
    api_key: String,
    api_secret: String,
    username: String,
    session_key: String,
    agent: ureq::Agent,
}

impl LastfmClient {
    /// Authenticate against Last.fm and return a ready client.
    pub fn connect(settings: &Settings) -> Result<Self, LastfmError> {
        if settings.lastfm_api_key.is_empty() || settings.lastfm_api_secret.is_empty() {
            return Err(LastfmError::Config(
                "API key and secret are required".to_string(),
            ));
        }

        ratelimit::register_service("lastfm", 1000);

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(LASTFM_READ_TIMEOUT_SECS))
            .timeout(Duration::from_secs(LASTFM_SCROBBLE_TIMEOUT_SECS))
            .build();

        let mut client = LastfmClient {
            api_url: settings.lastfm_api_url.clone(),
            api_key: settings.lastfm_api_key.clone(),
            api_secret: settings.lastfm_api_secret.clone(),
            username: settings.lastfm_username.clone(),
            session_key: String::new(),
            agent,
        };

        let auth_token = format!(
            "{:x}",
            md5::compute(format!("{}{}", client.username, settings.lastfm_password_hash))
        );
        let params = vec![
            ("method", "auth.getMobileSession".to_string()),
            ("username", client.username.clone()),
            ("authToken", auth_token),
        ];
        let body = client.request(params, true)?;
        let session: SessionResponse = serde_json::from_str(&body).map_err(|e| {
            LastfmError::Parsing(format!("Failed to parse session response: {e}"))
        })?;
        client.session_key = session.session.key;
        info!(
            "Authenticated with Last.fm as user: {}",
            session.session.name
        );
        Ok(client)
    }

    /// Perform one API request. Adds `api_key` and `format=json`, signs
    /// the sorted parameter string with the shared secret when asked,
    /// and surfaces Last.fm JSON error bodies as [`LastfmError::Api`].
    fn request(&self, params: Vec<(&str, String)>, sign: bool) -> Result<String, LastfmError> {
        ratelimit::rate_limit("lastfm");

        let mut param_map: HashMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        param_map.insert("api_key".to_string(), self.api_key.clone());
        param_map.insert("format".to_string(), "json".to_string());

        if sign {
            let mut sorted: Vec<(&String, &String)> = param_map.iter().collect();
            sorted.sort_by_key(|&(k, _)| k);

            let mut sig_string = String::new();
            for (k, v) in sorted {
                if k != "format" {
                    // format is excluded from the signature base string
                    sig_string.push_str(k);
                    sig_string.push_str(v);
                }
            }
            sig_string.push_str(&self.api_secret);

            let digest = md5::compute(sig_string.as_bytes());
            param_map.insert("api_sig".to_string(), format!("{digest:x}"));
        }

        let method_for_log = param_map
            .get("method")
            .cloned()
            .unwrap_or_else(|| "unknown_method".to_string());
        debug!("Last.fm API call: method={}", method_for_log);

        let form_params: Vec<(&str, &str)> = param_map
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        match self.agent.post(&self.api_url).send_form(&form_params) {
            Ok(response) => {
                let body = response.into_string().map_err(|e| {
                    LastfmError::Network(format!("Failed to read response body: {e}"))
                })?;
                // Last.fm reports errors as JSON bodies even on 200 OK
                if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
                    debug!(
                        "Last.fm API returned an error: code={}, message='{}'",
                        err.error, err.message
                    );
                    return Err(classify_api_error(err));
                }
                Ok(body)
            }
            Err(ureq::Error::Status(code, response)) => {
                let error_body = response
                    .into_string()
                    .unwrap_or_else(|_| "<empty response body>".to_string());
                if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&error_body) {
                    Err(classify_api_error(err))
                } else {
                    Err(LastfmError::Network(format!(
                        "HTTP error {code} with unparseable body"
                    )))
                }
            }
            Err(e) => Err(LastfmError::Network(e.to_string())),
        }
    }

    pub fn get_user(&self) -> Result<LastFmUser, LastfmError> {
        let params = vec![
            ("method", "user.getInfo".to_string()),
            ("user", self.username.clone()),
        ];
        let body = self.request(params, false)?;
        let parsed: UserInfoResponse = serde_json::from_str(&body)
            .map_err(|e| LastfmError::Parsing(format!("Failed to parse user.getInfo: {e}")))?;
        let user = parsed.user;

        let registered = user
            .registered
            .and_then(|r| r.unixtime)
            .and_then(|uts| Utc.timestamp_opt(uts as i64, 0).single());
        // The profile page shows the largest avatar, last in the list
        let image_url = user
            .image
            .iter()
            .rev()
            .map(|i| i.url.clone())
            .find(|url| !url.is_empty());

        Ok(LastFmUser {
            name: user.name,
            realname: user.realname.filter(|s| !s.is_empty()),
            url: user.url,
            country: user.country.filter(|s| !s.is_empty()),
            image_url,
            playcount: format_count(user.playcount.unwrap_or(0)),
            track_count: format_count(user.track_count.unwrap_or(0)),
            album_count: format_count(user.album_count.unwrap_or(0)),
            artist_count: format_count(user.artist_count.unwrap_or(0)),
            registered,
        })
    }

    pub fn update_now_playing(
        &self,
        artist: &str,
        title: &str,
        album: Option<&str>,
    ) -> Result<(), LastfmError> {
        let mut params = vec![
            ("method", "track.updateNowPlaying".to_string()),
            ("sk", self.session_key.clone()),
            ("artist", lastfm_friendly(artist)),
            ("track", lastfm_friendly(title)),
        ];
        if let Some(album) = album {
            params.push(("album", lastfm_friendly(album)));
        }
        self.request(params, true)?;
        debug!("Now playing updated for track: {} - {}", artist, title);
        Ok(())
    }

    pub fn scrobble(
        &self,
        artist: &str,
        title: &str,
        album: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<LastFmTrack, LastfmError> {
        let mut params = vec![
            ("method", "track.scrobble".to_string()),
            ("sk", self.session_key.clone()),
            ("artist", lastfm_friendly(artist)),
            ("track", lastfm_friendly(title)),
            ("timestamp", timestamp.timestamp().to_string()),
        ];
        if let Some(album) = album {
            params.push(("album", lastfm_friendly(album)));
        }
        self.request(params, true)?;
        debug!("Scrobble successful for track: {} - {}", artist, title);
        Ok(LastFmTrack {
            name: title.to_string(),
            artist: artist.to_string(),
            album: album.map(str::to_string),
            scrobbled_at: timestamp,
        })
    }

    /// Fetch one page of the user's listening history, most recent
    /// first. `time_from`/`time_to` are inclusive UTC bounds in seconds.
    pub fn recent_tracks(
        &self,
        limit: u32,
        time_from: Option<i64>,
        time_to: Option<i64>,
    ) -> Result<Vec<PlayedTrack>, LastfmError> {
        let mut params = vec![
            ("method", "user.getRecentTracks".to_string()),
            ("user", self.username.clone()),
            ("limit", limit.to_string()),
        ];
        if let Some(from) = time_from {
            params.push(("from", from.to_string()));
        }
        if let Some(to) = time_to {
            params.push(("to", to.to_string()));
        }
        let body = self.request(params, false)?;
        let parsed: RecentTracksResponse = serde_json::from_str(&body).map_err(|e| {
            LastfmError::Parsing(format!("Failed to parse user.getRecentTracks: {e}"))
        })?;
        Ok(collect_played_tracks(parsed.recenttracks.track))
    }

    /// All of the user's scrobbles of one specific track.
    pub fn track_scrobbles(
        &self,
        artist: &str,
        track: &str,
    ) -> Result<Vec<PlayedTrack>, LastfmError> {
        let params = vec![
            ("method", "user.getTrackScrobbles".to_string()),
            ("user", self.username.clone()),
            ("artist", lastfm_friendly(artist)),
            ("track", lastfm_friendly(track)),
        ];
        let body = self.request(params, false)?;
        let parsed: TrackScrobblesResponse = serde_json::from_str(&body).map_err(|e| {
            LastfmError::Parsing(format!("Failed to parse user.getTrackScrobbles: {e}"))
        })?;
        Ok(collect_played_tracks(parsed.trackscrobbles.track))
    }

    pub fn album_info(
        &self,
        title: &str,
        artist: &str,
        with_tracks: bool,
        with_tags: bool,
    ) -> Result<Option<AlbumInfo>, LastfmError> {
        let params = vec![
            ("method", "album.getInfo".to_string()),
            ("album", lastfm_friendly(title)),
            ("artist", lastfm_friendly(artist)),
            ("username", self.username.clone()),
            ("autocorrect", "1".to_string()),
        ];
        let body = match self.request(params, false) {
            Ok(body) => body,
            // code 6: album not found; metadata is best-effort
            Err(LastfmError::Api(_, 6)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let parsed: AlbumInfoResponse = serde_json::from_str(&body)
            .map_err(|e| LastfmError::Parsing(format!("Failed to parse album.getInfo: {e}")))?;
        let album = parsed.album;

        let tracks = if with_tracks {
            album.tracks.map(|tracks| {
                tracks
                    .track
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| AlbumTrack {
                        title: t.name,
                        duration: t.duration.map(|d| d as u32),
                        order: (i + 1) as u32,
                    })
                    .collect()
            })
        } else {
            None
        };

        let tags = if with_tags {
            album.tags.map(|tags| {
                tags.tag
                    .into_iter()
                    .map(|t| AlbumTag {
                        name: t.name,
                        weight: t.count.unwrap_or(0) as u32,
                    })
                    .collect()
            })
        } else {
            None
        };

        Ok(Some(AlbumInfo {
            title: album.name,
            artist_name: album.artist,
            url: album.url,
            mbid: album.mbid.filter(|s| !s.is_empty()),
            playcount: album.playcount,
            user_playcount: album.userplaycount,
            listener_count: album.listeners,
            wiki: album.wiki.and_then(|w| w.summary).filter(|s| !s.is_empty()),
            tracks,
            tags,
        }))
    }

    /// Weekly album chart for the user; omitted bounds mean the current
    /// week as Last.fm defines it.
    pub fn weekly_album_chart(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<WeeklyAlbum>, LastfmError> {
        let mut params = vec![
            ("method", "user.getWeeklyAlbumChart".to_string()),
            ("user", self.username.clone()),
        ];
        if let Some(from) = from {
            params.push(("from", from.to_string()));
        }
        if let Some(to) = to {
            params.push(("to", to.to_string()));
        }
        let body = self.request(params, false)?;
        let parsed: WeeklyAlbumChartResponse = serde_json::from_str(&body).map_err(|e| {
            LastfmError::Parsing(format!("Failed to parse user.getWeeklyAlbumChart: {e}"))
        })?;
        Ok(parsed
            .weeklyalbumchart
            .album
            .into_iter()
            .filter_map(|a| {
                let artist_name = a.artist.value()?.to_string();
                Some(WeeklyAlbum {
                    title: a.name,
                    artist_name,
                    url: a.url,
                    playcount: a.playcount.unwrap_or(0),
                })
            })
            .collect())
    }
}

fn classify_api_error(err: ApiErrorBody) -> LastfmError {
    match err.error {
        // 4: auth failure, 9: invalid session key, 10: invalid API key,
        // 13: invalid signature, 14: unauthorized token, 17: login required
        4 | 9 | 10 | 13 | 14 | 17 => LastfmError::Auth(err.message),
        code => LastfmError::Api(err.message, code),
    }
}

fn collect_played_tracks(rows: Vec<RecentTrack>) -> Vec<PlayedTrack> {
    rows.into_iter()
        .filter_map(|row| {
            // the synthetic now-playing row has no timestamp
            let nowplaying = row
                .attr
                .as_ref()
                .and_then(|a| a.nowplaying.as_deref())
                .is_some_and(|v| v == "true");
            if nowplaying {
                return None;
            }
            let uts = row.date.as_ref().and_then(|d| d.uts)?;
            let scrobbled_at = Utc.timestamp_opt(uts as i64, 0).single()?;
            let artist = row.artist.value()?.to_string();
            let album = row
                .album
                .as_ref()
                .and_then(|a| a.value())
                .map(str::to_string);
            Some(PlayedTrack {
                name: row.name,
                artist,
                album,
                scrobbled_at,
            })
        })
        .collect()
}

/// Async, deadline-bounded facade over the blocking client.
///
/// Every call hops to the blocking pool and is raced against a timeout;
/// errors come back as values, never panics, so the engine can treat
/// them as decision branches.
#[derive(Clone)]
pub struct LastfmService {
    client: Arc<LastfmClient>,
}

impl LastfmService {
    pub fn new(client: LastfmClient) -> Self {
        LastfmService {
            client: Arc::new(client),
        }
    }

    /// Authenticate on the blocking pool and wrap the client.
    pub async fn connect(settings: Settings) -> Result<Self, LastfmError> {
        let client = tokio::task::spawn_blocking(move || LastfmClient::connect(&settings))
            .await
            .map_err(|e| LastfmError::Network(format!("auth task failed: {e}")))??;
        Ok(Self::new(client))
    }

    async fn run<T, F>(&self, deadline: Duration, call: F) -> Result<T, LastfmError>
    where
        T: Send + 'static,
        F: FnOnce(&LastfmClient) -> Result<T, LastfmError> + Send + 'static,
    {
        let client = self.client.clone();
        let task = tokio::task::spawn_blocking(move || call(&client));
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!("Last.fm worker task failed: {}", join_error);
                Err(LastfmError::Network(join_error.to_string()))
            }
            Err(_) => {
                warn!("Last.fm call exceeded its {}s deadline", deadline.as_secs());
                Err(LastfmError::Timeout)
            }
        }
    }

    fn read_deadline() -> Duration {
        Duration::from_secs(LASTFM_READ_TIMEOUT_SECS)
    }

    pub async fn get_user(&self) -> Result<LastFmUser, LastfmError> {
        self.run(Self::read_deadline(), |c| c.get_user()).await
    }

    pub async fn update_now_playing(
        &self,
        artist: String,
        title: String,
        album: Option<String>,
    ) -> Result<(), LastfmError> {
        self.run(Self::read_deadline(), move |c| {
            c.update_now_playing(&artist, &title, album.as_deref())
        })
        .await
    }

    pub async fn scrobble(
        &self,
        artist: String,
        title: String,
        album: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<LastFmTrack, LastfmError> {
        self.run(
            Duration::from_secs(LASTFM_SCROBBLE_TIMEOUT_SECS),
            move |c| c.scrobble(&artist, &title, album.as_deref(), timestamp),
        )
        .await
    }

    pub async fn recent_tracks(
        &self,
        limit: u32,
        time_from: Option<i64>,
        time_to: Option<i64>,
    ) -> Result<Vec<PlayedTrack>, LastfmError> {
        self.run(Self::read_deadline(), move |c| {
            c.recent_tracks(limit, time_from, time_to)
        })
        .await
    }

    pub async fn track_scrobbles(
        &self,
        artist: String,
        track: String,
    ) -> Result<Vec<PlayedTrack>, LastfmError> {
        self.run(Self::read_deadline(), move |c| {
            c.track_scrobbles(&artist, &track)
        })
        .await
    }

    pub async fn album_info(
        &self,
        title: String,
        artist: String,
        with_tracks: bool,
        with_tags: bool,
    ) -> Result<Option<AlbumInfo>, LastfmError> {
        self.run(Self::read_deadline(), move |c| {
            c.album_info(&title, &artist, with_tracks, with_tags)
        })
        .await
    }

    pub async fn weekly_album_chart(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<WeeklyAlbum>, LastfmError> {
        self.run(Self::read_deadline(), move |c| c.weekly_album_chart(from, to))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_codes_as_permanent() {
        let err = classify_api_error(ApiErrorBody {
            error: 4,
            message: "Authentication Failed".to_string(),
        });
        assert!(matches!(err, LastfmError::Auth(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn classifies_service_offline_as_transient() {
        let err = classify_api_error(ApiErrorBody {
            error: 11,
            message: "Service Offline".to_string(),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn network_and_timeout_are_transient() {
        assert!(LastfmError::Network("connection refused".to_string()).is_transient());
        assert!(LastfmError::Timeout.is_transient());
        assert!(!LastfmError::Parsing("bad json".to_string()).is_transient());
    }

    #[test]
    fn parses_recent_tracks_and_skips_now_playing() {
        let body = r##"{
            "recenttracks": {
                "track": [
                    {
                        "name": "Streaming Now",
                        "artist": {"#text": "Artist A"},
                        "album": {"#text": ""},
                        "@attr": {"nowplaying": "true"}
                    },
                    {
                        "name": "Older Song",
                        "artist": {"#text": "Artist B"},
                        "album": {"#text": "Album B"},
                        "date": {"uts": "1700000000", "#text": "14 Nov 2023"}
                    }
                ]
            }
        }"##;
        let parsed: RecentTracksResponse = serde_json::from_str(body).unwrap();
        let tracks = collect_played_tracks(parsed.recenttracks.track);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Older Song");
        assert_eq!(tracks[0].artist, "Artist B");
        assert_eq!(tracks[0].album.as_deref(), Some("Album B"));
        assert_eq!(tracks[0].scrobbled_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parses_single_track_page() {
        let body = r##"{
            "recenttracks": {
                "track": {
                    "name": "Only One",
                    "artist": {"#text": "Artist"},
                    "date": {"uts": 1700000001}
                }
            }
        }"##;
        let parsed: RecentTracksResponse = serde_json::from_str(body).unwrap();
        let tracks = collect_played_tracks(parsed.recenttracks.track);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Only One");
    }

    #[test]
    fn parses_user_info_with_string_counts() {
        let body = r##"{
            "user": {
                "name": "listener",
                "realname": "",
                "url": "https://www.last.fm/user/listener",
                "country": "None",
                "playcount": "123456",
                "track_count": "9876",
                "album_count": "543",
                "artist_count": "321",
                "image": [
                    {"size": "small", "#text": "https://img/small.png"},
                    {"size": "extralarge", "#text": "https://img/xl.png"}
                ],
                "registered": {"unixtime": "1200000000", "#text": 1200000000}
            }
        }"##;
        let parsed: UserInfoResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.user.playcount, Some(123_456));
        assert_eq!(parsed.user.image.len(), 2);
    }

    #[test]
    fn parses_album_info() {
        let body = r#"{
            "album": {
                "name": "Album",
                "artist": "Artist",
                "url": "https://www.last.fm/music/Artist/Album",
                "mbid": "",
                "playcount": "1000",
                "listeners": "200",
                "userplaycount": 42,
                "tracks": {"track": [{"name": "One", "duration": 200}, {"name": "Two", "duration": null}]},
                "tags": {"tag": [{"name": "rock", "url": "https://..."}]},
                "wiki": {"summary": "An album."}
            }
        }"#;
        let parsed: AlbumInfoResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.album.playcount, Some(1000));
        assert_eq!(parsed.album.userplaycount, Some(42));
        assert_eq!(parsed.album.tracks.unwrap().track.len(), 2);
    }
}
