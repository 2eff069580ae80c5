/// Session ledger: delivered and pending scrobbles
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::constants::{POLLER_TIMEOUT_SECS, POLL_INTERVAL_SECS, SCROBBLE_CAP_SECS};
use crate::data::comparison::compare;
use crate::data::track::{
    AlbumInfo, LastFmTrack, LastFmUser, PlaybackSource, PlaybackStatus, Scrobble, TrackKey,
    TrackState,
};
use crate::helpers::lastfm::{LastfmError, LastfmService};
use crate::helpers::netcheck::NetworkProbe;
use crate::players::Poller;
use crate::store::ScrobbleStore;

use session::{PendingScrobble, SessionLedger, SessionStats};

/// Delivery-side operations the engine needs from Last.fm. A seam so
/// the tick state machine can be exercised against a scripted backend.
#[async_trait::async_trait]
pub trait ScrobbleBackend: Send + Sync {
    async fn update_now_playing(
        &self,
        artist: String,
        title: String,
        album: Option<String>,
    ) -> Result<(), LastfmError>;

    async fn scrobble(
        &self,
        artist: String,
        title: String,
        album: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<LastFmTrack, LastfmError>;

    async fn album_info(
        &self,
        title: String,
        artist: String,
    ) -> Result<Option<AlbumInfo>, LastfmError>;
}

#[async_trait::async_trait]
impl ScrobbleBackend for LastfmService {
    async fn update_now_playing(
        &self,
        artist: String,
        title: String,
        album: Option<String>,
    ) -> Result<(), LastfmError> {
        LastfmService::update_now_playing(self, artist, title, album).await
    }

    async fn scrobble(
        &self,
        artist: String,
        title: String,
        album: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<LastFmTrack, LastfmError> {
        LastfmService::scrobble(self, artist, title, album, timestamp).await
    }

    async fn album_info(
        &self,
        title: String,
        artist: String,
    ) -> Result<Option<AlbumInfo>, LastfmError> {
        LastfmService::album_info(self, title, artist, false, false).await
    }
}

/// Seconds of accumulated play before a track qualifies: half the
/// duration when known, capped at two minutes; two minutes when the
/// source reports no duration.
pub fn scrobble_threshold(duration: Option<u32>) -> u32 {
    match duration {
        Some(d) if d > 0 => d.div_ceil(2).min(SCROBBLE_CAP_SECS),
        _ => SCROBBLE_CAP_SECS,
    }
}

/// Mutable engine state; guarded by one async mutex and never held
/// across a suspension point.
struct EngineState {
    current: Option<TrackState>,
    cached_album: Option<AlbumInfo>,
    ledger: SessionLedger,
    user: Option<LastFmUser>,
    /// User-facing toggle: whether qualifying plays get submitted
    scrobble_enabled: bool,
    /// Delivery attempt currently in flight; blocks a second attempt
    in_flight: bool,
    /// Set after a permanent upstream failure; warned once
    now_playing_disabled: bool,
    scrobble_disabled: bool,
}

impl EngineState {
    fn status(&self) -> PlaybackStatus {
        match self.current.as_ref() {
            None => PlaybackStatus::Waiting,
            Some(cur) if cur.scrobbled => PlaybackStatus::Scrobbled,
            Some(cur) if self.ledger.is_pending(&cur.key()) => PlaybackStatus::Pending,
            Some(cur) if cur.playing => PlaybackStatus::Playing,
            Some(_) => PlaybackStatus::Paused,
        }
    }
}

/// Serializable view of the engine, served by `/state/`.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    pub current_song: Option<TrackState>,
    pub album: Option<AlbumInfo>,
    pub scrobble_enabled: bool,
    pub active_source: PlaybackSource,
    pub status: String,
    pub user: Option<LastFmUser>,
    pub session: SessionStats,
    pub pending_count: usize,
}

struct Delivery {
    key: TrackKey,
    artist: String,
    title: String,
    album: Option<String>,
}

struct NowPlayingPush {
    key: TrackKey,
    artist: String,
    title: String,
    album: Option<String>,
}

/// The scrobble control loop. Owns the track state, the session ledger,
/// the cached album and the collaborator handles; everything the HTTP
/// surface shows flows through here.
pub struct Engine {
    source: PlaybackSource,
    poller: Arc<dyn Poller>,
    backend: Arc<dyn ScrobbleBackend>,
    probe: Arc<dyn NetworkProbe>,
    store: Option<Arc<ScrobbleStore>>,
    state: Mutex<EngineState>,
}

impl Engine {
    pub fn new(
        source: PlaybackSource,
        poller: Arc<dyn Poller>,
        backend: Arc<dyn ScrobbleBackend>,
        probe: Arc<dyn NetworkProbe>,
        store: Option<Arc<ScrobbleStore>>,
    ) -> Self {
        Engine {
            source,
            poller,
            backend,
            probe,
            store,
            state: Mutex::new(EngineState {
                current: None,
                cached_album: None,
                ledger: SessionLedger::new(),
                user: None,
                scrobble_enabled: true,
                in_flight: false,
                now_playing_disabled: false,
                scrobble_disabled: false,
            }),
        }
    }

    pub fn source(&self) -> PlaybackSource {
        self.source
    }

    pub async fn set_user(&self, user: LastFmUser) {
        self.state.lock().await.user = Some(user);
    }

    pub async fn scrobble_enabled(&self) -> bool {
        self.state.lock().await.scrobble_enabled
    }

    pub async fn toggle_scrobbling(&self) -> bool {
        let mut st = self.state.lock().await;
        st.scrobble_enabled = !st.scrobble_enabled;
        info!("Scrobbling toggled to: {}", st.scrobble_enabled);
        st.scrobble_enabled
    }

    async fn poll_once(&self) -> Option<crate::data::track::TrackSnapshot> {
        match tokio::time::timeout(
            Duration::from_secs(POLLER_TIMEOUT_SECS),
            self.poller.poll(),
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(_) => {
                info!("Player poll exceeded its deadline");
                None
            }
        }
    }

    /// One pass of the control loop. Applies the comparator decision,
    /// accumulates play time, and delivers when the play qualifies.
    pub async fn tick(&self) {
        let poll = self.poll_once().await;

        let (now_playing, delivery) = {
            let mut st = self.state.lock().await;
            let decision = compare(poll.as_ref(), st.current.as_ref(), st.cached_album.as_ref());

            if decision.no_song_playing {
                if st.current.take().is_some() {
                    info!("No song is currently playing; waiting");
                }
                return;
            }
            let poll = poll.as_ref().expect("poll present unless no_song_playing");

            if decision.song_has_changed {
                info!("Now playing {}", poll.display_name());
                st.current = Some(TrackState::from(poll));
            }
            if decision.update_play_status {
                if let Some(cur) = st.current.as_mut() {
                    cur.playing = poll.playing;
                    debug!(
                        "{} is now {}",
                        cur.display_name(),
                        if cur.playing { "playing" } else { "paused" }
                    );
                }
            }

            if let Some(cur) = st.current.as_mut() {
                if cur.playing && !cur.scrobbled {
                    cur.time_played += 1;
                }
            }

            let now_playing = if decision.update_now_playing && !st.now_playing_disabled {
                st.current.as_ref().map(|cur| NowPlayingPush {
                    key: cur.key(),
                    artist: cur.artist.clone(),
                    title: cur.clean_name.clone(),
                    album: cur.clean_album.clone(),
                })
            } else {
                None
            };

            let delivery = self.take_delivery_slot(&mut st);
            (now_playing, delivery)
        };

        if let Some(push) = now_playing {
            self.push_now_playing(push).await;
        }
        if let Some(delivery) = delivery {
            self.deliver(delivery).await;
        }
    }

    /// Claim the in-flight slot if the current track is ready for
    /// delivery. Caller holds the state lock.
    fn take_delivery_slot(&self, st: &mut EngineState) -> Option<Delivery> {
        if !st.scrobble_enabled || st.scrobble_disabled || st.in_flight {
            return None;
        }
        let cur = st.current.as_ref()?;
        let key = cur.key();
        let ready = cur.playing
            && !cur.scrobbled
            && !st.ledger.is_pending(&key)
            && cur.time_played >= scrobble_threshold(cur.duration);
        if !ready {
            return None;
        }
        let delivery = Delivery {
            key,
            artist: cur.artist.clone(),
            title: cur.clean_name.clone(),
            album: cur.clean_album.clone(),
        };
        st.in_flight = true;
        Some(delivery)
    }

    async fn push_now_playing(&self, push: NowPlayingPush) {
        if !self.probe.up().await {
            debug!("Offline; skipping now-playing update");
            return;
        }
        match self
            .backend
            .update_now_playing(push.artist, push.title, push.album)
            .await
        {
            Ok(()) => {
                let mut st = self.state.lock().await;
                if let Some(cur) = st.current.as_mut() {
                    if cur.key() == push.key {
                        cur.now_playing_pushed = true;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                debug!("Dropped now-playing update: {}", e);
            }
            Err(e) => {
                let mut st = self.state.lock().await;
                if !st.now_playing_disabled {
                    st.now_playing_disabled = true;
                    warn!("Disabling now-playing updates for this session: {}", e);
                }
            }
        }
    }

    /// Attempt delivery of a qualifying play. The caller must have
    /// claimed the in-flight slot; it is released here on every path.
    async fn deliver(&self, delivery: Delivery) -> Option<LastFmTrack> {
        let reached_at = Utc::now();

        if !self.probe.up().await {
            let mut st = self.state.lock().await;
            info!("No internet connection; queueing '{}' as pending", delivery.title);
            st.ledger.add_pending(PendingScrobble {
                title: delivery.title,
                artist: delivery.artist,
                album: delivery.album,
                reached_at,
            });
            st.in_flight = false;
            return None;
        }

        let result = self
            .backend
            .scrobble(
                delivery.artist.clone(),
                delivery.title.clone(),
                delivery.album.clone(),
                reached_at,
            )
            .await;

        match result {
            Ok(track) => {
                let mut st = self.state.lock().await;
                if let Some(cur) = st.current.as_mut() {
                    if cur.key() == delivery.key {
                        cur.scrobbled = true;
                    }
                }
                st.ledger.add_scrobble(track.clone());
                st.in_flight = false;
                drop(st);
                self.persist(vec![track.clone()]);
                Some(track)
            }
            Err(e) if e.is_transient() => {
                let mut st = self.state.lock().await;
                info!(
                    "Scrobble of '{}' failed ({}); queueing as pending",
                    delivery.title, e
                );
                st.ledger.add_pending(PendingScrobble {
                    title: delivery.title,
                    artist: delivery.artist,
                    album: delivery.album,
                    reached_at,
                });
                st.in_flight = false;
                None
            }
            Err(e) => {
                let mut st = self.state.lock().await;
                st.in_flight = false;
                if !st.scrobble_disabled {
                    st.scrobble_disabled = true;
                    warn!("Disabling scrobble submissions for this session: {}", e);
                }
                None
            }
        }
    }

    /// Mirror delivered scrobbles into the local store, off the tick
    /// path. Failures are logged; the engine never blocks on the store.
    fn persist(&self, tracks: Vec<LastFmTrack>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        tokio::spawn(async move {
            let rows: Vec<Scrobble> = tracks
                .iter()
                .map(|t| Scrobble {
                    id: None,
                    track_name: t.name.clone(),
                    artist_name: t.artist.clone(),
                    album_name: t.album.clone(),
                    scrobbled_at: t.scrobbled_at,
                    created_at: Utc::now(),
                })
                .collect();
            let result = tokio::task::spawn_blocking(move || store.insert_many(&rows)).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Failed to persist scrobble locally: {}", e),
                Err(e) => error!("Store persistence task failed: {}", e),
            }
        });
    }

    /// Force-deliver the current song, honoring the same guards the
    /// loop uses. Returns the delivered track on success.
    pub async fn force_scrobble(&self) -> Option<LastFmTrack> {
        let delivery = {
            let mut st = self.state.lock().await;
            if !st.scrobble_enabled {
                info!("Scrobbling is not enabled");
                return None;
            }
            if st.scrobble_disabled || st.in_flight {
                return None;
            }
            let cur = match st.current.as_ref() {
                Some(cur) => cur,
                None => {
                    info!("No song playing");
                    return None;
                }
            };
            if cur.scrobbled {
                info!("This song has already been scrobbled");
                return None;
            }
            if !cur.playing {
                info!("Current song is not playing");
                return None;
            }
            let key = cur.key();
            if st.ledger.is_pending(&key) {
                return None;
            }
            let delivery = Delivery {
                key,
                artist: cur.artist.clone(),
                title: cur.clean_name.clone(),
                album: cur.clean_album.clone(),
            };
            st.in_flight = true;
            delivery
        };
        self.deliver(delivery).await
    }

    /// Deliver queued pending scrobbles in insertion order. Called at
    /// shutdown and from the HTTP surface; never concurrently with the
    /// engine's own delivery attempt thanks to the in-flight slot.
    pub async fn drain_pending(&self) -> usize {
        let items = {
            let mut st = self.state.lock().await;
            if st.in_flight {
                return 0;
            }
            let items = st.ledger.pending_items();
            if items.is_empty() {
                debug!("No pending scrobbles");
                return 0;
            }
            st.in_flight = true;
            items
        };

        if !self.probe.up().await {
            info!(
                "No internet connection; skipping {} pending scrobble(s)",
                items.len()
            );
            self.state.lock().await.in_flight = false;
            return 0;
        }

        let delivered = session::drain_pending(items, self.backend.as_ref()).await;
        let count = delivered.len();

        let mut tracks = Vec::with_capacity(count);
        {
            let mut st = self.state.lock().await;
            for (key, track) in delivered {
                st.ledger.remove_pending(&key);
                if let Some(cur) = st.current.as_mut() {
                    if cur.key() == key {
                        cur.scrobbled = true;
                    }
                }
                st.ledger.add_scrobble(track.clone());
                tracks.push(track);
            }
            st.in_flight = false;
        }
        if !tracks.is_empty() {
            self.persist(tracks);
        }
        info!("Scrobbled {} pending track(s)", count);
        count
    }

    /// One poll pass on behalf of an API caller: identity and play
    /// status transitions, a now-playing push and an album refresh, but
    /// no play-time accumulation and no delivery.
    pub async fn poll_pass(&self) -> StateView {
        let poll = self.poll_once().await;

        let (now_playing, album_fetch) = {
            let mut st = self.state.lock().await;
            let decision = compare(poll.as_ref(), st.current.as_ref(), st.cached_album.as_ref());

            if decision.no_song_playing {
                st.current = None;
                (None, None)
            } else {
                let poll = poll.as_ref().expect("poll present unless no_song_playing");
                if decision.song_has_changed {
                    info!("Updated current song: {}", poll.display_name());
                    st.current = Some(TrackState::from(poll));
                }
                if decision.update_play_status {
                    if let Some(cur) = st.current.as_mut() {
                        cur.playing = poll.playing;
                    }
                }
                let now_playing = if decision.update_now_playing && !st.now_playing_disabled {
                    st.current.as_ref().map(|cur| NowPlayingPush {
                        key: cur.key(),
                        artist: cur.artist.clone(),
                        title: cur.clean_name.clone(),
                        album: cur.clean_album.clone(),
                    })
                } else {
                    None
                };
                let album_fetch = if decision.update_album_meta {
                    st.current.as_ref().and_then(|cur| {
                        cur.album
                            .clone()
                            .map(|album| (album, cur.artist.clone()))
                    })
                } else {
                    None
                };
                (now_playing, album_fetch)
            }
        };

        if let Some(push) = now_playing {
            self.push_now_playing(push).await;
        }
        if let Some((album, artist)) = album_fetch {
            match self.backend.album_info(album, artist).await {
                Ok(album) => {
                    let mut st = self.state.lock().await;
                    st.cached_album = album;
                }
                Err(e) => debug!("Album metadata refresh failed: {}", e),
            }
        }

        self.state_view().await
    }

    /// Identity of the current track, for the per-track history lookup.
    pub async fn current_track(&self) -> Option<(String, String, String)> {
        let st = self.state.lock().await;
        st.current
            .as_ref()
            .map(|cur| (cur.artist.clone(), cur.name.clone(), cur.clean_name.clone()))
    }

    pub async fn state_view(&self) -> StateView {
        let st = self.state.lock().await;
        StateView {
            current_song: st.current.clone(),
            album: st.cached_album.clone(),
            scrobble_enabled: st.scrobble_enabled,
            active_source: self.source,
            status: st.status().to_string(),
            user: st.user.clone(),
            session: st.ledger.stats(),
            pending_count: st.ledger.pending_count(),
        }
    }
}

/// Drive the engine at the poll cadence until the running flag drops.
pub async fn run_loop(engine: Arc<Engine>, running: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    while running.load(Ordering::SeqCst) {
        interval.tick().await;
        engine.tick().await;
    }
    info!("Engine loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::track::TrackSnapshot;
    use std::sync::atomic::AtomicUsize;

    fn snapshot(name: &str, artist: &str, playing: bool, duration: Option<u32>) -> TrackSnapshot {
        TrackSnapshot::new(
            name.to_string(),
            artist.to_string(),
            Some("Album".to_string()),
            playing,
            duration,
            PlaybackSource::AppleMusic,
        )
    }

    struct ScriptedPoller {
        snaps: parking_lot::Mutex<Vec<Option<TrackSnapshot>>>,
        index: AtomicUsize,
    }

    impl ScriptedPoller {
        fn new(snaps: Vec<Option<TrackSnapshot>>) -> Arc<Self> {
            Arc::new(ScriptedPoller {
                snaps: parking_lot::Mutex::new(snaps),
                index: AtomicUsize::new(0),
            })
        }

        /// The same snapshot forever
        fn repeating(snapshot: TrackSnapshot) -> Arc<Self> {
            Self::new(vec![Some(snapshot)])
        }
    }

    #[async_trait::async_trait]
    impl Poller for ScriptedPoller {
        fn source(&self) -> PlaybackSource {
            PlaybackSource::AppleMusic
        }

        // Steps through the script, holding the last entry
        async fn poll(&self) -> Option<TrackSnapshot> {
            let snaps = self.snaps.lock();
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            let last = snaps.len().saturating_sub(1);
            snaps.get(i.min(last)).cloned().flatten()
        }
    }

    #[derive(Clone, Copy)]
    enum FailMode {
        Transient,
        Permanent,
    }

    #[derive(Default)]
    struct FakeBackend {
        scrobbles: parking_lot::Mutex<Vec<(String, String, DateTime<Utc>)>>,
        now_playing: parking_lot::Mutex<Vec<(String, String)>>,
        fail: parking_lot::Mutex<Option<FailMode>>,
    }

    impl FakeBackend {
        fn scrobble_count(&self) -> usize {
            self.scrobbles.lock().len()
        }

        fn set_fail(&self, mode: Option<FailMode>) {
            *self.fail.lock() = mode;
        }
    }

    #[async_trait::async_trait]
    impl ScrobbleBackend for FakeBackend {
        async fn update_now_playing(
            &self,
            artist: String,
            title: String,
            _album: Option<String>,
        ) -> Result<(), LastfmError> {
            match *self.fail.lock() {
                Some(FailMode::Transient) => Err(LastfmError::Timeout),
                Some(FailMode::Permanent) => Err(LastfmError::Auth("bad session".to_string())),
                None => {
                    self.now_playing.lock().push((artist, title));
                    Ok(())
                }
            }
        }

        async fn scrobble(
            &self,
            artist: String,
            title: String,
            album: Option<String>,
            timestamp: DateTime<Utc>,
        ) -> Result<LastFmTrack, LastfmError> {
            match *self.fail.lock() {
                Some(FailMode::Transient) => Err(LastfmError::Network("offline".to_string())),
                Some(FailMode::Permanent) => Err(LastfmError::Auth("bad session".to_string())),
                None => {
                    self.scrobbles
                        .lock()
                        .push((artist.clone(), title.clone(), timestamp));
                    Ok(LastFmTrack {
                        name: title,
                        artist,
                        album,
                        scrobbled_at: timestamp,
                    })
                }
            }
        }

        async fn album_info(
            &self,
            _title: String,
            _artist: String,
        ) -> Result<Option<AlbumInfo>, LastfmError> {
            Ok(None)
        }
    }

    struct FakeProbe {
        online: AtomicBool,
    }

    impl FakeProbe {
        fn new(online: bool) -> Arc<Self> {
            Arc::new(FakeProbe {
                online: AtomicBool::new(online),
            })
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl NetworkProbe for FakeProbe {
        async fn up(&self) -> bool {
            self.online.load(Ordering::SeqCst)
        }
    }

    fn engine_with(
        poller: Arc<ScriptedPoller>,
        backend: Arc<FakeBackend>,
        probe: Arc<FakeProbe>,
    ) -> Engine {
        Engine::new(
            PlaybackSource::AppleMusic,
            poller,
            backend,
            probe,
            None,
        )
    }

    #[test]
    fn threshold_follows_lastfm_convention() {
        assert_eq!(scrobble_threshold(Some(100)), 50);
        assert_eq!(scrobble_threshold(Some(600)), 120);
        assert_eq!(scrobble_threshold(Some(239)), 120);
        assert_eq!(scrobble_threshold(Some(101)), 51);
        assert_eq!(scrobble_threshold(Some(0)), 120);
        assert_eq!(scrobble_threshold(None), 120);
    }

    #[tokio::test]
    async fn fresh_play_scrobbles_at_half_duration() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let poller = ScriptedPoller::repeating(snapshot("Song", "Artist", true, Some(100)));
        let engine = engine_with(poller, backend.clone(), probe);

        for _ in 0..49 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);

        engine.tick().await;
        assert_eq!(backend.scrobble_count(), 1);

        // at most one delivery per play instance
        for _ in 0..30 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 1);

        let view = engine.state_view().await;
        assert_eq!(view.status, "Scrobbled");
        assert!(view.current_song.unwrap().scrobbled);
    }

    #[tokio::test]
    async fn long_track_caps_at_two_minutes() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let poller = ScriptedPoller::repeating(snapshot("Epic", "Artist", true, Some(600)));
        let engine = engine_with(poller, backend.clone(), probe);

        for _ in 0..119 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);

        engine.tick().await;
        assert_eq!(backend.scrobble_count(), 1);
    }

    #[tokio::test]
    async fn pause_stops_accumulation() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let playing = snapshot("Song", "Artist", true, Some(200));
        let paused = snapshot("Song", "Artist", false, Some(200));

        let mut script: Vec<Option<TrackSnapshot>> = Vec::new();
        script.extend(std::iter::repeat_n(Some(playing.clone()), 40));
        script.extend(std::iter::repeat_n(Some(paused), 10));
        script.extend(std::iter::repeat_n(Some(playing), 70));
        let engine = engine_with(ScriptedPoller::new(script), backend.clone(), probe);

        // 40 playing + 10 paused ticks: 40s accumulated, no delivery
        for _ in 0..50 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);
        let view = engine.state_view().await;
        assert_eq!(view.current_song.as_ref().unwrap().time_played, 40);
        assert_eq!(view.status, "Paused");

        // 59 more playing ticks reach 99s; the 60th crosses 100
        for _ in 0..59 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);
        engine.tick().await;
        assert_eq!(backend.scrobble_count(), 1);
    }

    #[tokio::test]
    async fn track_change_before_threshold_discards_instance() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let a = snapshot("Song A", "Artist", true, Some(100));
        let b = snapshot("Song B", "Artist", true, Some(100));

        let mut script: Vec<Option<TrackSnapshot>> = Vec::new();
        script.extend(std::iter::repeat_n(Some(a), 30));
        script.push(Some(b));
        let engine = engine_with(ScriptedPoller::new(script), backend.clone(), probe);

        for _ in 0..31 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);
        let view = engine.state_view().await;
        let current = view.current_song.unwrap();
        assert_eq!(current.name, "Song B");
        // accumulation restarted with the new instance
        assert_eq!(current.time_played, 1);
    }

    #[tokio::test]
    async fn offline_delivery_queues_then_drains_exactly_once() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(false);
        let poller = ScriptedPoller::repeating(snapshot("Song", "Artist", true, Some(100)));
        let engine = engine_with(poller, backend.clone(), probe.clone());

        for _ in 0..60 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);
        let view = engine.state_view().await;
        assert_eq!(view.pending_count, 1);
        assert_eq!(view.status, "Pending (no internet)");

        // still offline: drain is a no-op
        assert_eq!(engine.drain_pending().await, 0);

        probe.set_online(true);
        assert_eq!(engine.drain_pending().await, 1);
        assert_eq!(backend.scrobble_count(), 1);

        let view = engine.state_view().await;
        assert_eq!(view.pending_count, 0);
        assert_eq!(view.session.total, 1);
        assert_eq!(view.status, "Scrobbled");

        // a second drain delivers nothing more
        assert_eq!(engine.drain_pending().await, 0);
        assert_eq!(backend.scrobble_count(), 1);
    }

    #[tokio::test]
    async fn transient_failure_queues_pending() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let poller = ScriptedPoller::repeating(snapshot("Song", "Artist", true, Some(100)));
        let engine = engine_with(poller, backend.clone(), probe);

        backend.set_fail(Some(FailMode::Transient));
        for _ in 0..55 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);
        assert_eq!(engine.state_view().await.pending_count, 1);

        backend.set_fail(None);
        assert_eq!(engine.drain_pending().await, 1);
        assert_eq!(backend.scrobble_count(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_disables_submissions() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let poller = ScriptedPoller::repeating(snapshot("Song", "Artist", true, Some(100)));
        let engine = engine_with(poller, backend.clone(), probe);

        backend.set_fail(Some(FailMode::Permanent));
        for _ in 0..60 {
            engine.tick().await;
        }
        // nothing queued: retrying an auth failure cannot succeed
        let view = engine.state_view().await;
        assert_eq!(view.pending_count, 0);
        assert_eq!(view.session.total, 0);

        // even after the backend recovers, submissions stay off
        backend.set_fail(None);
        for _ in 0..10 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);
    }

    #[tokio::test]
    async fn empty_poll_clears_state() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let script = vec![Some(snapshot("Song", "Artist", true, Some(100))), None];
        let engine = engine_with(ScriptedPoller::new(script), backend, probe);

        engine.tick().await;
        assert!(engine.state_view().await.current_song.is_some());

        engine.tick().await;
        let view = engine.state_view().await;
        assert!(view.current_song.is_none());
        assert_eq!(view.status, "Waiting");
    }

    #[tokio::test]
    async fn now_playing_pushed_once_per_instance() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let poller = ScriptedPoller::repeating(snapshot("Song", "Artist", true, Some(100)));
        let engine = engine_with(poller, backend.clone(), probe);

        for _ in 0..5 {
            engine.tick().await;
        }
        assert_eq!(backend.now_playing.lock().len(), 1);
        let view = engine.state_view().await;
        assert!(view.current_song.unwrap().now_playing_pushed);
    }

    #[tokio::test]
    async fn disabled_scrobbling_blocks_delivery() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let poller = ScriptedPoller::repeating(snapshot("Song", "Artist", true, Some(100)));
        let engine = engine_with(poller, backend.clone(), probe);

        assert!(!engine.toggle_scrobbling().await);
        for _ in 0..60 {
            engine.tick().await;
        }
        assert_eq!(backend.scrobble_count(), 0);
        assert_eq!(engine.state_view().await.pending_count, 0);

        // re-enable: the play is still ready and delivers on the next tick
        assert!(engine.toggle_scrobbling().await);
        engine.tick().await;
        assert_eq!(backend.scrobble_count(), 1);
    }

    #[tokio::test]
    async fn force_scrobble_respects_guards() {
        let backend = Arc::new(FakeBackend::default());
        let probe = FakeProbe::new(true);
        let poller = ScriptedPoller::repeating(snapshot("Song", "Artist", true, Some(100)));
        let engine = engine_with(poller, backend.clone(), probe);

        // nothing playing yet
        assert!(engine.force_scrobble().await.is_none());

        engine.tick().await;
        let delivered = engine.force_scrobble().await.expect("forced delivery");
        assert_eq!(delivered.name, "Song");
        assert_eq!(backend.scrobble_count(), 1);

        // already scrobbled: the guard refuses a second delivery
        assert!(engine.force_scrobble().await.is_none());
        assert_eq!(backend.scrobble_count(), 1);
    }
}
