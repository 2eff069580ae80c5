use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::data::track::{LastFmTrack, TrackKey, TrackState};

use super::ScrobbleBackend;

/// A play that reached its scrobble threshold but could not be
/// delivered. Carries the instant the threshold was reached, which is
/// the timestamp submitted when the queue drains.
#[derive(Debug, Clone)]
pub struct PendingScrobble {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub reached_at: DateTime<Utc>,
}

impl PendingScrobble {
    /// Snapshot the submission fields of a track state. Titles go out
    /// in their normalized form, matching what a live delivery sends.
    pub fn from_state(state: &TrackState, reached_at: DateTime<Utc>) -> Self {
        PendingScrobble {
            title: state.clean_name.clone(),
            artist: state.artist.clone(),
            album: state.clean_album.clone(),
            reached_at,
        }
    }

    pub fn key(&self) -> TrackKey {
        TrackKey {
            clean_name: self.title.clone(),
            artist: self.artist.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("'{}' by {}", self.title, self.artist)
    }
}

/// Per-session scrobble counters, as reported by `/state/`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub artist_counts: HashMap<String, u32>,
    pub repeat_songs: HashMap<String, u32>,
    pub total: usize,
}

/// Process-lifetime record of delivered and pending scrobbles.
///
/// A track is never in both collections for the same play instance:
/// delivery moves it from `pending` to `scrobbles`.
#[derive(Debug, Default)]
pub struct SessionLedger {
    scrobbles: Vec<LastFmTrack>,
    pending: Vec<PendingScrobble>,
}

impl SessionLedger {
    pub fn new() -> Self {
        SessionLedger::default()
    }

    pub fn add_scrobble(&mut self, track: LastFmTrack) {
        self.scrobbles.push(track);
        info!("Scrobble count: {}", self.scrobbles.len());
    }

    /// Queue a play for later delivery. Idempotent by identity: a second
    /// call for the same `(clean_name, artist)` is a no-op.
    pub fn add_pending(&mut self, pending: PendingScrobble) {
        let key = pending.key();
        if self.is_pending(&key) {
            return;
        }
        info!("Added track to pending scrobbles: {}", pending.display_name());
        self.pending.push(pending);
    }

    pub fn remove_pending(&mut self, key: &TrackKey) {
        self.pending.retain(|p| p.key() != *key);
    }

    pub fn is_pending(&self, key: &TrackKey) -> bool {
        self.pending.iter().any(|p| p.key() == *key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_items(&self) -> Vec<PendingScrobble> {
        self.pending.clone()
    }

    pub fn scrobbles(&self) -> &[LastFmTrack] {
        &self.scrobbles
    }

    pub fn stats(&self) -> SessionStats {
        let mut artist_counts: HashMap<String, u32> = HashMap::new();
        let mut song_counts: HashMap<String, u32> = HashMap::new();
        for scrobble in &self.scrobbles {
            *artist_counts.entry(scrobble.artist.clone()).or_default() += 1;
            *song_counts.entry(scrobble.name.clone()).or_default() += 1;
        }
        let repeat_songs = song_counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .collect();
        SessionStats {
            artist_counts,
            repeat_songs,
            total: self.scrobbles.len(),
        }
    }
}

/// Attempt every pending item in insertion order, returning the
/// delivered pairs so the caller can commit them to the ledger. Items
/// that fail stay queued for the next drain.
///
/// The ledger itself never fails: backend errors count as per-item
/// delivery failures.
pub async fn drain_pending(
    items: Vec<PendingScrobble>,
    backend: &dyn ScrobbleBackend,
) -> Vec<(TrackKey, LastFmTrack)> {
    let mut delivered = Vec::new();
    for item in items {
        match backend
            .scrobble(
                item.artist.clone(),
                item.title.clone(),
                item.album.clone(),
                item.reached_at,
            )
            .await
        {
            Ok(track) => {
                info!("Delivered pending scrobble: {}", item.display_name());
                delivered.push((item.key(), track));
            }
            Err(e) => {
                info!(
                    "Pending scrobble {} still undeliverable: {}",
                    item.display_name(),
                    e
                );
            }
        }
    }
    delivered
}
