use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use log::{error, info};
use serde::Serialize;

use crate::constants::{RECENT_TRACKS_PAGE_LIMIT, SYNC_PAGE_PAUSE_MS};
use crate::data::track::{PlayedTrack, Scrobble, ScrobbleKey};
use crate::helpers::lastfm::{LastfmError, LastfmService};
use crate::helpers::normalize::clean_up_title;
use crate::store::{ScrobbleStore, StoreError};

/// Where backfill pages come from; a seam so the pager can be driven by
/// canned pages in tests.
#[async_trait::async_trait]
pub trait RecentTracksSource: Send + Sync {
    async fn recent_tracks(
        &self,
        limit: u32,
        time_to: Option<i64>,
    ) -> Result<Vec<PlayedTrack>, LastfmError>;
}

#[async_trait::async_trait]
impl RecentTracksSource for LastfmService {
    async fn recent_tracks(
        &self,
        limit: u32,
        time_to: Option<i64>,
    ) -> Result<Vec<PlayedTrack>, LastfmError> {
        LastfmService::recent_tracks(self, limit, None, time_to).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Sync task error: {0}")]
    Task(String),
}

/// Outcome of one backfill run
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SyncReport {
    pub fetched: u64,
    pub inserted: u64,
}

/// Imports listening history from Last.fm into the local store.
///
/// Walks user.getRecentTracks backwards in pages of up to 200 entries,
/// skipping rows the store already has. This can make a lot of API
/// calls, so pages are spaced out.
pub struct SyncService {
    source: Arc<dyn RecentTracksSource>,
    store: Arc<ScrobbleStore>,
}

impl SyncService {
    pub fn new(source: Arc<dyn RecentTracksSource>, store: Arc<ScrobbleStore>) -> Self {
        SyncService { source, store }
    }

    /// Run one backfill over the inclusive `[time_from, time_to]` day
    /// range; an absent `time_to` starts at now, an absent `time_from`
    /// walks all the way back. `clean` applies title normalization to
    /// track and album names before they are persisted.
    pub async fn sync_scrobbles(
        &self,
        time_from: Option<NaiveDate>,
        time_to: Option<NaiveDate>,
        clean: bool,
    ) -> Result<SyncReport, SyncError> {
        let time_from = time_from.map(|d| day_start(d));
        let mut cursor = time_to.map(|d| day_start(d));
        let mut fetched: u64 = 0;
        let mut inserted: u64 = 0;
        let mut consecutive_errors = 0u32;

        loop {
            if let (Some(from), Some(at)) = (time_from, cursor) {
                if at < from {
                    info!("Reached the requested time_from limit; stopping sync");
                    break;
                }
            }

            let page = match self
                .source
                .recent_tracks(RECENT_TRACKS_PAGE_LIMIT, cursor)
                .await
            {
                Ok(page) => {
                    consecutive_errors = 0;
                    page
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!("Failed to fetch recent tracks page: {}", e);
                    if consecutive_errors >= 2 {
                        info!("Two consecutive page failures; stopping sync");
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(SYNC_PAGE_PAUSE_MS)).await;
                    continue;
                }
            };

            if page.is_empty() {
                break;
            }
            fetched += page.len() as u64;
            info!("Fetched {} scrobbles...", fetched);

            // Pages arrive most recent first; the last entry is the oldest.
            let oldest = page
                .last()
                .map(|t| t.scrobbled_at.timestamp())
                .expect("non-empty page");

            let rows = rows_from_page(page, clean);
            let keys: Vec<ScrobbleKey> = rows
                .iter()
                .map(|r| ScrobbleKey::new(&r.track_name, &r.artist_name, r.scrobbled_at))
                .collect();

            let store = self.store.clone();
            let existing = tokio::task::spawn_blocking(move || store.batch_exists(&keys))
                .await
                .map_err(|e| SyncError::Task(e.to_string()))??;

            let fresh: Vec<Scrobble> = rows
                .into_iter()
                .filter(|r| {
                    !existing.contains(&ScrobbleKey::new(
                        &r.track_name,
                        &r.artist_name,
                        r.scrobbled_at,
                    ))
                })
                .collect();

            if fresh.is_empty() {
                info!("No new scrobbles to save from this batch");
            } else {
                let count = fresh.len();
                let store = self.store.clone();
                tokio::task::spawn_blocking(move || store.insert_many(&fresh))
                    .await
                    .map_err(|e| SyncError::Task(e.to_string()))??;
                inserted += count as u64;
                info!("Saved {} new scrobbles to the database", count);
            }

            cursor = Some(oldest - 1);
            tokio::time::sleep(Duration::from_millis(SYNC_PAGE_PAUSE_MS)).await;
        }

        info!("Done. Total fetched: {}. Total saved: {}.", fetched, inserted);
        Ok(SyncReport { fetched, inserted })
    }
}

fn day_start(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc()
        .timestamp()
}

fn rows_from_page(page: Vec<PlayedTrack>, clean: bool) -> Vec<Scrobble> {
    let created_at = Utc::now();
    page.into_iter()
        .map(|t| {
            let track_name = if clean { clean_up_title(&t.name) } else { t.name };
            let album_name = match (clean, t.album) {
                (true, Some(album)) => Some(clean_up_title(&album)),
                (_, album) => album,
            };
            Scrobble {
                id: None,
                track_name,
                artist_name: t.artist,
                album_name,
                scrobbled_at: t.scrobbled_at,
                created_at,
            }
        })
        .collect()
}
