/// Dynamic query criteria for the scrobbles table
pub mod filters;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use crate::data::track::{Scrobble, ScrobbleKey};

pub use filters::ScrobbleFilter;

/// Timestamps are stored as UTC text in this format so SQLite's date
/// functions work on them directly.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Timestamp(format!("'{raw}': {e}")))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid stored timestamp: {0}")]
    Timestamp(String),
}

/// Play count of one track under an artist
#[derive(Debug, Clone, Serialize)]
pub struct TrackPlayCount {
    pub track_name: String,
    pub album_name: Option<String>,
    pub play_count: u64,
}

/// Play count of one album under an artist
#[derive(Debug, Clone, Serialize)]
pub struct AlbumPlayCount {
    pub album_name: Option<String>,
    pub play_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearCount {
    pub year: String,
    pub play_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthCount {
    pub month: String,
    pub play_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayCount {
    pub day: String,
    pub play_count: u64,
}

/// SQLite-backed scrobble history: the source of truth for offline
/// analytics. All calls block; async callers hop through
/// `spawn_blocking` with the store behind an `Arc`.
pub struct ScrobbleStore {
    conn: Mutex<Connection>,
}

impl ScrobbleStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(&path)?;
        let store = ScrobbleStore {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        info!(
            "Opened scrobble database at {}",
            path.as_ref().display()
        );
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = ScrobbleStore {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scrobbles (
                id           INTEGER PRIMARY KEY,
                track_name   TEXT NOT NULL,
                artist_name  TEXT NOT NULL,
                album_name   TEXT NULL,
                scrobbled_at TIMESTAMP NOT NULL,
                created_at   TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scrobbles_track
                ON scrobbles (track_name COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_scrobbles_artist
                ON scrobbles (artist_name COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_scrobbles_at
                ON scrobbles (scrobbled_at);",
        )?;
        Ok(())
    }

    /// Insert a batch of scrobbles in a single transaction, preserving
    /// the order given.
    pub fn insert_many(&self, scrobbles: &[Scrobble]) -> Result<usize, StoreError> {
        if scrobbles.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scrobbles (track_name, artist_name, album_name, scrobbled_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for scrobble in scrobbles {
                stmt.execute(params![
                    scrobble.track_name,
                    scrobble.artist_name,
                    scrobble.album_name,
                    encode_timestamp(scrobble.scrobbled_at),
                    encode_timestamp(scrobble.created_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(scrobbles.len())
    }

    /// Query scrobbles matching the filter, newest first.
    pub fn find(&self, filter: &ScrobbleFilter) -> Result<Vec<Scrobble>, StoreError> {
        let (where_sql, params) = filter.to_sql();
        let sql = format!(
            "SELECT id, track_name, artist_name, album_name, scrobbled_at, created_at
             FROM scrobbles{where_sql}"
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )?;

        let mut scrobbles = Vec::new();
        for row in rows {
            let (id, track_name, artist_name, album_name, scrobbled_at, created_at) = row?;
            scrobbles.push(Scrobble {
                id: Some(id),
                track_name,
                artist_name,
                album_name,
                scrobbled_at: decode_timestamp(&scrobbled_at)?,
                created_at: decode_timestamp(&created_at)?,
            });
        }
        Ok(scrobbles)
    }

    /// Which of the given natural keys already exist. Probes by
    /// timestamp (near-unique) and filters name pairs in memory, so a
    /// backfill page costs a handful of queries instead of one per row.
    pub fn batch_exists(
        &self,
        keys: &[ScrobbleKey],
    ) -> Result<HashSet<ScrobbleKey>, StoreError> {
        let mut found = HashSet::new();
        if keys.is_empty() {
            return Ok(found);
        }
        let requested: HashSet<&ScrobbleKey> = keys.iter().collect();
        let conn = self.conn.lock();

        for chunk in keys.chunks(100) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT track_name, artist_name, scrobbled_at FROM scrobbles
                 WHERE scrobbled_at IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let timestamps: Vec<String> = chunk
                .iter()
                .map(|k| {
                    encode_timestamp(DateTime::from_timestamp(k.scrobbled_at, 0).unwrap_or_default())
                })
                .collect();
            let rows = stmt.query_map(params_from_iter(timestamps.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (track_name, artist_name, scrobbled_at) = row?;
                let key = ScrobbleKey::new(
                    &track_name,
                    &artist_name,
                    decode_timestamp(&scrobbled_at)?,
                );
                if requested.contains(&key) {
                    found.insert(key);
                }
            }
        }
        Ok(found)
    }

    pub fn total_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(id) FROM scrobbles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Most-played tracks for an artist, grouped case-insensitively.
    pub fn top_tracks_by_artist(
        &self,
        artist_name: &str,
        limit: u32,
    ) -> Result<Vec<TrackPlayCount>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT MAX(track_name) AS track_name,
                    MAX(album_name) AS album_name,
                    COUNT(id) AS play_count
             FROM scrobbles
             WHERE LOWER(artist_name) = LOWER(?1)
             GROUP BY LOWER(track_name), LOWER(COALESCE(album_name, ''))
             ORDER BY play_count DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![artist_name, limit], |row| {
            Ok(TrackPlayCount {
                track_name: row.get(0)?,
                album_name: row.get(1)?,
                play_count: row.get::<_, i64>(2)? as u64,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Most-played albums for an artist.
    pub fn top_albums_by_artist(
        &self,
        artist_name: &str,
        limit: u32,
    ) -> Result<Vec<AlbumPlayCount>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT MAX(album_name) AS album_name,
                    COUNT(id) AS play_count
             FROM scrobbles
             WHERE LOWER(artist_name) = LOWER(?1)
             GROUP BY LOWER(COALESCE(album_name, ''))
             ORDER BY play_count DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![artist_name, limit], |row| {
            Ok(AlbumPlayCount {
                album_name: row.get(0)?,
                play_count: row.get::<_, i64>(1)? as u64,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Yearly totals, optionally restricted to one artist.
    pub fn counts_by_year(
        &self,
        artist_name: Option<&str>,
    ) -> Result<Vec<YearCount>, StoreError> {
        let conn = self.conn.lock();
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(YearCount {
                year: row.get(0)?,
                play_count: row.get::<_, i64>(1)? as u64,
            })
        };
        let counts = match artist_name {
            Some(artist) => {
                let mut stmt = conn.prepare(
                    "SELECT strftime('%Y', scrobbled_at) AS year, COUNT(id)
                     FROM scrobbles
                     WHERE LOWER(artist_name) = LOWER(?1)
                     GROUP BY year ORDER BY year",
                )?;
                let rows = stmt.query_map(params![artist], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT strftime('%Y', scrobbled_at) AS year, COUNT(id)
                     FROM scrobbles
                     GROUP BY year ORDER BY year",
                )?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(counts)
    }

    /// Per-month totals within one year.
    pub fn monthly_counts(&self, year: i32) -> Result<Vec<MonthCount>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT strftime('%m', scrobbled_at) AS month, COUNT(id)
             FROM scrobbles
             WHERE strftime('%Y', scrobbled_at) = ?1
             GROUP BY month ORDER BY month",
        )?;
        let rows = stmt.query_map(params![year.to_string()], |row| {
            Ok(MonthCount {
                month: row.get(0)?,
                play_count: row.get::<_, i64>(1)? as u64,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// The single day with the most scrobbles in one year.
    pub fn most_active_day(&self, year: i32) -> Result<Option<DayCount>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date(scrobbled_at) AS day, COUNT(id) AS play_count
             FROM scrobbles
             WHERE strftime('%Y', scrobbled_at) = ?1
             GROUP BY day ORDER BY play_count DESC, day ASC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![year.to_string()], |row| {
            Ok(DayCount {
                day: row.get(0)?,
                play_count: row.get::<_, i64>(1)? as u64,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Chronologically first scrobble of one year.
    pub fn first_scrobble_in_year(&self, year: i32) -> Result<Option<Scrobble>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, track_name, artist_name, album_name, scrobbled_at, created_at
             FROM scrobbles
             WHERE strftime('%Y', scrobbled_at) = ?1
             ORDER BY scrobbled_at ASC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![year.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        match rows.next() {
            Some(row) => {
                let (id, track_name, artist_name, album_name, scrobbled_at, created_at) = row?;
                Ok(Some(Scrobble {
                    id: Some(id),
                    track_name,
                    artist_name,
                    album_name,
                    scrobbled_at: decode_timestamp(&scrobbled_at)?,
                    created_at: decode_timestamp(&created_at)?,
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn scrobble(track: &str, artist: &str, album: Option<&str>, ts: i64) -> Scrobble {
        Scrobble {
            id: None,
            track_name: track.to_string(),
            artist_name: artist.to_string(),
            album_name: album.map(str::to_string),
            scrobbled_at: Utc.timestamp_opt(ts, 0).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrobbles.db");

        let store = ScrobbleStore::open(&path).unwrap();
        store
            .insert_many(&[scrobble("Song", "Artist", None, 1_700_000_000)])
            .unwrap();
        drop(store);

        let reopened = ScrobbleStore::open(&path).unwrap();
        assert_eq!(reopened.total_count().unwrap(), 1);
    }

    #[test]
    fn insert_and_find_roundtrip() {
        let store = ScrobbleStore::open_in_memory().unwrap();
        let rows = vec![
            scrobble("Song A", "Artist", Some("Album"), 1_700_000_000),
            scrobble("Song B", "Artist", None, 1_700_000_300),
        ];
        assert_eq!(store.insert_many(&rows).unwrap(), 2);

        let all = store.find(&ScrobbleFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        // newest first
        assert_eq!(all[0].track_name, "Song B");
        assert_eq!(all[1].album_name.as_deref(), Some("Album"));
        assert_eq!(all[1].scrobbled_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn find_matches_names_case_insensitively() {
        let store = ScrobbleStore::open_in_memory().unwrap();
        store
            .insert_many(&[scrobble("Song", "The Artist", None, 1_700_000_000)])
            .unwrap();

        let filter = ScrobbleFilter {
            artist_name: Some("the artist".to_string()),
            ..ScrobbleFilter::default()
        };
        assert_eq!(store.find(&filter).unwrap().len(), 1);

        let filter = ScrobbleFilter {
            track_name: Some("SONG".to_string()),
            ..ScrobbleFilter::default()
        };
        assert_eq!(store.find(&filter).unwrap().len(), 1);
    }

    #[test]
    fn find_respects_date_bounds() {
        let store = ScrobbleStore::open_in_memory().unwrap();
        let jan = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let jun = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        store
            .insert_many(&[
                scrobble("Winter Song", "Artist", None, jan.timestamp()),
                scrobble("Summer Song", "Artist", None, jun.timestamp()),
            ])
            .unwrap();

        let filter = ScrobbleFilter {
            scrobbled_after: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            ..ScrobbleFilter::default()
        };
        let found = store.find(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].track_name, "Summer Song");

        let filter = ScrobbleFilter {
            scrobbled_before: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            ..ScrobbleFilter::default()
        };
        let found = store.find(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].track_name, "Winter Song");
    }

    #[test]
    fn batch_exists_reports_known_keys() {
        let store = ScrobbleStore::open_in_memory().unwrap();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        store
            .insert_many(&[scrobble("Song", "Artist", None, ts.timestamp())])
            .unwrap();

        let known = ScrobbleKey::new("song", "ARTIST", ts);
        let unknown = ScrobbleKey::new("Other", "Artist", ts);
        let missing_ts =
            ScrobbleKey::new("Song", "Artist", Utc.timestamp_opt(1_700_000_001, 0).unwrap());

        let found = store
            .batch_exists(&[known.clone(), unknown.clone(), missing_ts.clone()])
            .unwrap();
        assert!(found.contains(&known));
        assert!(!found.contains(&unknown));
        assert!(!found.contains(&missing_ts));
    }

    #[test]
    fn aggregates_group_case_insensitively() {
        let store = ScrobbleStore::open_in_memory().unwrap();
        store
            .insert_many(&[
                scrobble("Song A", "Artist", Some("Album X"), 1_700_000_000),
                scrobble("song a", "artist", Some("album x"), 1_700_000_100),
                scrobble("Song B", "Artist", Some("Album Y"), 1_700_000_200),
            ])
            .unwrap();

        let tracks = store.top_tracks_by_artist("ARTIST", 10).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].play_count, 2);
        assert_eq!(tracks[0].track_name.to_lowercase(), "song a");

        let albums = store.top_albums_by_artist("Artist", 10).unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].play_count, 2);
    }

    #[test]
    fn yearly_and_monthly_buckets() {
        let store = ScrobbleStore::open_in_memory().unwrap();
        let jan = Utc.with_ymd_and_hms(2023, 1, 10, 8, 0, 0).unwrap();
        let feb_a = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        let feb_b = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();
        store
            .insert_many(&[
                scrobble("Old", "Artist", None, jan.timestamp()),
                scrobble("One", "Artist", None, feb_a.timestamp()),
                scrobble("Two", "Artist", None, feb_b.timestamp()),
                scrobble("Three", "Artist", None, mar.timestamp()),
            ])
            .unwrap();

        let years = store.counts_by_year(None).unwrap();
        assert_eq!(years.len(), 2);
        assert_eq!(years[0].year, "2023");
        assert_eq!(years[1].play_count, 3);

        let months = store.monthly_counts(2024).unwrap();
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, "02");
        assert_eq!(months[0].play_count, 2);

        let busiest = store.most_active_day(2024).unwrap().unwrap();
        assert_eq!(busiest.day, "2024-02-01");
        assert_eq!(busiest.play_count, 2);

        let first = store.first_scrobble_in_year(2024).unwrap().unwrap();
        assert_eq!(first.track_name, "One");

        assert!(store.most_active_day(2020).unwrap().is_none());
        assert!(store.first_scrobble_in_year(2020).unwrap().is_none());
        assert_eq!(store.total_count().unwrap(), 4);
    }
}
