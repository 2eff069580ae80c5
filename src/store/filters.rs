use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::ToSql;

use super::encode_timestamp;

/// Optional criteria for querying persisted scrobbles. Name comparisons
/// are case-insensitive; date bounds are inclusive and interpreted as
/// midnight UTC.
#[derive(Debug, Default, Clone)]
pub struct ScrobbleFilter {
    pub track_name: Option<String>,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub scrobbled_at: Option<DateTime<Utc>>,
    pub scrobbled_after: Option<NaiveDate>,
    pub scrobbled_before: Option<NaiveDate>,
}

impl ScrobbleFilter {
    /// Render the filter as a WHERE clause (possibly empty) plus its
    /// bound parameters, newest scrobbles first.
    pub(super) fn to_sql(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(track_name) = &self.track_name {
            clauses.push("LOWER(track_name) = LOWER(?)");
            params.push(Box::new(track_name.clone()));
        }
        if let Some(artist_name) = &self.artist_name {
            clauses.push("LOWER(artist_name) = LOWER(?)");
            params.push(Box::new(artist_name.clone()));
        }
        if let Some(album_name) = &self.album_name {
            clauses.push("LOWER(album_name) = LOWER(?)");
            params.push(Box::new(album_name.clone()));
        }
        if let Some(scrobbled_at) = &self.scrobbled_at {
            clauses.push("scrobbled_at = ?");
            params.push(Box::new(encode_timestamp(*scrobbled_at)));
        }
        if let Some(after) = &self.scrobbled_after {
            clauses.push("scrobbled_at >= ?");
            params.push(Box::new(format!("{after} 00:00:00")));
        }
        if let Some(before) = &self.scrobbled_before {
            clauses.push("scrobbled_at <= ?");
            params.push(Box::new(format!("{before} 00:00:00")));
        }

        let mut sql = String::new();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY scrobbled_at DESC");
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_orders_only() {
        let (sql, params) = ScrobbleFilter::default().to_sql();
        assert_eq!(sql, " ORDER BY scrobbled_at DESC");
        assert!(params.is_empty());
    }

    #[test]
    fn combines_clauses_with_and() {
        let filter = ScrobbleFilter {
            track_name: Some("Song".to_string()),
            artist_name: Some("Artist".to_string()),
            scrobbled_after: Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            ..ScrobbleFilter::default()
        };
        let (sql, params) = filter.to_sql();
        assert!(sql.contains("LOWER(track_name) = LOWER(?)"));
        assert!(sql.contains("LOWER(artist_name) = LOWER(?)"));
        assert!(sql.contains("scrobbled_at >= ?"));
        assert!(sql.contains(" AND "));
        assert_eq!(params.len(), 3);
    }
}
