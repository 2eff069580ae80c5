use std::sync::Arc;

use log::error;
use rocket::serde::json::{json, Json, Value};
use rocket::{get, State};

use crate::store::{ScrobbleStore, StoreError};

use super::auth::BearerToken;
use super::ApiContext;

const DEFAULT_TOP_LIMIT: u32 = 10;

fn store_or_warning(ctx: &ApiContext) -> Result<Arc<ScrobbleStore>, Json<Value>> {
    ctx.store.clone().ok_or_else(|| {
        Json(json!({
            "error": "scrobble database unavailable; local stats are disabled"
        }))
    })
}

async fn run_query<T, F>(store: Arc<ScrobbleStore>, query: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&ScrobbleStore) -> Result<T, StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || query(&store)).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Most-played tracks for one artist, from the local store.
#[get("/stats/artist/<name>/tracks?<limit>")]
pub async fn artist_top_tracks(
    _token: BearerToken,
    ctx: &State<ApiContext>,
    name: String,
    limit: Option<u32>,
) -> Json<Value> {
    let store = match store_or_warning(ctx) {
        Ok(store) => store,
        Err(warning) => return warning,
    };
    let limit = limit.unwrap_or(DEFAULT_TOP_LIMIT);
    match run_query(store, move |s| s.top_tracks_by_artist(&name, limit)).await {
        Ok(tracks) => Json(json!({ "data": tracks })),
        Err(e) => {
            error!("Top tracks query failed: {}", e);
            Json(json!({ "error": e }))
        }
    }
}

/// Most-played albums for one artist, from the local store.
#[get("/stats/artist/<name>/albums?<limit>")]
pub async fn artist_top_albums(
    _token: BearerToken,
    ctx: &State<ApiContext>,
    name: String,
    limit: Option<u32>,
) -> Json<Value> {
    let store = match store_or_warning(ctx) {
        Ok(store) => store,
        Err(warning) => return warning,
    };
    let limit = limit.unwrap_or(DEFAULT_TOP_LIMIT);
    match run_query(store, move |s| s.top_albums_by_artist(&name, limit)).await {
        Ok(albums) => Json(json!({ "data": albums })),
        Err(e) => {
            error!("Top albums query failed: {}", e);
            Json(json!({ "error": e }))
        }
    }
}

/// One year in review: monthly buckets, the most active day and the
/// first scrobble of the year.
#[get("/stats/overview/<year>")]
pub async fn year_overview(
    _token: BearerToken,
    ctx: &State<ApiContext>,
    year: i32,
) -> Json<Value> {
    let store = match store_or_warning(ctx) {
        Ok(store) => store,
        Err(warning) => return warning,
    };
    let datetime_format = ctx.settings.datetime_format.clone();
    let result = run_query(store, move |s| {
        let months = s.monthly_counts(year)?;
        let most_active_day = s.most_active_day(year)?;
        let first = s.first_scrobble_in_year(year)?;
        Ok(json!({
            "year": year,
            "months": months,
            "most_active_day": most_active_day,
            "first_scrobble": first.map(|s| json!({
                "track_name": s.track_name,
                "artist_name": s.artist_name,
                "album_name": s.album_name,
                "scrobbled_at": s.scrobbled_at.format(&datetime_format).to_string(),
            })),
        }))
    })
    .await;

    match result {
        Ok(data) => Json(json!({ "data": data })),
        Err(e) => {
            error!("Year overview query failed: {}", e);
            Json(json!({ "error": e }))
        }
    }
}
