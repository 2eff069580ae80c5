use chrono::Utc;
use log::error;
use rocket::serde::json::{json, Json, Value};
use rocket::{get, State};
use serde::Serialize;

use super::auth::BearerToken;
use super::ApiContext;

const WEEK_SECONDS: i64 = 7 * 86_400;

#[derive(Serialize)]
pub struct TrackScrobble {
    name: String,
    artist: String,
    album: Option<String>,
    scrobbled_at: String,
}

/// The user's full Last.fm history for the current track. Queries both
/// the raw and the normalized title, the way the history page shows
/// "Cool Song" and "Cool Song (Remastered 2021)" together.
#[get("/user/current-track-scrobbles")]
pub async fn current_track_scrobbles(
    _token: BearerToken,
    ctx: &State<ApiContext>,
) -> Json<Value> {
    let (artist, name, clean_name) = match ctx.engine.current_track().await {
        Some(current) => current,
        None => return Json(json!({ "scrobbles": Value::Null })),
    };

    let mut plays = match ctx.lastfm.track_scrobbles(artist.clone(), name.clone()).await {
        Ok(plays) => plays,
        Err(e) => {
            error!("Failed to get user scrobbles for '{}': {}", name, e);
            return Json(json!({ "error": e.to_string() }));
        }
    };
    if clean_name != name {
        match ctx.lastfm.track_scrobbles(artist, clean_name).await {
            Ok(more) => plays.extend(more),
            Err(e) => error!("Failed to get user scrobbles for clean title: {}", e),
        }
    }

    let scrobbles: Vec<TrackScrobble> = plays
        .into_iter()
        .map(|p| TrackScrobble {
            name: p.name,
            artist: p.artist,
            album: p.album,
            scrobbled_at: p
                .scrobbled_at
                .format(&ctx.settings.datetime_format)
                .to_string(),
        })
        .collect();
    Json(json!({ "scrobbles": scrobbles }))
}

/// Weekly album chart passthrough. Bounds are UTC seconds; absent
/// bounds mean the trailing week.
#[get("/user/charts/albums/weekly?<from_date>&<to_date>")]
pub async fn weekly_album_charts(
    _token: BearerToken,
    ctx: &State<ApiContext>,
    from_date: Option<i64>,
    to_date: Option<i64>,
) -> Json<Value> {
    let (from_date, to_date) = match (from_date, to_date) {
        (None, None) => {
            let to = Utc::now().timestamp();
            (Some(to - WEEK_SECONDS), Some(to))
        }
        bounds => bounds,
    };

    match ctx.lastfm.weekly_album_chart(from_date, to_date).await {
        Ok(albums) => Json(json!({ "data": albums })),
        Err(e) => {
            error!("Failed to fetch weekly album chart: {}", e);
            Json(json!({ "error": e.to_string() }))
        }
    }
}
