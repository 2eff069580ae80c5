use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde::Serialize;

use crate::data::track::LastFmTrack;

use super::auth::BearerToken;
use super::ApiContext;

#[derive(Serialize)]
pub struct ScrobbleStatus {
    scrobble_enabled: bool,
}

#[derive(Serialize)]
pub struct ScrobbleOutcome {
    result: Option<ScrobbledTrack>,
}

#[derive(Serialize)]
pub struct ScrobbledTrack {
    name: String,
    artist: String,
    album: Option<String>,
    scrobbled_at: String,
}

fn render_track(track: LastFmTrack, datetime_format: &str) -> ScrobbledTrack {
    ScrobbledTrack {
        scrobbled_at: track.scrobbled_at.format(datetime_format).to_string(),
        name: track.name,
        artist: track.artist,
        album: track.album,
    }
}

#[get("/scrobble/status")]
pub async fn scrobble_status(_token: BearerToken, ctx: &State<ApiContext>) -> Json<ScrobbleStatus> {
    Json(ScrobbleStatus {
        scrobble_enabled: ctx.engine.scrobble_enabled().await,
    })
}

#[post("/scrobble/toggle")]
pub async fn scrobble_toggle(_token: BearerToken, ctx: &State<ApiContext>) -> Json<ScrobbleStatus> {
    Json(ScrobbleStatus {
        scrobble_enabled: ctx.engine.toggle_scrobbling().await,
    })
}

/// Force-deliver the current song. The engine applies the same guards
/// as the loop, so this cannot double-scrobble a play.
#[post("/scrobble")]
pub async fn scrobble_song(_token: BearerToken, ctx: &State<ApiContext>) -> Json<ScrobbleOutcome> {
    let result = ctx
        .engine
        .force_scrobble()
        .await
        .map(|track| render_track(track, &ctx.settings.datetime_format));
    Json(ScrobbleOutcome { result })
}
