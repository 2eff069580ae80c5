use log::info;
use rocket::config::Config;
use rocket::serde::json::Json;
use rocket::{get, routes};

use super::auth::{self, Cors};
use super::{scrobble, state, stats, sync, user, ApiContext};

#[derive(serde::Serialize)]
struct VersionResponse {
    version: String,
}

#[get("/version")]
fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Assemble and launch the Rocket server. Blocks until shutdown.
pub async fn start_api_server(ctx: ApiContext) -> Result<(), rocket::Error> {
    let figment = Config::figment()
        .merge(("port", ctx.settings.api_port))
        .merge(("address", ctx.settings.api_host.clone()));

    info!(
        "Starting API server on {}:{}",
        ctx.settings.api_host, ctx.settings.api_port
    );

    let cors = Cors::new(ctx.settings.web_app_url.clone());

    rocket::custom(figment)
        .manage(ctx)
        .attach(cors)
        .mount(
            "/",
            routes![
                get_version,
                auth::cors_preflight,
                // Engine state
                state::get_state,
                state::poll_song,
                // Scrobbling controls
                scrobble::scrobble_status,
                scrobble::scrobble_toggle,
                scrobble::scrobble_song,
                // History backfill
                sync::sync_scrobbles,
                // Last.fm passthrough
                user::current_track_scrobbles,
                user::weekly_album_charts,
                // Local analytics
                stats::artist_top_tracks,
                stats::artist_top_albums,
                stats::year_overview,
            ],
        )
        .launch()
        .await?;
    Ok(())
}
