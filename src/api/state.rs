use rocket::get;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;

use crate::engine::StateView;

use super::auth::BearerToken;
use super::ApiContext;

#[derive(Serialize)]
pub struct PollResponse {
    data: StateView,
}

/// Current engine state: track, cached album, toggle, source, user.
#[get("/state")]
pub async fn get_state(_token: BearerToken, ctx: &State<ApiContext>) -> Json<StateView> {
    Json(ctx.engine.state_view().await)
}

/// One poll pass on behalf of the caller. Identity and play-status
/// transitions apply exactly as in the engine loop; play time does not
/// accumulate and nothing is delivered.
#[get("/poll-song")]
pub async fn poll_song(_token: BearerToken, ctx: &State<ApiContext>) -> Json<PollResponse> {
    Json(PollResponse {
        data: ctx.engine.poll_pass().await,
    })
}
