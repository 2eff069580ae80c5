use std::sync::Arc;

use chrono::NaiveDate;
use log::error;
use rocket::serde::json::{json, Json, Value};
use rocket::{get, State};

use crate::sync::SyncService;

use super::auth::BearerToken;
use super::ApiContext;

fn parse_day(raw: Option<String>) -> Result<Option<NaiveDate>, String> {
    match raw {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("invalid date '{raw}', expected YYYY-MM-DD")),
    }
}

/// Run the history backfill over an optional `[time_from, time_to]`
/// day range. Long-running: walks the whole history when unbounded.
#[get("/sync/scrobbles?<time_from>&<time_to>")]
pub async fn sync_scrobbles(
    _token: BearerToken,
    ctx: &State<ApiContext>,
    time_from: Option<String>,
    time_to: Option<String>,
) -> Json<Value> {
    let store = match ctx.store.clone() {
        Some(store) => store,
        None => {
            return Json(json!({
                "error": "scrobble database unavailable; sync is disabled"
            }))
        }
    };

    let (time_from, time_to) = match (parse_day(time_from), parse_day(time_to)) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(e), _) | (_, Err(e)) => return Json(json!({ "error": e })),
    };

    let service = SyncService::new(Arc::new(ctx.lastfm.clone()), store);
    match service.sync_scrobbles(time_from, time_to, true).await {
        Ok(report) => Json(json!({ "data": report })),
        Err(e) => {
            error!("Scrobble sync failed: {}", e);
            Json(json!({ "error": e.to_string() }))
        }
    }
}
