/// Bearer token guard and CORS fairing
pub mod auth;

/// Scrobble toggle and force-delivery endpoints
pub mod scrobble;

/// Rocket server assembly
pub mod server;

/// Engine state and poll endpoints
pub mod state;

/// Local-store analytics endpoints
pub mod stats;

/// History backfill endpoint
pub mod sync;

/// Last.fm user passthrough endpoints
pub mod user;

use std::sync::Arc;

use crate::config::Settings;
use crate::engine::Engine;
use crate::helpers::lastfm::LastfmService;
use crate::store::ScrobbleStore;

/// Everything the request handlers need, managed by Rocket.
pub struct ApiContext {
    pub engine: Arc<Engine>,
    pub lastfm: LastfmService,
    pub store: Option<Arc<ScrobbleStore>>,
    pub settings: Settings,
}
