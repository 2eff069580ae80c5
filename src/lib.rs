/// REST API surface
pub mod api;

/// Process configuration read from the environment
pub mod config;

/// Global constants
pub mod constants;

/// Track data model and poll comparison
pub mod data;

/// The scrobble control loop and session ledger
pub mod engine;

/// Helper utilities: Last.fm client, title normalization, connectivity
pub mod helpers;

/// Logging configuration and utilities
pub mod logging;

/// Player pollers for the supported integrations
pub mod players;

/// Local scrobble history store
pub mod store;

/// Last.fm history backfill
pub mod sync;

pub use crate::engine::Engine;
pub use crate::players::Poller;

use log::info;
use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

// Global Tokio runtime for async operations
static TOKIO_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    let rt = Runtime::new().expect("Failed to create Tokio runtime");
    info!("Global Tokio runtime initialized");
    rt
});

/// Initialize the global Tokio runtime
///
/// Called automatically on first use of get_tokio_runtime(), but can be
/// called explicitly to initialize the runtime at a specific point.
pub fn initialize_tokio_runtime() {
    Lazy::force(&TOKIO_RUNTIME);
}

/// Get a reference to the global Tokio runtime
pub fn get_tokio_runtime() -> &'static Runtime {
    &TOKIO_RUNTIME
}
