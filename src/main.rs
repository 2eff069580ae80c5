use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use scrobbled::api::server::start_api_server;
use scrobbled::api::ApiContext;
use scrobbled::config::Settings;
use scrobbled::constants::SHUTDOWN_DRAIN_TIMEOUT_SECS;
use scrobbled::data::track::PlaybackSource;
use scrobbled::engine::{run_loop, Engine};
use scrobbled::helpers::lastfm::LastfmService;
use scrobbled::helpers::netcheck::HttpProbe;
use scrobbled::logging;
use scrobbled::players::create_poller;
use scrobbled::store::ScrobbleStore;
use scrobbled::{get_tokio_runtime, initialize_tokio_runtime};

/// Personal Last.fm scrobbling agent
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Player integration to watch (apple_music or spotify)
    #[arg(long, value_name = "SOURCE")]
    integration: PlaybackSource,
}

fn main() {
    // Initialize the Tokio runtime early
    initialize_tokio_runtime();

    // An unknown integration fails here with a non-zero exit
    let cli = Cli::parse();

    logging::initialize_logging();
    info!("scrobbled starting with integration: {}", cli.integration);

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // A broken store leaves scrobbling functional; only local history
    // and analytics go dark.
    let store = match ScrobbleStore::open(settings.database_path()) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(
                "Failed to open scrobble database at {}: {}; continuing without local history",
                settings.database_path(),
                e
            );
            None
        }
    };

    let poller = match create_poller(cli.integration, &settings) {
        Ok(poller) => poller,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let lastfm = match get_tokio_runtime().block_on(LastfmService::connect(settings.clone())) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to authenticate with Last.fm: {}", e);
            eprintln!("Error: failed to authenticate with Last.fm: {e}");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(Engine::new(
        cli.integration,
        poller,
        Arc::new(lastfm.clone()),
        Arc::new(HttpProbe),
        store.clone(),
    ));

    // Account summary for the API surface; not load-bearing
    match get_tokio_runtime().block_on(lastfm.get_user()) {
        Ok(user) => get_tokio_runtime().block_on(engine.set_user(user)),
        Err(e) => warn!("Could not fetch Last.fm account details: {}", e),
    }

    // Set up a shared flag for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);

        // Force exit if the drain hangs past its own deadline
        let force_shutdown_delay = Duration::from_secs(SHUTDOWN_DRAIN_TIMEOUT_SECS + 5);
        thread::spawn(move || {
            thread::sleep(force_shutdown_delay);
            info!(
                "Graceful shutdown timed out after {} seconds, forcing exit...",
                force_shutdown_delay.as_secs()
            );
            std::process::exit(0);
        });
    }) {
        eprintln!("Error: Failed to set Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    // Start the API server on its own thread using the global runtime
    let ctx = ApiContext {
        engine: engine.clone(),
        lastfm,
        store,
        settings,
    };
    let _api_thread = thread::spawn(move || {
        get_tokio_runtime().block_on(async {
            if let Err(e) = start_api_server(ctx).await {
                error!("API server error: {}", e);
            }
        });
    });

    // Run the engine loop until shutdown, then drain pending scrobbles
    // within a fixed window.
    get_tokio_runtime().block_on(async {
        run_loop(engine.clone(), running).await;

        match tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_DRAIN_TIMEOUT_SECS),
            engine.drain_pending(),
        )
        .await
        {
            Ok(delivered) => {
                if delivered > 0 {
                    info!("Delivered {} pending scrobble(s) on shutdown", delivered);
                }
            }
            Err(_) => {
                warn!("Final pending drain timed out; discarding undelivered scrobbles");
            }
        }
    });

    info!("scrobbled stopped");
    std::process::exit(0);
}
