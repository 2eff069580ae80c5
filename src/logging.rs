use std::io::Write;

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Default per-module filter applied when `RUST_LOG` is absent.
///
/// Rocket's launch banner and ureq wire chatter are kept at warn so the
/// once-per-second engine output stays readable.
const DEFAULT_FILTER: &str = "info,rocket=warn,ureq=warn,rusqlite=warn";

/// Initialize the process-wide logger.
///
/// `RUST_LOG` takes precedence over the built-in default filter, so
/// subsystems can be tuned the usual way, e.g.
/// `RUST_LOG=scrobbled::engine=debug,scrobbled::helpers::lastfm=debug`.
pub fn initialize_logging() {
    let mut builder = Builder::new();

    match std::env::var("RUST_LOG") {
        Ok(filter) => {
            builder.parse_filters(&filter);
        }
        Err(_) => {
            builder.parse_filters(DEFAULT_FILTER);
        }
    }

    builder
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter_module("hyper", LevelFilter::Warn)
        .init();
}
