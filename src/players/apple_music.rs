use std::time::Duration;

use log::{debug, error, info};

use crate::constants::POLLER_TIMEOUT_SECS;
use crate::data::track::{PlaybackSource, TrackSnapshot};

use super::Poller;

/// Field separator the script prints between track properties
const SEP: char = '\u{1e}';

/// AppleScript error for "no current track"
const NO_CURRENT_TRACK: &str = "-1728";

/// AppleScript error for "invalid connection" (app quit mid-call)
const INVALID_CONNECTION: &str = "-609";

/// Prints name, artist, album, duration and the playing flag on one
/// line. Erroring out when the app is closed lands in the same branch
/// as the no-current-track case.
const POLL_SCRIPT: &str = r#"tell application "Music"
    if it is not running then error number -1728
    set t to current track
    set sep to character id 30
    return (name of t) & sep & (artist of t) & sep & (album of t) & sep & (duration of t) & sep & (player state is playing)
end tell"#;

/// Reads the Apple Music desktop app through the osascript bridge.
pub struct AppleMusicPoller;

impl AppleMusicPoller {
    pub fn new() -> Self {
        AppleMusicPoller
    }
}

impl Default for AppleMusicPoller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Poller for AppleMusicPoller {
    fn source(&self) -> PlaybackSource {
        PlaybackSource::AppleMusic
    }

    async fn poll(&self) -> Option<TrackSnapshot> {
        let command = tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(POLL_SCRIPT)
            .output();

        let output = match tokio::time::timeout(
            Duration::from_secs(POLLER_TIMEOUT_SECS),
            command,
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                info!("Failed to run osascript: {}", e);
                return None;
            }
            Err(_) => {
                info!("Apple Music poll timed out");
                return None;
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains(NO_CURRENT_TRACK) {
                info!("Apple Music is open but no song is selected");
            } else if stderr.contains(INVALID_CONNECTION) {
                info!("Apple Music connection went away mid-poll");
            } else {
                error!("AppleScript error: {}", stderr.trim());
            }
            return None;
        }

        parse_script_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Turn one script output line into a snapshot. Filters the transient
/// "Connecting…" placeholder and tracks without an artist.
fn parse_script_output(raw: &str) -> Option<TrackSnapshot> {
    let line = raw.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split(SEP).collect();
    if fields.len() != 5 {
        debug!("Unexpected script output shape: {} field(s)", fields.len());
        return None;
    }

    let name = fields[0].trim();
    let artist = fields[1].trim();
    let album = fields[2].trim();
    let duration = fields[3].trim();
    let playing = fields[4].trim() == "true";

    if name.is_empty() || name.starts_with("Connecting") {
        return None;
    }
    if artist.is_empty() {
        debug!("Skipping track '{}' with no artist", name);
        return None;
    }

    // durations come back as fractional seconds, e.g. "301.226"
    let duration = duration
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|d| *d > 0.0)
        .map(|d| d.round() as u32);

    let album = if album.is_empty() {
        None
    } else {
        Some(album.to_string())
    };

    Some(TrackSnapshot::new(
        name.to_string(),
        artist.to_string(),
        album,
        playing,
        duration,
        PlaybackSource::AppleMusic,
    ))
}
