/// Default Last.fm web service root, overridable via `LASTFM_API_URL`
pub const LASTFM_API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";

/// Engine tick cadence in seconds
pub const POLL_INTERVAL_SECS: u64 = 1;

/// Upper bound on accumulated play time before a track qualifies,
/// per the Last.fm scrobbling convention (half the track or this cap)
pub const SCROBBLE_CAP_SECS: u32 = 120;

/// Deadline for a single player poll
pub const POLLER_TIMEOUT_SECS: u64 = 3;

/// Deadline for Last.fm read calls
pub const LASTFM_READ_TIMEOUT_SECS: u64 = 5;

/// Deadline for Last.fm scrobble submissions
pub const LASTFM_SCROBBLE_TIMEOUT_SECS: u64 = 10;

/// Deadline for the internet reachability probe
pub const NETCHECK_TIMEOUT_SECS: u64 = 3;

/// Deadline for the final pending drain at shutdown
pub const SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 10;

/// Maximum page size accepted by user.getRecentTracks
pub const RECENT_TRACKS_PAGE_LIMIT: u32 = 200;

/// Pause between backfill pages, respecting Last.fm rate limits
pub const SYNC_PAGE_PAUSE_MS: u64 = 500;

/// Display format applied when rendering timestamps in API payloads
pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
