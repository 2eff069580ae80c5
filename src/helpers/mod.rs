/// Last.fm wire client and async facade
pub mod lastfm;

/// Internet reachability probe
pub mod netcheck;

/// Track and album title clean-up
pub mod normalize;

/// Minimum-delay rate limiting for external services
pub mod ratelimit;
