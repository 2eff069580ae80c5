/// Pure poll-against-state comparison
pub mod comparison;

/// Track, album and user data model
pub mod track;

pub use comparison::{compare, Comparison};
pub use track::{
    AlbumInfo, LastFmTrack, LastFmUser, PlaybackSource, PlaybackStatus, PlayedTrack, Scrobble,
    ScrobbleKey, TrackKey, TrackSnapshot, TrackState,
};
