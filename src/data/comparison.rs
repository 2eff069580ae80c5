use crate::data::track::{AlbumInfo, TrackSnapshot, TrackState};

/// Decisions derived from comparing one poll against the engine state.
///
/// `no_song_playing` excludes all other flags; the rest are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Comparison {
    pub no_song_playing: bool,
    pub is_same_song: bool,
    pub song_has_changed: bool,
    pub update_play_status: bool,
    pub update_now_playing: bool,
    pub update_album_meta: bool,
}

/// Compare a poll result against the current track state.
///
/// Pure function, no I/O. Sameness is judged on `(clean_name, artist)`
/// so edition-noise retitles between polls don't restart a play.
pub fn compare(
    poll: Option<&TrackSnapshot>,
    state: Option<&TrackState>,
    cached_album: Option<&AlbumInfo>,
) -> Comparison {
    let poll = match poll {
        Some(poll) => poll,
        None => {
            return Comparison {
                no_song_playing: true,
                ..Comparison::default()
            }
        }
    };

    let same = state.is_some_and(|state| {
        poll.clean_name == state.clean_name && poll.artist == state.artist
    });

    if same {
        let state = state.expect("same implies state");
        return Comparison {
            is_same_song: true,
            update_play_status: poll.playing != state.playing,
            update_now_playing: state.playing && !state.now_playing_pushed,
            ..Comparison::default()
        };
    }

    let update_album_meta = match cached_album {
        None => true,
        Some(album) => poll.album.as_deref() != Some(album.title.as_str()),
    };

    Comparison {
        song_has_changed: true,
        update_now_playing: true,
        update_album_meta,
        ..Comparison::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::track::PlaybackSource;

    fn snapshot(name: &str, artist: &str, playing: bool) -> TrackSnapshot {
        TrackSnapshot::new(
            name.to_string(),
            artist.to_string(),
            Some("Some Album".to_string()),
            playing,
            Some(200),
            PlaybackSource::AppleMusic,
        )
    }

    fn state(name: &str, artist: &str, playing: bool) -> TrackState {
        TrackState::from(&snapshot(name, artist, playing))
    }

    fn album(title: &str) -> AlbumInfo {
        AlbumInfo {
            title: title.to_string(),
            artist_name: "Artist".to_string(),
            url: None,
            mbid: None,
            playcount: None,
            user_playcount: None,
            listener_count: None,
            wiki: None,
            tracks: None,
            tags: None,
        }
    }

    #[test]
    fn empty_poll_means_no_song() {
        let current = state("Song", "Artist", true);
        let result = compare(None, Some(&current), None);
        assert!(result.no_song_playing);
        assert_eq!(
            result,
            Comparison {
                no_song_playing: true,
                ..Comparison::default()
            }
        );
    }

    #[test]
    fn first_song_is_a_change() {
        let poll = snapshot("Song", "Artist", true);
        let result = compare(Some(&poll), None, None);
        assert!(result.song_has_changed);
        assert!(result.update_now_playing);
        assert!(result.update_album_meta);
        assert!(!result.is_same_song);
        assert!(!result.no_song_playing);
    }

    #[test]
    fn same_song_same_status_is_quiet() {
        let poll = snapshot("Song", "Artist", true);
        let mut current = state("Song", "Artist", true);
        current.now_playing_pushed = true;
        let result = compare(Some(&poll), Some(&current), None);
        assert!(result.is_same_song);
        assert!(!result.song_has_changed);
        assert!(!result.update_play_status);
        assert!(!result.update_now_playing);
        assert!(!result.update_album_meta);
    }

    #[test]
    fn pause_flips_play_status() {
        let poll = snapshot("Song", "Artist", false);
        let mut current = state("Song", "Artist", true);
        current.now_playing_pushed = true;
        let result = compare(Some(&poll), Some(&current), None);
        assert!(result.is_same_song);
        assert!(result.update_play_status);
    }

    #[test]
    fn same_song_repushes_now_playing_when_never_pushed() {
        let poll = snapshot("Song", "Artist", true);
        let current = state("Song", "Artist", true);
        let result = compare(Some(&poll), Some(&current), None);
        assert!(result.is_same_song);
        assert!(result.update_now_playing);
    }

    #[test]
    fn paused_same_song_does_not_push_now_playing() {
        let poll = snapshot("Song", "Artist", false);
        let current = state("Song", "Artist", false);
        let result = compare(Some(&poll), Some(&current), None);
        assert!(result.is_same_song);
        assert!(!result.update_now_playing);
    }

    #[test]
    fn different_artist_is_a_change() {
        let poll = snapshot("Song", "Other Artist", true);
        let current = state("Song", "Artist", true);
        let result = compare(Some(&poll), Some(&current), None);
        assert!(result.song_has_changed);
        assert!(result.update_now_playing);
    }

    #[test]
    fn edition_retitle_is_the_same_song() {
        let poll = snapshot("Song (Remastered 2011)", "Artist", true);
        let mut current = state("Song", "Artist", true);
        current.now_playing_pushed = true;
        let result = compare(Some(&poll), Some(&current), None);
        assert!(result.is_same_song);
    }

    #[test]
    fn album_meta_refresh_follows_cache() {
        let poll = snapshot("Song", "Artist", true);

        let matching = album("Some Album");
        let result = compare(Some(&poll), None, Some(&matching));
        assert!(!result.update_album_meta);

        let stale = album("Other Album");
        let result = compare(Some(&poll), None, Some(&stale));
        assert!(result.update_album_meta);

        let result = compare(Some(&poll), None, None);
        assert!(result.update_album_meta);
    }

    #[test]
    fn is_pure_and_repeatable() {
        let poll = snapshot("Song", "Artist", true);
        let current = state("Other", "Artist", true);
        let first = compare(Some(&poll), Some(&current), None);
        let second = compare(Some(&poll), Some(&current), None);
        assert_eq!(first, second);
    }
}
