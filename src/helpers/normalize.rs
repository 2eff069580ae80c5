use once_cell::sync::Lazy;
use regex::Regex;

/// Keywords that mark a parenthesized or bracketed segment as edition
/// noise rather than part of the title proper.
const FILTER_WORDS: [&str; 9] = [
    "remaster",
    "bonus",
    "extended",
    "anniversary",
    "edit",
    "deluxe",
    "reissue",
    "explicit",
    "album version",
];

static NOISE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let words = FILTER_WORDS.join("|");
    // One pair of brackets at a time; the negated classes keep the match
    // from spanning adjacent groups.
    let pattern = format!(
        r"(?i)\([^)]*(?:{words})[^)]*\)|\[[^\]]*(?:{words})[^\]]*\]",
        words = words
    );
    Regex::new(&pattern).expect("invalid title noise pattern")
});

/// Strip edition noise from a track or album title.
///
/// `"High 'n' Dry (Remastered 2018)"` becomes `"High 'n' Dry"`;
/// `"(Don't Fear) The Reaper"` is left alone because the parenthesized
/// text carries none of the filter keywords. Idempotent.
pub fn clean_up_title(title: &str) -> String {
    NOISE_PATTERN.replace_all(title, "").trim().to_string()
}

/// Escape literal `+` characters before handing a title, artist or album
/// to the Last.fm API, which would otherwise read them as spaces.
pub fn lastfm_friendly(input: &str) -> String {
    input.replace('+', "%2B")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_remaster_suffix() {
        assert_eq!(
            clean_up_title("High 'n' Dry (Remastered 2018)"),
            "High 'n' Dry"
        );
        assert_eq!(
            clean_up_title("Time to Break Up (Bonus Track)"),
            "Time to Break Up"
        );
    }

    #[test]
    fn strips_bracketed_noise() {
        assert_eq!(clean_up_title("Foo [Explicit]"), "Foo");
        assert_eq!(clean_up_title("Bar [2011 Reissue]"), "Bar");
    }

    #[test]
    fn strips_multiple_groups() {
        assert_eq!(
            clean_up_title("Song (Remastered 2011) (Bonus Track)"),
            "Song"
        );
    }

    #[test]
    fn keeps_titles_without_keywords() {
        assert_eq!(
            clean_up_title("(Don't Fear) The Reaper"),
            "(Don't Fear) The Reaper"
        );
        assert_eq!(clean_up_title("Africa"), "Africa");
    }

    #[test]
    fn keeps_album_version_keyword_out() {
        assert_eq!(clean_up_title("Jump (Album Version)"), "Jump");
    }

    #[test]
    fn is_idempotent() {
        let inputs = [
            "Song (Remastered 2011) (Bonus Track)",
            "(Don't Fear) The Reaper",
            "Foo [Explicit]",
            "Plain Title",
        ];
        for input in inputs {
            let once = clean_up_title(input);
            assert_eq!(clean_up_title(&once), once);
        }
    }

    #[test]
    fn escapes_plus_for_lastfm() {
        assert_eq!(lastfm_friendly("Mike + The Mechanics"), "Mike %2B The Mechanics");
        assert_eq!(lastfm_friendly("no plus here"), "no plus here");
    }
}
