use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// An artist credited on a parsed track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedArtist {
    pub artist_name: String,
    pub artist_mb_id: Option<String>,
}

impl ParsedArtist {
    pub fn new(artist_name: impl Into<String>) -> Self {
        Self {
            artist_name: artist_name.into(),
            artist_mb_id: None,
        }
    }
}

/// A single play, independent of the log format it came from.
///
/// The field set follows the teal.fm play lexicon so that mapping onto a
/// record is a straight copy. Only `track_name` is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTrack {
    pub track_name: String,
    pub track_mb_id: Option<String>,
    pub recording_mb_id: Option<String>,
    /// Length of the track in seconds
    pub duration: Option<i64>,
    pub artist_names: Option<Vec<String>>,
    pub artist_mb_ids: Option<Vec<String>>,
    pub artists: Option<Vec<ParsedArtist>>,
    pub release_name: Option<String>,
    pub release_mb_id: Option<String>,
    pub isrc: Option<String>,
    pub origin_url: Option<String>,
    pub music_service_base_domain: Option<String>,
    /// Identifier of the software that recorded the play, if known
    pub client_id: Option<String>,
    pub played_time: Option<DateTime<FixedOffset>>,
    pub track_discriminant: Option<String>,
    pub release_discriminant: Option<String>,
}

impl ParsedTrack {
    pub fn new(track_name: impl Into<String>) -> Self {
        Self {
            track_name: track_name.into(),
            ..Default::default()
        }
    }

    pub fn with_artist(mut self, artist_name: impl Into<String>) -> Self {
        self.artists
            .get_or_insert_with(Vec::new)
            .push(ParsedArtist::new(artist_name));
        self
    }

    pub fn with_release(mut self, release_name: impl Into<String>) -> Self {
        self.release_name = Some(release_name.into());
        self
    }

    pub fn with_duration(mut self, seconds: i64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_played_time(mut self, played_time: DateTime<FixedOffset>) -> Self {
        self.played_time = Some(played_time);
        self
    }

    /// Artist names joined for display, falling back to `artist_names`.
    pub fn artist_display(&self) -> Option<String> {
        let names: Vec<&str> = match (&self.artists, &self.artist_names) {
            (Some(artists), _) if !artists.is_empty() => {
                artists.iter().map(|a| a.artist_name.as_str()).collect()
            }
            (_, Some(names)) if !names.is_empty() => names.iter().map(String::as_str).collect(),
            _ => return None,
        };

        Some(names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_builder() {
        let track = ParsedTrack::new("Song")
            .with_artist("First")
            .with_artist("Second")
            .with_release("Album")
            .with_duration(215);

        assert_eq!(track.track_name, "Song");
        assert_eq!(track.artists.as_ref().map(Vec::len), Some(2));
        assert_eq!(track.release_name.as_deref(), Some("Album"));
        assert_eq!(track.duration, Some(215));
        assert_eq!(track.played_time, None);
    }

    #[test]
    fn test_artist_display() {
        let track = ParsedTrack::new("Song").with_artist("A").with_artist("B");
        assert_eq!(track.artist_display(), Some("A, B".to_string()));

        let mut names_only = ParsedTrack::new("Song");
        names_only.artist_names = Some(vec!["C".to_string()]);
        assert_eq!(names_only.artist_display(), Some("C".to_string()));

        assert_eq!(ParsedTrack::new("Song").artist_display(), None);
    }
}
