//! teal.fm record types
//!
//! Field names follow the `fm.teal.alpha` lexicons; everything optional is
//! omitted from the wire format when unset.

use crate::error::{TealError, TealResult};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PLAY_NSID: &str = "fm.teal.alpha.feed.play";
pub const STATUS_NSID: &str = "fm.teal.alpha.actor.status";
pub const STATUS_RKEY: &str = "self";

/// A record type stored in an ATProto repository.
pub trait Lexicon {
    const NSID: &'static str;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub artist_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_mb_id: Option<String>,
}

impl Artist {
    pub fn new(artist_name: impl Into<String>) -> Self {
        Self {
            artist_name: artist_name.into(),
            artist_mb_id: None,
        }
    }
}

/// `fm.teal.alpha.feed.play`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Play {
    pub track_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_mb_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artists: Option<Vec<Artist>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_service_base_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_client_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_discriminant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_discriminant: Option<String>,
}

impl Lexicon for Play {
    const NSID: &'static str = PLAY_NSID;
}

/// `fm.teal.alpha.feed.defs#playView`, the item shown in a status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayView {
    pub track_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_mb_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_service_base_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_client_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_time: Option<DateTime<FixedOffset>>,
}

impl PlayView {
    pub fn is_empty(&self) -> bool {
        self.track_name.is_empty() && self.artists.is_empty()
    }
}

impl From<Play> for PlayView {
    fn from(play: Play) -> Self {
        let artists = match (play.artists, play.artist_names) {
            (Some(artists), _) => artists,
            (None, Some(names)) => names.into_iter().map(Artist::new).collect(),
            (None, None) => Vec::new(),
        };

        Self {
            track_name: play.track_name,
            track_mb_id: play.track_mb_id,
            recording_mb_id: play.recording_mb_id,
            duration: play.duration,
            artists,
            release_name: play.release_name,
            release_mb_id: play.release_mb_id,
            isrc: play.isrc,
            origin_url: play.origin_url,
            music_service_base_domain: play.music_service_base_domain,
            submission_client_agent: play.submission_client_agent,
            played_time: play.played_time,
        }
    }
}

/// `fm.teal.alpha.actor.status`, always stored under record key `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub time: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<FixedOffset>>,
    pub item: PlayView,
}

impl Status {
    pub fn is_expired_at(&self, now: DateTime<FixedOffset>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

impl Lexicon for Status {
    const NSID: &'static str = STATUS_NSID;
}

/// Serializes a record and tags it with its `$type`.
pub fn to_record_value<T: Lexicon + Serialize>(record: &T) -> TealResult<Value> {
    let mut value = serde_json::to_value(record)?;
    match value.as_object_mut() {
        Some(object) => {
            object.insert("$type".to_string(), Value::String(T::NSID.to_string()));
            Ok(value)
        }
        None => Err(TealError::Unknown {
            message: format!("{} did not serialize to an object", T::NSID),
        }),
    }
}

/// Decodes a record value, rejecting values tagged with another `$type`.
pub fn from_record_value<T: Lexicon + for<'de> Deserialize<'de>>(value: Value) -> TealResult<T> {
    if let Some(found) = value.get("$type").and_then(Value::as_str) {
        if found != T::NSID {
            return Err(TealError::Unknown {
                message: format!("expected record of type {}, found {}", T::NSID, found),
            });
        }
    }
    Ok(serde_json::from_value(value)?)
}
