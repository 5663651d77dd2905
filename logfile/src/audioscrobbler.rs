//! Audioscrobbler `.scrobbler.log` format
//!
//! The log starts with `#`-prefixed header lines followed by one tab
//! separated entry per play:
//!
//! ```text
//! #AUDIOSCROBBLER/1.1
//! #TZ/UTC
//! #CLIENT/Rockbox sansaclipplus $Revision$
//! Artist	Album	Title	3	215	L	1700000000	b1a9c0e9-d987-4042-ae91-78d6a3267d69
//! ```
//!
//! Entry fields are artist, album, title, track number, duration in
//! seconds, rating (`L` listened, `S` skipped), unix timestamp and, in
//! version 1.1 logs, an optional MusicBrainz track id. Versions 1.0 and
//! 1.1 are understood.

use crate::error::{ParseError, ParseResult};
use crate::parser::LogParser;
use crate::track::{ParsedArtist, ParsedTrack};
use chrono::{DateTime, FixedOffset, Local};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::debug;

const VERSION_PREFIX: &str = "#AUDIOSCROBBLER/";
const TIMEZONE_PREFIX: &str = "#TZ/";
const CLIENT_PREFIX: &str = "#CLIENT/";
const UNKNOWN_TIMEZONE: &str = "UNKNOWN";
const MIN_ENTRY_FIELDS: usize = 7;
const SUPPORTED_VERSIONS: [&str; 2] = ["1.0", "1.1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Listened,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub artist_name: String,
    pub album_name: Option<String>,
    pub track_name: String,
    pub track_number: Option<i64>,
    pub duration: i64,
    pub rating: Rating,
    pub timestamp: i64,
    pub mb_track_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrobbleLog {
    pub version: String,
    pub timezone: Option<String>,
    pub client_id: Option<String>,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, PartialEq)]
enum Header {
    Version(String),
    TimeZone(String),
    ClientId(String),
    Unknown,
}

fn parse_header(line: &str) -> Header {
    if let Some(rest) = line.strip_prefix(VERSION_PREFIX) {
        return Header::Version(rest.trim().to_owned());
    }

    if let Some(rest) = line.strip_prefix(TIMEZONE_PREFIX) {
        return Header::TimeZone(rest.trim().to_owned());
    }

    if let Some(rest) = line.strip_prefix(CLIENT_PREFIX) {
        return Header::ClientId(rest.trim().to_owned());
    }

    Header::Unknown
}

fn optional_string(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_owned())
    }
}

fn parse_rating(field: &str, line: usize) -> ParseResult<Rating> {
    match field {
        "L" => Ok(Rating::Listened),
        "S" => Ok(Rating::Skipped),
        other => Err(ParseError::syntax(
            line,
            format!("entry rating must be 'L' or 'S', found '{}'", other),
        )),
    }
}

fn parse_integer(field: &str, name: &str, line: usize) -> ParseResult<i64> {
    field
        .trim()
        .parse()
        .map_err(|e| ParseError::syntax(line, format!("invalid {} '{}': {}", name, field, e)))
}

fn has_track_ids(version: &str) -> bool {
    version == "1.1"
}

fn check_version(version: &str) -> ParseResult<()> {
    if SUPPORTED_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(ParseError::UnsupportedVersion {
            version: version.to_owned(),
        })
    }
}

fn parse_entry(raw: &str, version: &str, line: usize) -> ParseResult<LogEntry> {
    let fields: Vec<&str> = raw.split('\t').collect();
    if fields.len() < MIN_ENTRY_FIELDS {
        return Err(ParseError::syntax(
            line,
            format!(
                "expected at least {} tab separated fields, found {}",
                MIN_ENTRY_FIELDS,
                fields.len()
            ),
        ));
    }

    let track_number = if fields[3].trim().is_empty() {
        None
    } else {
        Some(parse_integer(fields[3], "track number", line)?)
    };

    let timestamp = parse_integer(fields[6], "timestamp", line)?;
    if DateTime::from_timestamp(timestamp, 0).is_none() {
        return Err(ParseError::syntax(
            line,
            format!("timestamp {} is out of range", timestamp),
        ));
    }

    let mb_track_id = if has_track_ids(version) {
        fields.get(7).and_then(|field| optional_string(field.trim()))
    } else {
        None
    };

    Ok(LogEntry {
        artist_name: fields[0].to_owned(),
        album_name: optional_string(fields[1]),
        track_name: fields[2].to_owned(),
        track_number,
        duration: parse_integer(fields[4], "duration", line)?,
        rating: parse_rating(fields[5].trim(), line)?,
        timestamp,
        mb_track_id,
    })
}

impl ScrobbleLog {
    pub fn parse<R: BufRead>(reader: R) -> ParseResult<Self> {
        let mut version: Option<String> = None;
        let mut timezone: Option<String> = None;
        let mut client_id: Option<String> = None;
        let mut entries = Vec::new();
        let mut in_header = true;

        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            let line = line.map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData => {
                    ParseError::syntax(line_number, "line is not valid UTF-8")
                }
                _ => ParseError::Io(e),
            })?;
            let line = line.trim_end_matches(['\r', '\n']);

            if in_header && line.starts_with('#') {
                match parse_header(line) {
                    Header::Version(v) => version = Some(v),
                    Header::TimeZone(tz) if tz == UNKNOWN_TIMEZONE => timezone = None,
                    Header::TimeZone(tz) => timezone = Some(tz),
                    Header::ClientId(id) => client_id = Some(id),
                    Header::Unknown => debug!("Ignoring header line {}", line_number),
                }
                continue;
            }

            if in_header {
                in_header = false;
                let v = version.as_deref().ok_or(ParseError::MissingVersion)?;
                check_version(v)?;
            }

            if line.is_empty() {
                continue;
            }

            let v = version.as_deref().ok_or(ParseError::MissingVersion)?;
            entries.push(parse_entry(line, v, line_number)?);
        }

        let version = version.ok_or(ParseError::MissingVersion)?;
        check_version(&version)?;

        debug!(
            "Parsed scrobbler log v{} with {} entries",
            version,
            entries.len()
        );

        Ok(Self {
            version,
            timezone,
            client_id,
            entries,
        })
    }

    pub fn parse_file(path: &Path) -> ParseResult<Self> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    pub fn is_utc(&self) -> bool {
        self.timezone.as_deref() == Some("UTC")
    }

    fn played_time(&self, timestamp: i64) -> Option<DateTime<FixedOffset>> {
        let utc = DateTime::from_timestamp(timestamp, 0)?;
        if self.is_utc() {
            Some(utc.fixed_offset())
        } else {
            Some(utc.with_timezone(&Local).fixed_offset())
        }
    }

    /// Converts listened entries into tracks; skipped entries are dropped.
    pub fn into_tracks(self) -> Vec<ParsedTrack> {
        let mut tracks = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            if entry.rating == Rating::Skipped {
                continue;
            }

            tracks.push(ParsedTrack {
                track_name: entry.track_name.clone(),
                track_mb_id: entry.mb_track_id.clone(),
                duration: Some(entry.duration),
                artists: Some(vec![ParsedArtist::new(entry.artist_name.clone())]),
                release_name: entry.album_name.clone(),
                client_id: self.client_id.clone(),
                played_time: self.played_time(entry.timestamp),
                ..Default::default()
            });
        }

        tracks
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AudioScrobblerParser;

impl AudioScrobblerParser {
    pub fn new() -> Self {
        Self
    }
}

impl LogParser for AudioScrobblerParser {
    fn parse_file(&self, path: &Path) -> ParseResult<Vec<ParsedTrack>> {
        Ok(ScrobbleLog::parse_file(path)?.into_tracks())
    }

    fn format_name(&self) -> &'static str {
        "audio-scrobbler"
    }
}
