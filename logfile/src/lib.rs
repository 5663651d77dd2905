//! Listening log parsers for onyx
//!
//! Portable players record what was played into plain text logs. This crate
//! turns those logs into [`ParsedTrack`]s, a format-neutral description of a
//! play that the scrobbler maps onto teal.fm records.

pub mod audioscrobbler;
pub mod error;
pub mod parser;
pub mod track;

pub use audioscrobbler::{AudioScrobblerParser, LogEntry, Rating, ScrobbleLog};
pub use error::{ParseError, ParseResult};
pub use parser::{LogFormat, LogParser};
pub use track::{ParsedArtist, ParsedTrack};
