use crate::audioscrobbler::AudioScrobblerParser;
use crate::error::ParseResult;
use crate::track::ParsedTrack;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub trait LogParser: Send + Sync {
    /// Parse the given log file into the list of tracks worth scrobbling
    fn parse_file(&self, path: &Path) -> ParseResult<Vec<ParsedTrack>>;

    fn format_name(&self) -> &'static str;
}

/// Log formats onyx knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `.scrobbler.log` as written by Rockbox and compatible players
    #[default]
    AudioScrobbler,
}

impl LogFormat {
    pub fn parser(self) -> Box<dyn LogParser> {
        match self {
            LogFormat::AudioScrobbler => Box::new(AudioScrobblerParser::new()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LogFormat::AudioScrobbler => "audio-scrobbler",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio-scrobbler" | "audioscrobbler" | "scrobbler" => Ok(LogFormat::AudioScrobbler),
            other => Err(format!("Unknown log format: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!(
            "audio-scrobbler".parse::<LogFormat>(),
            Ok(LogFormat::AudioScrobbler)
        );
        assert_eq!(
            "AudioScrobbler".parse::<LogFormat>(),
            Ok(LogFormat::AudioScrobbler)
        );
        assert!("csv".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_format_parser() {
        let parser = LogFormat::AudioScrobbler.parser();
        assert_eq!(parser.format_name(), "audio-scrobbler");
        assert_eq!(LogFormat::default().to_string(), "audio-scrobbler");
    }
}
