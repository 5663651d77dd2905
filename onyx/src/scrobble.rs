use crate::config::OnyxConfig;
use crate::error::{OnyxError, OnyxResult};
use console::style;
use logfile::{LogFormat, ParsedArtist, ParsedTrack};
use std::path::Path;
use teal::{Artist, Play, RecordRef, RecordStore, RecordStoreExt, TealResult};
use tracing::{debug, info, warn};

pub const DEFAULT_SERVICE_DOMAIN: &str = "local";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrobbleSummary {
    pub submitted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ScrobbleSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

fn to_artist(artist: ParsedArtist) -> Artist {
    Artist {
        artist_name: artist.artist_name,
        artist_mb_id: artist.artist_mb_id,
    }
}

/// Publishes plays to the repository behind `store`.
pub struct Scrobbler<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    config: &'a OnyxConfig,
}

impl<'a, S: RecordStore + ?Sized> Scrobbler<'a, S> {
    pub fn new(store: &'a S, config: &'a OnyxConfig) -> Self {
        Self { store, config }
    }

    pub fn client_agent(&self, client_id: Option<&str>) -> String {
        self.config.client_agent(client_id)
    }

    pub fn to_play(&self, track: ParsedTrack) -> Play {
        let submission_client_agent = Some(self.client_agent(track.client_id.as_deref()));

        Play {
            track_name: track.track_name,
            track_mb_id: track.track_mb_id,
            recording_mb_id: track.recording_mb_id,
            duration: track.duration,
            artist_names: track.artist_names,
            artist_mb_ids: track.artist_mb_ids,
            artists: track
                .artists
                .map(|artists| artists.into_iter().map(to_artist).collect()),
            release_name: track.release_name,
            release_mb_id: track.release_mb_id,
            isrc: track.isrc,
            origin_url: track.origin_url,
            music_service_base_domain: Some(
                track
                    .music_service_base_domain
                    .unwrap_or_else(|| DEFAULT_SERVICE_DOMAIN.to_string()),
            ),
            submission_client_agent,
            played_time: track.played_time,
            track_discriminant: track.track_discriminant,
            release_discriminant: track.release_discriminant,
        }
    }

    async fn submit(&self, play: &Play) -> TealResult<RecordRef> {
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            match self.store.create(play).await {
                Ok(record) => return Ok(record),
                Err(e) if policy.should_retry(attempt, &e) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Submitting '{}' failed ({}), retrying in {:?}",
                        play.track_name, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn scrobble_track(&self, track: ParsedTrack) -> OnyxResult<RecordRef> {
        let name = track.track_name.clone();
        let play = self.to_play(track);

        match self.submit(&play).await {
            Ok(record) => {
                println!("{} {}", style("[✓]").green().bold(), name);
                debug!("Created {}", record.uri);
                Ok(record)
            }
            Err(e) => {
                println!("{} {}", style("[✗]").red().bold(), name);
                Err(OnyxError::Scrobble {
                    message: format!("{}, for '{}'", e, name),
                })
            }
        }
    }

    /// Submits tracks in order, carrying on past failures.
    pub async fn scrobble_tracks(&self, tracks: Vec<ParsedTrack>) -> ScrobbleSummary {
        let mut summary = ScrobbleSummary::default();

        for track in tracks {
            match self.scrobble_track(track).await {
                Ok(_) => summary.submitted += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(e.to_string());
                }
            }
        }

        summary
    }

    pub async fn scrobble_logfile(
        &self,
        path: &Path,
        format: LogFormat,
        delete: bool,
    ) -> OnyxResult<ScrobbleSummary> {
        println!(
            "{} {}",
            style("scrobbling log:").dim(),
            style(path.display()).dim()
        );

        let tracks = format.parser().parse_file(path)?;
        debug!("Parsed {} tracks from {}", tracks.len(), path.display());

        let summary = self.scrobble_tracks(tracks).await;
        print_summary(&summary);

        if !summary.is_success() {
            return Err(OnyxError::Scrobble {
                message: format!(
                    "failed to scrobble log file {}, see errors above",
                    path.display()
                ),
            });
        }

        if delete {
            std::fs::remove_file(path)?;
            info!("Deleted {}", path.display());
        }

        Ok(summary)
    }
}

fn print_summary(summary: &ScrobbleSummary) {
    if summary.is_success() {
        println!(
            "\n{}: {} tracks submitted",
            style("success").green().bold(),
            summary.submitted
        );
        return;
    }

    println!("\n{}:", style("errors").red().bold());
    for error in &summary.errors {
        println!("  - {}", error);
    }
    println!(
        "\n{}: {} tracks submitted, {} failed",
        style("summary").yellow().bold(),
        summary.submitted,
        summary.failed
    );
}

/// Parses a log and prints what would be submitted.
pub fn preview_logfile(path: &Path, format: LogFormat) -> OnyxResult<Vec<ParsedTrack>> {
    let tracks = format.parser().parse_file(path)?;

    for track in &tracks {
        let artists = track.artist_display().unwrap_or_default();
        let played = track
            .played_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S %:z").to_string())
            .unwrap_or_default();
        println!(
            "{} {} {} {}",
            style("[ ]").dim(),
            track.track_name,
            style(artists).cyan(),
            style(played).dim()
        );
    }

    println!(
        "\n{}: {} tracks would be submitted",
        style("dry run").yellow().bold(),
        tracks.len()
    );
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::Mutex;
    use teal::{Did, RetryPolicy, TealError};

    struct MockStore {
        did: Did,
        created: Mutex<Vec<Value>>,
        failures: Mutex<VecDeque<TealError>>,
        rejected: Vec<String>,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                did: Did::new("did:plc:mock").unwrap(),
                created: Mutex::new(Vec::new()),
                failures: Mutex::new(VecDeque::new()),
                rejected: Vec::new(),
            }
        }

        fn failing_first(self, errors: Vec<TealError>) -> Self {
            *self.failures.lock().unwrap() = errors.into();
            self
        }

        fn rejecting(mut self, track_name: &str) -> Self {
            self.rejected.push(track_name.to_string());
            self
        }

        fn created(&self) -> Vec<Value> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordStore for MockStore {
        fn repo_did(&self) -> &Did {
            &self.did
        }

        async fn create_record(&self, collection: &str, record: Value) -> TealResult<RecordRef> {
            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }

            let name = record["trackName"].as_str().unwrap_or_default().to_string();
            if self.rejected.contains(&name) {
                return Err(TealError::Xrpc {
                    status: 400,
                    error: "InvalidRecord".to_string(),
                    message: "Record failed validation".to_string(),
                });
            }

            let mut created = self.created.lock().unwrap();
            created.push(record);
            Ok(RecordRef {
                uri: format!("at://{}/{}/{}", self.did, collection, created.len()),
                cid: "bafy".to_string(),
            })
        }

        async fn put_record(
            &self,
            _collection: &str,
            _rkey: &str,
            _record: Value,
        ) -> TealResult<RecordRef> {
            unreachable!("scrobbling never puts records")
        }

        async fn get_record(
            &self,
            _repo: &Did,
            _collection: &str,
            _rkey: &str,
        ) -> TealResult<Option<Value>> {
            Ok(None)
        }
    }

    fn config() -> OnyxConfig {
        OnyxConfig::new("/tmp/onyx-test")
            .with_retry(RetryPolicy::with_retries(2, 1).without_jitter())
    }

    const LOG: &str = "#AUDIOSCROBBLER/1.1\n\
        #TZ/UTC\n\
        #CLIENT/Rockbox sansaclipplus $Revision$\n\
        Band\tAlbum\tFirst\t1\t200\tL\t1714557600\t\n\
        Band\tAlbum\tSkipped\t2\t180\tS\t1714557800\t\n\
        Band\t\tSecond\t\t150\tL\t1714558000\tb1a9c0e9-d987-4042-ae91-78d6a3267d69\n";

    fn write_log(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_to_play_defaults() {
        let store = MockStore::new();
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);

        let played = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z").unwrap();
        let mut track = ParsedTrack::new("Song")
            .with_artist("Band")
            .with_release("Album")
            .with_duration(215)
            .with_played_time(played);
        track.client_id = Some("Rockbox".to_string());

        let play = scrobbler.to_play(track);
        assert_eq!(play.track_name, "Song");
        assert_eq!(play.music_service_base_domain.as_deref(), Some("local"));
        assert_eq!(
            play.submission_client_agent,
            Some(format!("onyx/{} (Rockbox)", env!("CARGO_PKG_VERSION")))
        );
        assert_eq!(play.artists, Some(vec![Artist::new("Band")]));
        assert_eq!(play.release_name.as_deref(), Some("Album"));
        assert_eq!(play.duration, Some(215));
        assert_eq!(play.played_time, Some(played));
    }

    #[test]
    fn test_to_play_keeps_service_domain() {
        let store = MockStore::new();
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);

        let mut track = ParsedTrack::new("Song");
        track.music_service_base_domain = Some("tidal.com".to_string());

        let play = scrobbler.to_play(track);
        assert_eq!(play.music_service_base_domain.as_deref(), Some("tidal.com"));
        assert_eq!(
            play.submission_client_agent,
            Some(format!("onyx/{}", env!("CARGO_PKG_VERSION")))
        );
    }

    #[tokio::test]
    async fn test_scrobble_track_retries_transient_errors() {
        let store = MockStore::new().failing_first(vec![
            TealError::RateLimit,
            TealError::ServiceUnavailable {
                message: "busy".to_string(),
            },
        ]);
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);

        scrobbler
            .scrobble_track(ParsedTrack::new("Song"))
            .await
            .unwrap();
        assert_eq!(store.created().len(), 1);
    }

    #[tokio::test]
    async fn test_scrobble_track_gives_up() {
        let store = MockStore::new().failing_first(vec![
            TealError::RateLimit,
            TealError::RateLimit,
            TealError::RateLimit,
        ]);
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);

        let err = scrobbler
            .scrobble_track(ParsedTrack::new("Song"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("for 'Song'"));
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn test_scrobble_logfile_submits_in_order() {
        let store = MockStore::new();
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);
        let log = write_log(LOG);

        let summary = scrobbler
            .scrobble_logfile(log.path(), LogFormat::AudioScrobbler, false)
            .await
            .unwrap();

        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.failed, 0);

        let created = store.created();
        assert_eq!(created[0]["trackName"], "First");
        assert_eq!(created[0]["releaseName"], "Album");
        let played = created[0]["playedTime"].as_str().unwrap();
        assert_eq!(
            DateTime::parse_from_rfc3339(played).unwrap().timestamp(),
            1714557600
        );
        assert_eq!(created[1]["trackName"], "Second");
        assert_eq!(
            created[1]["trackMbId"],
            "b1a9c0e9-d987-4042-ae91-78d6a3267d69"
        );
        assert!(created[1]["submissionClientAgent"]
            .as_str()
            .unwrap()
            .ends_with("(Rockbox sansaclipplus $Revision$)"));
        assert!(log.path().exists());
    }

    #[tokio::test]
    async fn test_scrobble_logfile_deletes_on_success() {
        let store = MockStore::new();
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);
        let log = write_log(LOG);
        let path = log.path().to_path_buf();

        scrobbler
            .scrobble_logfile(&path, LogFormat::AudioScrobbler, true)
            .await
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_scrobble_logfile_keeps_log_on_failure() {
        let store = MockStore::new().rejecting("First");
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);
        let log = write_log(LOG);

        let err = scrobbler
            .scrobble_logfile(log.path(), LogFormat::AudioScrobbler, true)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("failed to scrobble log file"));
        assert!(log.path().exists());

        let created = store.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["trackName"], "Second");
    }

    #[tokio::test]
    async fn test_scrobble_logfile_parse_error() {
        let store = MockStore::new();
        let config = config();
        let scrobbler = Scrobbler::new(&store, &config);
        let log = write_log("#TZ/UTC\nBand\tAlbum\tSong\t1\t200\tL\t1714557600\n");

        let result = scrobbler
            .scrobble_logfile(log.path(), LogFormat::AudioScrobbler, false)
            .await;
        assert!(matches!(result, Err(OnyxError::Parse(_))));
        assert!(store.created().is_empty());
    }

    #[test]
    fn test_preview_logfile() {
        let log = write_log(LOG);
        let tracks = preview_logfile(log.path(), LogFormat::AudioScrobbler).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_name, "First");
    }
}
