use chrono::{DateTime, FixedOffset, Local};
use clap::builder::styling::{AnsiColor, Effects};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use console::style;
use logfile::{LogFormat, ParsedTrack};
use onyx::auth::Authenticator;
use onyx::config::OnyxConfig;
use onyx::error::OnyxResult;
use onyx::scrobble::{preview_logfile, Scrobbler};
use onyx::status::{self, render_status, StatusManager};
use onyx::store::StoreMethod;
use std::path::PathBuf;
use std::process::ExitCode;
use teal::{Identifier, PlayView};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightGreen.on_default().effects(Effects::BOLD))
        .usage(AnsiColor::BrightGreen.on_default().effects(Effects::BOLD))
        .literal(AnsiColor::BrightCyan.on_default().effects(Effects::BOLD))
        .placeholder(AnsiColor::BrightYellow.on_default())
        .valid(AnsiColor::BrightGreen.on_default())
        .invalid(AnsiColor::BrightRed.on_default())
}

#[derive(Parser)]
#[command(name = "onyx", version)]
#[command(about = "Scrobble your listening history to teal.fm")]
#[command(styles = cli_styles())]
struct Cli {
    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding config.toml and stored sessions
    #[arg(long, global = true, env = "ONYX_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authentication related commands
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Scrobble tracks
    Scrobble {
        #[command(subcommand)]
        command: ScrobbleCommands,
    },
    /// Show or change the "now playing" status
    Status {
        #[command(subcommand)]
        command: StatusCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Login with an ATProto handle or DID
    Login {
        /// Handle or DID of the account
        ident: String,
        /// Where to keep credentials [default: keyring, or default_store from config.toml]
        #[arg(short, long)]
        store: Option<StoreMethod>,
        /// App password; OAuth in the browser is used when not given
        #[arg(short, long, env = "ONYX_APP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Logout of your account
    Logout,
    /// Display user information
    Whoami,
}

/// Track details shared by `scrobble track` and `status set`.
#[derive(clap::Args)]
struct TrackArgs {
    /// Track name
    name: String,
    /// Artist name, may be repeated
    #[arg(short, long = "artist")]
    artists: Vec<String>,
    /// Release (album) name
    #[arg(short, long)]
    release: Option<String>,
    /// Track length in seconds
    #[arg(short, long)]
    duration: Option<i64>,
    /// MusicBrainz track id
    #[arg(long)]
    track_mbid: Option<String>,
}

impl TrackArgs {
    fn into_track(self) -> ParsedTrack {
        let mut track = ParsedTrack::new(self.name);
        for artist in self.artists {
            track = track.with_artist(artist);
        }
        track.release_name = self.release;
        track.duration = self.duration;
        track.track_mb_id = self.track_mbid;
        track
    }
}

#[derive(Subcommand)]
enum ScrobbleCommands {
    /// Scrobble a single track
    Track {
        #[command(flatten)]
        track: TrackArgs,
        /// When the track was played, RFC 3339 [default: now]
        #[arg(long, value_parser = parse_played_at)]
        played_at: Option<DateTime<FixedOffset>>,
    },
    /// Scrobble tracks from a log file
    Logfile {
        /// Log file path
        log: PathBuf,
        /// Log file format
        #[arg(short, long, default_value = "audio-scrobbler")]
        format: LogFormat,
        /// Delete the log file once every track was submitted
        #[arg(short, long)]
        delete: bool,
        /// Print the parsed tracks without submitting anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum StatusCommands {
    /// Show the status of an account [default: the logged in account]
    Get {
        /// Handle or DID
        ident: Option<String>,
        /// Show the record as stored, even when empty or expired
        #[arg(long)]
        raw: bool,
        /// Include identifiers and submission details
        #[arg(long)]
        full: bool,
    },
    /// Set the status to a track
    Set {
        #[command(flatten)]
        track: TrackArgs,
        /// Minutes until the status expires [default: track duration, or 10]
        #[arg(short, long, value_parser = clap::value_parser!(i64).range(1..))]
        expiry_minutes: Option<i64>,
    },
    /// Clear the status
    Clear,
}

fn parse_played_at(s: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(s).map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "warn,onyx=debug,teal=debug,logfile=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> OnyxResult<()> {
    let config = OnyxConfig::load(cli.config_dir)?;

    match cli.command {
        Commands::Auth { command } => run_auth(&config, command).await,
        Commands::Scrobble { command } => run_scrobble(&config, command).await,
        Commands::Status { command } => run_status(&config, command).await,
    }
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

async fn run_auth(config: &OnyxConfig, command: AuthCommands) -> OnyxResult<()> {
    let authenticator = Authenticator::try_new(config)?;

    match command {
        AuthCommands::Login {
            ident,
            store,
            password,
        } => {
            let store = store.unwrap_or(config.default_store);
            let session = match password {
                Some(password) => authenticator.login(&ident, store, &password).await?,
                None => {
                    authenticator
                        .login_oauth(&ident, store, |request| {
                            eprintln!("Open this link in your browser to authorize onyx:");
                            eprintln!("  {}", style(&request.authorize_url).cyan().underlined());
                        })
                        .await?
                }
            };
            println!(
                "{} logged in as {} ({}), credentials stored in {}",
                style("success:").green().bold(),
                style(&session.handle).cyan(),
                session.did,
                session.store
            );
        }
        AuthCommands::Logout => {
            let session = authenticator.logout().await?;
            println!(
                "{} logged out of {}",
                style("success:").green().bold(),
                style(&session.handle).cyan()
            );
        }
        AuthCommands::Whoami => {
            let account = authenticator.whoami().await?;
            println!("handle: {}", account.handle);
            println!("did: {}", account.did);
            println!("pds: {}", account.pds);
            if let Some(email) = account.email {
                println!("email: {}", email);
            }
        }
    }

    Ok(())
}

async fn run_scrobble(config: &OnyxConfig, command: ScrobbleCommands) -> OnyxResult<()> {
    if let ScrobbleCommands::Logfile {
        log,
        format,
        dry_run: true,
        ..
    } = &command
    {
        preview_logfile(log, *format)?;
        return Ok(());
    }

    let authenticator = Authenticator::try_new(config)?;
    let (pointer, agent) = authenticator.agent()?;
    let scrobbler = Scrobbler::new(&agent, config);

    let result = match command {
        ScrobbleCommands::Track { track, played_at } => {
            let track = track
                .into_track()
                .with_played_time(played_at.unwrap_or_else(now));
            scrobbler.scrobble_track(track).await.map(|_| ())
        }
        ScrobbleCommands::Logfile {
            log,
            format,
            delete,
            ..
        } => scrobbler
            .scrobble_logfile(&log, format, delete)
            .await
            .map(|_| ()),
    };

    authenticator.persist(&pointer, &agent.session().await)?;
    result
}

async fn run_status(config: &OnyxConfig, command: StatusCommands) -> OnyxResult<()> {
    let authenticator = Authenticator::try_new(config)?;

    match command {
        StatusCommands::Get { ident, raw, full } => {
            let ident: Identifier = match ident {
                Some(ident) => ident.parse()?,
                None => Identifier::Did(authenticator.restore()?.0.did),
            };

            let manager = StatusManager::try_new(config)?;
            let (identity, status) = manager.get_status(&ident).await?;
            debug!("Status of {} on {}", identity.did, identity.pds);

            match status {
                Some(status) => print!("{}", render_status(&status, raw, full, now())),
                None => println!("nothing playing right now"),
            }
            Ok(())
        }
        StatusCommands::Set {
            track,
            expiry_minutes,
        } => {
            let (pointer, agent) = authenticator.agent()?;
            let now = now();
            let play = Scrobbler::new(&agent, config)
                .to_play(track.into_track().with_played_time(now));
            let new_status = status::now_playing(PlayView::from(play), now, expiry_minutes)?;

            let result = status::set_status(&agent, &new_status).await;
            authenticator.persist(&pointer, &agent.session().await)?;
            result?;

            println!(
                "{} now playing {}",
                style("success:").green().bold(),
                style(&new_status.item.track_name).cyan()
            );
            Ok(())
        }
        StatusCommands::Clear => {
            let (pointer, agent) = authenticator.agent()?;
            let result = status::clear_status(&agent, now()).await;
            authenticator.persist(&pointer, &agent.session().await)?;
            result?;

            println!("{} status cleared", style("success:").green().bold());
            Ok(())
        }
    }
}
