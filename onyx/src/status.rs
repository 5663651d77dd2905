//! Reading and writing the `fm.teal.alpha.actor.status` record, the
//! "now playing" slot of an account.

use crate::config::OnyxConfig;
use crate::error::{OnyxError, OnyxResult};
use chrono::{DateTime, Duration, FixedOffset, Local};
use std::fmt::Write;
use teal::{
    AtUri, Did, Identifier, IdentityResolver, PlayView, PublicRepo, RecordRef, RecordStore,
    RecordStoreExt, ResolvedIdentity, Status, XrpcClient, STATUS_NSID, STATUS_RKEY,
};
use tracing::{debug, info};

/// Used when neither an explicit expiry nor a track duration is known.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 10;

pub fn status_uri(did: &Did) -> AtUri {
    AtUri::record(did, STATUS_NSID, STATUS_RKEY)
}

pub struct StatusManager {
    xrpc: XrpcClient,
    resolver: IdentityResolver,
}

impl StatusManager {
    pub fn try_new(config: &OnyxConfig) -> OnyxResult<Self> {
        let xrpc = XrpcClient::new(&config.teal)?;
        Ok(Self {
            resolver: IdentityResolver::with_client(xrpc.clone(), &config.teal),
            xrpc,
        })
    }

    /// Looks up the current status of any account without logging in.
    pub async fn get_status(
        &self,
        ident: &Identifier,
    ) -> OnyxResult<(ResolvedIdentity, Option<Status>)> {
        let identity = self.resolver.resolve(ident).await?;
        debug!("Fetching {}", status_uri(&identity.did));

        let repo = PublicRepo::new(self.xrpc.clone(), identity.pds.clone());
        let status = repo.get::<Status>(&identity.did, STATUS_RKEY).await?;
        Ok((identity, status))
    }
}

pub async fn set_status<S: RecordStore + ?Sized>(
    store: &S,
    status: &Status,
) -> OnyxResult<RecordRef> {
    let record = store.put(STATUS_RKEY, status).await?;
    info!("Updated status for {}", store.repo_did());
    Ok(record)
}

/// Replaces the status with an empty item that has already expired.
pub async fn clear_status<S: RecordStore + ?Sized>(
    store: &S,
    now: DateTime<FixedOffset>,
) -> OnyxResult<RecordRef> {
    let status = Status {
        time: now,
        expiry: Some(now - Duration::minutes(1)),
        item: PlayView::default(),
    };
    set_status(store, &status).await
}

/// A status for `item` starting at `now`.
///
/// The expiry is `expiry_minutes` from now when given, else the track
/// duration, else [`DEFAULT_EXPIRY_MINUTES`].
pub fn now_playing(
    item: PlayView,
    now: DateTime<FixedOffset>,
    expiry_minutes: Option<i64>,
) -> OnyxResult<Status> {
    let lifetime = match (expiry_minutes, item.duration) {
        (Some(minutes), _) if minutes < 1 => {
            return Err(OnyxError::invalid_input(
                "Expiry must be at least one minute",
            ))
        }
        (Some(minutes), _) => Duration::try_minutes(minutes),
        (None, Some(seconds)) if seconds > 0 => Duration::try_seconds(seconds),
        _ => Duration::try_minutes(DEFAULT_EXPIRY_MINUTES),
    };

    let expiry = lifetime
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| OnyxError::invalid_input("Status expiry is too far in the future"))?;

    Ok(Status {
        time: now,
        expiry: Some(expiry),
        item,
    })
}

/// `H:MM:SS` above an hour, otherwise `M:SS`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Renders a status the way `onyx status get` prints it.
///
/// `raw` shows the record as stored, including empty and expired items;
/// `full` adds identifiers and submission details.
pub fn render_status(
    status: &Status,
    raw: bool,
    full: bool,
    now: DateTime<FixedOffset>,
) -> String {
    let item = &status.item;
    if !raw && (item.is_empty() || status.is_expired_at(now)) {
        return "nothing playing right now\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "track: {}", item.track_name);

    if full {
        if let Some(id) = &item.track_mb_id {
            let _ = writeln!(out, "track id: {}", id);
        }
        if let Some(id) = &item.recording_mb_id {
            let _ = writeln!(out, "recording id: {}", id);
        }
    }

    if !item.artists.is_empty() || raw {
        let artists: Vec<String> = item
            .artists
            .iter()
            .map(|artist| match (&artist.artist_mb_id, full) {
                (Some(id), true) => format!("{} [{}]", artist.artist_name, id),
                _ => artist.artist_name.clone(),
            })
            .collect();
        let _ = writeln!(out, "artists: {}", artists.join(", "));
    }

    if let Some(release) = &item.release_name {
        let _ = writeln!(out, "release: {}", release);
    }

    if full {
        if let Some(id) = &item.release_mb_id {
            let _ = writeln!(out, "release id: {}", id);
        }
        if let Some(isrc) = &item.isrc {
            let _ = writeln!(out, "isrc: {}", isrc);
        }
    }

    if let Some(played) = &item.played_time {
        let played = if raw {
            played.format("%Y-%m-%d %H:%M:%S %:z").to_string()
        } else {
            played
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        };
        let _ = writeln!(out, "played: {}", played);
    }

    if let Some(duration) = item.duration {
        let duration = if raw {
            duration.to_string()
        } else {
            format_duration(duration)
        };
        let _ = writeln!(out, "duration: {}", duration);
    }

    if full {
        if let Some(service) = &item.music_service_base_domain {
            let _ = writeln!(out, "service: {}", service);
        }
        if let Some(client) = &item.submission_client_agent {
            let _ = writeln!(out, "client: {}", client);
        }
    }

    out
}
