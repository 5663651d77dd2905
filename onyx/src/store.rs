//! Credential storage
//!
//! Sessions carry bearer tokens, so they live either in the platform
//! keyring or in a JSON file only the current user can read. The small
//! `session.json` pointer managed by [`crate::auth`] records which of the
//! two holds the active session.

use crate::error::{OnyxError, OnyxResult};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use teal::{Did, Session};
use tempfile::NamedTempFile;
use tracing::debug;

pub const STORE_FILE: &str = "store.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreMethod {
    /// Use the system keyring, if available
    #[default]
    Keyring,

    /// Save credentials to a file in the config directory
    File,
}

impl fmt::Display for StoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMethod::Keyring => f.write_str("keyring"),
            StoreMethod::File => f.write_str("file"),
        }
    }
}

pub trait CredentialStore: Send + Sync {
    fn load(&self, did: &Did) -> OnyxResult<Option<Session>>;

    fn save(&self, session: &Session) -> OnyxResult<()>;

    /// Removing credentials that do not exist is not an error.
    fn delete(&self, did: &Did) -> OnyxResult<()>;

    fn method(&self) -> StoreMethod;
}

pub fn credential_store(
    method: StoreMethod,
    service: &str,
    config_dir: &Path,
) -> Box<dyn CredentialStore> {
    match method {
        StoreMethod::Keyring => Box::new(KeyringCredentialStore::new(service)),
        StoreMethod::File => Box::new(FileCredentialStore::new(config_dir.join(STORE_FILE))),
    }
}

/// Sessions keyed by DID in a single JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> OnyxResult<BTreeMap<String, Session>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_all(&self, sessions: &BTreeMap<String, Session>) -> OnyxResult<()> {
        if sessions.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        // NamedTempFile is created 0600, persist() renames it over the store
        let mut file = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut file, sessions)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, did: &Did) -> OnyxResult<Option<Session>> {
        Ok(self.read_all()?.remove(did.as_str()))
    }

    fn save(&self, session: &Session) -> OnyxResult<()> {
        let mut sessions = self.read_all()?;
        sessions.insert(session.did.to_string(), session.clone());
        debug!("Saving session for {} to {}", session.did, self.path.display());
        self.write_all(&sessions)
    }

    fn delete(&self, did: &Did) -> OnyxResult<()> {
        let mut sessions = self.read_all()?;
        if sessions.remove(did.as_str()).is_some() {
            self.write_all(&sessions)?;
        }
        Ok(())
    }

    fn method(&self) -> StoreMethod {
        StoreMethod::File
    }
}

/// One keyring entry per account, holding the serialized session.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, did: &Did) -> OnyxResult<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, did.as_str())?)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self, did: &Did) -> OnyxResult<Option<Session>> {
        match self.entry(did)?.get_password() {
            Ok(value) => Ok(Some(serde_json::from_str(&value)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &Session) -> OnyxResult<()> {
        let value = serde_json::to_string(session)?;
        debug!("Saving session for {} to the keyring", session.did);
        self.entry(&session.did)?.set_password(&value)?;
        Ok(())
    }

    fn delete(&self, did: &Did) -> OnyxResult<()> {
        match self.entry(did)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn method(&self) -> StoreMethod {
        StoreMethod::Keyring
    }
}

pub(crate) fn missing_credentials(did: &Did) -> OnyxError {
    OnyxError::MissingCredentials {
        did: did.to_string(),
    }
}
