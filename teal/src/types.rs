//! ATProto identifiers
//!
//! Syntax checks follow the ATProto identifier rules closely enough to
//! reject typos before any network request is made; the PDS remains the
//! final authority.

use crate::error::{TealError, TealResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_DID_LENGTH: usize = 2048;
const MAX_HANDLE_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// A decentralized identifier such as `did:plc:ewvi7nxzyoun6zhxrhs64oiz`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    pub fn new(did: &str) -> TealResult<Self> {
        if did.len() > MAX_DID_LENGTH {
            return Err(TealError::invalid_identifier("DID is too long"));
        }

        let rest = did
            .strip_prefix("did:")
            .ok_or_else(|| TealError::invalid_identifier(format!("'{}' is not a DID", did)))?;

        let (method, id) = rest.split_once(':').ok_or_else(|| {
            TealError::invalid_identifier(format!("DID '{}' has no method-specific id", did))
        })?;

        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(TealError::invalid_identifier(format!(
                "DID method '{}' must be lowercase letters",
                method
            )));
        }

        if id.is_empty() || id.ends_with(':') || id.chars().any(char::is_whitespace) {
            return Err(TealError::invalid_identifier(format!(
                "DID '{}' has an invalid method-specific id",
                did
            )));
        }

        Ok(Self(did.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn method(&self) -> &str {
        self.0[4..].split(':').next().unwrap_or_default()
    }

    /// Everything after `did:<method>:`
    pub fn method_specific_id(&self) -> &str {
        let prefix_len = 4 + self.method().len() + 1;
        &self.0[prefix_len..]
    }
}

impl FromStr for Did {
    type Err = TealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Did {
    type Error = TealError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Did> for String {
    fn from(value: Did) -> Self {
        value.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A domain-name handle such as `alice.bsky.social`, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LENGTH
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl Handle {
    pub fn new(handle: &str) -> TealResult<Self> {
        let handle = handle.strip_prefix('@').unwrap_or(handle);

        if handle.is_empty() || handle.len() > MAX_HANDLE_LENGTH {
            return Err(TealError::invalid_identifier(format!(
                "handle '{}' has an invalid length",
                handle
            )));
        }

        let labels: Vec<&str> = handle.split('.').collect();
        if labels.len() < 2 || !labels.iter().all(|l| valid_label(l)) {
            return Err(TealError::invalid_identifier(format!(
                "'{}' is not a valid handle",
                handle
            )));
        }

        if labels
            .last()
            .is_some_and(|tld| tld.starts_with(|c: char| c.is_ascii_digit()))
        {
            return Err(TealError::invalid_identifier(format!(
                "handle '{}' cannot end in a numeric label",
                handle
            )));
        }

        Ok(Self(handle.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = TealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = TealError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Handle> for String {
    fn from(value: Handle) -> Self {
        value.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a user may type to name an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Did(Did),
    Handle(Handle),
}

impl FromStr for Identifier {
    type Err = TealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("did:") {
            return Did::new(s).map(Identifier::Did);
        }
        Handle::new(s).map(Identifier::Handle)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Did(did) => did.fmt(f),
            Identifier::Handle(handle) => handle.fmt(f),
        }
    }
}

/// `at://<authority>/<collection>/<rkey>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: Option<String>,
    pub rkey: Option<String>,
}

impl AtUri {
    pub fn record(did: &Did, collection: &str, rkey: &str) -> Self {
        Self {
            authority: did.to_string(),
            collection: Some(collection.to_owned()),
            rkey: Some(rkey.to_owned()),
        }
    }
}

impl FromStr for AtUri {
    type Err = TealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("at://")
            .ok_or_else(|| TealError::invalid_identifier(format!("'{}' is not an at:// URI", s)))?;

        let mut parts = rest.trim_end_matches('/').split('/');
        let authority = parts
            .next()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| TealError::invalid_identifier("at:// URI has no authority"))?;
        let collection = parts.next().map(str::to_owned);
        let rkey = parts.next().map(str::to_owned);

        if parts.next().is_some() {
            return Err(TealError::invalid_identifier(format!(
                "at:// URI '{}' has too many path segments",
                s
            )));
        }

        Ok(Self {
            authority: authority.to_owned(),
            collection,
            rkey,
        })
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}", self.authority)?;
        if let Some(collection) = &self.collection {
            write!(f, "/{}", collection)?;
            if let Some(rkey) = &self.rkey {
                write!(f, "/{}", rkey)?;
            }
        }
        Ok(())
    }
}
