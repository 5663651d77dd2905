use logfile::ParseError;
use teal::TealError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OnyxError {
    #[error(transparent)]
    Teal(#[from] TealError),

    #[error("Failed to parse log: {0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid config file: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Not logged in, run `onyx auth login <handle>` first")]
    NotLoggedIn,

    #[error("Stored credentials for {did} are missing, please log in again")]
    MissingCredentials { did: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{message}")]
    Scrobble { message: String },
}

impl OnyxError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

pub type OnyxResult<T> = Result<T, OnyxError>;
