use thiserror::Error;

#[derive(Error, Debug)]
pub enum TealError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identifier: {message}")]
    InvalidIdentifier { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Identity resolution failed: {message}")]
    Resolution { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Session token expired")]
    ExpiredToken,

    #[error("Server requires a fresh DPoP nonce")]
    UseDpopNonce,

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("XRPC error {status} ({error}): {message}")]
    Xrpc {
        status: u16,
        error: String,
        message: String,
    },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl TealError {
    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Transient failures that may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TealError::RateLimit | TealError::ServiceUnavailable { .. }
        )
    }
}

pub type TealResult<T> = Result<T, TealError>;
