//! onyx publishes listening history to teal.fm.
//!
//! The binary wires these pieces together; they are exposed as a library
//! so other frontends can reuse login handling and scrobbling.

pub mod auth;
pub mod config;
pub mod error;
pub mod scrobble;
pub mod status;
pub mod store;

pub use auth::{Account, AuthSession, Authenticator};
pub use config::OnyxConfig;
pub use error::{OnyxError, OnyxResult};
pub use scrobble::{preview_logfile, ScrobbleSummary, Scrobbler};
pub use status::{render_status, StatusManager};
pub use store::{CredentialStore, StoreMethod};
