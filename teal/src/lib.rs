pub mod agent;
pub mod config;
pub mod dpop;
pub mod error;
pub mod identity;
pub mod lexicon;
pub mod oauth;
pub mod repo;
pub mod retry;
pub mod session;
pub mod types;
pub mod xrpc;

pub use agent::{Agent, PublicRepo};
pub use config::TealConfig;
pub use dpop::{DpopKey, DpopState};
pub use error::{TealError, TealResult};
pub use identity::{DidDocument, IdentityResolver, ResolvedIdentity};
pub use lexicon::{Artist, Lexicon, Play, PlayView, Status, PLAY_NSID, STATUS_NSID, STATUS_RKEY};
pub use oauth::{
    AuthServerMetadata, AuthorizationRequest, Callback, LoopbackServer, OAuthBinding, OAuthClient,
    OAUTH_SCOPE,
};
pub use repo::{RecordRef, RecordStore, RecordStoreExt};
pub use retry::RetryPolicy;
pub use session::{Session, SessionClient, SessionInfo};
pub use types::{AtUri, Did, Handle, Identifier};
pub use xrpc::{Auth, XrpcClient};

pub mod prelude {
    pub use crate::agent::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::identity::*;
    pub use crate::lexicon::*;
    pub use crate::oauth::*;
    pub use crate::repo::*;
    pub use crate::retry::*;
    pub use crate::session::*;
    pub use crate::types::*;
}
