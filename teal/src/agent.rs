use crate::dpop::{DpopKey, DpopState};
use crate::error::{TealError, TealResult};
use crate::lexicon::{from_record_value, Lexicon};
use crate::oauth::OAuthClient;
use crate::repo::{found, RecordOutput, RecordRef, RecordStore};
use crate::session::{Session, SessionClient, SessionInfo};
use crate::types::Did;
use crate::xrpc::{Auth, XrpcClient};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct CreateRecordInput<'a> {
    repo: &'a str,
    collection: &'a str,
    record: Value,
}

#[derive(Serialize)]
struct PutRecordInput<'a> {
    repo: &'a str,
    collection: &'a str,
    rkey: &'a str,
    record: Value,
}

async fn fetch_record(
    xrpc: &XrpcClient,
    pds: &str,
    repo: &Did,
    collection: &str,
    rkey: &str,
) -> TealResult<Option<Value>> {
    let output: Option<RecordOutput> = found(
        xrpc.query(
            pds,
            "com.atproto.repo.getRecord",
            &[
                ("repo", repo.as_str()),
                ("collection", collection),
                ("rkey", rkey),
            ],
            None,
        )
        .await,
    )?;

    Ok(output.map(|o| o.value))
}

/// Authenticated access to the session owner's repository.
///
/// An expired access token is refreshed once per request; callers should
/// persist [`Agent::session`] afterwards so the new tokens survive. OAuth
/// sessions sign every request with the session's DPoP key.
pub struct Agent {
    xrpc: XrpcClient,
    sessions: SessionClient,
    oauth: OAuthClient,
    dpop: Option<DpopState>,
    did: Did,
    session: RwLock<Session>,
}

impl Agent {
    pub fn new(xrpc: XrpcClient, session: Session) -> TealResult<Self> {
        let dpop = match &session.oauth {
            Some(binding) => Some(DpopState::new(DpopKey::decode(&binding.dpop_key)?)),
            None => None,
        };

        Ok(Self {
            sessions: SessionClient::new(xrpc.clone()),
            oauth: OAuthClient::new(xrpc.clone()),
            xrpc,
            dpop,
            did: session.did.clone(),
            session: RwLock::new(session),
        })
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    async fn credentials(&self) -> (String, String) {
        let session = self.session.read().await;
        (session.pds.clone(), session.access_jwt.clone())
    }

    fn auth<'a>(&'a self, token: &'a str) -> Auth<'a> {
        match &self.dpop {
            Some(state) => Auth::Dpop {
                token: Some(token),
                state,
            },
            None => Auth::Bearer(token),
        }
    }

    pub async fn refresh(&self) -> TealResult<()> {
        let current = self.session().await;
        let refreshed = if current.is_oauth() {
            self.oauth.refresh(&current).await?
        } else {
            self.sessions.refresh(&current).await?
        };
        *self.session.write().await = refreshed;
        info!("Refreshed session for {}", self.did);
        Ok(())
    }

    async fn authed_procedure<B, T>(&self, nsid: &str, body: &B) -> TealResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let (pds, token) = self.credentials().await;
        match self
            .xrpc
            .procedure_with(&pds, nsid, Some(body), self.auth(&token))
            .await
        {
            Err(TealError::ExpiredToken) => {
                warn!("Access token expired, refreshing");
                self.refresh().await?;
                let (pds, token) = self.credentials().await;
                self.xrpc
                    .procedure_with(&pds, nsid, Some(body), self.auth(&token))
                    .await
            }
            other => other,
        }
    }

    async fn authed_query<T: DeserializeOwned>(&self, nsid: &str) -> TealResult<T> {
        let (pds, token) = self.credentials().await;
        match self
            .xrpc
            .query_with(&pds, nsid, &[], self.auth(&token))
            .await
        {
            Err(TealError::ExpiredToken) => {
                warn!("Access token expired, refreshing");
                self.refresh().await?;
                let (pds, token) = self.credentials().await;
                self.xrpc
                    .query_with(&pds, nsid, &[], self.auth(&token))
                    .await
            }
            other => other,
        }
    }

    /// `com.atproto.server.getSession` for the current tokens.
    pub async fn session_info(&self) -> TealResult<SessionInfo> {
        self.authed_query("com.atproto.server.getSession").await
    }

    /// Invalidates the session on the server: OAuth tokens are revoked,
    /// app-password sessions deleted.
    pub async fn end_session(&self) -> TealResult<()> {
        let session = self.session().await;
        if session.is_oauth() {
            self.oauth.revoke(&session).await
        } else {
            self.sessions.delete(&session).await
        }
    }
}

#[async_trait]
impl RecordStore for Agent {
    fn repo_did(&self) -> &Did {
        &self.did
    }

    async fn create_record(&self, collection: &str, record: Value) -> TealResult<RecordRef> {
        debug!("Creating {} record in {}", collection, self.did);

        let input = CreateRecordInput {
            repo: self.did.as_str(),
            collection,
            record,
        };
        self.authed_procedure("com.atproto.repo.createRecord", &input)
            .await
    }

    async fn put_record(
        &self,
        collection: &str,
        rkey: &str,
        record: Value,
    ) -> TealResult<RecordRef> {
        debug!("Putting {}/{} in {}", collection, rkey, self.did);

        let input = PutRecordInput {
            repo: self.did.as_str(),
            collection,
            rkey,
            record,
        };
        self.authed_procedure("com.atproto.repo.putRecord", &input)
            .await
    }

    async fn get_record(
        &self,
        repo: &Did,
        collection: &str,
        rkey: &str,
    ) -> TealResult<Option<Value>> {
        let (pds, _) = self.credentials().await;
        fetch_record(&self.xrpc, &pds, repo, collection, rkey).await
    }
}

/// Unauthenticated reads from a known PDS.
pub struct PublicRepo {
    xrpc: XrpcClient,
    pds: String,
}

impl PublicRepo {
    pub fn new(xrpc: XrpcClient, pds: impl Into<String>) -> Self {
        Self {
            xrpc,
            pds: pds.into(),
        }
    }

    pub async fn get<T>(&self, repo: &Did, rkey: &str) -> TealResult<Option<T>>
    where
        T: Lexicon + DeserializeOwned,
    {
        match fetch_record(&self.xrpc, &self.pds, repo, T::NSID, rkey).await? {
            Some(value) => Ok(Some(from_record_value(value)?)),
            None => Ok(None),
        }
    }
}
