//! Logging in and keeping the session around between runs.
//!
//! The default login goes through ATProto OAuth in the browser; an app
//! password is the fallback for headless machines.

use crate::config::OnyxConfig;
use crate::error::{OnyxError, OnyxResult};
use crate::store::{credential_store, missing_credentials, CredentialStore, StoreMethod};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use teal::{
    Agent, AuthorizationRequest, Did, Handle, Identifier, IdentityResolver, LoopbackServer,
    OAuthClient, Session, SessionClient, XrpcClient,
};
use tracing::{debug, info, warn};

pub const SESSION_FILE: &str = "session.json";

/// Pointer to the active login; the tokens themselves live in `store`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub did: Did,
    pub handle: Handle,
    pub store: StoreMethod,
}

/// Result of `auth whoami`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub did: Did,
    pub handle: Handle,
    pub pds: String,
    pub email: Option<String>,
}

pub struct Authenticator {
    config: OnyxConfig,
    xrpc: XrpcClient,
    resolver: IdentityResolver,
    sessions: SessionClient,
    oauth: OAuthClient,
}

impl Authenticator {
    pub fn try_new(config: &OnyxConfig) -> OnyxResult<Self> {
        let xrpc = XrpcClient::new(&config.teal)?;
        Ok(Self {
            resolver: IdentityResolver::with_client(xrpc.clone(), &config.teal),
            sessions: SessionClient::new(xrpc.clone()),
            oauth: OAuthClient::new(xrpc.clone()),
            xrpc,
            config: config.clone(),
        })
    }

    fn session_path(&self) -> PathBuf {
        self.config.session_path()
    }

    fn store(&self, method: StoreMethod) -> Box<dyn CredentialStore> {
        credential_store(method, &self.config.service, &self.config.config_dir)
    }

    fn read_auth_session(&self) -> OnyxResult<Option<AuthSession>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write_auth_session(&self, auth: &AuthSession) -> OnyxResult<()> {
        fs::create_dir_all(&self.config.config_dir)?;
        fs::write(self.session_path(), serde_json::to_string_pretty(auth)?)?;
        Ok(())
    }

    /// Logs in with an app password.
    pub async fn login(
        &self,
        ident: &str,
        store: StoreMethod,
        password: &str,
    ) -> OnyxResult<AuthSession> {
        if password.is_empty() {
            return Err(OnyxError::invalid_input("App password cannot be empty"));
        }

        let identifier: Identifier = ident.parse()?;
        let identity = self.resolver.resolve(&identifier).await?;
        let session = self
            .sessions
            .create(&identity.pds, &identifier.to_string(), password)
            .await?;

        self.finish_login(session, store)
    }

    /// Logs in through the browser. `open` is handed the pending request
    /// once the redirect listener is up; the user has to visit its
    /// `authorize_url`.
    pub async fn login_oauth<F>(
        &self,
        ident: &str,
        store: StoreMethod,
        open: F,
    ) -> OnyxResult<AuthSession>
    where
        F: FnOnce(&AuthorizationRequest),
    {
        let identifier: Identifier = ident.parse()?;
        let identity = self.resolver.resolve(&identifier).await?;

        let listener = LoopbackServer::bind(self.config.oauth_port).await?;
        let request = self
            .oauth
            .authorize(&identity, listener.redirect_uri())
            .await?;
        debug!("Waiting for the redirect on {}", listener.redirect_uri());
        open(&request);

        let callback = listener
            .wait_for_callback(self.config.oauth_timeout)
            .await?;
        let session = self.oauth.exchange(request, callback).await?;

        self.finish_login(session, store)
    }

    fn finish_login(&self, session: Session, store: StoreMethod) -> OnyxResult<AuthSession> {
        if let Some(previous) = self.read_auth_session()? {
            if previous.did != session.did || previous.store != store {
                debug!("Replacing previous login for {}", previous.did);
                if let Err(e) = self.store(previous.store).delete(&previous.did) {
                    warn!("Failed to remove old credentials for {}: {}", previous.did, e);
                }
            }
        }

        self.store(store).save(&session)?;

        let auth = AuthSession {
            did: session.did.clone(),
            handle: session.handle.clone(),
            store,
        };
        self.write_auth_session(&auth)?;

        info!("Logged in as {} ({})", auth.handle, auth.did);
        Ok(auth)
    }

    pub fn restore(&self) -> OnyxResult<(AuthSession, Session)> {
        let auth = self.read_auth_session()?.ok_or(OnyxError::NotLoggedIn)?;
        let session = self
            .store(auth.store)
            .load(&auth.did)?
            .ok_or_else(|| missing_credentials(&auth.did))?;
        Ok((auth, session))
    }

    /// An [`Agent`] for the stored login.
    pub fn agent(&self) -> OnyxResult<(AuthSession, Agent)> {
        let (auth, session) = self.restore()?;
        Ok((auth, Agent::new(self.xrpc.clone(), session)?))
    }

    /// Saves refreshed tokens back to the store the login came from.
    pub fn persist(&self, auth: &AuthSession, session: &Session) -> OnyxResult<()> {
        let store = self.store(auth.store);
        if store.load(&auth.did)?.as_ref() == Some(session) {
            return Ok(());
        }
        debug!("Persisting refreshed session for {}", auth.did);
        store.save(session)
    }

    pub async fn logout(&self) -> OnyxResult<AuthSession> {
        let auth = self.read_auth_session()?.ok_or(OnyxError::NotLoggedIn)?;
        let store = self.store(auth.store);

        match store.load(&auth.did) {
            Ok(Some(session)) => {
                let ended = match Agent::new(self.xrpc.clone(), session) {
                    Ok(agent) => agent.end_session().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = ended {
                    warn!("Failed to end server session: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read stored credentials: {}", e),
        }

        store.delete(&auth.did)?;
        fs::remove_file(self.session_path())?;

        info!("Logged out {}", auth.did);
        Ok(auth)
    }

    pub async fn whoami(&self) -> OnyxResult<Account> {
        let (auth, agent) = self.agent()?;
        let info = agent.session_info().await;
        let session = agent.session().await;
        self.persist(&auth, &session)?;
        let info = info?;

        Ok(Account {
            did: info.did,
            handle: info.handle,
            pds: session.pds,
            email: info.email,
        })
    }
}
