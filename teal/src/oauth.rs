//! ATProto OAuth for a native app
//!
//! onyx acts as a loopback client: the account's PDS names its
//! authorization server, the authorization request is pushed (PAR) with
//! PKCE and a DPoP proof, the user approves it in a browser, and the
//! redirect lands on a short-lived listener on `127.0.0.1`. The code from
//! that redirect is traded for DPoP-bound tokens.

use crate::dpop::{random_token, sha256_base64url, DpopKey, DpopState};
use crate::error::{TealError, TealResult};
use crate::identity::ResolvedIdentity;
use crate::session::Session;
use crate::types::Did;
use crate::xrpc::{Auth, XrpcClient};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub const OAUTH_SCOPE: &str = "atproto transition:generic";
pub const CALLBACK_PATH: &str = "/callback";

const LOOPBACK_CLIENT: &str = "http://localhost";
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// What a stored OAuth session needs besides its tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthBinding {
    pub issuer: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    pub client_id: String,
    /// Private key the tokens are bound to, see [`DpopKey::encode`]
    pub dpop_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub pushed_authorization_request_endpoint: String,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
}

#[derive(Deserialize)]
struct ProtectedResourceMetadata {
    #[serde(default)]
    authorization_servers: Vec<String>,
}

#[derive(Deserialize)]
struct ParResponse {
    request_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    token_type: String,
    sub: String,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn check(&self, did: &Did) -> TealResult<()> {
        if !self.token_type.eq_ignore_ascii_case("DPoP") {
            return Err(TealError::authentication(format!(
                "expected DPoP tokens, got '{}'",
                self.token_type
            )));
        }
        if self.sub != did.as_str() {
            return Err(TealError::authentication(format!(
                "tokens were issued for {} instead of {}",
                self.sub, did
            )));
        }
        let scope = self.scope.as_deref().unwrap_or_default();
        if !scope.split_whitespace().any(|s| s == "atproto") {
            return Err(TealError::authentication(format!(
                "granted scope '{}' does not include atproto",
                scope
            )));
        }
        Ok(())
    }
}

/// `http://localhost?redirect_uri=...&scope=...`
pub fn loopback_client_id(redirect_uri: &str) -> TealResult<String> {
    let url = Url::parse_with_params(
        LOOPBACK_CLIENT,
        &[("redirect_uri", redirect_uri), ("scope", OAUTH_SCOPE)],
    )
    .map_err(|e| TealError::InvalidConfig {
        message: format!("invalid redirect URI '{}': {}", redirect_uri, e),
    })?;
    Ok(format!(
        "{}?{}",
        LOOPBACK_CLIENT,
        url.query().unwrap_or_default()
    ))
}

/// S256 PKCE challenge for `verifier`.
pub fn pkce_challenge(verifier: &str) -> String {
    sha256_base64url(verifier)
}

/// A pushed authorization request waiting for the user's approval.
pub struct AuthorizationRequest {
    /// Page the user has to open
    pub authorize_url: String,
    pub state: String,
    identity: ResolvedIdentity,
    metadata: AuthServerMetadata,
    client_id: String,
    redirect_uri: String,
    verifier: String,
    dpop: DpopState,
}

impl AuthorizationRequest {
    /// Where the browser is sent once the user approves
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }
}

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub code: String,
    pub state: String,
    pub iss: Option<String>,
}

impl Callback {
    /// Parses a request target such as `/callback?code=...&state=...`.
    pub fn from_target(target: &str) -> TealResult<Self> {
        let url = Url::parse(&format!("http://127.0.0.1{}", target)).map_err(|e| {
            TealError::authentication(format!("malformed redirect '{}': {}", target, e))
        })?;

        let (mut code, mut state, mut iss, mut error, mut description) =
            (None, None, None, None, None);
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => code = value,
                "state" => state = value,
                "iss" => iss = value,
                "error" => error = value,
                "error_description" => description = value,
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(TealError::authentication(format!(
                "authorization failed: {}",
                description.unwrap_or(error)
            )));
        }

        match (code, state) {
            (Some(code), Some(state)) => Ok(Self { code, state, iss }),
            _ => Err(TealError::authentication(
                "redirect is missing the code or state",
            )),
        }
    }
}

fn rejected_grant(context: &'static str) -> impl Fn(TealError) -> TealError {
    move |e| match e {
        TealError::Xrpc { error, message, .. } if error == "invalid_grant" => {
            TealError::authentication(format!("{}: {}", context, message))
        }
        other => other,
    }
}

#[derive(Clone)]
pub struct OAuthClient {
    xrpc: XrpcClient,
}

impl OAuthClient {
    pub fn new(xrpc: XrpcClient) -> Self {
        Self { xrpc }
    }

    /// Finds the authorization server responsible for `pds`.
    pub async fn discover(&self, pds: &str) -> TealResult<AuthServerMetadata> {
        let pds = pds.trim_end_matches('/');
        let resource: ProtectedResourceMetadata = self
            .xrpc
            .get_json(&format!("{}/.well-known/oauth-protected-resource", pds))
            .await
            .map_err(|e| match e {
                TealError::NotFound { .. } => {
                    TealError::resolution(format!("{} does not support OAuth", pds))
                }
                other => other,
            })?;

        let issuer = resource
            .authorization_servers
            .into_iter()
            .next()
            .ok_or_else(|| {
                TealError::resolution(format!("{} names no authorization server", pds))
            })?;
        let issuer = issuer.trim_end_matches('/');

        let metadata: AuthServerMetadata = self
            .xrpc
            .get_json(&format!("{}/.well-known/oauth-authorization-server", issuer))
            .await?;

        if metadata.issuer.trim_end_matches('/') != issuer {
            return Err(TealError::resolution(format!(
                "authorization server metadata names issuer {} instead of {}",
                metadata.issuer, issuer
            )));
        }
        if !metadata.dpop_signing_alg_values_supported.is_empty()
            && !metadata
                .dpop_signing_alg_values_supported
                .iter()
                .any(|alg| alg == "ES256")
        {
            return Err(TealError::resolution(format!(
                "{} does not accept ES256 DPoP proofs",
                issuer
            )));
        }

        debug!("Authorization server for {} is {}", pds, metadata.issuer);
        Ok(metadata)
    }

    /// Pushes an authorization request for `identity` and returns the page
    /// the user has to approve it on.
    pub async fn authorize(
        &self,
        identity: &ResolvedIdentity,
        redirect_uri: &str,
    ) -> TealResult<AuthorizationRequest> {
        let metadata = self.discover(&identity.pds).await?;
        let client_id = loopback_client_id(redirect_uri)?;
        let verifier = random_token(32);
        let challenge = pkce_challenge(&verifier);
        let state = random_token(16);
        let dpop = DpopState::new(DpopKey::generate());
        let login_hint = match &identity.handle {
            Some(handle) => handle.as_str(),
            None => identity.did.as_str(),
        };

        let form = [
            ("response_type", "code"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", OAUTH_SCOPE),
            ("state", state.as_str()),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("login_hint", login_hint),
        ];
        let par: ParResponse = self
            .xrpc
            .post_form(
                &metadata.pushed_authorization_request_endpoint,
                &form,
                Auth::Dpop {
                    token: None,
                    state: &dpop,
                },
            )
            .await?;

        let authorize_url = Url::parse_with_params(
            &metadata.authorization_endpoint,
            &[
                ("client_id", client_id.as_str()),
                ("request_uri", par.request_uri.as_str()),
            ],
        )
        .map_err(|e| {
            TealError::resolution(format!(
                "invalid authorization endpoint '{}': {}",
                metadata.authorization_endpoint, e
            ))
        })?
        .to_string();

        Ok(AuthorizationRequest {
            authorize_url,
            state,
            identity: identity.clone(),
            metadata,
            client_id,
            redirect_uri: redirect_uri.to_string(),
            verifier,
            dpop,
        })
    }

    /// Trades the code from the redirect for a session.
    pub async fn exchange(
        &self,
        request: AuthorizationRequest,
        callback: Callback,
    ) -> TealResult<Session> {
        if callback.state != request.state {
            return Err(TealError::authentication(
                "redirect state does not match the request",
            ));
        }
        if let Some(iss) = &callback.iss {
            if iss.trim_end_matches('/') != request.metadata.issuer.trim_end_matches('/') {
                return Err(TealError::authentication(format!(
                    "redirect came from {} instead of {}",
                    iss, request.metadata.issuer
                )));
            }
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("code", callback.code.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
            ("code_verifier", request.verifier.as_str()),
            ("client_id", request.client_id.as_str()),
        ];
        let tokens: TokenResponse = self
            .xrpc
            .post_form(
                &request.metadata.token_endpoint,
                &form,
                Auth::Dpop {
                    token: None,
                    state: &request.dpop,
                },
            )
            .await
            .map_err(rejected_grant("authorization code rejected"))?;

        let identity = request.identity;
        tokens.check(&identity.did)?;

        let handle = identity
            .handle
            .ok_or_else(|| TealError::resolution(format!("{} has no handle", identity.did)))?;
        let refresh_token = tokens
            .refresh_token
            .ok_or_else(|| TealError::authentication("no refresh token was issued"))?;

        info!("Authorized {} through {}", identity.did, request.metadata.issuer);
        Ok(Session {
            did: identity.did,
            handle,
            pds: identity.pds,
            access_jwt: tokens.access_token,
            refresh_jwt: refresh_token,
            oauth: Some(OAuthBinding {
                issuer: request.metadata.issuer,
                token_endpoint: request.metadata.token_endpoint,
                revocation_endpoint: request.metadata.revocation_endpoint,
                client_id: request.client_id,
                dpop_key: request.dpop.key().encode(),
            }),
        })
    }

    fn binding(session: &Session) -> TealResult<&OAuthBinding> {
        session.oauth.as_ref().ok_or_else(|| {
            TealError::authentication(format!("session for {} is not an OAuth session", session.did))
        })
    }

    pub async fn refresh(&self, session: &Session) -> TealResult<Session> {
        let binding = Self::binding(session)?;
        debug!("Refreshing OAuth session for {}", session.did);

        let dpop = DpopState::new(DpopKey::decode(&binding.dpop_key)?);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", session.refresh_jwt.as_str()),
            ("client_id", binding.client_id.as_str()),
        ];
        let tokens: TokenResponse = self
            .xrpc
            .post_form(
                &binding.token_endpoint,
                &form,
                Auth::Dpop {
                    token: None,
                    state: &dpop,
                },
            )
            .await
            .map_err(rejected_grant("session expired, please log in again"))?;
        tokens.check(&session.did)?;

        Ok(Session {
            access_jwt: tokens.access_token,
            refresh_jwt: tokens
                .refresh_token
                .unwrap_or_else(|| session.refresh_jwt.clone()),
            ..session.clone()
        })
    }

    /// Revokes the refresh token when the server offers revocation.
    pub async fn revoke(&self, session: &Session) -> TealResult<()> {
        let binding = Self::binding(session)?;
        let Some(endpoint) = binding.revocation_endpoint.as_deref() else {
            debug!("{} offers no token revocation", binding.issuer);
            return Ok(());
        };

        let dpop = DpopState::new(DpopKey::decode(&binding.dpop_key)?);
        let form = [
            ("token", session.refresh_jwt.as_str()),
            ("token_type_hint", "refresh_token"),
            ("client_id", binding.client_id.as_str()),
        ];
        self.xrpc
            .execute(
                Method::POST,
                endpoint,
                Auth::Dpop {
                    token: None,
                    state: &dpop,
                },
                |request| request.form(&form[..]),
            )
            .await?;
        Ok(())
    }
}

/// Listener on `127.0.0.1` that receives the authorization redirect.
pub struct LoopbackServer {
    listener: TcpListener,
    redirect_uri: String,
}

impl LoopbackServer {
    /// Port 0 picks any free port.
    pub async fn bind(port: u16) -> TealResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            redirect_uri: format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub async fn wait_for_callback(self, timeout: Duration) -> TealResult<Callback> {
        tokio::time::timeout(timeout, self.accept_callback())
            .await
            .map_err(|_| {
                TealError::authentication("timed out waiting for the browser to return")
            })?
    }

    async fn accept_callback(&self) -> TealResult<Callback> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            debug!("Redirect connection from {}", peer);

            let target = match read_request_target(&mut stream).await {
                Ok(target) => target,
                Err(e) => {
                    warn!("Ignoring malformed request on the callback listener: {}", e);
                    continue;
                }
            };

            if target.split('?').next() != Some(CALLBACK_PATH) {
                respond(&mut stream, "404 Not Found", "Not found").await;
                continue;
            }

            let callback = Callback::from_target(&target);
            let page = match &callback {
                Ok(_) => "onyx is now authorized, you can close this window.",
                Err(_) => "Authorization failed, see the terminal for details.",
            };
            respond(&mut stream, "200 OK", page).await;
            return callback;
        }
    }
}

async fn read_request_target(stream: &mut TcpStream) -> TealResult<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    while !buffer.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(TealError::authentication("redirect request is too large"));
        }
    }

    let text = String::from_utf8_lossy(&buffer);
    let request_line = text.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(target.to_string()),
        _ => Err(TealError::authentication(format!(
            "unexpected request '{}'",
            request_line
        ))),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Failed to answer redirect: {}", e);
    }
    let _ = stream.shutdown().await;
}
