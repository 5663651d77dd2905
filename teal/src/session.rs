use crate::error::{TealError, TealResult};
use crate::oauth::OAuthBinding;
use crate::types::{Did, Handle};
use crate::xrpc::XrpcClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// An authenticated session on a PDS.
///
/// App-password sessions carry plain bearer tokens. OAuth sessions carry
/// DPoP-bound tokens and the [`OAuthBinding`] needed to use and refresh them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub did: Did,
    pub handle: Handle,
    /// Base URL of the PDS hosting the account
    pub pds: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthBinding>,
}

impl Session {
    pub fn is_oauth(&self) -> bool {
        self.oauth.is_some()
    }
}

#[derive(Serialize)]
struct CreateSessionInput<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionOutput {
    did: Did,
    handle: Handle,
    access_jwt: String,
    refresh_jwt: String,
}

/// Account details reported by `com.atproto.server.getSession`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    pub did: Did,
    pub handle: Handle,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl SessionOutput {
    fn into_session(self, pds: &str) -> Session {
        Session {
            did: self.did,
            handle: self.handle,
            pds: pds.trim_end_matches('/').to_string(),
            access_jwt: self.access_jwt,
            refresh_jwt: self.refresh_jwt,
            oauth: None,
        }
    }
}

#[derive(Clone)]
pub struct SessionClient {
    xrpc: XrpcClient,
}

impl SessionClient {
    pub fn new(xrpc: XrpcClient) -> Self {
        Self { xrpc }
    }

    pub async fn create(&self, pds: &str, identifier: &str, password: &str) -> TealResult<Session> {
        debug!("Creating session for {} on {}", identifier, pds);

        let input = CreateSessionInput {
            identifier,
            password,
        };
        let output: SessionOutput = self
            .xrpc
            .procedure(pds, "com.atproto.server.createSession", Some(&input), None)
            .await
            .map_err(|e| match e {
                TealError::Xrpc { status: 400, message, .. } => TealError::Authentication { message },
                other => other,
            })?;

        let session = output.into_session(pds);
        info!("Created session for {}", session.did);
        Ok(session)
    }

    /// Trades the refresh token for a fresh token pair.
    pub async fn refresh(&self, session: &Session) -> TealResult<Session> {
        debug!("Refreshing session for {}", session.did);

        let output: SessionOutput = self
            .xrpc
            .procedure::<(), _>(
                &session.pds,
                "com.atproto.server.refreshSession",
                None,
                Some(&session.refresh_jwt),
            )
            .await
            .map_err(|e| match e {
                TealError::ExpiredToken => TealError::Authentication {
                    message: "session expired, please log in again".to_string(),
                },
                other => other,
            })?;

        if output.did != session.did {
            return Err(TealError::Authentication {
                message: format!("refreshed session belongs to {}", output.did),
            });
        }

        Ok(output.into_session(&session.pds))
    }

    pub async fn get(&self, session: &Session) -> TealResult<SessionInfo> {
        self.xrpc
            .query(
                &session.pds,
                "com.atproto.server.getSession",
                &[],
                Some(&session.access_jwt),
            )
            .await
    }

    pub async fn delete(&self, session: &Session) -> TealResult<()> {
        self.xrpc
            .procedure_unit::<()>(
                &session.pds,
                "com.atproto.server.deleteSession",
                None,
                Some(&session.refresh_jwt),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TealConfig;

    fn client() -> SessionClient {
        SessionClient::new(XrpcClient::new(&TealConfig::default()).unwrap())
    }

    const SESSION_BODY: &str = r#"{
        "did": "did:plc:abc",
        "handle": "alice.example.com",
        "accessJwt": "access-1",
        "refreshJwt": "refresh-1",
        "active": true
    }"#;

    fn sample_session(pds: &str) -> Session {
        Session {
            did: Did::new("did:plc:abc").unwrap(),
            handle: Handle::new("alice.example.com").unwrap(),
            pds: pds.to_string(),
            access_jwt: "access-0".to_string(),
            refresh_jwt: "refresh-0".to_string(),
            oauth: None,
        }
    }

    #[test]
    fn test_app_password_session_json() {
        let session = sample_session("https://pds.example.com");
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("oauth").is_none());

        let restored: Session = serde_json::from_value(value).unwrap();
        assert_eq!(restored, session);
        assert!(!restored.is_oauth());
    }

    #[tokio::test]
    async fn test_create_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/xrpc/com.atproto.server.createSession")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "identifier": "did:plc:abc",
                "password": "app-pass"
            })))
            .with_status(200)
            .with_body(SESSION_BODY)
            .create_async()
            .await;

        let pds = format!("{}/", server.url());
        let session = client()
            .create(&pds, "did:plc:abc", "app-pass")
            .await
            .unwrap();

        assert_eq!(session.did.as_str(), "did:plc:abc");
        assert_eq!(session.handle.as_str(), "alice.example.com");
        assert_eq!(session.pds, server.url());
        assert_eq!(session.access_jwt, "access-1");
        assert_eq!(session.refresh_jwt, "refresh-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_session_bad_password() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/xrpc/com.atproto.server.createSession")
            .with_status(401)
            .with_body(r#"{"error":"AuthenticationRequired","message":"Invalid identifier or password"}"#)
            .create_async()
            .await;

        let result = client().create(&server.url(), "did:plc:abc", "wrong").await;
        assert!(matches!(result, Err(TealError::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_refresh_session_uses_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/xrpc/com.atproto.server.refreshSession")
            .match_header("authorization", "Bearer refresh-0")
            .with_status(200)
            .with_body(SESSION_BODY)
            .create_async()
            .await;

        let refreshed = client()
            .refresh(&sample_session(&server.url()))
            .await
            .unwrap();
        assert_eq!(refreshed.access_jwt, "access-1");
        assert_eq!(refreshed.refresh_jwt, "refresh-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_expired() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/xrpc/com.atproto.server.refreshSession")
            .with_status(400)
            .with_body(r#"{"error":"ExpiredToken","message":"Token has expired"}"#)
            .create_async()
            .await;

        let result = client().refresh(&sample_session(&server.url())).await;
        assert!(matches!(result, Err(TealError::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_get_session() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/xrpc/com.atproto.server.getSession")
            .match_header("authorization", "Bearer access-0")
            .with_status(200)
            .with_body(SESSION_BODY)
            .create_async()
            .await;

        let info = client().get(&sample_session(&server.url())).await.unwrap();
        assert_eq!(info.handle.as_str(), "alice.example.com");
        assert_eq!(info.active, Some(true));
        assert_eq!(info.email, None);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/xrpc/com.atproto.server.deleteSession")
            .match_header("authorization", "Bearer refresh-0")
            .with_status(200)
            .create_async()
            .await;

        client()
            .delete(&sample_session(&server.url()))
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
