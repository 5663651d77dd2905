use crate::config::TealConfig;
use crate::dpop::{DpopState, DPOP_HEADER};
use crate::error::{TealError, TealResult};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Deserialize, Default)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "error_description")]
    message: Option<String>,
}

/// How a request identifies the caller.
#[derive(Clone, Copy)]
pub enum Auth<'a> {
    None,
    /// App-password sessions
    Bearer(&'a str),
    /// OAuth: a DPoP proof on every request, plus the bound access token
    /// when there is one
    Dpop {
        token: Option<&'a str>,
        state: &'a DpopState,
    },
}

impl<'a> From<Option<&'a str>> for Auth<'a> {
    fn from(token: Option<&'a str>) -> Self {
        match token {
            Some(token) => Auth::Bearer(token),
            None => Auth::None,
        }
    }
}

/// HTTP transport for XRPC calls against any ATProto service.
#[derive(Clone)]
pub struct XrpcClient {
    http_client: reqwest::Client,
}

pub(crate) fn xrpc_url(base: &str, nsid: &str) -> String {
    format!("{}/xrpc/{}", base.trim_end_matches('/'), nsid)
}

fn map_send_error(e: reqwest::Error) -> TealError {
    if e.is_timeout() {
        TealError::ServiceUnavailable {
            message: "Request timeout".to_string(),
        }
    } else if e.is_connect() {
        TealError::ServiceUnavailable {
            message: format!("Cannot connect to service: {}", e),
        }
    } else {
        TealError::Network(e)
    }
}

pub(crate) fn error_from_status(status: StatusCode, body: &str) -> TealError {
    let parsed: XrpcErrorBody = serde_json::from_str(body).unwrap_or_default();
    let error = parsed.error.unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| body.trim().chars().take(200).collect());

    match (status.as_u16(), error.as_str()) {
        (_, "use_dpop_nonce") => TealError::UseDpopNonce,
        (_, "ExpiredToken") | (401, "invalid_token") => TealError::ExpiredToken,
        (401, _) | (_, "AuthRequired" | "AuthenticationRequired" | "InvalidToken") => {
            TealError::Authentication { message }
        }
        (404, _) | (_, "RecordNotFound") => TealError::NotFound { message },
        (429, _) => TealError::RateLimit,
        (code, _) if code >= 500 => TealError::ServiceUnavailable {
            message: format!("{}: {}", status, message),
        },
        (code, _) => TealError::Xrpc {
            status: code,
            error: if error.is_empty() {
                "Unknown".to_string()
            } else {
                error
            },
            message,
        },
    }
}

impl XrpcClient {
    pub fn new(config: &TealConfig) -> TealResult<Self> {
        config
            .validate()
            .map_err(|message| TealError::InvalidConfig { message })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TealError::Unknown {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { http_client })
    }

    /// Sends a request built by `build`, signing it for `auth`.
    ///
    /// A DPoP request rejected with `use_dpop_nonce` is sent once more with
    /// the nonce from the rejection.
    pub(crate) async fn execute<F>(
        &self,
        method: Method,
        url: &str,
        auth: Auth<'_>,
        build: F,
    ) -> TealResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut retried = false;
        loop {
            let mut request = build(self.http_client.request(method.clone(), url));
            match auth {
                Auth::None => {}
                Auth::Bearer(token) => request = request.bearer_auth(token),
                Auth::Dpop { token, state } => {
                    let proof = state.proof(method.as_str(), url, token)?;
                    request = request.header(DPOP_HEADER, proof);
                    if let Some(token) = token {
                        request = request.header(AUTHORIZATION, format!("DPoP {}", token));
                    }
                }
            }

            let response = request.send().await.map_err(map_send_error)?;
            if let Auth::Dpop { state, .. } = auth {
                state.remember_nonce(response.headers());
            }

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            match error_from_status(status, &body) {
                TealError::UseDpopNonce if !retried && matches!(auth, Auth::Dpop { .. }) => {
                    debug!("Retrying {} with a fresh DPoP nonce", url);
                    retried = true;
                }
                error => return Err(error),
            }
        }
    }

    /// GET `<base>/xrpc/<nsid>`
    pub async fn query<T: DeserializeOwned>(
        &self,
        base: &str,
        nsid: &str,
        params: &[(&str, &str)],
        token: Option<&str>,
    ) -> TealResult<T> {
        self.query_with(base, nsid, params, Auth::from(token)).await
    }

    pub async fn query_with<T: DeserializeOwned>(
        &self,
        base: &str,
        nsid: &str,
        params: &[(&str, &str)],
        auth: Auth<'_>,
    ) -> TealResult<T> {
        let url = xrpc_url(base, nsid);
        debug!("XRPC query {}", url);

        let response = self
            .execute(Method::GET, &url, auth, |request| request.query(params))
            .await?;
        Ok(response.json().await?)
    }

    /// POST `<base>/xrpc/<nsid>` with an optional JSON body
    pub async fn procedure<B, T>(
        &self,
        base: &str,
        nsid: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> TealResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.procedure_with(base, nsid, body, Auth::from(token))
            .await
    }

    pub async fn procedure_with<B, T>(
        &self,
        base: &str,
        nsid: &str,
        body: Option<&B>,
        auth: Auth<'_>,
    ) -> TealResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(base, nsid, body, auth).await?;
        Ok(response.json().await?)
    }

    /// Like [`XrpcClient::procedure`] for endpoints without output.
    pub async fn procedure_unit<B>(
        &self,
        base: &str,
        nsid: &str,
        body: Option<&B>,
        token: Option<&str>,
    ) -> TealResult<()>
    where
        B: Serialize + ?Sized,
    {
        self.post(base, nsid, body, Auth::from(token)).await?;
        Ok(())
    }

    async fn post<B>(
        &self,
        base: &str,
        nsid: &str,
        body: Option<&B>,
        auth: Auth<'_>,
    ) -> TealResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = xrpc_url(base, nsid);
        debug!("XRPC procedure {}", url);

        self.execute(Method::POST, &url, auth, |request| match body {
            Some(body) => request.json(body),
            None => request,
        })
        .await
    }

    /// Form-encoded POST, used for the OAuth endpoints.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
        auth: Auth<'_>,
    ) -> TealResult<T> {
        debug!("POST {}", url);
        let response = self
            .execute(Method::POST, url, auth, |request| request.form(form))
            .await?;
        Ok(response.json().await?)
    }

    /// Plain JSON GET, used for DID documents and OAuth metadata.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> TealResult<T> {
        debug!("GET {}", url);
        let response = self.execute(Method::GET, url, Auth::None, |r| r).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn client() -> XrpcClient {
        XrpcClient::new(&TealConfig::default()).unwrap()
    }

    #[test]
    fn test_xrpc_url() {
        assert_eq!(
            xrpc_url("https://pds.example.com/", "com.atproto.repo.getRecord"),
            "https://pds.example.com/xrpc/com.atproto.repo.getRecord"
        );
    }

    #[test]
    fn test_error_mapping() {
        let expired = error_from_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":"ExpiredToken","message":"Token has expired"}"#,
        );
        assert!(matches!(expired, TealError::ExpiredToken));

        let auth = error_from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"error":"AuthenticationRequired","message":"Invalid identifier or password"}"#,
        );
        assert!(
            matches!(auth, TealError::Authentication { message } if message == "Invalid identifier or password")
        );

        let missing = error_from_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":"RecordNotFound","message":"Could not locate record"}"#,
        );
        assert!(matches!(missing, TealError::NotFound { .. }));

        assert!(matches!(
            error_from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            TealError::RateLimit
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_GATEWAY, "upstream down"),
            TealError::ServiceUnavailable { .. }
        ));

        let other = error_from_status(StatusCode::BAD_REQUEST, "not json");
        assert!(matches!(
            other,
            TealError::Xrpc { status: 400, error, message } if error == "Unknown" && message == "not json"
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TealConfig::default().with_resolver_url("nope");
        assert!(matches!(
            XrpcClient::new(&config),
            Err(TealError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_query_sends_params_and_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/xrpc/com.example.echo")
            .match_query(mockito::Matcher::UrlEncoded("q".into(), "hello".into()))
            .match_header("authorization", "Bearer token-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let value: Value = client()
            .query(
                &server.url(),
                "com.example.echo",
                &[("q", "hello")],
                Some("token-1"),
            )
            .await
            .unwrap();

        assert_eq!(value, json!({ "ok": true }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_procedure_maps_error_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/xrpc/com.example.write")
            .with_status(400)
            .with_body(r#"{"error":"InvalidRequest","message":"bad input"}"#)
            .create_async()
            .await;

        let result: TealResult<Value> = client()
            .procedure(&server.url(), "com.example.write", Some(&json!({})), None)
            .await;

        assert!(matches!(
            result,
            Err(TealError::Xrpc { status: 400, ref error, .. }) if error == "InvalidRequest"
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let result: TealResult<Value> = client()
            .query(&url, "com.example.echo", &[], None)
            .await;

        match result {
            Err(e @ TealError::ServiceUnavailable { .. }) => assert!(e.is_transient()),
            other => panic!("Expected ServiceUnavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let _silent = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        });

        let config = TealConfig::default().with_timeout(std::time::Duration::from_millis(200));
        let result: TealResult<Value> = XrpcClient::new(&config)
            .unwrap()
            .procedure::<Value, Value>(&url, "com.example.write", None, None)
            .await;

        assert!(matches!(
            result,
            Err(TealError::ServiceUnavailable { ref message }) if message == "Request timeout"
        ));
    }

    #[tokio::test]
    async fn test_procedure_invalid_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/xrpc/com.example.write")
            .with_status(200)
            .with_body("not valid json")
            .create_async()
            .await;

        let result: TealResult<Value> = client()
            .procedure::<Value, Value>(&server.url(), "com.example.write", None, None)
            .await;

        assert!(matches!(result, Err(TealError::Network(_))));
    }

    #[test]
    fn test_oauth_error_mapping() {
        let expired = error_from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"error":"invalid_token","message":"token expired"}"#,
        );
        assert!(matches!(expired, TealError::ExpiredToken));

        let nonce = error_from_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":"use_dpop_nonce","error_description":"nonce required"}"#,
        );
        assert!(matches!(nonce, TealError::UseDpopNonce));

        let grant = error_from_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"code already used"}"#,
        );
        assert!(matches!(
            grant,
            TealError::Xrpc { status: 400, ref error, ref message }
                if error == "invalid_grant" && message == "code already used"
        ));
    }

    #[tokio::test]
    async fn test_bearer_request_is_not_retried_for_nonce() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/xrpc/com.atproto.server.getSession")
            .with_status(401)
            .with_header("dpop-nonce", "n-1")
            .with_body(r#"{"error":"use_dpop_nonce"}"#)
            .expect(1)
            .create_async()
            .await;

        let result: TealResult<Value> = client()
            .query(&server.url(), "com.atproto.server.getSession", &[], Some("t"))
            .await;
        assert!(matches!(result, Err(TealError::UseDpopNonce)));
        mock.assert_async().await;
    }
}
