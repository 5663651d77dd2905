//! DPoP proofs (RFC 9449)
//!
//! OAuth tokens issued to onyx are bound to a P-256 key. Every request that
//! carries such a token, and every request to the authorization server,
//! needs a fresh ES256-signed proof naming the HTTP method and URL.

use crate::error::{TealError, TealResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

pub const DPOP_HEADER: &str = "dpop";
pub const DPOP_NONCE_HEADER: &str = "dpop-nonce";

pub(crate) fn base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `len` random bytes, base64url encoded.
pub(crate) fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    base64url(&bytes)
}

pub(crate) fn sha256_base64url(input: &str) -> String {
    base64url(&Sha256::digest(input.as_bytes()))
}

#[derive(Clone)]
pub struct DpopKey {
    signing_key: SigningKey,
}

impl DpopKey {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Restores a key written by [`DpopKey::encode`].
    pub fn decode(encoded: &str) -> TealResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| TealError::authentication(format!("invalid DPoP key: {}", e)))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|_| TealError::authentication("invalid DPoP key"))?;
        Ok(Self { signing_key })
    }

    /// The private scalar, base64url encoded.
    pub fn encode(&self) -> String {
        base64url(&self.signing_key.to_bytes())
    }

    pub fn public_jwk(&self) -> Value {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        json!({
            "kty": "EC",
            "crv": "P-256",
            "x": base64url(point.x().map(|x| x.as_slice()).unwrap_or_default()),
            "y": base64url(point.y().map(|y| y.as_slice()).unwrap_or_default()),
        })
    }

    /// A signed `dpop+jwt` for one request. `access_token` adds the `ath`
    /// claim required when the request also carries the token.
    pub fn proof(
        &self,
        method: &str,
        url: &str,
        nonce: Option<&str>,
        access_token: Option<&str>,
    ) -> TealResult<String> {
        let mut htu = Url::parse(url).map_err(|e| TealError::InvalidConfig {
            message: format!("invalid URL '{}': {}", url, e),
        })?;
        htu.set_query(None);
        htu.set_fragment(None);

        let header = json!({
            "typ": "dpop+jwt",
            "alg": "ES256",
            "jwk": self.public_jwk(),
        });

        let mut claims = json!({
            "jti": random_token(16),
            "htm": method,
            "htu": htu.as_str(),
            "iat": Utc::now().timestamp(),
        });
        if let Some(nonce) = nonce {
            claims["nonce"] = json!(nonce);
        }
        if let Some(token) = access_token {
            claims["ath"] = json!(sha256_base64url(token));
        }

        let signing_input = format!(
            "{}.{}",
            base64url(&serde_json::to_vec(&header)?),
            base64url(&serde_json::to_vec(&claims)?)
        );
        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());

        Ok(format!(
            "{}.{}",
            signing_input,
            base64url(&signature.to_bytes())
        ))
    }
}

/// A key together with the most recent nonce a server handed out.
pub struct DpopState {
    key: DpopKey,
    nonce: Mutex<Option<String>>,
}

impl DpopState {
    pub fn new(key: DpopKey) -> Self {
        Self {
            key,
            nonce: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &DpopKey {
        &self.key
    }

    pub fn nonce(&self) -> Option<String> {
        self.nonce.lock().ok().and_then(|nonce| nonce.clone())
    }

    pub(crate) fn proof(
        &self,
        method: &str,
        url: &str,
        access_token: Option<&str>,
    ) -> TealResult<String> {
        let nonce = self.nonce();
        self.key.proof(method, url, nonce.as_deref(), access_token)
    }

    pub(crate) fn remember_nonce(&self, headers: &HeaderMap) {
        let fresh = headers
            .get(DPOP_NONCE_HEADER)
            .and_then(|value| value.to_str().ok());
        if let (Some(fresh), Ok(mut nonce)) = (fresh, self.nonce.lock()) {
            *nonce = Some(fresh.to_string());
        }
    }
}
