use crate::config::TealConfig;
use crate::error::{TealError, TealResult};
use crate::types::{Did, Handle, Identifier};
use crate::xrpc::XrpcClient;
use serde::Deserialize;
use tracing::{debug, info};

const PDS_SERVICE_ID: &str = "#atproto_pds";
const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

#[derive(Debug, Clone, Deserialize)]
pub struct DidService {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(default, rename = "alsoKnownAs")]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub service: Vec<DidService>,
}

impl DidDocument {
    pub fn pds_endpoint(&self) -> Option<&str> {
        self.service
            .iter()
            .find(|s| s.id.ends_with(PDS_SERVICE_ID) && s.service_type == PDS_SERVICE_TYPE)
            .map(|s| s.service_endpoint.as_str())
    }

    /// The first `at://` alias that is a syntactically valid handle.
    pub fn handle(&self) -> Option<Handle> {
        self.also_known_as
            .iter()
            .filter_map(|aka| aka.strip_prefix("at://"))
            .find_map(|h| Handle::new(h).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds: String,
}

#[derive(Deserialize)]
struct ResolveHandleOutput {
    did: String,
}

/// `did:web:example.com` -> `https://example.com/.well-known/did.json`
pub fn did_web_url(did: &Did) -> TealResult<String> {
    if did.method() != "web" {
        return Err(TealError::resolution(format!("{} is not a did:web", did)));
    }

    let host = did.method_specific_id();
    if host.contains(':') {
        return Err(TealError::resolution(format!(
            "did:web with a path is not supported: {}",
            did
        )));
    }

    let host = host.replace("%3A", ":").replace("%3a", ":");
    Ok(format!("https://{}/.well-known/did.json", host))
}

pub struct IdentityResolver {
    xrpc: XrpcClient,
    resolver_url: String,
    plc_directory_url: String,
}

impl IdentityResolver {
    pub fn new(config: &TealConfig) -> TealResult<Self> {
        Ok(Self::with_client(XrpcClient::new(config)?, config))
    }

    pub fn with_client(xrpc: XrpcClient, config: &TealConfig) -> Self {
        Self {
            xrpc,
            resolver_url: config.resolver_url.clone(),
            plc_directory_url: config.plc_directory_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn resolve_handle(&self, handle: &Handle) -> TealResult<Did> {
        debug!("Resolving handle {}", handle);

        let output: ResolveHandleOutput = self
            .xrpc
            .query(
                &self.resolver_url,
                "com.atproto.identity.resolveHandle",
                &[("handle", handle.as_str())],
                None,
            )
            .await
            .map_err(|e| match e {
                TealError::Xrpc { message, .. } | TealError::NotFound { message } => {
                    TealError::resolution(format!("could not resolve {}: {}", handle, message))
                }
                other => other,
            })?;

        Did::new(&output.did)
    }

    pub async fn resolve_did_document(&self, did: &Did) -> TealResult<DidDocument> {
        let url = match did.method() {
            "plc" => format!("{}/{}", self.plc_directory_url, did),
            "web" => did_web_url(did)?,
            other => {
                return Err(TealError::resolution(format!(
                    "unsupported DID method '{}'",
                    other
                )))
            }
        };

        let document: DidDocument = self.xrpc.get_json(&url).await.map_err(|e| match e {
            TealError::NotFound { .. } => TealError::resolution(format!("{} not found", did)),
            other => other,
        })?;

        if document.id != did.as_str() {
            return Err(TealError::resolution(format!(
                "DID document id {} does not match {}",
                document.id, did
            )));
        }

        Ok(document)
    }

    pub async fn resolve(&self, identifier: &Identifier) -> TealResult<ResolvedIdentity> {
        let (did, handle) = match identifier {
            Identifier::Did(did) => (did.clone(), None),
            Identifier::Handle(handle) => (self.resolve_handle(handle).await?, Some(handle.clone())),
        };

        let document = self.resolve_did_document(&did).await?;
        let pds = document
            .pds_endpoint()
            .ok_or_else(|| TealError::resolution(format!("{} has no PDS endpoint", did)))?
            .trim_end_matches('/')
            .to_string();

        let handle = handle.or_else(|| document.handle());
        info!("Resolved {} to {} on {}", identifier, did, pds);

        Ok(ResolvedIdentity { did, handle, pds })
    }
}
