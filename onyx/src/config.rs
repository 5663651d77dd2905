use crate::error::{OnyxError, OnyxResult};
use crate::store::StoreMethod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use teal::{RetryPolicy, TealConfig};
use tracing::debug;

pub const SERVICE_NAME: &str = "onyx";
pub const CONFIG_DIR_ENV: &str = "ONYX_CONFIG_DIR";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_OAUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Optional overrides read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub default_store: Option<StoreMethod>,
    pub resolver_url: Option<String>,
    pub plc_directory_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    /// Port of the OAuth redirect listener, any free port when unset
    pub oauth_port: Option<u16>,
}

impl FileConfig {
    pub fn load(path: &Path) -> OnyxResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Debug, Clone)]
pub struct OnyxConfig {
    pub config_dir: PathBuf,
    pub service: String,
    pub version: String,
    pub default_store: StoreMethod,
    pub teal: TealConfig,
    pub retry: RetryPolicy,
    pub oauth_port: u16,
    /// How long `auth login` waits for the browser to come back
    pub oauth_timeout: Duration,
}

impl OnyxConfig {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_store: StoreMethod::default(),
            teal: TealConfig::default(),
            retry: RetryPolicy::default(),
            oauth_port: 0,
            oauth_timeout: DEFAULT_OAUTH_TIMEOUT,
        }
    }

    /// Builds the configuration for a run: explicit directory first, then
    /// `$ONYX_CONFIG_DIR`, then the platform config directory.
    pub fn load(config_dir: Option<PathBuf>) -> OnyxResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => default_config_dir()?,
        };

        let file = FileConfig::load(&config_dir.join(CONFIG_FILE))?;
        let config = Self::new(config_dir).apply(file);
        config.validate()?;

        debug!("Using config directory {}", config.config_dir.display());
        Ok(config)
    }

    pub fn apply(mut self, file: FileConfig) -> Self {
        if let Some(store) = file.default_store {
            self.default_store = store;
        }
        if let Some(url) = file.resolver_url {
            self.teal = self.teal.with_resolver_url(url);
        }
        if let Some(url) = file.plc_directory_url {
            self.teal = self.teal.with_plc_directory_url(url);
        }
        if let Some(secs) = file.timeout_secs {
            self.teal = self.teal.with_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = file.max_retries {
            self.retry.max_retries = retries;
        }
        if let Some(port) = file.oauth_port {
            self.oauth_port = port;
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_teal(mut self, teal: TealConfig) -> Self {
        self.teal = teal;
        self
    }

    pub fn validate(&self) -> OnyxResult<()> {
        if self.service.trim().is_empty() {
            return Err(OnyxError::config("Service name cannot be empty"));
        }
        self.teal.validate().map_err(OnyxError::config)?;
        self.retry.validate().map_err(OnyxError::config)?;
        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.config_dir.join(crate::auth::SESSION_FILE)
    }

    /// `<service>/<version>`, with the log's client id appended when known.
    pub fn client_agent(&self, client_id: Option<&str>) -> String {
        match client_id {
            Some(id) if !id.trim().is_empty() => {
                format!("{}/{} ({})", self.service, self.version, id.trim())
            }
            _ => format!("{}/{}", self.service, self.version),
        }
    }
}

pub fn default_config_dir() -> OnyxResult<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    dirs::config_dir()
        .map(|dir| dir.join(SERVICE_NAME))
        .ok_or_else(|| {
            OnyxError::config(format!(
                "Could not determine a config directory, set {}",
                CONFIG_DIR_ENV
            ))
        })
}
