use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RESOLVER_URL: &str = "https://public.api.bsky.app";
pub const DEFAULT_PLC_DIRECTORY_URL: &str = "https://plc.directory";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TealConfig {
    /// Service used for `com.atproto.identity.resolveHandle`
    pub resolver_url: String,
    pub plc_directory_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for TealConfig {
    fn default() -> Self {
        Self {
            resolver_url: DEFAULT_RESOLVER_URL.to_string(),
            plc_directory_url: DEFAULT_PLC_DIRECTORY_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("onyx/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl TealConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver_url(mut self, resolver_url: impl Into<String>) -> Self {
        self.resolver_url = resolver_url.into();
        self
    }

    pub fn with_plc_directory_url(mut self, plc_directory_url: impl Into<String>) -> Self {
        self.plc_directory_url = plc_directory_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.resolver_url.is_empty() {
            return Err("Resolver URL cannot be empty".to_string());
        }

        if !is_http_url(&self.resolver_url) {
            return Err("Resolver URL must start with http:// or https://".to_string());
        }

        if !is_http_url(&self.plc_directory_url) {
            return Err("PLC directory URL must start with http:// or https://".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.user_agent.trim().is_empty() {
            return Err("User agent cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TealConfig::default();
        assert_eq!(config.resolver_url, DEFAULT_RESOLVER_URL);
        assert_eq!(config.plc_directory_url, DEFAULT_PLC_DIRECTORY_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("onyx/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = TealConfig::new()
            .with_resolver_url("https://bsky.social")
            .with_plc_directory_url("http://localhost:2582")
            .with_timeout(Duration::from_secs(5))
            .with_user_agent("test/1.0");

        assert_eq!(config.resolver_url, "https://bsky.social");
        assert_eq!(config.plc_directory_url, "http://localhost:2582");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "test/1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TealConfig::default();

        config.resolver_url = "".to_string();
        assert!(config.validate().is_err());

        config.resolver_url = "bsky.social".to_string();
        assert!(config.validate().is_err());

        config.resolver_url = DEFAULT_RESOLVER_URL.to_string();
        config.plc_directory_url = "plc.directory".to_string();
        assert!(config.validate().is_err());

        config.plc_directory_url = DEFAULT_PLC_DIRECTORY_URL.to_string();
        config.timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        config.timeout = Duration::from_secs(30);
        config.user_agent = " ".to_string();
        assert!(config.validate().is_err());
    }
}
