//! Service configuration.
//!
//! Values are layered in this order, later sources winning:
//! built-in defaults, an optional TOML file, `DEEPCHECK__<SECTION>__<KEY>`
//! environment variables, and finally the deployment-platform names
//! `REALITY_DEFENDER_API_KEY`, `SUPABASE_URL` and `SUPABASE_ANON_KEY`.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default detection endpoint.
pub const DEFAULT_PROVIDER_ENDPOINT: &str = "https://api.realitydefender.com/v1/analyze";

/// Environment variable holding the detection provider credential.
pub const PROVIDER_KEY_ENV: &str = "REALITY_DEFENDER_API_KEY";
pub const STORE_URL_ENV: &str = "SUPABASE_URL";
pub const STORE_ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";

const ENV_PREFIX: &str = "DEEPCHECK";

/// Errors raised while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] ConfigError),
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Full bind address (ip:port)
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Detection provider settings.
///
/// A missing `api_key` is legal at startup; dispatches that need the
/// provider fail with a configuration error instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_endpoint() -> String {
    DEFAULT_PROVIDER_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Backend-as-a-service connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file plus the environment.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let path_str = path
                .to_str()
                .ok_or_else(|| ConfigLoadError::InvalidPath(format!("{:?}", path)))?;
            if !path.exists() {
                return Err(ConfigLoadError::FileNotFound(path_str.to_string()));
            }
            builder = builder.add_source(File::with_name(path_str));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;
        app_config.drop_blank_values();
        app_config.apply_platform_env(|name| std::env::var(name).ok());
        Ok(app_config)
    }

    /// Treat blank credentials and URLs from the file or `DEEPCHECK__*` as
    /// unset.
    fn drop_blank_values(&mut self) {
        for value in [
            &mut self.provider.api_key,
            &mut self.store.url,
            &mut self.store.anon_key,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            }
        }
    }

    /// Apply the platform-level variable names on top of everything else.
    ///
    /// Empty values count as unset.
    pub fn apply_platform_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(PROVIDER_KEY_ENV) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = non_empty(STORE_URL_ENV) {
            self.store.url = Some(url);
        }
        if let Some(key) = non_empty(STORE_ANON_KEY_ENV) {
            self.store.anon_key = Some(key);
        }
    }

    /// Copy of the configuration with every secret masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.provider.api_key = copy.provider.api_key.as_deref().map(mask_secret);
        copy.store.anon_key = copy.store.anon_key.as_deref().map(mask_secret);
        copy
    }
}

/// Keep the first four characters of a secret, mask the rest.
fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
