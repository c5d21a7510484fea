//! Remote configuration loaded from TOML.
//!
//! ```toml
//! name = "darkibox"
//! endpoint = "https://darkibox.example/"
//! root = "backup"
//! protocol = "path"
//! api_key = "..."
//!
//! [pacer]
//! min_sleep_ms = 10
//! retries = 10
//! ```

use crate::protocol::ProtocolKind;
use crate::{Error, Result};
use darkibox_rest::{Credential, PacerConfig, RestClient};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the configured API key.
pub const API_KEY_ENV: &str = "DARKIBOX_API_KEY";

/// Pacing knobs as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacerSettings {
    pub min_sleep_ms: u64,
    pub max_sleep_ms: u64,
    pub decay_constant: u32,
    pub retries: u32,
    pub jitter_ms: u64,
}

impl Default for PacerSettings {
    fn default() -> Self {
        Self {
            min_sleep_ms: 10,
            max_sleep_ms: 2000,
            decay_constant: 2,
            retries: 10,
            jitter_ms: 20,
        }
    }
}

impl From<&PacerSettings> for PacerConfig {
    fn from(settings: &PacerSettings) -> Self {
        PacerConfig {
            min_sleep: Duration::from_millis(settings.min_sleep_ms),
            max_sleep: Duration::from_millis(settings.max_sleep_ms),
            decay_constant: settings.decay_constant,
            retries: settings.retries,
            jitter: Duration::from_millis(settings.jitter_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default = "default_name")]
    name: String,
    endpoint: String,
    #[serde(default)]
    root: String,
    #[serde(default)]
    protocol: ProtocolKind,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_metadata_ttl_secs")]
    metadata_ttl_secs: u64,
    #[serde(default)]
    pacer: PacerSettings,
}

fn default_name() -> String {
    "darkibox".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_metadata_ttl_secs() -> u64 {
    300
}

/// Everything needed to construct one remote filesystem.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Opaque label for logs and the host framework.
    pub name: String,
    /// Base URL of the API.
    pub endpoint: String,
    /// Remote directory the filesystem is rooted at.
    pub root: String,
    pub protocol: ProtocolKind,
    pub api_key: Option<SecretString>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Age after which a handle's cached metadata is re-fetched by
    /// `Object::mod_time_fresh`.
    pub metadata_ttl: Duration,
    pub pacer: PacerSettings,
}

impl RemoteConfig {
    /// A path-protocol config with default pacing.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            root: String::new(),
            protocol: ProtocolKind::default(),
            api_key: None,
            timeout: Duration::from_secs(default_timeout_secs()),
            metadata_ttl: Duration::from_secs(default_metadata_ttl_secs()),
            pacer: PacerSettings::default(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config = Self::parse(text)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(Self {
            name: file.name,
            endpoint: file.endpoint,
            root: file.root,
            protocol: file.protocol,
            api_key: file
                .api_key
                .filter(|key| !key.trim().is_empty())
                .map(SecretString::new),
            timeout: Duration::from_secs(file.timeout_secs),
            metadata_ttl: Duration::from_secs(file.metadata_ttl_secs),
            pacer: file.pacer,
        })
    }

    /// Load a config file, letting `DARKIBOX_API_KEY` override the key.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(path.as_ref(), std::env::var(API_KEY_ENV).ok())
    }

    /// The key override is applied before validation, so a file may leave
    /// a required key to the environment.
    fn load(path: &Path, env_key: Option<String>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        let mut config = Self::parse(&text)?;
        config.apply_api_key_override(env_key);
        config.validate()?;
        Ok(config)
    }

    /// Replace the API key when `key` is present and non-empty.
    pub fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|key| !key.trim().is_empty()) {
            self.api_key = Some(SecretString::new(key));
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key.into()));
        self
    }

    pub fn with_pacer(mut self, pacer: PacerSettings) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    /// Check the values a remote cannot work without.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("name must not be empty".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("endpoint must not be empty".to_string()));
        }
        if self.pacer.retries == 0 {
            return Err(Error::Config("pacer.retries must be at least 1".to_string()));
        }
        if self.pacer.min_sleep_ms > self.pacer.max_sleep_ms {
            return Err(Error::Config(
                "pacer.min_sleep_ms must not exceed pacer.max_sleep_ms".to_string(),
            ));
        }
        if self.protocol == ProtocolKind::Key && self.api_key.is_none() {
            return Err(Error::Config(format!(
                "the key protocol requires an api_key (or {})",
                API_KEY_ENV
            )));
        }
        Ok(())
    }

    /// How the key is presented: a bearer token on the path protocol, a
    /// `key` query parameter on the key protocol.
    pub fn credential(&self) -> Credential {
        match (&self.api_key, self.protocol) {
            (None, _) => Credential::None,
            (Some(key), ProtocolKind::Path) => Credential::Bearer(key.clone()),
            (Some(key), ProtocolKind::Key) => Credential::QueryKey(key.clone()),
        }
    }

    pub fn pacer_config(&self) -> PacerConfig {
        PacerConfig::from(&self.pacer)
    }

    /// Build the transport described by this config.
    pub fn rest_client(&self) -> Result<RestClient> {
        RestClient::new(
            &self.endpoint,
            self.credential(),
            self.pacer_config(),
            self.timeout,
        )
        .map_err(|err| Error::Config(err.to_string()))
    }
}
