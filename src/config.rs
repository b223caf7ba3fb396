//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! base URL, refresh endpoint, login entry point, request timeout and which
//! credential backend holds the session.
//!
//! Configuration is stored at `~/.config/routewise/config.json`. Environment
//! variables (optionally from a `.env` file) override the stored values.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStore, FileStore, KeyringStore, MemoryStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "routewise";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Credential file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

const ENV_BASE_URL: &str = "ROUTEWISE_BASE_URL";
const ENV_CREDENTIAL_BACKEND: &str = "ROUTEWISE_CREDENTIAL_BACKEND";

/// Where session values are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::str::FromStr for CredentialBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("Unknown credential backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub refresh_path: String,
    /// Unauthenticated entry point handed to the session handler on logout
    pub login_route: String,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_route: "/login".to_string(),
            request_timeout_secs: 30,
            credential_backend: CredentialBackend::default(),
        }
    }
}

impl Config {
    /// Load the stored config and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load the config file at `path`, or defaults if there is none.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Change one setting by name, as given on the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "base_url" => self.base_url = value.trim_end_matches('/').to_string(),
            "refresh_path" => self.refresh_path = value.to_string(),
            "login_route" => self.login_route = value.to_string(),
            "request_timeout_secs" => {
                self.request_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout: {}", value))?
            }
            "credential_backend" => self.credential_backend = value.parse()?,
            other => return Err(anyhow::anyhow!("Unknown setting: {}", other)),
        }
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(backend) = lookup(ENV_CREDENTIAL_BACKEND).filter(|v| !v.is_empty()) {
            self.credential_backend = backend
                .parse()
                .with_context(|| format!("Invalid {}", ENV_CREDENTIAL_BACKEND))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn credentials_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(CREDENTIALS_FILE))
    }

    /// Open the configured credential backend.
    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        Ok(match self.credential_backend {
            CredentialBackend::File => {
                let path = Self::credentials_path()?;
                Arc::new(FileStore::open(&path).with_context(|| {
                    format!("Failed to open credential file {}", path.display())
                })?)
            }
            CredentialBackend::Keyring => Arc::new(KeyringStore::new()),
            CredentialBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }
}
