//! Repository configuration via `archivum.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Values are validated eagerly on load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use archivum_core::{RepositoryError, Result};

/// Config file name placed next to the repository data.
pub const CONFIG_FILE_NAME: &str = "archivum.toml";

/// Repository configuration loaded from `archivum.toml`.
///
/// # Example
///
/// ```toml
/// base_uri = "http://localhost:8080/rest"
/// session_timeout_ms = 180000
/// lock_wait_timeout_ms = 0
/// auto_versioning = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// External base URI resource ids are resolved against.
    #[serde(default = "default_base_uri")]
    pub base_uri: String,
    /// Lifetime of a long-lived transaction between refreshes.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// How long a contended lock request waits; 0 fails immediately.
    #[serde(default)]
    pub lock_wait_timeout_ms: u64,
    /// Period of the expiry sweeper.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// How long closed transaction ids are remembered.
    #[serde(default = "default_closed_retention_ms")]
    pub closed_retention_ms: u64,
    /// Append a memento of every resource created or updated.
    #[serde(default)]
    pub auto_versioning: bool,
}

fn default_base_uri() -> String {
    "http://localhost:8080/rest".to_string()
}

fn default_session_timeout_ms() -> u64 {
    180_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_closed_retention_ms() -> u64 {
    600_000
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_uri: default_base_uri(),
            session_timeout_ms: default_session_timeout_ms(),
            lock_wait_timeout_ms: 0,
            sweep_interval_ms: default_sweep_interval_ms(),
            closed_retention_ms: default_closed_retention_ms(),
            auto_versioning: false,
        }
    }
}

impl RepositoryConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Archivum repository configuration
#
# External base URI that resource ids are resolved against.
base_uri = "http://localhost:8080/rest"

# Long-lived transaction lifetime between refreshes (default: 180000 = 3 minutes).
session_timeout_ms = 180000

# How long a contended lock request waits before failing (default: 0 = fail fast).
lock_wait_timeout_ms = 0

# Period of the background transaction expiry sweeper.
sweep_interval_ms = 1000

# How long closed transaction ids are remembered, so that lookups report
# "closed" rather than "not found".
closed_retention_ms = 600000

# Create a memento of every resource on each create or update.
auto_versioning = false
"#
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RepositoryConfig = toml::from_str(content)
            .map_err(|e| RepositoryError::bad_request(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RepositoryError::storage(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            RepositoryError::bad_request(format!("Config file '{}': {}", path.display(), e))
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                RepositoryError::storage(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RepositoryError::storage(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            RepositoryError::storage(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Reject values the repository cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_uri.starts_with("http://") || self.base_uri.starts_with("https://")) {
            return Err(RepositoryError::bad_request(format!(
                "base_uri must be an http(s) URI, got '{}'",
                self.base_uri
            )));
        }
        if self.session_timeout_ms == 0 {
            return Err(RepositoryError::bad_request(
                "session_timeout_ms must be greater than zero",
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(RepositoryError::bad_request(
                "sweep_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Base URI without a trailing slash.
    pub fn base_uri(&self) -> &str {
        self.base_uri.trim_end_matches('/')
    }

    /// Long-lived transaction lifetime.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Lock wait timeout.
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    /// Sweeper period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Closed-id retention.
    pub fn closed_retention(&self) -> Duration {
        Duration::from_millis(self.closed_retention_ms)
    }
}
