//! Connection configuration.
//!
//! Precedence: explicit values > environment > config files > defaults. Config files are read
//! from `$RDB_CONFIG`, `<user config dir>/rdb.toml` and `./rdb.toml`; the first file that sets a
//! key wins.

use crate::errors::DbError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub address: String,
    pub database: String,
    /// PEM bundle holding the client certificate and its private key.
    pub client_cert: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub request_timeout_ms: u64,
    pub non_stale_timeout_ms: Option<u64>,
    pub create_database: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            database: String::new(),
            client_cert: None,
            ca_cert: None,
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            non_stale_timeout_ms: None,
            create_database: false,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(address: impl Into<String>, database: impl Into<String>) -> Self {
        Self { address: address.into(), database: database.into(), ..Self::default() }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn non_stale_timeout(&self) -> Option<Duration> {
        self.non_stale_timeout_ms.map(Duration::from_millis)
    }

    /// Loads the configuration from the process environment and the standard config files.
    ///
    /// # Errors
    /// Returns an error when a config file exists but cannot be read or parsed.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self, DbError> {
        let env = ConfigLayer::from_env_with(|key| std::env::var(key).ok());
        let mut layer = env;
        for path in config_paths(explicit_file) {
            if path.exists() {
                layer = layer.or(ConfigLayer::from_file(&path)?);
            }
        }
        Ok(layer.resolve())
    }
}

/// Candidate config files in precedence order.
#[must_use]
pub fn config_paths(explicit_file: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = explicit_file {
        paths.push(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("RDB_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Some(dir) = dirs_next::config_dir() {
        paths.push(dir.join("rdb.toml"));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("rdb.toml"));
    }
    paths
}

/// One source of configuration values. Unset keys fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigLayer {
    pub address: Option<String>,
    pub database: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub request_timeout_ms: Option<u64>,
    pub non_stale_timeout_ms: Option<u64>,
    pub create_database: Option<bool>,
}

impl ConfigLayer {
    /// # Errors
    /// Returns an error when the text is not valid TOML for this layer.
    pub fn from_toml_str(s: &str) -> Result<Self, DbError> {
        toml::from_str(s).map_err(|e| DbError::Config(e.to_string()))
    }

    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DbError::Io(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| DbError::Config(format!("{}: {e}", path.display())))
    }

    /// Reads `RDB_*` variables through `lookup`. Unparsable numbers are ignored.
    pub fn from_env_with<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            address: lookup("RDB_ADDRESS"),
            database: lookup("RDB_DATABASE"),
            client_cert: lookup("RDB_CLIENT_CERT").map(PathBuf::from),
            ca_cert: lookup("RDB_CA_CERT").map(PathBuf::from),
            request_timeout_ms: lookup("RDB_TIMEOUT_MS").and_then(|s| s.parse().ok()),
            non_stale_timeout_ms: lookup("RDB_NON_STALE_TIMEOUT_MS").and_then(|s| s.parse().ok()),
            create_database: lookup("RDB_CREATE_DATABASE")
                .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
        }
    }

    /// Fills keys unset in `self` from `fallback`.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            address: self.address.or(fallback.address),
            database: self.database.or(fallback.database),
            client_cert: self.client_cert.or(fallback.client_cert),
            ca_cert: self.ca_cert.or(fallback.ca_cert),
            request_timeout_ms: self.request_timeout_ms.or(fallback.request_timeout_ms),
            non_stale_timeout_ms: self.non_stale_timeout_ms.or(fallback.non_stale_timeout_ms),
            create_database: self.create_database.or(fallback.create_database),
        }
    }

    #[must_use]
    pub fn resolve(self) -> ConnectionConfig {
        let defaults = ConnectionConfig::default();
        ConnectionConfig {
            address: self.address.unwrap_or(defaults.address),
            database: self.database.unwrap_or(defaults.database),
            client_cert: self.client_cert,
            ca_cert: self.ca_cert,
            request_timeout_ms: self.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
            non_stale_timeout_ms: self.non_stale_timeout_ms,
            create_database: self.create_database.unwrap_or(defaults.create_database),
        }
    }
}
