//! Engine configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! is a valid configuration:
//!
//! ```toml
//! event_capacity = 256
//! flush_on_startup = true
//! flush_interval_secs = 300
//! snapshot_remote_on_conflict = false
//!
//! [remote]
//! base_url = "https://notes.example.com/api"
//! token_env = "MY_NOTES_TOKEN"
//! timeout_secs = 30
//!
//! [store]
//! path = "/var/lib/quire/mirror.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted when no token is configured.
pub const TOKEN_ENV: &str = "QUIRE_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,

    /// Flush once when the trigger starts.
    pub flush_on_startup: bool,

    /// Periodic flush interval; None disables periodic flushing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_interval_secs: Option<u64>,

    /// On a detected conflict, also snapshot the server's version that the
    /// queued update is about to overwrite.
    pub snapshot_remote_on_conflict: bool,

    pub remote: RemoteConfig,

    pub store: StoreConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            flush_on_startup: true,
            flush_interval_secs: None,
            snapshot_remote_on_conflict: false,
            remote: RemoteConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a config file, falling back to defaults if it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// `<config dir>/quire/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("quire").join("config.toml"))
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_flush_on_startup(mut self, enabled: bool) -> Self {
        self.flush_on_startup = enabled;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    pub fn with_snapshot_remote_on_conflict(mut self, enabled: bool) -> Self {
        self.snapshot_remote_on_conflict = enabled;
        self
    }

    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store.path = Some(path.into());
        self
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_secs.map(Duration::from_secs)
    }
}

/// Where the remote service lives and how to authenticate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,

    /// Bearer token (inline).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            token: None,
            token_env: None,
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_token_env(mut self, env_var: impl Into<String>) -> Self {
        self.token_env = Some(env_var.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Inline token, then `token_env`, then [`TOKEN_ENV`].
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = &self.token {
            return Some(token.clone());
        }
        if let Some(env_var) = &self.token_env {
            return std::env::var(env_var).ok();
        }
        std::env::var(TOKEN_ENV).ok()
    }
}

/// Where the mirror database lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Configured path, or `<data dir>/quire/mirror.db`.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::data_local_dir().map(|p| p.join("quire").join("mirror.db")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config.event_capacity, 256);
        assert!(config.flush_on_startup);
        assert!(config.flush_interval().is_none());
        assert_eq!(config.remote.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_toml_overrides() {
        let config: SyncConfig = toml::from_str(
            r#"
            flush_interval_secs = 60

            [remote]
            base_url = "https://example.test/api"
            token = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.flush_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.remote.base_url, "https://example.test/api");
        assert_eq!(config.remote.resolve_token(), Some("abc".into()));
        assert_eq!(config.remote.timeout_secs, 30);
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "event_capacity = \"lots\"").unwrap();
        let err = SyncConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));

        let missing = dir.path().join("missing.toml");
        assert!(SyncConfig::load_or_default(&missing).is_ok());
        assert!(matches!(
            SyncConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn token_resolution_order() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("QUIRE_TEST_TOKEN_ORDER", "from-env");
        }
        let config = RemoteConfig::default().with_token_env("QUIRE_TEST_TOKEN_ORDER");
        assert_eq!(config.resolve_token(), Some("from-env".into()));

        let config = config.with_token("inline");
        assert_eq!(config.resolve_token(), Some("inline".into()));

        // SAFETY: test cleanup
        unsafe {
            std::env::remove_var("QUIRE_TEST_TOKEN_ORDER");
        }
    }

    #[test]
    fn builder_setters() {
        let config = SyncConfig::default()
            .with_flush_on_startup(false)
            .with_flush_interval(Duration::from_millis(10))
            .with_store_path("/tmp/m.db")
            .with_remote(RemoteConfig::new("http://h/api").with_timeout(Duration::from_secs(5)));
        assert!(!config.flush_on_startup);
        assert_eq!(config.flush_interval_secs, Some(1));
        assert_eq!(config.store.resolved_path(), Some(PathBuf::from("/tmp/m.db")));
        assert_eq!(config.remote.timeout_secs, 5);
    }
}
