//! Configuration loaded from YAML.

use crate::auth::TokenEntry;
use crate::pagination::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, PageLimits};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "FLOWLINE_CONFIG";

const DEFAULT_LISTEN: &str = "127.0.0.1:3000";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowline")
}

fn default_database() -> PathBuf {
    data_dir().join("flowline.db")
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

fn default_max_page_limit() -> usize {
    MAX_PAGE_LIMIT
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

/// Server and store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Address the HTTP server binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,

    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: usize,

    /// Upper bound on one store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Static bearer tokens
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            listen: default_listen(),
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: MAX_PAGE_LIMIT,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            tokens: Vec::new(),
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowline")
            .join("config.yml")
    }

    /// Load from an explicit path, then `$FLOWLINE_CONFIG`, then the default
    /// location. A missing default file yields the built-in defaults; a
    /// missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.is_empty()
        {
            return Self::load_file(Path::new(&path));
        }

        let path = Self::default_path();
        if path.exists() {
            Self::load_file(&path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse one YAML file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_page_limit == 0 || self.default_page_limit == 0 {
            eyre::bail!("page limits must be positive");
        }
        if self.max_page_limit > MAX_PAGE_LIMIT {
            eyre::bail!("max_page_limit ({}) exceeds {}", self.max_page_limit, MAX_PAGE_LIMIT);
        }
        if self.default_page_limit > self.max_page_limit {
            eyre::bail!(
                "default_page_limit ({}) exceeds max_page_limit ({})",
                self.default_page_limit,
                self.max_page_limit
            );
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default: self.default_page_limit,
            max: self.max_page_limit,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen))
    }

    /// PID file of a server using this config's database.
    pub fn pid_path(&self) -> PathBuf {
        self.database.with_extension("pid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen, "127.0.0.1:3000");
        assert_eq!(config.page_limits(), PageLimits::default());
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert!(config.tokens.is_empty());
        assert!(config.database.ends_with("flowline/flowline.db"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yml");
        fs::write(
            &path,
            r#"
database: /tmp/flows.db
max_page_limit: 50
tokens:
  - token: abc
    user_id: alice
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/flows.db"));
        assert_eq!(config.max_page_limit, 50);
        assert_eq!(config.default_page_limit, 10);
        assert_eq!(config.tokens.len(), 1);
        assert_eq!(config.tokens[0].email, "");
        assert_eq!(config.pid_path(), PathBuf::from("/tmp/flows.pid"));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yml");
        fs::write(&path, "default_page_limit: 200\nmax_page_limit: 100\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_max_page_limit_capped() {
        let config = Config {
            max_page_limit: MAX_PAGE_LIMIT + 1,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp_dir.path().join("absent.yml"))).is_err());
    }

    #[test]
    fn test_bad_listen_address() {
        let config = Config {
            listen: "not an address".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
