//! Client configuration loading and validation.
//!
//! Resolution order (highest to lowest priority):
//! 1. Explicit `--config <path>`
//! 2. `COZ_CONFIG` environment variable
//! 3. `$XDG_CONFIG_HOME/cozctl/config.json` (or the platform config dir)
//! 4. Built-in defaults
//!
//! An explicitly named file that does not exist is an error; a missing file
//! at the default location silently falls back to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file schema version.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Environment variable naming a config file.
pub const ENV_CONFIG: &str = "COZ_CONFIG";

/// Environment variable overriding the agent socket directory.
pub const ENV_AGENT_DIR: &str = "COZ_AGENT_DIR";

const CONFIG_DIR_NAME: &str = "cozctl";
const CONFIG_FILE_NAME: &str = "config.json";

/// Default TCP port of the control service.
pub const DEFAULT_SERVICE_PORT: u16 = 2484;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(String),
}

/// Tunables for the client, the agent endpoint and the control service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub schema_version: String,
    /// Poll cadence when the target is on this host.
    pub local_poll_interval_ms: u64,
    /// Poll cadence when the target is behind a control service.
    pub remote_poll_interval_ms: u64,
    /// Bound on every request/response exchange.
    pub rpc_timeout_ms: u64,
    /// Bound on establishing a TCP connection.
    pub connect_timeout_ms: u64,
    /// Control service port used when `--host` has none.
    pub default_port: u16,
    /// Where profiled processes publish their agent sockets.
    pub agent_socket_dir: Option<PathBuf>,
    /// Persist the profile after every non-empty batch.
    pub checkpoint: bool,
    /// Bound on one process enumeration.
    pub enumeration_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            local_poll_interval_ms: 1000,
            remote_poll_interval_ms: 2000,
            rpc_timeout_ms: 5000,
            connect_timeout_ms: 3000,
            default_port: DEFAULT_SERVICE_PORT,
            agent_socket_dir: None,
            checkpoint: true,
            enumeration_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self, remote: bool) -> Duration {
        if remote {
            Duration::from_millis(self.remote_poll_interval_ms)
        } else {
            Duration::from_millis(self.local_poll_interval_ms)
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_millis(self.enumeration_timeout_ms)
    }

    /// Agent socket directory: config, then `COZ_AGENT_DIR`, then the
    /// runtime dir, then the temp dir.
    pub fn agent_dir(&self) -> PathBuf {
        if let Some(dir) = &self.agent_socket_dir {
            return dir.clone();
        }
        if let Ok(dir) = std::env::var(ENV_AGENT_DIR) {
            return PathBuf::from(dir);
        }
        if let Some(dir) = dirs::runtime_dir() {
            return dir.join(CONFIG_DIR_NAME);
        }
        std::env::temp_dir().join(CONFIG_DIR_NAME)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("local_poll_interval_ms", self.local_poll_interval_ms),
            ("remote_poll_interval_ms", self.remote_poll_interval_ms),
            ("rpc_timeout_ms", self.rpc_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("enumeration_timeout_ms", self.enumeration_timeout_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.default_port == 0 {
            return Err(ConfigError::ValidationError(
                "default_port must be greater than zero".to_string(),
            ));
        }
        let major = self.schema_version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(ConfigError::ValidationError(format!(
                "unsupported schema_version {} (expected {})",
                self.schema_version, CONFIG_SCHEMA_VERSION
            )));
        }
        Ok(())
    }
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub config_path: Option<PathBuf>,
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ClientConfig,
    /// None when built-in defaults were used.
    pub source: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let explicit = options
        .config_path
        .clone()
        .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from));

    let (path, required) = match explicit {
        Some(path) => (Some(path), true),
        None => (default_config_path(), false),
    };

    let Some(path) = path else {
        return Ok(ResolvedConfig {
            config: ClientConfig::default(),
            source: None,
        });
    };

    if !path.exists() {
        if required {
            return Err(ConfigError::NotFound { path });
        }
        return Ok(ResolvedConfig {
            config: ClientConfig::default(),
            source: None,
        });
    }

    let config = load_file(&path)?;
    config.validate()?;
    Ok(ResolvedConfig {
        config,
        source: Some(path),
    })
}

fn load_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
