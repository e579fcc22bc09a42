//! Runtime configuration, deserialized from TOML or JSON.
//!
//! ```toml
//! client_name = "My Editor"
//! init_timeout_ms = 20000
//! shutdown_timeout_ms = 1000
//!
//! [servers.java]
//! command = "jdtls"
//! args = ["-data", "/tmp/jdtls-workspace"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;

/// Client name sent on initialize when the host does not configure one.
pub const DEFAULT_CLIENT_NAME: &str = "lsbridge";

/// Marker type tag for annotations created from diagnostics.
pub const DEFAULT_MARKER_TYPE: &str = "lsbridge.diagnostic";

const DEFAULT_INIT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

fn default_init_timeout_ms() -> u64 {
    DEFAULT_INIT_TIMEOUT_MS
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_marker_type() -> String {
    DEFAULT_MARKER_TYPE.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid env denylist pattern: {0}")]
    Denylist(#[from] globset::Error),
}

impl ConfigError {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Denylist(_) => None,
        }
    }
}

/// Configuration for the LSP runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct LspConfig {
    /// Host product name reported to servers. Default: [`DEFAULT_CLIENT_NAME`].
    #[serde(default)]
    client_name: Option<String>,
    /// Upper bound on the initialize handshake. Default: 30 seconds.
    #[serde(default = "default_init_timeout_ms")]
    init_timeout_ms: u64,
    /// Upper bound on each shutdown step: the shutdown reply, then draining
    /// queued messages. Default: 2 seconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    shutdown_timeout_ms: u64,
    /// Marker type tag for diagnostic annotations.
    #[serde(default = "default_marker_type")]
    marker_type: String,
    /// Server launch configurations, keyed by content type (e.g. "java").
    #[serde(default)]
    servers: HashMap<String, ServerConfig>,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            client_name: None,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            marker_type: default_marker_type(),
            servers: HashMap::new(),
        }
    }
}

impl LspConfig {
    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(DEFAULT_CLIENT_NAME)
    }

    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub fn marker_type(&self) -> &str {
        &self.marker_type
    }

    #[must_use]
    pub fn servers(&self) -> &HashMap<String, ServerConfig> {
        &self.servers
    }

    #[must_use]
    pub fn server(&self, content_type: &str) -> Option<&ServerConfig> {
        self.servers.get(content_type)
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// How to launch one language server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable command, resolved through `PATH`.
    command: String,
    #[serde(default)]
    args: Vec<String>,
    /// Extra environment patterns to strip, on top of the built-in secret denylist.
    #[serde(default)]
    env_denylist: Vec<String>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env_denylist: Vec::new(),
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Compile the built-in secret patterns plus this server's extras.
    /// Matching is case-insensitive.
    pub fn env_denylist(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        let patterns = lsbridge_types::ENV_SECRET_DENYLIST
            .iter()
            .copied()
            .chain(self.env_denylist.iter().map(String::as_str));
        for pattern in patterns {
            builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
        }
        Ok(builder.build()?)
    }
}
