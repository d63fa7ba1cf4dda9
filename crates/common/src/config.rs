// cftunnel - Quick Tunnel Config Module
// Handles supervisor configuration (binary lookup, state directory, timings)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Placeholder substituted with the local port in `args`
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Name of the per-user state directory (under the home directory)
pub const STATE_DIR_NAME: &str = ".cftunnel";

/// Quick tunnel supervisor configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuickConfig {
    /// Executable name searched next to the host binary, in the state
    /// directory and on PATH. `.exe` is appended on Windows.
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Explicit executable path, skips the search entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,

    /// Arguments passed to the binary; `{port}` is replaced with the local port
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Directory holding `quick.pid` and `quick.url`
    /// Default: ~/.cftunnel
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Substring identifying the line that announces the public hostname
    #[serde(default = "default_hostname_marker")]
    pub hostname_marker: String,

    /// Scheme prefix of the announced URL token
    #[serde(default = "default_url_scheme")]
    pub url_scheme: String,

    /// How long `start` waits for the URL before returning without one
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,

    /// Upper bound on how long `stop` waits for the process to disappear
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Time given to a graceful termination before it is forced
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Liveness polling step used while stopping
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_binary_name() -> String {
    "cloudflared".to_string()
}

fn default_args() -> Vec<String> {
    vec![
        "tunnel".to_string(),
        "--url".to_string(),
        format!("http://localhost:{}", PORT_PLACEHOLDER),
    ]
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
}

fn default_hostname_marker() -> String {
    "trycloudflare.com".to_string()
}

fn default_url_scheme() -> String {
    "https://".to_string()
}

fn default_resolve_timeout_ms() -> u64 {
    7500 // slow machines take a while to register the tunnel
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

fn default_stop_grace_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for QuickConfig {
    fn default() -> Self {
        Self {
            binary_name: default_binary_name(),
            binary_path: None,
            args: default_args(),
            state_dir: default_state_dir(),
            hostname_marker: default_hostname_marker(),
            url_scheme: default_url_scheme(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl QuickConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.binary_name.trim().is_empty() && self.binary_path.is_none() {
            return Err(Error::Config(
                "binary_name must not be empty when binary_path is unset".to_string(),
            ));
        }

        if self.hostname_marker.is_empty() {
            return Err(Error::Config("hostname_marker must not be empty".to_string()));
        }

        if self.url_scheme.is_empty() {
            return Err(Error::Config("url_scheme must not be empty".to_string()));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be greater than 0".to_string()));
        }

        if self.stop_grace_ms > self.stop_timeout_ms {
            return Err(Error::Config(format!(
                "stop_grace_ms ({}) must not exceed stop_timeout_ms ({})",
                self.stop_grace_ms, self.stop_timeout_ms
            )));
        }

        Ok(())
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, falling back to defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No quick tunnel configuration found, using defaults");
            debug!("Configuration would be read from: {}", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        info!("Loaded quick tunnel configuration from: {}", path.display());
        Ok(config)
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        Ok(config_dir.join("cftunnel").join("quick.toml"))
    }

    /// Executable file name for the current platform
    pub fn executable_name(&self) -> String {
        if cfg!(windows) && !self.binary_name.to_ascii_lowercase().ends_with(".exe") {
            format!("{}.exe", self.binary_name)
        } else {
            self.binary_name.clone()
        }
    }

    /// Arguments with the local port substituted
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("quick.pid")
    }

    pub fn url_path(&self) -> PathBuf {
        self.state_dir.join("quick.url")
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
