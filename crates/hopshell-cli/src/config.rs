//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use hopshell_exec::{DEFAULT_TIMEOUT, HopConfig};
use serde::Deserialize;

/// Environment variable pointing at the configuration file
pub const CONFIG_ENV: &str = "HOPSHELL_CONFIG";

/// Top-level configuration for a hopshell run
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Per-hop dial and per-command timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Commands to run when none are given on the command line
    #[serde(default)]
    pub commands: Vec<String>,
    /// Hops in dialing order, the last one runs the commands
    #[serde(default)]
    pub hop: Vec<HopConfig>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Config {
    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid configuration
    pub fn parse(content: &str) -> eyre::Result<Self> {
        let config: Config = toml::from_str(content)?;
        eyre::ensure!(config.timeout_secs > 0, "timeout_secs must be at least 1");
        Ok(config)
    }

    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("invalid configuration in {}", path.display()))
    }

    /// Load from an explicit path, the environment or the default locations
    ///
    /// # Errors
    /// Returns error if no configuration file exists or it cannot be parsed
    pub fn locate(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        // Check environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(&PathBuf::from(path));
        }

        for path in default_paths() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "using configuration file");
                return Self::load(&path);
            }
        }

        eyre::bail!("no configuration file found (use --config or set {CONFIG_ENV})")
    }

    /// Timeout as a duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("hopshell.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("hopshell/hopshell.toml"));
    }
    paths
}
