//! CLI surface and optional static config overlay.
//!
//! A `clap` derive struct for the command line plus a `Deserialize` struct
//! for an optional TOML file, `#[serde(default = "...")]` floors, and
//! `Config::load`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Mount a conversational-AI backend as a filesystem.
#[derive(Debug, Parser)]
#[command(name = "shelleyfs", about = "Mount a conversational-AI backend as a filesystem")]
pub struct Cli {
    /// Directory to mount at.
    pub mountpoint: PathBuf,

    /// URL of the initial default backend (e.g. https://api.example.com).
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Path to the persistent state file. Defaults under the invoker's home.
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Optional static TOML config overlay (predefined backends).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Request-cache TTL in seconds. 0 disables caching.
    #[arg(long, default_value_t = 5)]
    pub cache_ttl_secs: u64,

    /// Minutes before an uncommitted clone is garbage collected.
    #[arg(long, default_value_t = 60)]
    pub clone_timeout_mins: u64,

    /// Optional bind address for the diagnostics HTTP endpoint, e.g. 127.0.0.1:9900.
    #[arg(long)]
    pub diagnostics_addr: Option<String>,

    /// Env var name holding a Sentry DSN; unset or empty disables reporting.
    #[arg(long)]
    pub sentry_dsn_env: Option<String>,
}

impl Cli {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_mins * 60)
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_file)
    }
}

pub fn default_state_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shelleyfs")
        .join("state.json")
}

/// Static overlay: backends predeclared so a fresh mount isn't limited to an
/// unconfigured `default`.
#[derive(Debug, Default, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub backend: Vec<BackendEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub is_default: bool,
}

impl StaticConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "failed to parse shelleyfs.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_has_no_backends() {
        let cfg: StaticConfig = toml::from_str("").unwrap();
        assert!(cfg.backend.is_empty());
    }

    #[test]
    fn parses_backend_table() {
        let cfg: StaticConfig = toml::from_str(
            r#"
            [[backend]]
            name = "default"
            url = "https://api.example.com"
            is_default = true

            [[backend]]
            name = "staging.example.com"
            url = "https://staging.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend.len(), 2);
        assert_eq!(cfg.backend[0].name, "default");
        assert!(cfg.backend[0].is_default);
        assert!(!cfg.backend[1].is_default);
    }

    #[test]
    fn invalid_toml_fails() {
        let result: Result<StaticConfig, _> = toml::from_str("not valid toml {{{");
        assert!(result.is_err());
    }

    #[test]
    fn cli_ttl_and_timeout_conversions() {
        let cli = Cli {
            mountpoint: PathBuf::from("/mnt"),
            backend_url: None,
            state_file: None,
            config: None,
            cache_ttl_secs: 5,
            clone_timeout_mins: 60,
            diagnostics_addr: None,
            sentry_dsn_env: None,
        };
        assert_eq!(cli.cache_ttl(), Duration::from_secs(5));
        assert_eq!(cli.clone_timeout(), Duration::from_secs(3600));
    }
}
