//! Configuration module
//!
//! Settings come from a config file, then `TESTFLEET_*` environment variables,
//! then command-line flags, each layer overriding the one before.

pub mod env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::executor::Timings;
use crate::results::ResumeStore;
use env::EnvConfig;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./testfleet.yaml",
    "./testfleet.yml",
    "./.testfleet.yaml",
    "~/.config/testfleet/config.yaml",
];

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the coordinator binds to
    pub host: String,

    /// Coordinator port; 0 picks a free one
    pub port: u16,

    /// Number of worker processes; 0 runs items in this process
    pub workers: usize,

    /// Stop assigning items after the first failure or error
    pub stop_on_error: bool,

    /// Worker heartbeat period
    pub heartbeat_secs: u64,

    /// Worker sleep after a pending answer
    pub pending_backoff_secs: u64,

    /// Supervisor liveness poll period
    pub poll_interval_secs: u64,

    /// Silence after which a worker is declared dead
    pub dead_threshold_secs: u64,

    /// How long to wait for the coordinator to become reachable
    pub probe_timeout_secs: u64,

    /// RPC timeout
    pub timeout_secs: u64,

    /// Resume database location (defaults under the user data directory)
    pub resume_db: Option<PathBuf>,

    /// Sessions older than this are pruned after each run
    pub resume_retention_days: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 0,
            stop_on_error: false,
            heartbeat_secs: 1,
            pending_backoff_secs: 5,
            poll_interval_secs: 5,
            dead_threshold_secs: 10,
            probe_timeout_secs: 10,
            timeout_secs: 30,
            resume_db: None,
            resume_retention_days: 30,
        }
    }
}

impl AppConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from an explicit path, else the first standard location, else defaults
    pub fn load_default(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Override fields set in the environment
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(host) = &env.host {
            self.host = host.clone();
        }
        if let Some(port) = env.port {
            self.port = port;
        }
        if let Some(workers) = env.workers {
            self.workers = workers;
        }
        if let Some(stop) = env.stop_on_error {
            self.stop_on_error = stop;
        }
        if let Some(timeout) = env.timeout {
            self.timeout_secs = timeout;
        }
        if let Some(path) = &env.resume_db {
            self.resume_db = Some(PathBuf::from(path));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_secs == 0 || self.poll_interval_secs == 0 {
            anyhow::bail!("Heartbeat and poll intervals must be at least one second");
        }
        if self.dead_threshold_secs <= 2 * self.heartbeat_secs {
            anyhow::bail!(
                "dead_threshold_secs ({}) must exceed twice heartbeat_secs ({})",
                self.dead_threshold_secs,
                self.heartbeat_secs
            );
        }
        if self.dead_threshold_secs <= self.pending_backoff_secs {
            anyhow::bail!(
                "dead_threshold_secs ({}) must exceed pending_backoff_secs ({})",
                self.dead_threshold_secs,
                self.pending_backoff_secs
            );
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn timings(&self) -> Timings {
        Timings {
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            pending_backoff: Duration::from_secs(self.pending_backoff_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            dead_threshold: Duration::from_secs(self.dead_threshold_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            ..Timings::default()
        }
    }

    pub fn resume_path(&self) -> PathBuf {
        self.resume_db
            .clone()
            .unwrap_or_else(ResumeStore::default_path)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.resume_retention_days))
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.timeout_secs, 30);
        assert!(config.validate().is_ok());
        assert_eq!(config.timings(), Timings::default());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testfleet.yaml");
        std::fs::write(&path, "workers: 4\nstop_on_error: true\nport: 7000\n").unwrap();

        let config = AppConfig::load_default(Some(&path)).unwrap();
        assert_eq!(config.workers, 4);
        assert!(config.stop_on_error);
        assert_eq!(config.port, 7000);
        assert_eq!(config.heartbeat_secs, 1);
    }

    #[test]
    fn test_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testfleet.json");
        std::fs::write(&path, r#"{"dead_threshold_secs": 20, "resume_db": "/tmp/r.db"}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.timings().dead_threshold, Duration::from_secs(20));
        assert_eq!(config.resume_path(), PathBuf::from("/tmp/r.db"));
    }

    #[test]
    fn test_validate_dead_threshold() {
        let tight = AppConfig {
            heartbeat_secs: 5,
            dead_threshold_secs: 10,
            ..AppConfig::default()
        };
        assert!(tight.validate().is_err());

        let below_backoff = AppConfig {
            dead_threshold_secs: 5,
            ..AppConfig::default()
        };
        assert!(below_backoff.validate().is_err());
    }

    #[test]
    fn test_apply_env() {
        let mut config = AppConfig::default();
        config.apply_env(&EnvConfig {
            workers: Some(8),
            stop_on_error: Some(true),
            ..EnvConfig::default()
        });
        assert_eq!(config.workers, 8);
        assert!(config.stop_on_error);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("~/.config/testfleet/config.yaml");
        assert!(!path.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("./testfleet.yaml"), PathBuf::from("./testfleet.yaml"));
    }
}
