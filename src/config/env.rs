//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTFLEET";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Coordinator host from TESTFLEET_HOST
    pub host: Option<String>,
    /// Coordinator port from TESTFLEET_PORT
    pub port: Option<u16>,
    /// Worker count from TESTFLEET_WORKERS
    pub workers: Option<usize>,
    /// Fail-fast from TESTFLEET_STOP_ON_ERROR
    pub stop_on_error: Option<bool>,
    /// RPC timeout from TESTFLEET_TIMEOUT
    pub timeout: Option<u64>,
    /// Config file from TESTFLEET_CONFIG
    pub config_file: Option<String>,
    /// Resume database from TESTFLEET_RESUME_DB
    pub resume_db: Option<String>,
    /// Verbose from TESTFLEET_VERBOSE
    pub verbose: Option<bool>,
    /// Log level from TESTFLEET_LOG_LEVEL
    pub log_level: Option<String>,
    /// Output format from TESTFLEET_FORMAT
    pub format: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            host: get_env("HOST"),
            port: get_env_parse("PORT"),
            workers: get_env_parse("WORKERS"),
            stop_on_error: get_env_bool("STOP_ON_ERROR"),
            timeout: get_env_parse("TIMEOUT"),
            config_file: get_env("CONFIG"),
            resume_db: get_env("RESUME_DB"),
            verbose: get_env_bool("VERBOSE"),
            log_level: get_env("LOG_LEVEL"),
            format: get_env("FORMAT"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.workers.is_some()
            || self.stop_on_error.is_some()
            || self.timeout.is_some()
            || self.config_file.is_some()
            || self.resume_db.is_some()
            || self.verbose.is_some()
            || self.log_level.is_some()
            || self.format.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sets variables for the lifetime of the guard
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(name, value)| {
                    let key = format!("{ENV_PREFIX}_{name}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, value);
                    (key, old)
                })
                .collect();
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.host.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::set(&[("HOST", "10.0.0.1"), ("PORT", "7100"), ("WORKERS", "6")]);

        let config = EnvConfig::load();
        assert_eq!(config.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.port, Some(7100));
        assert_eq!(config.workers, Some(6));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_and_bad_numbers() {
        let _guard = EnvGuard::set(&[("STOP_ON_ERROR", "yes"), ("TIMEOUT", "soon")]);

        let config = EnvConfig::load();
        assert_eq!(config.stop_on_error, Some(true));
        assert_eq!(config.timeout, None);
    }
}
