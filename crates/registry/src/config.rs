use std::{env, path::PathBuf, time::Duration};

use arcade_types::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_PROBE_CONCURRENCY};
use arcade_util::expand_tilde;
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Environment variable that points at an alternate config file.
pub const CONFIG_PATH_ENV: &str = "ARCADE_CONFIG_PATH";

/// User configuration for the Arcade CLI.
///
/// Every field has a default, so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcadeConfig {
    /// Directory searched recursively for `*.json` definitions.
    pub definitions_dir: String,
    pub request_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub result_timeout_secs: u64,
    pub key_probe_timeout_secs: u64,
    pub key_probe_concurrency: usize,
    pub max_poll_attempts: u32,
}

impl Default for ArcadeConfig {
    fn default() -> Self {
        Self {
            definitions_dir: "definitions".to_string(),
            request_timeout_secs: 60,
            status_timeout_secs: 15,
            result_timeout_secs: 30,
            key_probe_timeout_secs: 10,
            key_probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl ArcadeConfig {
    /// Loads the config from [`default_config_path`].
    ///
    /// A missing or malformed file yields the defaults.
    pub fn load() -> Self {
        Self::load_from(default_config_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let Ok(content) = std::fs::read_to_string(&path) else {
            debug!(path = %path.display(), "no config file; using defaults");
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(error) => {
                warn!(path = %path.display(), %error, "malformed config file; using defaults");
                Self::default()
            }
        }
    }

    pub fn definitions_dir(&self) -> PathBuf {
        expand_tilde(&self.definitions_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }

    pub fn key_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.key_probe_timeout_secs)
    }
}

/// Get the default path for the Arcade configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("arcade")
        .join("config.json")
}
