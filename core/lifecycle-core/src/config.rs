//! Runtime configuration.
//!
//! Loaded from `~/.thread-lifecycle/config.toml`. A missing file yields the
//! defaults; every section and key is optional.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LifecycleError, Result};

const DEFAULT_DATA_DIR_NAME: &str = ".thread-lifecycle";
const CONFIG_FILE_NAME: &str = "config.toml";
/// Upper bound for every `*_secs` setting (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub thread_db: Option<PathBuf>,
    pub counter_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub active_users_ttl_secs: u64,
    pub active_thread_chats_ttl_secs: u64,
    pub hibernation_delay_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            active_users_ttl_secs: 10 * 60,
            active_thread_chats_ttl_secs: 24 * 60 * 60,
            hibernation_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub default_reattempt_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_reattempt_delay_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub storage: StorageConfig,
    pub sandbox: SandboxConfig,
    pub queue: QueueConfig,
}

impl LifecycleConfig {
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn thread_db_path(&self) -> Result<PathBuf> {
        match &self.storage.thread_db {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join("threads.db")),
        }
    }

    pub fn counter_db_path(&self) -> Result<PathBuf> {
        match &self.storage.counter_db {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join("sandbox-counters.db")),
        }
    }

    /// Clamped to [`MAX_DURATION_SECS`]; `load_config` rejects larger values.
    pub fn default_reattempt_delay(&self) -> chrono::Duration {
        let secs = self.queue.default_reattempt_delay_secs.min(MAX_DURATION_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn hibernation_delay(&self) -> Duration {
        Duration::from_secs(self.sandbox.hibernation_delay_secs)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for (key, secs) in [
            ("sandbox.active_users_ttl_secs", self.sandbox.active_users_ttl_secs),
            (
                "sandbox.active_thread_chats_ttl_secs",
                self.sandbox.active_thread_chats_ttl_secs,
            ),
            ("sandbox.hibernation_delay_secs", self.sandbox.hibernation_delay_secs),
            (
                "queue.default_reattempt_delay_secs",
                self.queue.default_reattempt_delay_secs,
            ),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(format!(
                    "{} = {} exceeds the maximum of {} seconds",
                    key, secs, MAX_DURATION_SECS
                ));
            }
        }
        Ok(())
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| LifecycleError::Config {
        path: PathBuf::from("~"),
        details: "Home directory not found".to_string(),
    })?;
    Ok(home.join(DEFAULT_DATA_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_config(path: Option<&Path>) -> Result<LifecycleConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(LifecycleConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| LifecycleError::Io {
        context: format!("Failed to read config {}", config_path.display()),
        source,
    })?;
    let config =
        toml::from_str::<LifecycleConfig>(&content).map_err(|err| LifecycleError::Config {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    config.validate().map_err(|details| LifecycleError::Config {
        path: config_path.clone(),
        details,
    })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config, LifecycleConfig::default());
        assert_eq!(config.sandbox.active_users_ttl_secs, 600);
        assert_eq!(config.sandbox.active_thread_chats_ttl_secs, 86_400);
        assert_eq!(config.default_reattempt_delay(), chrono::Duration::hours(1));
    }

    #[test]
    fn parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[storage]
data_dir = "/var/lib/threads"

[sandbox]
hibernation_delay_secs = 30
"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.sandbox.hibernation_delay_secs, 30);
        assert_eq!(config.sandbox.active_users_ttl_secs, 600);
        assert_eq!(
            config.thread_db_path().expect("thread db path"),
            PathBuf::from("/var/lib/threads/threads.db")
        );
        assert_eq!(
            config.counter_db_path().expect("counter db path"),
            PathBuf::from("/var/lib/threads/sandbox-counters.db")
        );
    }

    #[test]
    fn rejects_malformed_config() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[sandbox]\nactive_users_ttl_secs = \"soon\"\n")
            .expect("write config");

        let err = load_config(Some(&path)).expect_err("should reject");
        assert!(matches!(err, LifecycleError::Config { .. }));
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            "[queue]\ndefault_reattempt_delay_secs = 9223372036854775807\n",
        )
        .expect("write config");

        let err = load_config(Some(&path)).expect_err("should reject");
        match err {
            LifecycleError::Config { details, .. } => {
                assert!(details.contains("queue.default_reattempt_delay_secs"), "{}", details)
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn reattempt_delay_is_clamped_when_built_by_hand() {
        let mut config = LifecycleConfig::default();
        config.queue.default_reattempt_delay_secs = u64::MAX;
        assert_eq!(
            config.default_reattempt_delay(),
            chrono::Duration::seconds(MAX_DURATION_SECS as i64)
        );
    }
}
