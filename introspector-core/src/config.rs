//! Coordinator configuration.

use crate::error::{CoordinatorError, CoordinatorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where processed/unprocessed introspection data is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreData {
    /// Store raw and processed payloads in the object store.
    Swift,
    /// Do not store introspection payloads at all.
    None,
}

/// Master configuration for the introspection coordinator.
///
/// Mirrors the exit-condition option list: how long a node may run before
/// timing out, how long finished rows are kept around, whether and where
/// data gets archived, whether to power nodes off on completion, and the
/// hook/executor sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Seconds a node may run before `clean_up` marks it timed out. `<= 0`
    /// disables the timeout check entirely.
    pub timeout: i64,

    /// Seconds a finished node's row is kept before `clean_up` drops it.
    pub node_status_keep_time: i64,

    /// Where (if anywhere) introspection payloads get archived.
    pub store_data: StoreData,

    /// Object-store container/location name used when `store_data = Swift`.
    pub store_data_location: String,

    /// Retention window for archived payloads, mapped onto the object
    /// store's `delete_after_secs` parameter. `None` means keep forever.
    pub delete_after: Option<u64>,

    /// Power the node off after a successful introspection.
    pub power_off: bool,

    /// Store ramdisk logs to disk unconditionally, not only on failure.
    pub always_store_ramdisk_logs: bool,

    /// Directory ramdisk logs are written under.
    pub ramdisk_logs_dir: Option<String>,

    /// `strftime`-style filename format for stored ramdisk logs, given the
    /// node uuid and current time.
    pub ramdisk_logs_filename_format: String,

    /// Bound on concurrently running background tasks (object-store
    /// writes, power-off, credential settling, reapply).
    pub background_executor_size: usize,

    /// Pre-identification hook names, run in order.
    pub pre_hooks: Vec<String>,

    /// Post-identification hook names, run in order.
    pub post_hooks: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout: 3600,
            node_status_keep_time: 604_800,
            store_data: StoreData::None,
            store_data_location: "inspector_data".to_string(),
            delete_after: None,
            power_off: true,
            always_store_ramdisk_logs: false,
            ramdisk_logs_dir: None,
            ramdisk_logs_filename_format: "{uuid}_{dt}.tar.gz".to_string(),
            background_executor_size: 8,
            pre_hooks: vec!["validate_interfaces".to_string()],
            post_hooks: vec!["scheduler".to_string(), "ramdisk_error".to_string()],
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables, falling back to
    /// [`CoordinatorConfig::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            timeout: std::env::var("INSPECTOR_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout),
            node_status_keep_time: std::env::var("INSPECTOR_NODE_STATUS_KEEP_TIME")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.node_status_keep_time),
            store_data: std::env::var("INSPECTOR_STORE_DATA")
                .ok()
                .and_then(|s| match s.to_lowercase().as_str() {
                    "swift" => Some(StoreData::Swift),
                    "none" => Some(StoreData::None),
                    _ => None,
                })
                .unwrap_or(defaults.store_data),
            store_data_location: std::env::var("INSPECTOR_STORE_DATA_LOCATION")
                .unwrap_or(defaults.store_data_location),
            delete_after: std::env::var("INSPECTOR_DELETE_AFTER")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(defaults.delete_after),
            power_off: std::env::var("INSPECTOR_POWER_OFF")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.power_off),
            always_store_ramdisk_logs: std::env::var("INSPECTOR_ALWAYS_STORE_RAMDISK_LOGS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.always_store_ramdisk_logs),
            ramdisk_logs_dir: std::env::var("INSPECTOR_RAMDISK_LOGS_DIR")
                .ok()
                .or(defaults.ramdisk_logs_dir),
            ramdisk_logs_filename_format: std::env::var("INSPECTOR_RAMDISK_LOGS_FILENAME_FORMAT")
                .unwrap_or(defaults.ramdisk_logs_filename_format),
            background_executor_size: std::env::var("INSPECTOR_BACKGROUND_EXECUTOR_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.background_executor_size),
            pre_hooks: std::env::var("INSPECTOR_PRE_HOOKS")
                .ok()
                .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
                .unwrap_or(defaults.pre_hooks),
            post_hooks: std::env::var("INSPECTOR_POST_HOOKS")
                .ok()
                .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
                .unwrap_or(defaults.post_hooks),
        }
    }

    /// `clean_up`'s timeout check is a no-op whenever this returns `true`.
    pub fn timeout_disabled(&self) -> bool {
        self.timeout <= 0
    }

    pub fn node_status_keep_time(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.node_status_keep_time)
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        if self.timeout_disabled() {
            None
        } else {
            Some(Duration::from_secs(self.timeout as u64))
        }
    }

    /// Validate interdependent fields that `Default`/`from_env` cannot
    /// guarantee on their own (e.g. an env var holding an out-of-range
    /// value).
    pub fn validate(&self) -> CoordinatorResult<()> {
        use crate::error::CoreError;

        if self.background_executor_size == 0 {
            return Err(CoordinatorError::Core(CoreError::InvalidConfig {
                field: "background_executor_size".to_string(),
                reason: "must be at least 1".to_string(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_not_disabled() {
        let config = CoordinatorConfig::default();
        assert!(!config.timeout_disabled());
        assert!(config.timeout_duration().is_some());
    }

    #[test]
    fn zero_timeout_disables_cleanup_check() {
        let config = CoordinatorConfig {
            timeout: 0,
            ..CoordinatorConfig::default()
        };
        assert!(config.timeout_disabled());
        assert!(config.timeout_duration().is_none());
    }

    #[test]
    fn negative_timeout_disables_cleanup_check() {
        let config = CoordinatorConfig {
            timeout: -1,
            ..CoordinatorConfig::default()
        };
        assert!(config.timeout_disabled());
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("INSPECTOR_TIMEOUT");
        let config = CoordinatorConfig::from_env();
        assert_eq!(config.timeout, CoordinatorConfig::default().timeout);
    }
}
