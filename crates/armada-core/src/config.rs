//! Configuration resolution for Armada.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/armada/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::{ExponentialBackoff, LinearBackoff};

/// Complete Armada configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mdm: MdmConfig,
    #[serde(default)]
    pub scripts: ScriptConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub license: LicenseConfig,
}

/// Server process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

/// Which device management channels are turned on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MdmConfig {
    /// Apple push certificate and SCEP are configured.
    pub apple_enabled: bool,
    /// Windows MDM enrollment is turned on.
    pub windows_enabled: bool,
}

/// Script execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Maximum queued (not yet completed) executions per host.
    pub max_pending_per_host: usize,
    /// Character ceiling for ad-hoc script contents.
    pub max_inline_chars: usize,
    /// Character ceiling for saved script contents.
    pub max_saved_chars: usize,
    /// A host is online if it checked in within this many seconds.
    pub host_online_interval_secs: u64,
    pub sync_poll_initial_ms: u64,
    pub sync_poll_step_ms: u64,
    pub sync_poll_max_ms: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_pending_per_host: 1000,
            max_inline_chars: 10_000,
            max_saved_chars: 500_000,
            host_online_interval_secs: 3600,
            sync_poll_initial_ms: 1000,
            sync_poll_step_ms: 1000,
            sync_poll_max_ms: 5000,
        }
    }
}

impl ScriptConfig {
    /// Poll schedule for synchronous script runs.
    pub const fn sync_poll(&self) -> LinearBackoff {
        LinearBackoff {
            initial: Duration::from_millis(self.sync_poll_initial_ms),
            step: Duration::from_millis(self.sync_poll_step_ms),
            max: Duration::from_millis(self.sync_poll_max_ms),
        }
    }
}

/// Activity webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: Option<String>,
    /// Pending deliveries held in memory before new ones are dropped.
    pub queue_capacity: usize,
    /// Deliveries in flight at once.
    pub max_concurrency: usize,
    pub request_timeout_secs: u64,
    /// Total retry budget for a single delivery.
    pub max_elapsed_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            queue_capacity: 256,
            max_concurrency: 4,
            request_timeout_secs: 30,
            max_elapsed_secs: 30 * 60,
        }
    }
}

impl WebhookConfig {
    /// Retry policy for a single delivery.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed: Duration::from_secs(self.max_elapsed_secs),
            ..Default::default()
        }
    }
}

/// License tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LicenseTier {
    #[default]
    Free,
    Premium,
}

/// License configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    pub tier: LicenseTier,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            config = load_config_file(&global_path)?;
        }
    }

    if let Some(path) = explicit_path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        config = load_config_file(path)?;
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("armada").join("settings.json"))
}

/// Default database path when none is configured.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("armada").join("armada.db"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("ARMADA_DATABASE_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("ARMADA_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Some(v) = env_flag("ARMADA_APPLE_MDM_ENABLED") {
        config.mdm.apple_enabled = v;
    }
    if let Some(v) = env_flag("ARMADA_WINDOWS_MDM_ENABLED") {
        config.mdm.windows_enabled = v;
    }
    if let Ok(val) = std::env::var("ARMADA_MAX_PENDING_SCRIPTS") {
        if let Ok(n) = val.parse() {
            config.scripts.max_pending_per_host = n;
        }
    }
    if let Ok(val) = std::env::var("ARMADA_WEBHOOK_URL") {
        config.webhook.url = Some(val);
        config.webhook.enabled = true;
    }
    if let Ok(val) = std::env::var("ARMADA_LICENSE_TIER") {
        match val.as_str() {
            "premium" => config.license.tier = LicenseTier::Premium,
            "free" => config.license.tier = LicenseTier::Free,
            _ => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_limits() {
        let config = Config::default();
        assert_eq!(config.scripts.max_pending_per_host, 1000);
        assert_eq!(config.scripts.max_inline_chars, 10_000);
        assert_eq!(config.webhook.max_elapsed_secs, 1800);
        assert_eq!(config.license.tier, LicenseTier::Free);
        assert!(!config.mdm.apple_enabled);
    }

    #[test]
    fn default_sync_poll_schedule() {
        let poll = ScriptConfig::default().sync_poll();
        assert_eq!(poll.initial, Duration::from_secs(1));
        assert_eq!(poll.step, Duration::from_secs(1));
        assert_eq!(poll.max, Duration::from_secs(5));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"mdm": {"apple_enabled": true}, "license": {"tier": "premium"}}"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert!(config.mdm.apple_enabled);
        assert!(!config.mdm.windows_enabled);
        assert_eq!(config.license.tier, LicenseTier::Premium);
        assert_eq!(config.scripts.max_pending_per_host, 1000);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let err = load_config(Some(Path::new("/nonexistent/armada.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
