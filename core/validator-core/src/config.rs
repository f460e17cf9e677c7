//! Runtime configuration for the validator.
//!
//! Loaded from TOML. Every section is optional and falls back to the defaults
//! below, so a missing file yields a working configuration.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ValidatorError};

pub const CONFIG_PATH_ENV: &str = "VALIDATOR_CONFIG_PATH";
const STATE_DIR_NAME: &str = ".gridwatch";
const CONFIG_FILE_NAME: &str = "validator.toml";
const SOCKET_FILE_NAME: &str = "validator.sock";

/// Which threshold a summary keeps when a project's threshold changes
/// between readings of the same event.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    FirstSeen,
    #[default]
    LastSeen,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_secs: u64,
    pub idle_threshold_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            idle_threshold_secs: 60,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub drain_timeout_secs: u64,
    /// How long to wait for an in-progress idle tick before draining anyway.
    pub monitor_stop_wait_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
            monitor_stop_wait_secs: 5,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn monitor_stop_wait(&self) -> Duration {
        Duration::from_secs(self.monitor_stop_wait_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub queue_capacity: usize,
    pub shutdown_wait_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            shutdown_wait_secs: 5,
        }
    }
}

impl NotifierConfig {
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackingConfig {
    /// Open a summary on the first reading even when it is compliant.
    pub track_compliant_projects: bool,
    pub threshold_policy: ThresholdPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_compliant_projects: true,
            threshold_policy: ThresholdPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub outbox_dir: Option<PathBuf>,
    pub sender_name: String,
    pub sender_address: String,
    pub subject: String,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            outbox_dir: None,
            sender_name: "GridStream Reports".to_string(),
            sender_address: "reports@gridstream.local".to_string(),
            subject: "Your Demand Response Event Report".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FaultsConfig {
    pub outbox_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ValidatorConfig {
    pub server: ServerConfig,
    pub monitor: MonitorConfig,
    pub shutdown: ShutdownConfig,
    pub notifier: NotifierConfig,
    pub tracking: TrackingConfig,
    pub reports: ReportsConfig,
    pub faults: FaultsConfig,
    /// Project id to report recipient address.
    pub recipients: BTreeMap<String, String>,
}

impl ValidatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.monitor.check_interval_secs == 0 {
            return Err(ValidatorError::ConfigInvalid(
                "monitor.check_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.monitor.idle_threshold_secs < self.monitor.check_interval_secs {
            return Err(ValidatorError::ConfigInvalid(
                "monitor.idle_threshold_secs must be at least monitor.check_interval_secs"
                    .to_string(),
            ));
        }
        if self.notifier.queue_capacity == 0 {
            return Err(ValidatorError::ConfigInvalid(
                "notifier.queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_path(&self, state_dir: &Path) -> PathBuf {
        self.server
            .socket_path
            .clone()
            .unwrap_or_else(|| state_dir.join(SOCKET_FILE_NAME))
    }

    pub fn reports_outbox_dir(&self, state_dir: &Path) -> PathBuf {
        self.reports
            .outbox_dir
            .clone()
            .unwrap_or_else(|| state_dir.join("outbox").join("reports"))
    }

    pub fn faults_outbox_path(&self, state_dir: &Path) -> PathBuf {
        self.faults
            .outbox_path
            .clone()
            .unwrap_or_else(|| state_dir.join("outbox").join("faults.jsonl"))
    }
}

/// `~/.gridwatch`, the root for the socket, spools and logs.
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(ValidatorError::HomeDirNotFound)?;
    Ok(home.join(STATE_DIR_NAME))
}

fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(state_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_config(path: Option<PathBuf>) -> Result<ValidatorConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        tracing::info!(path = %config_path.display(), "Config file not found; using defaults");
        return Ok(ValidatorConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| ValidatorError::Io {
        context: format!("reading config {}", config_path.display()),
        source: err,
    })?;
    let config: ValidatorConfig =
        toml::from_str(&content).map_err(|err| ValidatorError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.monitor.check_interval(), Duration::from_secs(60));
        assert_eq!(config.monitor.idle_threshold(), Duration::from_secs(60));
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown.monitor_stop_wait(), Duration::from_secs(5));
        assert!(config.tracking.track_compliant_projects);
        assert_eq!(config.tracking.threshold_policy, ThresholdPolicy::LastSeen);
        assert!(config.recipients.is_empty());
    }

    #[test]
    fn load_config_parses_sections_and_recipients() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("validator.toml");
        fs_err::write(
            &path,
            r#"
[monitor]
check_interval_secs = 30
idle_threshold_secs = 90

[shutdown]
drain_timeout_secs = 10

[tracking]
track_compliant_projects = false
threshold_policy = "first_seen"

[reports]
outbox_dir = "/tmp/reports"

[recipients]
p1 = "owner@example.com"
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config.monitor.check_interval_secs, 30);
        assert_eq!(config.monitor.idle_threshold_secs, 90);
        assert_eq!(config.shutdown.drain_timeout_secs, 10);
        assert!(!config.tracking.track_compliant_projects);
        assert_eq!(config.tracking.threshold_policy, ThresholdPolicy::FirstSeen);
        assert_eq!(
            config.reports_outbox_dir(Path::new("/state")),
            PathBuf::from("/tmp/reports")
        );
        assert_eq!(config.reports.subject, "Your Demand Response Event Report");
        assert_eq!(
            config.recipients.get("p1").map(String::as_str),
            Some("owner@example.com")
        );
    }

    #[test]
    fn load_config_rejects_idle_threshold_below_interval() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("validator.toml");
        fs_err::write(
            &path,
            "[monitor]\ncheck_interval_secs = 60\nidle_threshold_secs = 30\n",
        )
        .expect("write config");

        let err = load_config(Some(path)).unwrap_err();
        assert!(matches!(err, ValidatorError::ConfigInvalid(_)));
    }

    #[test]
    fn load_config_reports_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("validator.toml");
        fs_err::write(&path, "[monitor\n").expect("write config");

        let err = load_config(Some(path)).unwrap_err();
        assert!(matches!(err, ValidatorError::ConfigMalformed { .. }));
    }

    #[test]
    fn demo_config_is_valid() {
        let config: ValidatorConfig =
            toml::from_str(include_str!("../../../demos/validator.toml")).expect("parse demo");
        config.validate().expect("valid demo");
        assert_eq!(config.recipients.len(), 2);
    }

    #[test]
    fn default_paths_live_under_state_dir() {
        let config = ValidatorConfig::default();
        let base = Path::new("/home/u/.gridwatch");
        assert_eq!(config.socket_path(base), base.join("validator.sock"));
        assert_eq!(
            config.faults_outbox_path(base),
            base.join("outbox").join("faults.jsonl")
        );
    }
}
