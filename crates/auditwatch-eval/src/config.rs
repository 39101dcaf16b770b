//! Detector and runner configuration.
//!
//! Defaults reproduce the stock detection knobs: five failed logins from one
//! IP within three minutes, three denied record reads by one
//! `(username, role)` within five minutes. Every field can be overridden
//! from a YAML file:
//!
//! ```yaml
//! brute_force:
//!   threshold: 10
//!   window: 1m
//! insider:
//!   window: 10m
//! live:
//!   idle_interval_ms: 100
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};
use crate::timespan::Timespan;

// =============================================================================
// Detector configuration
// =============================================================================

/// Threshold, window and per-key capacity of one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    /// Minimum in-window occurrences that fire an alert.
    pub threshold: usize,
    /// Sliding window length.
    pub window: Timespan,
    /// Hard bound on buffered timestamps per key.
    pub capacity: usize,
}

impl DetectorConfig {
    pub fn new(threshold: usize, window: Timespan, capacity: usize) -> Self {
        DetectorConfig {
            threshold,
            window,
            capacity,
        }
    }

    /// Reject configurations that could never fire.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.threshold == 0 {
            return Err(EvalError::InvalidConfig(format!(
                "{name}: threshold must be at least 1"
            )));
        }
        if self.window.is_zero() {
            return Err(EvalError::InvalidConfig(format!(
                "{name}: window must be longer than zero"
            )));
        }
        if self.capacity < self.threshold {
            return Err(EvalError::InvalidConfig(format!(
                "{name}: capacity {} is below threshold {}",
                self.capacity, self.threshold
            )));
        }
        Ok(())
    }
}

/// Field used to group failed logins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginGrouping {
    /// One counter per `client_ip`.
    #[default]
    ClientIp,
    /// One counter per targeted `username`.
    Username,
}

/// Brute-force login detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BruteForceConfig {
    pub threshold: usize,
    pub window: Timespan,
    pub capacity: usize,
    pub group_by: LoginGrouping,
    /// Only count logins carrying `source: "external"`.
    pub require_external_source: bool,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        BruteForceConfig {
            threshold: 5,
            window: Timespan::minutes(3),
            capacity: 300,
            group_by: LoginGrouping::ClientIp,
            require_external_source: false,
        }
    }
}

impl BruteForceConfig {
    /// The per-username, external-only variant of the detector.
    pub fn external_by_username() -> Self {
        BruteForceConfig {
            capacity: 50,
            group_by: LoginGrouping::Username,
            require_external_source: true,
            ..Default::default()
        }
    }

    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig::new(self.threshold, self.window, self.capacity)
    }
}

/// Insider repeated-access detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InsiderConfig {
    pub threshold: usize,
    pub window: Timespan,
    pub capacity: usize,
}

impl Default for InsiderConfig {
    fn default() -> Self {
        InsiderConfig {
            threshold: 3,
            window: Timespan::minutes(5),
            capacity: 100,
        }
    }
}

impl InsiderConfig {
    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig::new(self.threshold, self.window, self.capacity)
    }
}

// =============================================================================
// Live-mode configuration
// =============================================================================

/// Where the live tail starts reading once the log file is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Skip existing content; only new events are processed.
    #[default]
    End,
    /// Process the whole file, then keep following it.
    Beginning,
    /// Resume from a byte offset previously reported by the tail source.
    Offset(u64),
}

/// Polling behavior of the live tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveConfig {
    /// Sleep when no complete line is available.
    pub idle_interval_ms: u64,
    /// Sleep while waiting for the log file to be created.
    pub file_wait_interval_ms: u64,
    pub start: StartPosition,
    /// Longest line the tail will buffer. Longer lines are dropped.
    pub max_line_bytes: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            idle_interval_ms: 150,
            file_wait_interval_ms: 200,
            start: StartPosition::End,
            max_line_bytes: 1 << 20,
        }
    }
}

impl LiveConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn file_wait_interval(&self) -> Duration {
        Duration::from_millis(self.file_wait_interval_ms)
    }
}

// =============================================================================
// Top-level configuration
// =============================================================================

/// Complete configuration for a runner and its built-in detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub brute_force: BruteForceConfig,
    pub insider: InsiderConfig,
    pub live: LiveConfig,
    /// When a detector tracks more keys than this, fully expired keys are
    /// pruned. Prevents unbounded memory growth under key churn.
    pub max_tracked_keys: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            brute_force: BruteForceConfig::default(),
            insider: InsiderConfig::default(),
            live: LiveConfig::default(),
            max_tracked_keys: 100_000,
        }
    }
}

impl WatchConfig {
    /// Parse and validate a YAML document. Missing fields keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: WatchConfig = if yaml.trim().is_empty() {
            WatchConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML configuration file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.brute_force.detector().validate("brute_force")?;
        self.insider.detector().validate("insider")?;
        if self.live.idle_interval_ms == 0 || self.live.file_wait_interval_ms == 0 {
            return Err(EvalError::InvalidConfig(
                "live: polling intervals must be at least 1ms".to_string(),
            ));
        }
        if self.live.max_line_bytes == 0 {
            return Err(EvalError::InvalidConfig(
                "live: max_line_bytes must be at least 1".to_string(),
            ));
        }
        if self.max_tracked_keys == 0 {
            return Err(EvalError::InvalidConfig(
                "max_tracked_keys must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.brute_force.threshold, 5);
        assert_eq!(config.brute_force.window.as_secs(), 180);
        assert_eq!(config.brute_force.group_by, LoginGrouping::ClientIp);
        assert!(!config.brute_force.require_external_source);
        assert_eq!(config.insider.threshold, 3);
        assert_eq!(config.insider.window.as_secs(), 300);
        assert_eq!(config.live.idle_interval(), Duration::from_millis(150));
        assert_eq!(config.live.file_wait_interval(), Duration::from_millis(200));
        assert_eq!(config.live.start, StartPosition::End);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = WatchConfig::from_yaml_str(
            r#"
brute_force:
  threshold: 10
  window: 1m
insider:
  window: 10m
live:
  start: beginning
"#,
        )
        .unwrap();
        assert_eq!(config.brute_force.threshold, 10);
        assert_eq!(config.brute_force.window, Timespan::minutes(1));
        assert_eq!(config.brute_force.capacity, 300);
        assert_eq!(config.insider.threshold, 3);
        assert_eq!(config.insider.window, Timespan::minutes(10));
        assert_eq!(config.live.start, StartPosition::Beginning);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(WatchConfig::from_yaml_str("  \n").unwrap(), WatchConfig::default());
    }

    #[test]
    fn test_username_grouping_variant() {
        let config = WatchConfig::from_yaml_str(
            r#"
brute_force:
  group_by: username
  require_external_source: true
"#,
        )
        .unwrap();
        assert_eq!(config.brute_force.group_by, LoginGrouping::Username);
        assert!(config.brute_force.require_external_source);
    }

    #[test]
    fn test_offset_start_position() {
        let config = WatchConfig::from_yaml_str("live:\n  start: !offset 1024\n").unwrap();
        assert_eq!(config.live.start, StartPosition::Offset(1024));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = WatchConfig::from_yaml_str("brute_force:\n  treshold: 3\n").unwrap_err();
        assert!(matches!(err, EvalError::Yaml(_)), "got {err}");
    }

    #[test]
    fn test_invalid_timespan_rejected() {
        let err = WatchConfig::from_yaml_str("insider:\n  window: forever\n").unwrap_err();
        assert!(err.to_string().contains("invalid timespan"), "got {err}");
    }

    #[test]
    fn test_validation() {
        let err = WatchConfig::from_yaml_str("insider:\n  threshold: 0\n").unwrap_err();
        assert!(matches!(err, EvalError::InvalidConfig(_)));

        let err = WatchConfig::from_yaml_str("brute_force:\n  capacity: 2\n").unwrap_err();
        assert!(err.to_string().contains("capacity 2 is below threshold 5"));

        let err = WatchConfig::from_yaml_str("brute_force:\n  window: 0s\n").unwrap_err();
        assert!(matches!(err, EvalError::InvalidConfig(_)));

        let err = WatchConfig::from_yaml_str("live:\n  idle_interval_ms: 0\n").unwrap_err();
        assert!(matches!(err, EvalError::InvalidConfig(_)));

        let err = WatchConfig::from_yaml_str("live:\n  max_line_bytes: 0\n").unwrap_err();
        assert!(err.to_string().contains("max_line_bytes must be at least 1"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = WatchConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("window: 3m"));
        assert_eq!(WatchConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
