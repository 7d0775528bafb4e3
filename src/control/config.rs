//! Medium configuration and its TOML loading.

use anyhow::Context;
use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("propagation_speed must be positive and finite, got {0}")]
    InvalidPropagationSpeed(f32),

    #[error("{field} must be non-negative and finite, got {value}")]
    NegativeDuration { field: &'static str, value: f32 },

    #[error("retry_backoff must be at least 1.0, got {0}")]
    InvalidBackoff(f32),

    #[error("dedup_window must hold at least one sequence number")]
    EmptyDedupWindow,

    #[error("default_inbox_capacity must be at least 1")]
    EmptyInbox,
}

/// Tunables of the broadcast medium.
///
/// Times are expressed in seconds in the file and converted to embassy
/// `Duration`s by the accessors. Every field has a default so a config file
/// only needs to list what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediumConfig {
    /// Fixed part of every propagation delay.
    pub signal_delay_secs: f32,
    /// When false the delay degrades to `signal_delay_secs` alone.
    pub use_distance_based_delay: bool,
    /// World units per second.
    pub propagation_speed: f32,
    /// Master switch for acknowledgements, tracking and retransmission.
    pub ack_enabled: bool,
    /// Base acknowledgement timeout, used as is when `dynamic_ack_timeout` is off.
    pub ack_timeout_secs: f32,
    /// Derive the timeout from the worst-case round trip of each send.
    pub dynamic_ack_timeout: bool,
    /// Floor of the dynamic timeout.
    pub min_ack_timeout_secs: f32,
    /// Added to the worst-case round trip.
    pub ack_safety_margin_secs: f32,
    pub max_retries: u32,
    /// Timeout multiplier applied after each retransmission (1.0 keeps it fixed).
    pub retry_backoff: f32,
    /// Sequence numbers remembered per sender by each endpoint.
    pub dedup_window: usize,
    /// Standard deviation of the normally distributed delay jitter (0 disables).
    pub delay_jitter_secs: f32,
    /// Inbox size of endpoints that do not set their own.
    pub default_inbox_capacity: usize,
    /// Seed for loss draws and jitter.
    pub seed: u64,
    /// Log every send and scheduled delivery at debug level.
    pub log_all_packets: bool,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            signal_delay_secs: 0.0,
            use_distance_based_delay: true,
            propagation_speed: 343.0,
            ack_enabled: true,
            ack_timeout_secs: 2.0,
            dynamic_ack_timeout: true,
            min_ack_timeout_secs: 0.05,
            ack_safety_margin_secs: 0.1,
            max_retries: 3,
            retry_backoff: 1.0,
            dedup_window: 1024,
            delay_jitter_secs: 0.0,
            default_inbox_capacity: 1024,
            seed: 42,
            log_all_packets: false,
        }
    }
}

impl MediumConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: MediumConfig = toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.validate().with_context(|| format!("Invalid config file: {}", config_path.display()))?;
        Ok(config)
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &str) -> std::path::PathBuf {
        let scene = Path::new(scene_path);
        scene.parent().unwrap_or(Path::new(".")).join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.propagation_speed.is_finite() && self.propagation_speed > 0.0) {
            return Err(ConfigError::InvalidPropagationSpeed(self.propagation_speed));
        }
        let durations = [
            ("signal_delay_secs", self.signal_delay_secs),
            ("ack_timeout_secs", self.ack_timeout_secs),
            ("min_ack_timeout_secs", self.min_ack_timeout_secs),
            ("ack_safety_margin_secs", self.ack_safety_margin_secs),
            ("delay_jitter_secs", self.delay_jitter_secs),
        ];
        for (field, value) in durations {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::NegativeDuration { field, value });
            }
        }
        if !(self.retry_backoff.is_finite() && self.retry_backoff >= 1.0) {
            return Err(ConfigError::InvalidBackoff(self.retry_backoff));
        }
        if self.dedup_window == 0 {
            return Err(ConfigError::EmptyDedupWindow);
        }
        if self.default_inbox_capacity == 0 {
            return Err(ConfigError::EmptyInbox);
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        secs_to_duration(self.ack_timeout_secs)
    }
}

/// Seconds to an embassy `Duration`, rounded to the nearest microsecond.
/// Negative and non-finite inputs clamp to zero.
pub fn secs_to_duration(secs: f32) -> Duration {
    secs_f64_to_duration(secs as f64)
}

pub fn secs_f64_to_duration(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::from_ticks(0);
    }
    Duration::from_micros((secs * 1_000_000.0).round() as u64)
}

/// Embassy `Duration` back to seconds.
pub fn duration_to_secs(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MediumConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.ack_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: MediumConfig = toml::from_str(
            r#"
            propagation_speed = 1000.0
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.propagation_speed, 1000.0);
        assert_eq!(config.max_retries, 5);
        assert!(config.ack_enabled);
        assert_eq!(config.dedup_window, 1024);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = MediumConfig {
            propagation_speed: 0.0,
            ..MediumConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPropagationSpeed(0.0)));

        let config = MediumConfig {
            signal_delay_secs: -1.0,
            ..MediumConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NegativeDuration { field: "signal_delay_secs", .. })));

        let config = MediumConfig {
            retry_backoff: 0.5,
            ..MediumConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidBackoff(0.5)));

        let config = MediumConfig {
            dedup_window: 0,
            ..MediumConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyDedupWindow));
    }

    #[test]
    fn config_path_sits_next_to_scene() {
        let path = MediumConfig::config_path_from_scene("scenes/swarm.json");
        assert_eq!(path, Path::new("scenes").join("config.toml"));
    }

    #[test]
    fn seconds_round_to_microseconds() {
        assert_eq!(secs_to_duration(0.5).as_micros(), 500_000);
        assert_eq!(secs_f64_to_duration(10.0 / 343.0).as_micros(), 29_155);
        assert_eq!(secs_to_duration(-3.0).as_micros(), 0);
        assert_eq!(secs_to_duration(f32::NAN).as_micros(), 0);
    }
}
