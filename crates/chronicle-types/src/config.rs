//! Configuration types for Chronicle.
//!
//! `GlobalConfig` represents the top-level `config.toml`. Defaults for the
//! segmentation thresholds live here, in the config-file layer; the engine
//! itself takes a fully specified [`SegmentationConfig`].

use serde::{Deserialize, Serialize};

/// Top-level configuration for Chronicle.
///
/// Loaded from `~/.chronicle/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Thresholds used when segmenting a server's archive into scenes.
    #[serde(default)]
    pub segmentation: SegmentationConfig,
}

/// Split thresholds for the segmentation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Minutes after the window anchor at which a split is forced.
    #[serde(default = "default_force_interval")]
    pub force_interval_minutes: i64,

    /// Minutes after the window anchor at which a split happens if the
    /// backlog is non-empty or the location changed.
    #[serde(default = "default_with_backlog_interval")]
    pub with_backlog_interval_minutes: i64,

    /// Size of the open scene beyond which activity elsewhere forces a split.
    #[serde(default = "default_max_with_other")]
    pub max_with_other: u64,

    /// Highest group id a run may allocate. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id_limit: Option<u64>,

    /// Cooperative yield cadence.
    #[serde(default)]
    pub pacing: PacingConfig,
}

fn default_force_interval() -> i64 {
    240
}

fn default_with_backlog_interval() -> i64 {
    240
}

fn default_max_with_other() -> u64 {
    200
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            force_interval_minutes: default_force_interval(),
            with_backlog_interval_minutes: default_with_backlog_interval(),
            max_with_other: default_max_with_other(),
            group_id_limit: None,
            pacing: PacingConfig::default(),
        }
    }
}

impl SegmentationConfig {
    /// Check that the thresholds describe a runnable configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.force_interval_minutes < 0 {
            return Err(format!(
                "force_interval_minutes must be non-negative, got {}",
                self.force_interval_minutes
            ));
        }
        if self.with_backlog_interval_minutes < 0 {
            return Err(format!(
                "with_backlog_interval_minutes must be non-negative, got {}",
                self.with_backlog_interval_minutes
            ));
        }
        if self.pacing.batch_size == 0 {
            return Err("pacing.batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// How often a long run hands control back to the scheduler.
///
/// A run yields after `batch_size` messages or after `time_slice_ms` of
/// wall-clock processing, whichever comes first. Yielding never changes a
/// segmentation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_time_slice_ms")]
    pub time_slice_ms: u64,
}

fn default_batch_size() -> usize {
    500
}

fn default_time_slice_ms() -> u64 {
    1000
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            time_slice_ms: default_time_slice_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.segmentation.force_interval_minutes, 240);
        assert_eq!(config.segmentation.with_backlog_interval_minutes, 240);
        assert_eq!(config.segmentation.max_with_other, 200);
        assert!(config.segmentation.group_id_limit.is_none());
        assert_eq!(config.segmentation.pacing.batch_size, 500);
    }

    #[test]
    fn test_global_config_deserialize_empty() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.segmentation, SegmentationConfig::default());
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
[segmentation]
force_interval_minutes = 120
max_with_other = 50
group_id_limit = 1000

[segmentation.pacing]
time_slice_ms = 250
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        let seg = config.segmentation;
        assert_eq!(seg.force_interval_minutes, 120);
        // Unset fields keep their defaults
        assert_eq!(seg.with_backlog_interval_minutes, 240);
        assert_eq!(seg.max_with_other, 50);
        assert_eq!(seg.group_id_limit, Some(1000));
        assert_eq!(seg.pacing.batch_size, 500);
        assert_eq!(seg.pacing.time_slice_ms, 250);
    }

    #[test]
    fn test_validate_rejects_negative_interval() {
        let config = SegmentationConfig {
            force_interval_minutes: -1,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("force_interval_minutes"));
    }

    #[test]
    fn test_validate_rejects_empty_batch() {
        let mut config = SegmentationConfig::default();
        config.pacing.batch_size = 0;
        assert!(config.validate().is_err());

        config.pacing.batch_size = 1;
        assert!(config.validate().is_ok());
    }
}
