// THEORY:
// All detection thresholds are tunables with engineering units (seconds and
// scene distance units). The defaults below are starting points for a
// centimetre-scale kitchen scene; they are not universal and every deployment
// is expected to override them from a JSON file.

use crate::core_modules::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// Contact/Overlap monitor tunables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Contacts not longer than this are discarded.
    pub min_contact_duration: f64,
    /// An overlap-begin this soon after an overlap-end with the same object
    /// continues the previous contact.
    pub max_contact_gap: f64,
    /// SupportedBy intervals not longer than this are discarded.
    pub min_supported_by_duration: f64,
    /// Period of the SupportedBy candidate check.
    pub sb_update_rate: f64,
    /// Maximum relative vertical speed for a candidate to count as supporting.
    pub sb_max_vertical_speed: f64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            min_contact_duration: 0.1,
            max_contact_gap: 0.15,
            min_supported_by_duration: 0.1,
            sb_update_rate: 0.25,
            sb_max_vertical_speed: 0.5,
        }
    }
}

/// Grasp event handler tunables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraspConfig {
    /// Grasps not longer than this are discarded.
    pub grasp_event_min: f64,
}

impl Default for GraspConfig {
    fn default() -> Self {
        Self { grasp_event_min: 0.15 }
    }
}

/// Reach / pre-grasp listener tunables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReachConfig {
    /// Period of the candidate distance check.
    pub update_rate: f64,
    /// Distance changes at or below this are treated as noise.
    pub min_dist: f64,
    /// Contact gaps shorter than this are concatenated.
    pub max_pre_grasp_gap: f64,
}

impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            update_rate: 0.1,
            min_dist: 1.0,
            max_pre_grasp_gap: 0.25,
        }
    }
}

/// Pick-and-place state machine tunables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PickAndPlaceConfig {
    pub update_rate: f64,
    pub min_slide_dist_xy: f64,
    pub min_slide_duration: f64,
    pub min_pick_up_height: f64,
    pub max_pick_up_height: f64,
    pub max_pick_up_dist_xy: f64,
    pub min_put_down_height: f64,
    pub max_put_down_height: f64,
    pub max_put_down_dist_xy: f64,
    /// Movement samples older than this (relative to the newest) are evicted.
    pub recent_movement_buffer_duration: f64,
    /// How far back the put-down height test looks.
    pub put_down_movement_backtrack_duration: f64,
    /// Hard cap on buffered movement samples.
    pub recent_movement_buffer_capacity: usize,
}

impl Default for PickAndPlaceConfig {
    fn default() -> Self {
        Self {
            update_rate: 0.05,
            min_slide_dist_xy: 3.0,
            min_slide_duration: 0.9,
            min_pick_up_height: 1.5,
            max_pick_up_height: 9.0,
            max_pick_up_dist_xy: 9.0,
            min_put_down_height: 1.5,
            max_put_down_height: 9.0,
            max_put_down_dist_xy: 9.0,
            recent_movement_buffer_duration: 1.5,
            put_down_movement_backtrack_duration: 1.0,
            recent_movement_buffer_capacity: 64,
        }
    }
}

/// Which event families are logged at all.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingToggles {
    pub log_contact: bool,
    pub log_supported_by: bool,
    pub log_grasp: bool,
    pub log_reach: bool,
    pub log_pick_and_place: bool,
}

impl Default for LoggingToggles {
    fn default() -> Self {
        Self {
            log_contact: true,
            log_supported_by: true,
            log_grasp: true,
            log_reach: true,
            log_pick_and_place: true,
        }
    }
}

/// Complete configuration of the semantic event engine.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SemLogConfig {
    pub contact: ContactConfig,
    pub grasp: GraspConfig,
    pub reach: ReachConfig,
    pub pick_and_place: PickAndPlaceConfig,
    pub logging: LoggingToggles,
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

fn ordered(min_field: &'static str, min: f64, max_field: &'static str, max: f64) -> Result<(), ConfigError> {
    if min <= max {
        Ok(())
    } else {
        Err(ConfigError::InvertedRange {
            min_field,
            min,
            max_field,
            max,
        })
    }
}

impl SemLogConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SemLogConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks rates, durations and min/max pairs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.contact;
        non_negative("contact.min_contact_duration", c.min_contact_duration)?;
        non_negative("contact.max_contact_gap", c.max_contact_gap)?;
        non_negative("contact.min_supported_by_duration", c.min_supported_by_duration)?;
        positive("contact.sb_update_rate", c.sb_update_rate)?;
        positive("contact.sb_max_vertical_speed", c.sb_max_vertical_speed)?;

        non_negative("grasp.grasp_event_min", self.grasp.grasp_event_min)?;

        let r = &self.reach;
        positive("reach.update_rate", r.update_rate)?;
        non_negative("reach.min_dist", r.min_dist)?;
        non_negative("reach.max_pre_grasp_gap", r.max_pre_grasp_gap)?;

        let p = &self.pick_and_place;
        positive("pick_and_place.update_rate", p.update_rate)?;
        non_negative("pick_and_place.min_slide_dist_xy", p.min_slide_dist_xy)?;
        non_negative("pick_and_place.min_slide_duration", p.min_slide_duration)?;
        non_negative("pick_and_place.min_pick_up_height", p.min_pick_up_height)?;
        ordered(
            "pick_and_place.min_pick_up_height",
            p.min_pick_up_height,
            "pick_and_place.max_pick_up_height",
            p.max_pick_up_height,
        )?;
        positive("pick_and_place.max_pick_up_dist_xy", p.max_pick_up_dist_xy)?;
        non_negative("pick_and_place.min_put_down_height", p.min_put_down_height)?;
        ordered(
            "pick_and_place.min_put_down_height",
            p.min_put_down_height,
            "pick_and_place.max_put_down_height",
            p.max_put_down_height,
        )?;
        positive("pick_and_place.max_put_down_dist_xy", p.max_put_down_dist_xy)?;
        positive(
            "pick_and_place.recent_movement_buffer_duration",
            p.recent_movement_buffer_duration,
        )?;
        positive(
            "pick_and_place.put_down_movement_backtrack_duration",
            p.put_down_movement_backtrack_duration,
        )?;
        positive(
            "pick_and_place.recent_movement_buffer_capacity",
            p.recent_movement_buffer_capacity as f64,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SemLogConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = SemLogConfig::from_json_str(
            r#"{ "grasp": { "grasp_event_min": 0.4 }, "logging": { "log_reach": false } }"#,
        )
        .unwrap();
        assert_eq!(config.grasp.grasp_event_min, 0.4);
        assert!(!config.logging.log_reach);
        assert!(config.logging.log_contact);
        assert_eq!(config.contact, ContactConfig::default());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = SemLogConfig::from_json_str(
            r#"{ "pick_and_place": { "min_pick_up_height": 10.0, "max_pick_up_height": 2.0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvertedRange { .. }));
    }

    #[test]
    fn zero_rates_are_rejected() {
        let err = SemLogConfig::from_json_str(r#"{ "reach": { "update_rate": 0.0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::NonPositive { field: "reach.update_rate", .. }));
        assert!(matches!(
            SemLogConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
