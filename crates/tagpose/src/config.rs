//! JSON configuration for the two processes.
//!
//! Every field has a default, so `{}` is a valid file and a missing
//! `--config` means "all defaults".

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagpose_core::{CameraCalibration, MarkerGeometry};

use crate::capture::ReplaySettings;
use crate::preprocess::PreprocessParams;
use crate::transport::SessionSettings;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn store<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Configuration of the tag module (camera → pose reports).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagModuleConfig {
    pub client_id: String,
    pub topic: String,
    pub broker: SessionSettings,
    pub camera: ReplaySettings,
    pub preprocess: PreprocessParams,
    pub marker: MarkerGeometry,
    pub calibration: CameraCalibration,
    /// Recorded detections to replay; none means the detector sees nothing.
    pub detections_path: Option<PathBuf>,
    /// Where the diagnostic snapshot goes; none disables it.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for TagModuleConfig {
    fn default() -> Self {
        Self {
            client_id: "tag_module".into(),
            topic: "/tags".into(),
            broker: SessionSettings::default(),
            camera: ReplaySettings::default(),
            preprocess: PreprocessParams::default(),
            marker: MarkerGeometry::default(),
            calibration: CameraCalibration::default(),
            detections_path: None,
            snapshot_path: Some(PathBuf::from("result.png")),
        }
    }
}

impl TagModuleConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg: Self = load(path.as_ref())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        store(self, path.as_ref())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_session(&self.client_id, &self.topic, &self.broker)?;
        if !(self.marker.tag_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "marker.tag_size must be positive, got {}",
                self.marker.tag_size
            )));
        }
        if !(self.marker.ground_height >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "marker.ground_height must be non-negative, got {}",
                self.marker.ground_height
            )));
        }
        if !(self.preprocess.scale > 0.0 && self.preprocess.scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "preprocess.scale must be in (0, 1], got {}",
                self.preprocess.scale
            )));
        }
        let calib = &self.calibration;
        let focal_ok = calib.focal_length_px.map_or(true, |f| f > 0.0);
        if !focal_ok || !(calib.half_fov_tan > 0.0) {
            return Err(ConfigError::Invalid(
                "calibration needs a positive focal length or half-FOV tangent".into(),
            ));
        }
        if self.camera.buffer_count == 0 {
            return Err(ConfigError::Invalid("camera.buffer_count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration of the action module (commands → base velocity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionModuleConfig {
    pub client_id: String,
    pub topic: String,
    pub broker: SessionSettings,
    /// How often the held velocity is pushed to the base.
    pub control_period_ms: u64,
}

impl Default for ActionModuleConfig {
    fn default() -> Self {
        Self {
            client_id: "action_module".into(),
            topic: "/actions".into(),
            broker: SessionSettings::default(),
            control_period_ms: 100,
        }
    }
}

impl ActionModuleConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg: Self = load(path.as_ref())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        store(self, path.as_ref())
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_session(&self.client_id, &self.topic, &self.broker)?;
        if self.control_period_ms == 0 {
            return Err(ConfigError::Invalid("control_period_ms must be positive".into()));
        }
        Ok(())
    }
}

fn validate_session(
    client_id: &str,
    topic: &str,
    broker: &SessionSettings,
) -> Result<(), ConfigError> {
    if client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("client_id must not be empty".into()));
    }
    if topic.is_empty() {
        return Err(ConfigError::Invalid("topic must not be empty".into()));
    }
    if broker.keep_alive_secs == 0 {
        return Err(ConfigError::Invalid("broker.keep_alive_secs must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let tag: TagModuleConfig = serde_json::from_str("{}").expect("tag config");
        assert_eq!(tag, TagModuleConfig::default());
        assert_eq!(tag.topic, "/tags");
        assert_eq!(tag.broker.keep_alive_secs, 20);
        assert_eq!(tag.snapshot_path, Some(PathBuf::from("result.png")));

        let action: ActionModuleConfig = serde_json::from_str("{}").expect("action config");
        assert_eq!(action.client_id, "action_module");
        assert_eq!(action.topic, "/actions");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let json = r#"{"marker": {"tag_size": 0.1}, "preprocess": {"threshold": 90}}"#;
        let cfg: TagModuleConfig = serde_json::from_str(json).expect("config");
        assert_eq!(cfg.marker.tag_size, 0.1);
        assert_eq!(cfg.marker.ground_height, 0.325);
        assert_eq!(cfg.preprocess.threshold, 90);
        assert_eq!(cfg.preprocess.crop_top, 150);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tag.json");
        let mut cfg = TagModuleConfig::default();
        cfg.calibration.focal_length_px = Some(320.0);
        cfg.write_json(&path).expect("write");
        assert_eq!(TagModuleConfig::load_json(&path).expect("load"), cfg);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("action.json");
        fs::write(&path, r#"{"control_period_ms": 0}"#).expect("write");
        assert!(matches!(
            ActionModuleConfig::load_json(&path),
            Err(ConfigError::Invalid(_))
        ));

        let cfg = TagModuleConfig {
            client_id: " ".into(),
            ..TagModuleConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            TagModuleConfig::load_json("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
