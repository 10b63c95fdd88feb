// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Loaded from JSON at `$BACKDROP_CONFIG`, or `<config_dir>/backdrop/config.json`
//! when that is unset. A missing file yields the defaults; every field is
//! optional in the file.

use crate::constants::VirtualCameraOutput;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "BACKDROP_CONFIG";
/// Environment variable overriding the model path
pub const MODEL_PATH_ENV: &str = "YOLO_MODEL_PATH";
/// Environment variable overriding the background image
pub const BACKGROUND_ENV: &str = "BACKDROP_BACKGROUND_IMAGE";

/// Bounds and defaults for stream requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub default_fps: u32,
    pub min_fps: u32,
    pub max_fps: u32,
    pub default_blur_strength: u32,
    pub min_blur_strength: u32,
    pub max_blur_strength: u32,
    /// Side of the square erosion element applied to subject masks
    pub erode_size: u32,
    pub erode_iterations: u32,
    /// Camera indices probed when listing devices
    pub max_camera_check_range: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            default_fps: 15,
            min_fps: 1,
            max_fps: 60,
            default_blur_strength: 21,
            min_blur_strength: 1,
            max_blur_strength: 51,
            erode_size: 5,
            erode_iterations: 2,
            max_camera_check_range: 10,
        }
    }
}

/// Segmentation model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// YOLOv8-seg ONNX export
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// COCO class treated as the subject
    pub person_class_id: u32,
    /// Square model input size in pixels
    pub input_size: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("yolov8m-seg.onnx"),
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            person_class_id: 0,
            input_size: 640,
        }
    }
}

/// Virtual camera output settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub output: VirtualCameraOutput,
    /// Loopback device node; discovered automatically when unset
    pub device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamSettings,
    pub model: ModelSettings,
    pub output: OutputSettings,
    /// Image used by the `default` background mode
    pub background_image: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            model: ModelSettings::default(),
            output: OutputSettings::default(),
            background_image: PathBuf::from("static/wallhaven.png"),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file exists but could not be read
    Io(String),
    /// Config file is not valid JSON for this schema
    Parse(String),
    /// Values are inconsistent
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Failed to read config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("backdrop").join("config.json"))
    }

    /// Config file in effect: `$BACKDROP_CONFIG` or the default location
    pub fn path() -> Option<PathBuf> {
        std::env::var_os(CONFIG_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(Self::default_path)
    }

    /// Load the effective configuration with environment overrides applied
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(MODEL_PATH_ENV).filter(|v| !v.is_empty()) {
            debug!(path = %path, "Model path overridden from environment");
            self.model.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(BACKGROUND_ENV).filter(|v| !v.is_empty()) {
            debug!(path = %path, "Background image overridden from environment");
            self.background_image = PathBuf::from(path);
        }
    }

    /// Reject inconsistent bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stream;
        if s.min_fps == 0 || s.min_fps > s.max_fps {
            return Err(ConfigError::Invalid(format!(
                "fps bounds {}..={} must be positive and ordered",
                s.min_fps, s.max_fps
            )));
        }
        if !(s.min_fps..=s.max_fps).contains(&s.default_fps) {
            return Err(ConfigError::Invalid(format!(
                "default fps {} outside {}..={}",
                s.default_fps, s.min_fps, s.max_fps
            )));
        }
        if s.min_blur_strength == 0 || s.min_blur_strength > s.max_blur_strength {
            return Err(ConfigError::Invalid(format!(
                "blur strength bounds {}..={} must be positive and ordered",
                s.min_blur_strength, s.max_blur_strength
            )));
        }
        if !(s.min_blur_strength..=s.max_blur_strength).contains(&s.default_blur_strength) {
            return Err(ConfigError::Invalid(format!(
                "default blur strength {} outside {}..={}",
                s.default_blur_strength, s.min_blur_strength, s.max_blur_strength
            )));
        }
        if s.max_camera_check_range == 0 {
            return Err(ConfigError::Invalid(
                "max_camera_check_range must be positive".into(),
            ));
        }

        let m = &self.model;
        if !(0.0..=1.0).contains(&m.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence threshold {} outside 0..=1",
                m.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&m.iou_threshold) {
            return Err(ConfigError::Invalid(format!(
                "IoU threshold {} outside 0..=1",
                m.iou_threshold
            )));
        }
        if m.input_size == 0 || m.input_size % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "model input size {} must be a positive multiple of 32",
                m.input_size
            )));
        }
        Ok(())
    }

    /// Whether `fps` is within the configured request bounds
    pub fn fps_in_range(&self, fps: u32) -> bool {
        (self.stream.min_fps..=self.stream.max_fps).contains(&fps)
    }

    /// Whether `blur_strength` is within the configured request bounds
    pub fn blur_in_range(&self, blur_strength: u32) -> bool {
        (self.stream.min_blur_strength..=self.stream.max_blur_strength).contains(&blur_strength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            MODEL_PATH_ENV => Some("/models/custom.onnx".into()),
            BACKGROUND_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.model.model_path, PathBuf::from("/models/custom.onnx"));
        // Empty values are ignored
        assert_eq!(config.background_image, PathBuf::from("static/wallhaven.png"));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let mut config = Config::default();
        config.stream.min_fps = 30;
        config.stream.max_fps = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_odd_input_size() {
        let mut config = Config::default();
        config.model.input_size = 630;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_range_checks() {
        let config = Config::default();
        assert!(config.fps_in_range(1));
        assert!(config.fps_in_range(60));
        assert!(!config.fps_in_range(0));
        assert!(!config.fps_in_range(61));
        assert!(config.blur_in_range(51));
        assert!(!config.blur_in_range(52));
    }
}
