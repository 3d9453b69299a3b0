//! Runtime configuration for the camera rig.
//!
//! All fields have defaults matching the Arducam quad-camera HAT with IMX519
//! sensors. A JSON file may override any subset of them.

use crate::error::ConfigError;
use crate::mux::MAX_CAMERAS;
use crate::traits::{ColourGains, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serde helpers storing a [`Duration`] as floating-point seconds.
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Settings for the live preview stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Pause between emitted frames.
    #[serde(with = "seconds")]
    pub frame_interval: Duration,
    /// Pause after a failed frame before retrying.
    #[serde(with = "seconds")]
    pub error_backoff: Duration,
    /// JPEG quality (1-100) of emitted frames.
    pub jpeg_quality: u8,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(100),
            error_backoff: Duration::from_millis(500),
            jpeg_quality: 85,
        }
    }
}

/// Complete rig configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// I2C bus number (`/dev/i2c-N`).
    pub i2c_bus: u8,
    /// 7-bit I2C address of the multiplexer.
    pub mux_address: u8,
    /// Multiplexer register receiving the channel command.
    pub mux_register: u8,
    /// Number of connected cameras.
    pub camera_count: u8,
    /// V4L2 capture device index (`/dev/videoN`).
    pub video_device: u32,
    /// Wait after every multiplexer switch.
    #[serde(with = "seconds")]
    pub switch_delay: Duration,
    /// Wait after entering Video mode.
    #[serde(with = "seconds")]
    pub video_settle_delay: Duration,
    /// Wait after entering Still mode (autofocus and exposure).
    #[serde(with = "seconds")]
    pub stabilization_delay: Duration,
    /// Fixed white-balance gains for both modes.
    pub white_balance: ColourGains,
    /// Video mode resolution.
    pub video_resolution: Resolution,
    /// Still mode resolution.
    pub still_resolution: Resolution,
    /// Center crop target for grid composition.
    pub crop_resolution: Resolution,
    /// Number of stream buffers requested from the driver.
    pub buffer_count: u32,
    /// Preview stream settings.
    pub preview: PreviewSettings,
    /// Directory receiving saved captures.
    pub capture_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            i2c_bus: 11,
            mux_address: 0x24,
            mux_register: 0x24,
            camera_count: 4,
            video_device: 0,
            switch_delay: Duration::from_millis(500),
            video_settle_delay: Duration::ZERO,
            stabilization_delay: Duration::from_secs(1),
            white_balance: ColourGains {
                red: 0.9951,
                blue: 0.7410,
            },
            video_resolution: Resolution::new(1280, 720),
            still_resolution: Resolution::new(4056, 3040),
            crop_resolution: Resolution::new(1775, 1160),
            buffer_count: 4,
            preview: PreviewSettings::default(),
            capture_dir: PathBuf::from("captures"),
        }
    }
}

impl Config {
    /// Load a configuration file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the I2C character device.
    #[must_use]
    pub fn i2c_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/i2c-{}", self.i2c_bus))
    }

    /// Check that every value is within its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera_count == 0 || self.camera_count > MAX_CAMERAS {
            return Err(ConfigError::Invalid {
                field: "camera_count",
                reason: format!("must be between 1 and {MAX_CAMERAS}, got {}", self.camera_count),
            });
        }

        for (field, resolution) in [
            ("video_resolution", self.video_resolution),
            ("still_resolution", self.still_resolution),
            ("crop_resolution", self.crop_resolution),
        ] {
            if resolution.width == 0 || resolution.height == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("dimensions must be non-zero, got {resolution}"),
                });
            }
        }

        let gains = self.white_balance;
        let positive = |gain: f32| gain.is_finite() && gain > 0.0;
        if !(positive(gains.red) && positive(gains.blue)) {
            return Err(ConfigError::Invalid {
                field: "white_balance",
                reason: format!("gains must be positive, got ({}, {})", gains.red, gains.blue),
            });
        }

        if !(1..=100).contains(&self.preview.jpeg_quality) {
            return Err(ConfigError::Invalid {
                field: "preview.jpeg_quality",
                reason: format!("must be between 1 and 100, got {}", self.preview.jpeg_quality),
            });
        }

        if self.buffer_count == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_count",
                reason: "at least one buffer is required".to_owned(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera_count, 4);
        assert_eq!(config.switch_delay, Duration::from_millis(500));
        assert_eq!(config.i2c_path(), PathBuf::from("/dev/i2c-11"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "camera_count": 2, "switch_delay": 0.1, "preview": { "jpeg_quality": 70 } }"#,
        )
        .expect("parse failed");

        assert_eq!(config.camera_count, 2);
        assert_eq!(config.switch_delay, Duration::from_millis(100));
        assert_eq!(config.preview.jpeg_quality, 70);
        assert_eq!(config.preview.frame_interval, Duration::from_millis(100));
        assert_eq!(config.mux_address, 0x24);
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let result = serde_json::from_str::<Config>(r#"{ "switch_delay": -1.0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_camera_count_out_of_range() {
        let config = Config {
            camera_count: 5,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "camera_count", .. })
        ));

        let config = Config {
            camera_count: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_resolution_is_rejected() {
        let config = Config {
            crop_resolution: Resolution::new(0, 100),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "crop_resolution", .. })
        ));
    }

    #[test]
    fn test_bad_gains_and_quality() {
        let config = Config {
            white_balance: ColourGains { red: 0.0, blue: 1.0 },
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.preview.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        write!(file, r#"{{ "i2c_bus": 1, "stabilization_delay": 2.5 }}"#).expect("write failed");

        let config = Config::load(file.path()).expect("load failed");
        assert_eq!(config.i2c_bus, 1);
        assert_eq!(config.stabilization_delay, Duration::from_millis(2500));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        write!(file, r#"{{ "camera_count": 9 }}"#).expect("write failed");

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
