//! Live control configuration.
//!
//! Configuration is edited from the operator's context (a control surface of some kind) while the
//! session loop is running. [`ConfigStore`] makes that safe: writers publish a whole validated
//! [`Config`] at once, readers take one consistent snapshot per loop iteration and never observe
//! a mix of old and new fields.
//!
//! The document layout (`network`, `detection`, `zones`) matches the operator-facing settings
//! file; persistence of that file is not this crate's concern.

use std::sync::Arc;

use arc_swap::ArcSwap;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::video::Resolution;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{name} zone does not lie within the normalized frame")]
    ZoneOutOfBounds { name: &'static str },

    #[error("{name} zone must have positive width and height")]
    EmptyZone { name: &'static str },

    #[error("turn angle threshold must be positive, got {0}")]
    InvalidTurnThreshold(f32),

    #[error("{name} must lie in [0, 1], got {value}")]
    InvalidConfidence { name: &'static str, value: f32 },

    #[error("endpoint host must not be empty")]
    EmptyHost,

    #[error("endpoint port must be non-zero")]
    InvalidPort,
}

/// A rectangular control region in normalized frame coordinates.
///
/// All fields lie in `[0.0, 1.0]`; width and height must be positive. The zone is resolved
/// against the resolution of the frame being classified, so it keeps its relative position when
/// the capture resolution changes mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Zone {
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Resolves this zone to pixel coordinates of a frame.
    pub fn to_pixels(&self, resolution: Resolution) -> PixelRect {
        let (w, h) = (resolution.width() as f32, resolution.height() as f32);
        PixelRect {
            x_min: self.x * w,
            y_min: self.y * h,
            x_max: (self.x + self.width) * w,
            y_max: (self.y + self.height) * h,
        }
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(ConfigError::EmptyZone { name });
        }
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x)
            && in_unit(self.y)
            && in_unit(self.x + self.width)
            && in_unit(self.y + self.height))
        {
            return Err(ConfigError::ZoneOutOfBounds { name });
        }
        Ok(())
    }
}

/// A [`Zone`] resolved to the pixel coordinates of a specific frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl PixelRect {
    /// Returns whether `point` lies *strictly* inside the rectangle.
    ///
    /// Points exactly on the boundary do not count as inside.
    pub fn contains(&self, point: Point2<f32>) -> bool {
        point.x > self.x_min && point.x < self.x_max && point.y > self.y_min && point.y < self.y_max
    }
}

/// The control zones and the turn sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSet {
    pub forward: Zone,
    pub backward: Zone,
    /// Hand tilt (in degrees) beyond which a LEFT/RIGHT turn is commanded.
    pub turn_angle_threshold: f32,
}

impl ZoneSet {
    fn validate(&self) -> Result<(), ConfigError> {
        self.forward.validate("forward")?;
        self.backward.validate("backward")?;
        if !(self.turn_angle_threshold > 0.0) {
            return Err(ConfigError::InvalidTurnThreshold(self.turn_angle_threshold));
        }
        Ok(())
    }
}

/// Confidence thresholds handed opaquely to the landmark detector.
///
/// Changing these while a session is running makes the session recreate its
/// [`LandmarkSource`][crate::hand::LandmarkSource] in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl DetectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidConfidence { name, value });
            }
        }
        Ok(())
    }
}

/// Where command datagrams are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub host: String,
    pub port: u16,
}

impl NetworkEndpoint {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }
}

/// The complete live configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkEndpoint,
    pub detection: DetectionConfig,
    pub zones: ZoneSet,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkEndpoint {
                host: "192.168.137.205".into(),
                port: 4210,
            },
            detection: DetectionConfig {
                min_detection_confidence: 0.7,
                min_tracking_confidence: 0.7,
            },
            zones: ZoneSet {
                forward: Zone::new(0.4, 0.0, 0.2, 0.3),
                backward: Zone::new(0.4, 0.7, 0.2, 0.3),
                turn_angle_threshold: 20.0,
            },
        }
    }
}

impl Config {
    /// Parses and validates an operator-supplied configuration document.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.detection.validate()?;
        self.zones.validate()?;
        Ok(())
    }
}

/// Shared, atomically updatable configuration.
///
/// Cheap to clone a handle to via [`Arc`]; typically one handle lives with the operator context
/// and one with the control session.
pub struct ConfigStore {
    current: ArcSwap<Config>,
}

impl ConfigStore {
    /// Creates a store holding a validated initial configuration.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
        })
    }

    /// Takes an atomic snapshot of the current configuration.
    ///
    /// The returned snapshot is internally consistent and unaffected by later updates.
    #[inline]
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Validates and atomically publishes a new configuration.
    ///
    /// On error the previous configuration stays in effect.
    pub fn update(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        self.current.store(Arc::new(config));
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(Config::default()),
        }
    }
}
