use crate::error::{MotionError, MotionResult};
use serde::{Deserialize, Serialize};

/// Tunable constants for the motion pipeline.
///
/// Defaults reproduce the shipped game's feel: ±1 on the direction vector
/// corresponds to roughly 32° of tilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Scale applied to the tangent projection
    pub tangent_scale: f32,
    /// Exponential smoothing factor in (0, 1]; higher is more responsive
    pub smoothing: f32,
    /// Denominators closer to zero than this are clamped
    pub min_denominator: f32,
    /// Per-axis cap on the projected tangent
    pub max_tangent: f32,
    pub fusion: FusionConfig,
}

/// Manual sensor fusion constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Low-pass factor for accel/mag when no gyroscope is present
    pub low_pass: f32,
    /// Slerp weight toward the gyro-integrated estimate (0 = accel/mag only)
    pub gyro_weight: f32,
    /// Minimum |mag × gravity|² for a usable heading
    pub min_heading_strength: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            tangent_scale: 0.625,
            smoothing: 0.4,
            min_denominator: 1e-3,
            max_tangent: 4.0,
            fusion: FusionConfig::default(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            low_pass: 0.5,
            gyro_weight: 0.8,
            min_heading_strength: 0.01,
        }
    }
}

impl MotionConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> MotionResult<Self> {
        let config: MotionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MotionResult<()> {
        if !(self.tangent_scale.is_finite() && self.tangent_scale > 0.0) {
            return Err(MotionError::InvalidParameters(format!(
                "tangent_scale must be positive, got {}",
                self.tangent_scale
            )));
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(MotionError::InvalidParameters(format!(
                "smoothing must be in (0, 1], got {}",
                self.smoothing
            )));
        }
        if !(self.min_denominator.is_finite() && self.min_denominator > 0.0) {
            return Err(MotionError::InvalidParameters(format!(
                "min_denominator must be positive, got {}",
                self.min_denominator
            )));
        }
        if !(self.max_tangent.is_finite() && self.max_tangent > 0.0) {
            return Err(MotionError::InvalidParameters(format!(
                "max_tangent must be positive, got {}",
                self.max_tangent
            )));
        }
        self.fusion.validate()
    }
}

impl FusionConfig {
    pub fn validate(&self) -> MotionResult<()> {
        if !(self.low_pass > 0.0 && self.low_pass <= 1.0) {
            return Err(MotionError::InvalidParameters(format!(
                "fusion.low_pass must be in (0, 1], got {}",
                self.low_pass
            )));
        }
        if !(0.0..=1.0).contains(&self.gyro_weight) {
            return Err(MotionError::InvalidParameters(format!(
                "fusion.gyro_weight must be in [0, 1], got {}",
                self.gyro_weight
            )));
        }
        if !(self.min_heading_strength.is_finite() && self.min_heading_strength >= 0.0) {
            return Err(MotionError::InvalidParameters(format!(
                "fusion.min_heading_strength must be non-negative, got {}",
                self.min_heading_strength
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MotionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tangent_scale, 0.625);
        assert_eq!(config.fusion.gyro_weight, 0.8);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = MotionConfig::from_json(r#"{"smoothing": 0.2, "fusion": {"low_pass": 0.3}}"#)
            .unwrap();
        assert_eq!(config.smoothing, 0.2);
        assert_eq!(config.tangent_scale, 0.625);
        assert_eq!(config.fusion.low_pass, 0.3);
        assert_eq!(config.fusion.gyro_weight, 0.8);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = MotionConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("tangent_scale"));
        assert_eq!(MotionConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(MotionConfig::from_json(r#"{"smoothing": 0.0}"#).is_err());
        assert!(MotionConfig::from_json(r#"{"smoothing": 1.5}"#).is_err());
        assert!(MotionConfig::from_json(r#"{"tangent_scale": -1.0}"#).is_err());
        assert!(MotionConfig::from_json(r#"{"fusion": {"gyro_weight": 2.0}}"#).is_err());
        assert!(MotionConfig::from_json("not json").is_err());
    }
}
