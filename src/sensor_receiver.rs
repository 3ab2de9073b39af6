use crate::error::{MotionError, MotionResult};
use serde::{Deserialize, Serialize};

/// Sensor kinds the motion pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorType {
    /// Platform-fused orientation (game rotation vector or rotation vector)
    FusedRotation,
    Accelerometer,
    Gyroscope,
    Magnetometer,
}

impl SensorType {
    /// Map an Android `Sensor.TYPE_*` constant
    pub fn from_android(code: i32) -> MotionResult<Self> {
        match code {
            1 => Ok(SensorType::Accelerometer),
            2 => Ok(SensorType::Magnetometer),
            4 => Ok(SensorType::Gyroscope),
            11 | 15 => Ok(SensorType::FusedRotation),
            other => Err(MotionError::UnknownSensorType(other)),
        }
    }

    fn accepts_len(&self, len: usize) -> bool {
        match self {
            // Newer platforms append a heading-accuracy value to the rotation vector
            SensorType::FusedRotation => (3..=5).contains(&len),
            _ => len == 3,
        }
    }

    fn expected_len(&self) -> &'static str {
        match self {
            SensorType::FusedRotation => "3 to 5",
            _ => "3",
        }
    }
}

/// One timestamped reading from Android SensorEvent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub sensor_type: SensorType,
    pub values: Vec<f32>,
    /// SensorEvent.timestamp, nanoseconds
    pub timestamp_ns: i64,
}

impl SensorSample {
    /// Validate and build a sample. Wrong-length or non-finite vectors are malformed.
    pub fn new(sensor_type: SensorType, values: &[f32], timestamp_ns: i64) -> MotionResult<Self> {
        if !sensor_type.accepts_len(values.len()) {
            return Err(MotionError::MalformedSample {
                expected: sensor_type.expected_len(),
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(MotionError::InvalidParameters(format!(
                "{:?} sample contains non-finite values",
                sensor_type
            )));
        }

        Ok(Self {
            sensor_type,
            values: values.to_vec(),
            timestamp_ns,
        })
    }

    /// First three components; always present after validation
    pub fn vector3(&self) -> [f32; 3] {
        [self.values[0], self.values[1], self.values[2]]
    }

    pub fn scalar(&self) -> Option<f32> {
        self.values.get(3).copied()
    }
}

/// Which platform sensors were found and registered at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorAvailability {
    pub fused_rotation: bool,
    pub accelerometer: bool,
    pub gyroscope: bool,
    pub magnetometer: bool,
}

impl SensorAvailability {
    /// Host-facing shorthand: without a fused sensor the accelerometer and
    /// magnetometer are assumed present.
    pub fn from_flags(has_dedicated_fusion_sensor: bool, has_gyroscope: bool) -> Self {
        if has_dedicated_fusion_sensor {
            Self {
                fused_rotation: true,
                ..Self::default()
            }
        } else {
            Self {
                fused_rotation: false,
                accelerometer: true,
                gyroscope: has_gyroscope,
                magnetometer: true,
            }
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn has(&self, sensor_type: SensorType) -> bool {
        match sensor_type {
            SensorType::FusedRotation => self.fused_rotation,
            SensorType::Accelerometer => self.accelerometer,
            SensorType::Gyroscope => self.gyroscope,
            SensorType::Magnetometer => self.magnetometer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_android_type_codes() {
        assert_eq!(SensorType::from_android(1).unwrap(), SensorType::Accelerometer);
        assert_eq!(SensorType::from_android(2).unwrap(), SensorType::Magnetometer);
        assert_eq!(SensorType::from_android(4).unwrap(), SensorType::Gyroscope);
        assert_eq!(SensorType::from_android(11).unwrap(), SensorType::FusedRotation);
        assert_eq!(SensorType::from_android(15).unwrap(), SensorType::FusedRotation);
        assert_eq!(
            SensorType::from_android(5),
            Err(MotionError::UnknownSensorType(5))
        );
    }

    #[test]
    fn test_sample_length_validation() {
        assert!(SensorSample::new(SensorType::Accelerometer, &[0.0, 0.0, 9.8], 0).is_ok());
        assert!(SensorSample::new(SensorType::Accelerometer, &[0.0, 9.8], 0).is_err());
        assert!(SensorSample::new(SensorType::Gyroscope, &[0.0; 4], 0).is_err());
        assert!(SensorSample::new(SensorType::FusedRotation, &[0.0; 3], 0).is_ok());
        assert!(SensorSample::new(SensorType::FusedRotation, &[0.0, 0.0, 0.0, 1.0, 0.1], 0).is_ok());
        assert!(SensorSample::new(SensorType::FusedRotation, &[0.0; 2], 0).is_err());
    }

    #[test]
    fn test_sample_rejects_nan() {
        assert!(SensorSample::new(SensorType::Magnetometer, &[f32::NAN, 0.0, 1.0], 0).is_err());
    }

    #[test]
    fn test_sample_components() {
        let sample = SensorSample::new(SensorType::Accelerometer, &[3.0, 4.0, 0.0], 0).unwrap();
        assert_eq!(sample.vector3(), [3.0, 4.0, 0.0]);
        assert_eq!(sample.scalar(), None);
    }

    #[test]
    fn test_availability_flags() {
        let fused = SensorAvailability::from_flags(true, true);
        assert!(fused.has(SensorType::FusedRotation));
        assert!(!fused.has(SensorType::Gyroscope));

        let manual = SensorAvailability::from_flags(false, false);
        assert!(manual.has(SensorType::Accelerometer));
        assert!(manual.has(SensorType::Magnetometer));
        assert!(!manual.has(SensorType::Gyroscope));

        let none = SensorAvailability::none();
        assert!(!none.has(SensorType::FusedRotation) && !none.has(SensorType::Accelerometer));
    }
}
