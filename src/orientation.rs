use crate::config::FusionConfig;
use crate::fusion::ManualFusion;
use crate::quaternion::{complete_from_vector, Quat};
use crate::sensor_receiver::{SensorAvailability, SensorSample, SensorType};
use serde::{Deserialize, Serialize};

/// Which orientation strategy a source runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrientationMode {
    /// Platform-fused rotation sensor
    Direct,
    /// Accelerometer/magnetometer (+ gyroscope) fused in software
    ManualFusion,
}

/// Orientation from a single platform-fused rotation sensor
#[derive(Debug, Default)]
pub struct DirectSource;

impl DirectSource {
    pub fn feed(&mut self, sample: &SensorSample) -> Option<Quat> {
        if sample.sensor_type != SensorType::FusedRotation {
            return None;
        }

        let [x, y, z] = sample.vector3();
        let quat = match sample.scalar() {
            Some(w) => Quat::new(x, y, z, w).normalize().canonicalize(),
            None => complete_from_vector(x, y, z),
        };
        Some(quat)
    }
}

/// Orientation strategy, picked once from the available hardware
pub enum OrientationSource {
    Direct(DirectSource),
    ManualFusion(ManualFusion),
}

impl OrientationSource {
    /// A fused sensor always wins; otherwise fuse whatever raw sensors exist.
    /// With no accelerometer the manual source simply never ticks.
    pub fn select(availability: &SensorAvailability, config: &FusionConfig) -> Self {
        if availability.fused_rotation {
            OrientationSource::Direct(DirectSource)
        } else {
            OrientationSource::ManualFusion(ManualFusion::new(
                config.clone(),
                availability.gyroscope,
                availability.magnetometer,
            ))
        }
    }

    pub fn mode(&self) -> OrientationMode {
        match self {
            OrientationSource::Direct(_) => OrientationMode::Direct,
            OrientationSource::ManualFusion(_) => OrientationMode::ManualFusion,
        }
    }

    /// Feed one sample. Returns the new orientation when this sample should
    /// trigger a downstream recompute.
    pub fn feed(&mut self, sample: &SensorSample) -> Option<Quat> {
        match self {
            OrientationSource::Direct(source) => source.feed(sample),
            OrientationSource::ManualFusion(fusion) => match sample.sensor_type {
                SensorType::Accelerometer => fusion.feed_accelerometer(sample.vector3()),
                SensorType::Gyroscope => {
                    fusion.feed_gyroscope(sample.vector3(), sample.timestamp_ns);
                    None
                }
                SensorType::Magnetometer => {
                    fusion.feed_magnetometer(sample.vector3());
                    None
                }
                SensorType::FusedRotation => None,
            },
        }
    }

    /// Re-zero hook: manual fusion drops its gyro drift
    pub fn reset(&mut self) {
        if let OrientationSource::ManualFusion(fusion) = self {
            fusion.reset_gyroscope();
        }
    }
}
