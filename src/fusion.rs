//! Manual sensor fusion for devices without a fused rotation sensor
//!
//! Accelerometer + magnetometer give an absolute but noisy orientation; the
//! gyroscope integral gives a smooth but drifting one. Each accelerometer
//! sample is the fusion tick: the absolute estimate is blended toward the
//! gyro integral and the blend becomes the new integral.

use crate::config::FusionConfig;
use crate::quaternion::Quat;
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use std::f32::consts::PI;

const NANOS_PER_SEC: f32 = 1_000_000_000.0;
const MIN_ANGULAR_RATE: f32 = 1e-9;

pub struct ManualFusion {
    config: FusionConfig,
    uses_gyroscope: bool,
    uses_magnetometer: bool,
    last_accel: Vector3<f32>,
    last_mag: Vector3<f32>,
    /// None until the first successful resolve seeds it
    gyro_estimate: Option<UnitQuaternion<f32>>,
    last_gyro_timestamp: Option<i64>,
}

impl ManualFusion {
    pub fn new(config: FusionConfig, uses_gyroscope: bool, uses_magnetometer: bool) -> Self {
        Self {
            config,
            uses_gyroscope,
            uses_magnetometer,
            last_accel: Vector3::zeros(),
            last_mag: Vector3::zeros(),
            gyro_estimate: None,
            last_gyro_timestamp: None,
        }
    }

    /// Store an accelerometer reading and run the fusion tick
    pub fn feed_accelerometer(&mut self, values: [f32; 3]) -> Option<Quat> {
        self.last_accel = self.filtered(self.last_accel, values);
        self.resolve()
    }

    pub fn feed_magnetometer(&mut self, values: [f32; 3]) {
        self.last_mag = self.filtered(self.last_mag, values);
    }

    /// Integrate body-frame angular rate (rad/s) since the previous sample.
    pub fn feed_gyroscope(&mut self, values: [f32; 3], timestamp_ns: i64) {
        if !self.has_reference() {
            return;
        }

        if let (Some(prev), Some(estimate)) = (self.last_gyro_timestamp, self.gyro_estimate) {
            // Out-of-order or overflowing timestamps contribute nothing
            let dt = match timestamp_ns.checked_sub(prev) {
                Some(elapsed) if elapsed > 0 => elapsed as f32 / NANOS_PER_SEC,
                _ => 0.0,
            };
            let rate = Vector3::from(values);
            if dt > 0.0 && rate.norm() > MIN_ANGULAR_RATE {
                let delta = UnitQuaternion::from_scaled_axis(rate * dt);
                self.gyro_estimate = Some(estimate * delta);
            }
        }
        self.last_gyro_timestamp = Some(timestamp_ns);
    }

    /// Blend the accel/mag orientation with the gyro integral.
    /// None while the inputs can't produce a usable orientation.
    pub fn resolve(&mut self) -> Option<Quat> {
        let absolute = self.absolute_orientation()?;

        let result = if self.uses_gyroscope {
            let blended = match self.gyro_estimate {
                Some(gyro) => absolute
                    .try_slerp(&gyro, self.config.gyro_weight, 1e-6)
                    .unwrap_or(absolute),
                None => absolute,
            };
            self.gyro_estimate = Some(blended);
            blended
        } else {
            absolute
        };

        let quat = Quat::from(result).canonicalize();
        if quat.is_finite() {
            Some(quat)
        } else {
            None
        }
    }

    /// Drop accumulated gyro drift; the next resolve reseeds from accel/mag.
    pub fn reset_gyroscope(&mut self) {
        self.gyro_estimate = None;
        self.last_gyro_timestamp = None;
    }

    pub fn gyro_estimate(&self) -> Option<Quat> {
        self.gyro_estimate.map(Quat::from)
    }

    fn has_reference(&self) -> bool {
        let mag_ready = !self.uses_magnetometer || self.last_mag != Vector3::zeros();
        self.last_accel != Vector3::zeros() && mag_ready
    }

    fn filtered(&self, previous: Vector3<f32>, values: [f32; 3]) -> Vector3<f32> {
        let sample = Vector3::from(values);
        if self.uses_gyroscope {
            sample
        } else {
            previous + (sample - previous) * self.config.low_pass
        }
    }

    fn absolute_orientation(&self) -> Option<UnitQuaternion<f32>> {
        if self.last_accel == Vector3::zeros() {
            return None;
        }
        if self.uses_magnetometer {
            heading_rotation(
                self.last_accel,
                &self.last_mag,
                self.config.min_heading_strength,
            )
        } else {
            Some(tilt_rotation(&self.last_accel))
        }
    }
}

/// Device→world rotation from gravity and the geomagnetic field (east, north, up rows).
fn heading_rotation(
    mut gravity: Vector3<f32>,
    geomagnetic: &Vector3<f32>,
    min_strength: f32,
) -> Option<UnitQuaternion<f32>> {
    let mut east = geomagnetic.cross(&gravity);
    if east.norm_squared() < min_strength {
        return None;
    }
    east.normalize_mut();
    gravity.normalize_mut();
    let north = gravity.cross(&east);

    let matrix = Matrix3::from_rows(&[east.transpose(), north.transpose(), gravity.transpose()]);
    Some(UnitQuaternion::from_rotation_matrix(
        &Rotation3::from_matrix_unchecked(matrix),
    ))
}

/// Heading-free rotation taking measured gravity onto +Z.
fn tilt_rotation(gravity: &Vector3<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::rotation_between(gravity, &Vector3::z())
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI))
}
