//! Smoothed 2D steering direction derived from device orientation
//!
//! The estimator owns all mutable motion state behind one mutex so sensor
//! callbacks, calibration from the game thread, and disposal never interleave.

use crate::config::MotionConfig;
use crate::error::{MotionError, MotionResult};
use crate::orientation::{OrientationMode, OrientationSource};
use crate::quaternion::{multiply, Quat};
use crate::sensor_receiver::{SensorAvailability, SensorSample, SensorType};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Screen rotation as reported by Display.getRotation()
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    pub fn from_index(index: i32) -> MotionResult<Self> {
        match index {
            0 => Ok(DisplayRotation::Rotation0),
            1 => Ok(DisplayRotation::Rotation90),
            2 => Ok(DisplayRotation::Rotation180),
            3 => Ok(DisplayRotation::Rotation270),
            other => Err(MotionError::InvalidParameters(format!(
                "display rotation must be 0..=3, got {}",
                other
            ))),
        }
    }

    pub fn index(self) -> u8 {
        match self {
            DisplayRotation::Rotation0 => 0,
            DisplayRotation::Rotation90 => 1,
            DisplayRotation::Rotation180 => 2,
            DisplayRotation::Rotation270 => 3,
        }
    }

    /// Map device-frame tangents to screen axes
    pub fn remap(self, tan_pitch: f32, tan_roll: f32) -> (f32, f32) {
        match self {
            DisplayRotation::Rotation0 => (tan_pitch, -tan_roll),
            DisplayRotation::Rotation90 => (tan_roll, tan_pitch),
            DisplayRotation::Rotation180 => (-tan_pitch, tan_roll),
            DisplayRotation::Rotation270 => (-tan_roll, -tan_pitch),
        }
    }
}

/// Queried on every manual-fusion update
pub trait DisplayRotationSource: Send + Sync {
    fn display_rotation(&self) -> DisplayRotation;
}

impl DisplayRotationSource for DisplayRotation {
    fn display_rotation(&self) -> DisplayRotation {
        *self
    }
}

/// Rotation cell the host updates whenever the activity reorients
#[derive(Debug, Default)]
pub struct SharedDisplayRotation(AtomicU8);

impl SharedDisplayRotation {
    pub fn new(rotation: DisplayRotation) -> Self {
        Self(AtomicU8::new(rotation.index()))
    }

    pub fn set(&self, rotation: DisplayRotation) {
        self.0.store(rotation.index(), Ordering::Relaxed);
    }
}

impl DisplayRotationSource for SharedDisplayRotation {
    fn display_rotation(&self) -> DisplayRotation {
        DisplayRotation::from_index(self.0.load(Ordering::Relaxed) as i32).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectionVector {
    pub dx: f32,
    pub dy: f32,
}

impl DirectionVector {
    pub const ZERO: DirectionVector = DirectionVector { dx: 0.0, dy: 0.0 };

    pub fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.dx, self.dy]
    }
}

struct EstimatorState {
    /// None once disposed
    source: Option<OrientationSource>,
    current: Option<Quat>,
    calibration: Option<Quat>,
    direction: DirectionVector,
    update_count: u64,
}

pub struct DirectionEstimator {
    config: MotionConfig,
    mode: OrientationMode,
    availability: SensorAvailability,
    rotation: Arc<dyn DisplayRotationSource>,
    state: Mutex<EstimatorState>,
}

impl DirectionEstimator {
    /// Default tuning, fixed portrait rotation. Without a fused sensor the
    /// accelerometer and magnetometer are assumed present.
    pub fn create(has_dedicated_fusion_sensor: bool, has_gyroscope: bool) -> Self {
        Self::build(
            SensorAvailability::from_flags(has_dedicated_fusion_sensor, has_gyroscope),
            MotionConfig::default(),
            Arc::new(DisplayRotation::Rotation0),
        )
    }

    pub fn with_config(
        availability: SensorAvailability,
        config: MotionConfig,
        rotation: Arc<dyn DisplayRotationSource>,
    ) -> MotionResult<Self> {
        config.validate()?;
        Ok(Self::build(availability, config, rotation))
    }

    fn build(
        availability: SensorAvailability,
        config: MotionConfig,
        rotation: Arc<dyn DisplayRotationSource>,
    ) -> Self {
        let source = OrientationSource::select(&availability, &config.fusion);
        let mode = source.mode();

        info!("Motion estimator created: {:?} mode, sensors {:?}", mode, availability);
        if !availability.fused_rotation && !availability.accelerometer {
            warn!("No usable orientation sensors; direction will stay at zero");
        }

        Self {
            config,
            mode,
            availability,
            rotation,
            state: Mutex::new(EstimatorState {
                source: Some(source),
                current: None,
                calibration: None,
                direction: DirectionVector::ZERO,
                update_count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EstimatorState> {
        // Poisoning ignored: state is plain data
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> OrientationMode {
        self.mode
    }

    /// Validate and feed a raw sample; malformed input is dropped.
    pub fn feed_raw(&self, sensor_type: SensorType, values: &[f32], timestamp_ns: i64) {
        match SensorSample::new(sensor_type, values, timestamp_ns) {
            Ok(sample) => self.feed(&sample),
            Err(e) => debug!("Dropping sample: {}", e),
        }
    }

    pub fn feed(&self, sample: &SensorSample) {
        if !self.availability.has(sample.sensor_type) {
            debug!("Ignoring {:?} sample from unregistered sensor", sample.sensor_type);
            return;
        }

        let mut state = self.lock();
        let Some(source) = state.source.as_mut() else {
            return;
        };

        if let Some(quat) = source.feed(sample) {
            self.on_orientation_updated(&mut state, quat);
        }
    }

    fn on_orientation_updated(&self, state: &mut EstimatorState, current: Quat) {
        if !current.is_finite() {
            debug!("Dropping non-finite orientation {:?}", current);
            return;
        }
        state.current = Some(current);

        let reference = state.calibration.unwrap_or(Quat::IDENTITY);
        let relative = multiply(&current, &reference);
        let Some((tan_pitch, tan_roll)) = project(&relative, &self.config) else {
            debug!("Dropping degenerate projection for {:?}", relative);
            return;
        };

        let (dx, dy) = match self.mode {
            OrientationMode::Direct => (tan_pitch, -tan_roll),
            OrientationMode::ManualFusion => self
                .rotation
                .display_rotation()
                .remap(tan_pitch, tan_roll),
        };

        let k = self.config.smoothing;
        state.direction = DirectionVector {
            dx: state.direction.dx * (1.0 - k) + dx * k,
            dy: state.direction.dy * (1.0 - k) + dy * k,
        };
        state.update_count += 1;
    }

    /// Treat the current orientation as centre. Safe to call repeatedly.
    pub fn calibrate(&self) {
        let mut state = self.lock();
        let Some(source) = state.source.as_mut() else {
            return;
        };
        source.reset();

        let current = state.current.unwrap_or(Quat::IDENTITY);
        state.calibration = Some(current.conjugate());
        state.direction = DirectionVector::ZERO;
        info!("Calibrated at {:?}", current);
    }

    pub fn direction_vector(&self) -> DirectionVector {
        self.lock().direction
    }

    /// Latest orientation relative to the calibration reference
    pub fn relative_orientation(&self) -> Option<Quat> {
        let state = self.lock();
        let reference = state.calibration.unwrap_or(Quat::IDENTITY);
        state.current.map(|current| multiply(&current, &reference))
    }

    pub fn is_calibrated(&self) -> bool {
        self.lock().calibration.is_some()
    }

    /// Number of orientation updates applied to the direction vector
    pub fn update_count(&self) -> u64 {
        self.lock().update_count
    }

    /// Stop processing and release the fusion buffer. Once this returns no
    /// further sample is applied.
    pub fn dispose(&self) {
        let mut state = self.lock();
        if state.source.take().is_some() {
            info!("Motion estimator disposed after {} updates", state.update_count);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().source.is_none()
    }
}

/// Tangent-plane projection of a relative orientation, scaled by `tangent_scale`.
/// Near-zero denominators are clamped and each axis is capped at `max_tangent`.
fn project(relative: &Quat, config: &MotionConfig) -> Option<(f32, f32)> {
    let Quat { x, y, z, w } = *relative;
    let k = config.tangent_scale;

    let pitch_den = clamp_away_from_zero(1.0 - 2.0 * y * y - 2.0 * z * z, config.min_denominator);
    let roll_den = clamp_away_from_zero(1.0 - 2.0 * x * x - 2.0 * z * z, config.min_denominator);

    let tan_pitch = k * (2.0 * w * y - 2.0 * x * z) / pitch_den;
    let tan_roll = k * (2.0 * w * x - 2.0 * y * z) / roll_den;

    if !(tan_pitch.is_finite() && tan_roll.is_finite()) {
        return None;
    }
    Some((
        tan_pitch.clamp(-config.max_tangent, config.max_tangent),
        tan_roll.clamp(-config.max_tangent, config.max_tangent),
    ))
}

fn clamp_away_from_zero(value: f32, min: f32) -> f32 {
    if value.abs() >= min {
        value
    } else if value < 0.0 {
        -min
    } else {
        min
    }
}
