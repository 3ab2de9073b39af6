use approx::assert_relative_eq;
use motion_processor_jni::{
    DirectionEstimator, DirectionVector, DisplayRotation, MotionConfig, SensorAvailability,
    SensorType,
};
use std::sync::Arc;
use std::thread;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pitch(angle: f32) -> [f32; 4] {
    [0.0, (angle / 2.0).sin(), 0.0, (angle / 2.0).cos()]
}

#[test]
fn feed_calibrate_and_read_from_many_threads() {
    init();
    let estimator = Arc::new(DirectionEstimator::create(true, false));

    let feeders: Vec<_> = (0..4)
        .map(|i| {
            let estimator = Arc::clone(&estimator);
            thread::spawn(move || {
                for step in 0..500 {
                    let angle = 0.1 * ((i * 500 + step) % 7) as f32;
                    estimator.feed_raw(SensorType::FusedRotation, &pitch(angle), step as i64);
                }
            })
        })
        .collect();

    let calibrator = {
        let estimator = Arc::clone(&estimator);
        thread::spawn(move || {
            for _ in 0..50 {
                estimator.calibrate();
                let direction = estimator.direction_vector();
                assert!(direction.dx.is_finite() && direction.dy.is_finite());
            }
        })
    };

    for handle in feeders {
        handle.join().unwrap();
    }
    calibrator.join().unwrap();

    assert_eq!(estimator.update_count(), 2000);
    assert!(estimator.is_calibrated());
}

#[test]
fn dispose_from_another_thread_freezes_direction() {
    init();
    let estimator = Arc::new(DirectionEstimator::create(true, false));
    estimator.feed_raw(SensorType::FusedRotation, &pitch(0.3), 0);

    let disposer = {
        let estimator = Arc::clone(&estimator);
        thread::spawn(move || estimator.dispose())
    };
    disposer.join().unwrap();

    let frozen = estimator.direction_vector();
    let count = estimator.update_count();
    for step in 0..100 {
        estimator.feed_raw(SensorType::FusedRotation, &pitch(0.8), step);
    }
    assert_eq!(estimator.direction_vector(), frozen);
    assert_eq!(estimator.update_count(), count);
}

#[test]
fn calibrated_session_tracks_tilt_relative_to_centre() {
    init();
    let config = MotionConfig {
        smoothing: 1.0,
        ..MotionConfig::default()
    };
    let estimator = DirectionEstimator::with_config(
        SensorAvailability::from_flags(true, false),
        config,
        Arc::new(DisplayRotation::Rotation0),
    )
    .unwrap();

    // Player holds the phone tilted 0.4 rad and re-centres there
    estimator.feed_raw(SensorType::FusedRotation, &pitch(0.4), 0);
    estimator.calibrate();
    assert_eq!(estimator.direction_vector(), DirectionVector::ZERO);

    // Tilting a further 0.2 rad steers as if from level
    estimator.feed_raw(SensorType::FusedRotation, &pitch(0.6), 1);
    let direction = estimator.direction_vector();
    assert_relative_eq!(direction.dx, 0.625 * 0.2_f32.tan(), epsilon = 1e-4);
    assert_relative_eq!(direction.dy, 0.0, epsilon = 1e-5);
}

#[test]
fn manual_fusion_session_with_gyroscope() {
    init();
    let estimator = DirectionEstimator::create(false, true);
    estimator.feed_raw(SensorType::Magnetometer, &[0.0, 22.0, -40.0], 0);

    for step in 0..10 {
        estimator.feed_raw(SensorType::Gyroscope, &[0.0, 0.0, 0.0], step * 10_000_000);
    }
    assert_eq!(estimator.update_count(), 0);

    estimator.feed_raw(SensorType::Accelerometer, &[0.0, 0.0, 9.81], 100_000_000);
    assert_eq!(estimator.update_count(), 1);
    estimator.calibrate();

    for step in 11..20 {
        estimator.feed_raw(SensorType::Gyroscope, &[0.0, 0.0, 0.0], step * 10_000_000);
        estimator.feed_raw(SensorType::Accelerometer, &[0.0, 0.0, 9.81], step * 10_000_000);
    }
    let direction = estimator.direction_vector();
    assert_relative_eq!(direction.dx, 0.0, epsilon = 1e-4);
    assert_relative_eq!(direction.dy, 0.0, epsilon = 1e-4);
}
