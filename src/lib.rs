// Motion Processor Android JNI Library
// Tilt steering for the game plus typed relays for host-side SDK callbacks

pub mod android_jni;
pub mod config;
pub mod direction;
pub mod error;
pub mod fusion;
pub mod orientation;
pub mod quaternion;
pub mod relay;
pub mod sensor_receiver;

pub use config::{FusionConfig, MotionConfig};
pub use direction::{
    DirectionEstimator, DirectionVector, DisplayRotation, DisplayRotationSource,
    SharedDisplayRotation,
};
pub use error::{MotionError, MotionResult};
pub use orientation::{OrientationMode, OrientationSource};
pub use quaternion::{complete_from_vector, multiply, Quat};
pub use relay::{
    CallbackRegistry, CollaboratorError, DialogRequest, HostRequests, HttpMethod, PermissionKind,
    Relay, RequestId,
};
pub use sensor_receiver::{SensorAvailability, SensorSample, SensorType};
