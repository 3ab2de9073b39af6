use jni::JNIEnv;
use thiserror::Error;

/// Motion processor error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error("Malformed sample: expected {expected} values, got {actual}")]
    MalformedSample { expected: &'static str, actual: usize },

    #[error("Unknown sensor type: {0}")]
    UnknownSensorType(i32),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Unknown estimator handle: {0}")]
    UnknownHandle(i64),

    #[error("Unknown or already completed request: {0}")]
    UnknownRequest(u64),

    #[error("JNI error: {0}")]
    JniError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for motion processor operations
pub type MotionResult<T> = Result<T, MotionError>;

impl From<jni::errors::Error> for MotionError {
    fn from(err: jni::errors::Error) -> Self {
        MotionError::JniError(err.to_string())
    }
}

impl From<serde_json::Error> for MotionError {
    fn from(err: serde_json::Error) -> Self {
        MotionError::InvalidParameters(err.to_string())
    }
}

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &MotionError) -> MotionResult<()> {
    let exception_class = match error {
        MotionError::MalformedSample { .. }
        | MotionError::UnknownSensorType(_)
        | MotionError::InvalidParameters(_) => "java/lang/IllegalArgumentException",
        MotionError::UnknownHandle(_) | MotionError::UnknownRequest(_) => {
            "java/lang/IllegalStateException"
        }
        MotionError::JniError(_) | MotionError::Internal(_) => "java/lang/RuntimeException",
    };

    let message = error.to_string();
    env.throw_new(exception_class, message)
        .map_err(|_| MotionError::JniError("Failed to throw exception".to_string()))?;

    Ok(())
}
