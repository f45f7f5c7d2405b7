//! Error types for the pipelines

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MlopsError>;

/// Main error type shared by every flow
#[derive(Error, Debug)]
pub enum MlopsError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Tracking server returned {status}: {message}")]
    TrackingError { status: u16, message: String },

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },
}

impl MlopsError {
    /// Shorthand for an invalid parameter error
    pub fn invalid_param(name: &str, value: impl ToString, reason: &str) -> Self {
        MlopsError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<polars::error::PolarsError> for MlopsError {
    fn from(err: polars::error::PolarsError) -> Self {
        MlopsError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for MlopsError {
    fn from(err: serde_json::Error) -> Self {
        MlopsError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for MlopsError {
    fn from(err: bincode::Error) -> Self {
        MlopsError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for MlopsError {
    fn from(err: ndarray::ShapeError) -> Self {
        MlopsError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for MlopsError {
    fn from(err: reqwest::Error) -> Self {
        MlopsError::HttpError(err.to_string())
    }
}

impl From<lettre::error::Error> for MlopsError {
    fn from(err: lettre::error::Error) -> Self {
        MlopsError::NotificationError(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for MlopsError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        MlopsError::NotificationError(err.to_string())
    }
}

impl From<lettre::address::AddressError> for MlopsError {
    fn from(err: lettre::address::AddressError) -> Self {
        MlopsError::NotificationError(format!("invalid address: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MlopsError::DataError("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MlopsError = io_err.into();
        assert!(matches!(err, MlopsError::IoError(_)));
    }

    #[test]
    fn test_tracking_error_display() {
        let err = MlopsError::TrackingError {
            status: 404,
            message: "RESOURCE_DOES_NOT_EXIST".to_string(),
        };
        assert_eq!(err.to_string(), "Tracking server returned 404: RESOURCE_DOES_NOT_EXIST");
    }
}
