//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors returned by a [`crate::CloudProvider`] call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("invalid value {value:?} for parameter {name}")]
    InvalidParameter { name: String, value: String },

    #[error("alarm not found: {0}")]
    AlarmNotFound(String),

    #[error("parameter file error: {0}")]
    ParameterFile(String),
}
