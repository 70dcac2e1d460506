//! Cloud adapter error types.

use thiserror::Error;

/// Errors surfaced by the cloud adapter.
///
/// `ParameterNotFound` is distinct so callers can treat a cache miss as an
/// expected outcome rather than a failure.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("cloud request failed: {0}")]
    Request(String),
}

pub type CloudResult<T> = Result<T, CloudError>;
