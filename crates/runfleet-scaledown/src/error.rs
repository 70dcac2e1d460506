//! Scale-down error types.

use thiserror::Error;

use runfleet_cloud::CloudError;
use runfleet_github::GithubError;

/// Errors that abort a reaper phase. Per-instance failures are logged and
/// skipped instead; only inventory-level failures surface here.
#[derive(Debug, Error)]
pub enum ScaleDownError {
    #[error("cloud inventory error: {0}")]
    Cloud(#[from] CloudError),

    #[error("upstream error: {0}")]
    Upstream(#[from] GithubError),
}

pub type ScaleDownResult<T> = Result<T, ScaleDownError>;
