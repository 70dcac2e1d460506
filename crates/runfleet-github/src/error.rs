//! Upstream adapter error types.

use thiserror::Error;

/// Errors surfaced by the upstream service adapter.
///
/// `NotFound` is distinct so the scale-down last-chance check can tell
/// "runner is gone" apart from a transient failure.
#[derive(Debug, Error)]
pub enum GithubError {
    #[error("not found")]
    NotFound,

    #[error("upstream API error: status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("runner group not found upstream: {0}")]
    GroupNotFound(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type GithubResult<T> = Result<T, GithubError>;
