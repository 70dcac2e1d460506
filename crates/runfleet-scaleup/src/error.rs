//! Scale-up error taxonomy.

use thiserror::Error;

use runfleet_cloud::CloudError;
use runfleet_github::GithubError;
use runfleet_model::RunnerScope;

/// Errors raised by the scale-up dispatcher.
///
/// `Retriable` and `Fatal` are batch-wide signals from the bulk-create
/// path; `Upstream` and `Cloud` are fatal to a single scope and converted
/// by the intake layer into per-scope rejects.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("fleet request unfulfilled for {failed_instance_count} instances")]
    Retriable { failed_instance_count: usize },

    #[error("fleet request failed fatally: {codes:?}")]
    Fatal { codes: Vec<String> },

    #[error("upstream call failed for scope {scope}: {source}")]
    Upstream {
        scope: String,
        #[source]
        source: GithubError,
    },

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl ScaleError {
    pub fn upstream(scope: &RunnerScope, source: GithubError) -> Self {
        Self::Upstream {
            scope: scope.path(),
            source,
        }
    }

    /// Batch-wide errors abort the dispatch; everything else is contained
    /// to the scope that raised it.
    pub fn is_batch_wide(&self) -> bool {
        matches!(self, Self::Retriable { .. } | Self::Fatal { .. })
    }
}

pub type ScaleResult<T> = Result<T, ScaleError>;
