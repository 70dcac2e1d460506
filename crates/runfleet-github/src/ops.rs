//! The `GithubOps` trait — upstream operations the control loops consume.

use async_trait::async_trait;
use serde::Deserialize;

use runfleet_model::{JobStatus, RunnerScope, UpstreamRunner};

use crate::error::GithubResult;

/// A runner group as listed for an organization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunnerGroup {
    pub id: u64,
    pub name: String,
}

/// Parameters for a just-in-time runner configuration.
#[derive(Debug, Clone)]
pub struct JitConfigRequest {
    /// Runner name; by convention `${prefix}${instance_id}` so scale-down
    /// can suffix-match registrations back to instances.
    pub name: String,
    pub runner_group_id: u64,
    pub labels: Vec<String>,
}

/// A freshly generated just-in-time configuration.
#[derive(Debug, Clone)]
pub struct JitConfig {
    pub runner_id: u64,
    pub encoded_jit_config: String,
}

/// Upstream service operations, scoped to an organization or repository.
///
/// Implementations paginate list endpoints transparently. `get_runner`
/// and `delete_runner` report missing runners as `GithubError::NotFound`.
#[async_trait]
pub trait GithubOps: Send + Sync {
    /// Create a registration token for the scope.
    async fn create_registration_token(&self, scope: &RunnerScope) -> GithubResult<String>;

    /// Generate a single-use JIT configuration and register the runner.
    async fn generate_jit_config(
        &self,
        scope: &RunnerScope,
        request: &JitConfigRequest,
    ) -> GithubResult<JitConfig>;

    /// Status of a workflow job. Jobs always live under a repository,
    /// even when runners are managed at the organization level.
    async fn get_workflow_job(&self, owner: &str, repo: &str, job_id: i64)
    -> GithubResult<JobStatus>;

    /// All self-hosted runners registered for the scope.
    async fn list_runners(&self, scope: &RunnerScope) -> GithubResult<Vec<UpstreamRunner>>;

    /// A single runner by id; the scale-down last-chance probe.
    async fn get_runner(&self, scope: &RunnerScope, runner_id: u64)
    -> GithubResult<UpstreamRunner>;

    /// De-register a runner. Succeeds only on an upstream 204.
    async fn delete_runner(&self, scope: &RunnerScope, runner_id: u64) -> GithubResult<()>;

    /// Runner groups of an organization.
    async fn list_runner_groups(&self, org: &str) -> GithubResult<Vec<RunnerGroup>>;

    /// Installation id for the scope.
    async fn get_installation(&self, scope: &RunnerScope) -> GithubResult<u64>;
}
