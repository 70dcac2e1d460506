//! Runner-group id cache backed by the parameter store.
//!
//! Group ids are stable, so one upstream listing per group name is enough
//! for the lifetime of a deployment. A parameter-store miss is an expected
//! outcome, not an error; only absence of the group upstream is.

use std::sync::Arc;

use tracing::warn;

use runfleet_cloud::{CloudClient, CloudError};

use crate::error::{GithubError, GithubResult};
use crate::ops::GithubOps;

pub struct RunnerGroupCache {
    cloud: Arc<dyn CloudClient>,
    cache_path: String,
}

impl RunnerGroupCache {
    pub fn new(cloud: Arc<dyn CloudClient>, cache_path: impl Into<String>) -> Self {
        Self {
            cloud,
            cache_path: cache_path.into(),
        }
    }

    fn key(&self, group_name: &str) -> String {
        format!("{}/runner-group/{group_name}", self.cache_path)
    }

    /// Resolve a group name to its id, consulting the parameter store
    /// before the upstream listing and writing back on a miss.
    pub async fn resolve(
        &self,
        github: &dyn GithubOps,
        org: &str,
        group_name: &str,
    ) -> GithubResult<u64> {
        let key = self.key(group_name);
        match self.cloud.get_parameter(&key).await {
            Ok(cached) => {
                if let Ok(id) = cached.parse() {
                    return Ok(id);
                }
                warn!(%key, value = %cached, "unparsable cached group id, refreshing");
            }
            Err(CloudError::ParameterNotFound(_)) => {}
            Err(e) => warn!(%key, error = %e, "group cache read failed, falling back"),
        }

        let groups = github.list_runner_groups(org).await?;
        let group = groups
            .iter()
            .find(|g| g.name == group_name)
            .ok_or_else(|| GithubError::GroupNotFound(group_name.to_string()))?;

        if let Err(e) = self
            .cloud
            .put_secret(&key, &group.id.to_string(), &[])
            .await
        {
            warn!(%key, error = %e, "group cache write-back failed");
        }
        Ok(group.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeGithub;
    use runfleet_cloud::InMemoryCloud;

    #[tokio::test]
    async fn miss_lists_upstream_and_writes_back() {
        let cloud = Arc::new(InMemoryCloud::new());
        let github = FakeGithub::new();
        github.add_group("acme", 9, "gpu-runners").await;

        let cache = RunnerGroupCache::new(cloud.clone(), "/runfleet/config");
        let id = cache.resolve(&github, "acme", "gpu-runners").await.unwrap();
        assert_eq!(id, 9);

        // Written back for the next resolve.
        assert_eq!(
            cloud
                .parameter("/runfleet/config/runner-group/gpu-runners")
                .await
                .as_deref(),
            Some("9")
        );
    }

    #[tokio::test]
    async fn hit_skips_the_upstream_listing() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud
            .put_secret("/runfleet/config/runner-group/default", "3", &[])
            .await
            .unwrap();

        // No groups seeded upstream: a listing would come back empty.
        let github = FakeGithub::new();
        let cache = RunnerGroupCache::new(cloud, "/runfleet/config");
        let id = cache.resolve(&github, "acme", "default").await.unwrap();
        assert_eq!(id, 3);
    }

    #[tokio::test]
    async fn absent_group_upstream_is_an_error() {
        let cloud = Arc::new(InMemoryCloud::new());
        let github = FakeGithub::new();
        let cache = RunnerGroupCache::new(cloud, "/runfleet/config");

        let err = cache.resolve(&github, "acme", "missing").await.unwrap_err();
        assert!(matches!(err, GithubError::GroupNotFound(_)));
    }
}
