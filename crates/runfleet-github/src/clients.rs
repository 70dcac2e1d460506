//! Per-batch scope → client cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use runfleet_model::RunnerScope;

use crate::error::GithubResult;
use crate::ops::GithubOps;

/// Creates an upstream client authorized for one owning scope.
///
/// `installation_id = 0` means the factory must resolve the installation
/// itself, which costs an extra upstream call.
#[async_trait]
pub trait ScopedClientFactory: Send + Sync {
    async fn client_for(
        &self,
        scope: &RunnerScope,
        installation_id: u64,
    ) -> GithubResult<Arc<dyn GithubOps>>;
}

/// Lazily-built scope → client map, scoped to a single invocation.
///
/// Never hold one across batches: installations and tokens rotate, and a
/// stale client would authenticate against the wrong installation.
pub struct ScopeClients {
    factory: Arc<dyn ScopedClientFactory>,
    cache: HashMap<String, Arc<dyn GithubOps>>,
}

impl ScopeClients {
    pub fn new(factory: Arc<dyn ScopedClientFactory>) -> Self {
        Self {
            factory,
            cache: HashMap::new(),
        }
    }

    /// The cached client for the scope, creating it on first use.
    pub async fn get(
        &mut self,
        scope: &RunnerScope,
        installation_id: u64,
    ) -> GithubResult<Arc<dyn GithubOps>> {
        let key = scope.path();
        if let Some(client) = self.cache.get(&key) {
            return Ok(client.clone());
        }
        let client = self.factory.client_for(scope, installation_id).await?;
        debug!(scope = %scope, "upstream client created");
        self.cache.insert(key, client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
