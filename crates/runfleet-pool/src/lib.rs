//! runfleet-pool — keeps a floor of idle runners alive.
//!
//! Each tick counts the instances that are usable as pool capacity
//! (registered and idle upstream, or still within their boot window) and
//! launches the shortfall through the scale-up provisioning primitives
//! with the pool creator tag.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use runfleet_cloud::{CloudClient, CloudError, InstanceFilter};
use runfleet_github::{GithubError, ScopeClients, ScopedClientFactory};
use runfleet_model::{CreatedBy, PoolConfig, RunnerScope, RunnerStatus, ScaleUpConfig};
use runfleet_scaleup::{ScaleError, ScaleUp};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("cloud inventory error: {0}")]
    Cloud(#[from] CloudError),

    #[error("upstream error: {0}")]
    Upstream(#[from] GithubError),

    #[error("provisioning error: {0}")]
    Provision(#[from] ScaleError),
}

pub type PoolResult<T> = Result<T, PoolError>;

/// The pool top-up loop.
pub struct PoolManager {
    cloud: Arc<dyn CloudClient>,
    factory: Arc<dyn ScopedClientFactory>,
    scaleup: Arc<ScaleUp>,
    scaleup_config: ScaleUpConfig,
    config: PoolConfig,
}

impl PoolManager {
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        factory: Arc<dyn ScopedClientFactory>,
        scaleup: Arc<ScaleUp>,
        scaleup_config: ScaleUpConfig,
        config: PoolConfig,
    ) -> Self {
        Self {
            cloud,
            factory,
            scaleup,
            scaleup_config,
            config,
        }
    }

    /// Run the top-up loop on an interval until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            target = self.config.size,
            "pool manager started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.top_up().await {
                        warn!(error = %e, "pool top-up failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("pool manager shutting down");
                    break;
                }
            }
        }
    }

    /// One top-up pass. Returns the number of instances launched.
    pub async fn top_up(&self) -> PoolResult<u32> {
        self.top_up_at(Utc::now()).await
    }

    pub async fn top_up_at(&self, now: DateTime<Utc>) -> PoolResult<u32> {
        let scope = RunnerScope::parse(&self.config.owner);
        let mut clients = ScopeClients::new(self.factory.clone());
        let github = clients.get(&scope, 0).await?;

        // Upstream view: id and busy/status per registered runner name.
        let runners = github.list_runners(&scope).await?;
        let by_name: HashMap<&str, (&RunnerStatus, bool)> = runners
            .iter()
            .map(|r| (r.name.as_str(), (&r.status, r.busy)))
            .collect();

        let filter = InstanceFilter::environment(&self.scaleup_config.environment)
            .owner(scope.path())
            .running_only();
        let instances = self.cloud.list_instances(&filter).await?;

        // An instance counts toward the pool when it is registered and
        // idle, or not yet registered but still within its boot window.
        let pool = instances
            .iter()
            .filter(|instance| {
                let registration = by_name
                    .iter()
                    .find(|(name, _)| name.ends_with(instance.instance_id.as_str()));
                match registration {
                    Some((_, (status, busy))) => **status == RunnerStatus::Online && !busy,
                    None => instance.minutes_running(now) < self.config.boot_time_minutes,
                }
            })
            .count() as u32;

        let top_up = self.config.size.saturating_sub(pool);
        debug!(pool, target = self.config.size, top_up, "pool evaluated");
        if top_up == 0 {
            return Ok(0);
        }

        info!(scope = %scope, top_up, "topping up idle pool");
        let created = self
            .scaleup
            .provision(github.as_ref(), &scope, top_up, CreatedBy::Pool)
            .await?;
        Ok(created.len() as u32)
    }
}
