//! Batch dispatch: validation, scope grouping, the queued filter,
//! capacity computation and partial-batch reporting.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use runfleet_cloud::{CloudClient, InstanceFilter};
use runfleet_github::{RunnerGroupCache, ScopeClients, ScopedClientFactory};
use runfleet_model::{
    BatchEntry, BatchOutcome, CreatedBy, EventKind, JobStatus, OwnerKind, RunnerScope,
    ScaleUpConfig,
};

use crate::error::{ScaleError, ScaleResult};

/// Messages of one owning scope within a batch, in retry-sorted order.
struct ScopeGroup {
    scope: RunnerScope,
    installation_id: u64,
    entries: Vec<BatchEntry>,
}

/// The scale-up dispatcher.
pub struct ScaleUp {
    pub(crate) cloud: Arc<dyn CloudClient>,
    pub(crate) config: ScaleUpConfig,
    pub(crate) group_cache: RunnerGroupCache,
    factory: Arc<dyn ScopedClientFactory>,
}

impl ScaleUp {
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        factory: Arc<dyn ScopedClientFactory>,
        config: ScaleUpConfig,
    ) -> Self {
        let group_cache = RunnerGroupCache::new(cloud.clone(), config.group_cache_path.clone());
        Self {
            cloud,
            config,
            group_cache,
            factory,
        }
    }

    /// Intake: consume one batch and report which deliveries the queue
    /// must retry. Always returns; batch-wide fleet failures are folded
    /// into the outcome here so nothing escapes to the scheduler.
    pub async fn handle_batch(&self, batch: Vec<BatchEntry>) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::settled();
        }

        // Ascending retry order: when capacity caps the batch, the
        // youngest retries are deferred and the oldest kept.
        let mut sorted = batch;
        sorted.sort_by_key(|entry| entry.message.retries());
        let sorted_ids: Vec<String> = sorted.iter().map(|e| e.delivery_id.clone()).collect();

        let (mut rejected, groups) = self.partition(sorted);

        let mut clients = ScopeClients::new(self.factory.clone());
        for group in groups {
            let scope_ids: Vec<String> =
                group.entries.iter().map(|e| e.delivery_id.clone()).collect();
            let scope = group.scope.clone();

            match self.process_scope(&mut clients, group).await {
                Ok(scope_rejects) => rejected.extend(scope_rejects),
                Err(e) if e.is_batch_wide() => return Self::batch_failure(e, &sorted_ids),
                Err(e) => {
                    warn!(
                        scope = %scope,
                        error = %e,
                        "scope failed, re-queueing its messages"
                    );
                    rejected.extend(scope_ids);
                }
            }
        }

        BatchOutcome::retry(rejected)
    }

    /// Validation pass: split the sorted batch into immediate rejects and
    /// per-scope groups, dropping messages that only warrant a warning.
    fn partition(&self, sorted: Vec<BatchEntry>) -> (Vec<String>, Vec<ScopeGroup>) {
        let mut rejected = Vec::new();
        let mut groups: Vec<ScopeGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for entry in sorted {
            let message = &entry.message;

            if self.config.ephemeral && message.event_kind != EventKind::WorkflowJob {
                warn!(
                    job = message.id,
                    "non workflow-job event in ephemeral mode, rejecting"
                );
                rejected.push(entry.delivery_id);
                continue;
            }
            // A check-run id cannot be resolved through the job endpoint,
            // so it is only accepted when the queued check is off.
            if message.event_kind == EventKind::CheckRun && self.config.queued_check {
                warn!(
                    job = message.id,
                    "check-run event cannot pass the queued check, rejecting"
                );
                rejected.push(entry.delivery_id);
                continue;
            }
            if self.config.org_runners && message.owner_kind != OwnerKind::Organization {
                warn!(
                    owner = %message.repository_owner,
                    "non-organization owner in org mode, ignoring"
                );
                continue;
            }

            let scope = RunnerScope::for_owner(
                self.config.org_runners,
                &message.repository_owner,
                &message.repository_name,
            );
            let key = scope.path();
            match index.get(&key) {
                Some(&i) => groups[i].entries.push(entry),
                None => {
                    index.insert(key, groups.len());
                    groups.push(ScopeGroup {
                        scope,
                        installation_id: message.installation_id,
                        entries: vec![entry],
                    });
                }
            }
        }
        (rejected, groups)
    }

    async fn process_scope(
        &self,
        clients: &mut ScopeClients,
        group: ScopeGroup,
    ) -> ScaleResult<Vec<String>> {
        let scope = &group.scope;
        let github = clients
            .get(scope, group.installation_id)
            .await
            .map_err(|e| ScaleError::upstream(scope, e))?;

        // Queued filter: jobs that moved on are dropped silently.
        let mut surviving = Vec::new();
        for entry in group.entries {
            if self.config.queued_check {
                let status = github
                    .get_workflow_job(
                        &entry.message.repository_owner,
                        &entry.message.repository_name,
                        entry.message.id,
                    )
                    .await
                    .map_err(|e| ScaleError::upstream(scope, e))?;
                if status != JobStatus::Queued {
                    info!(
                        job = entry.message.id,
                        status = ?status,
                        "job no longer queued, skipping"
                    );
                    continue;
                }
            }
            surviving.push(entry);
        }

        let want = surviving.len();
        if want == 0 {
            return Ok(Vec::new());
        }

        let new_count = if self.config.unbounded() {
            want
        } else {
            let filter =
                InstanceFilter::environment(&self.config.environment).owner(scope.path());
            let current = self.cloud.list_instances(&filter).await?.len();
            let headroom = (self.config.max_runners - current as i64).max(0) as usize;
            want.min(headroom)
        };

        // The capped-out prefix goes back to the queue for later delivery.
        let mut rejected: Vec<String> = surviving[..want - new_count]
            .iter()
            .map(|e| e.delivery_id.clone())
            .collect();
        let consumed = &surviving[want - new_count..];

        if new_count == 0 {
            warn!(scope = %scope, want, "instance budget exhausted, deferring batch");
            return Ok(rejected);
        }

        let created = self
            .provision(github.as_ref(), scope, new_count as u32, CreatedBy::ScaleUp)
            .await?;

        if created.len() < new_count {
            let shortfall = new_count - created.len();
            warn!(
                scope = %scope,
                requested = new_count,
                created = created.len(),
                "fleet shortfall, deferring unserved messages"
            );
            rejected.extend(consumed[..shortfall].iter().map(|e| e.delivery_id.clone()));
        }

        Ok(rejected)
    }

    /// Fold a batch-wide fleet failure into the partial-batch outcome.
    fn batch_failure(e: ScaleError, sorted_ids: &[String]) -> BatchOutcome {
        match e {
            ScaleError::Retriable {
                failed_instance_count,
            } => {
                warn!(
                    failed_instance_count,
                    "retriable fleet failure, re-queueing head of batch"
                );
                BatchOutcome::retry(
                    sorted_ids
                        .iter()
                        .take(failed_instance_count)
                        .cloned()
                        .collect(),
                )
            }
            // A poison batch must not loop forever: settle it.
            ScaleError::Fatal { codes } => {
                error!(?codes, "fatal fleet failure, settling batch");
                BatchOutcome::settled()
            }
            _ => unreachable!("only fleet failures are batch-wide"),
        }
    }
}
