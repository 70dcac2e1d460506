//! runfleet-retry — best-effort republisher for unserved jobs.
//!
//! A message that reached the reject list because its job was still queued
//! when capacity ran out gets another chance: if the job is still queued
//! upstream, an identical message with an incremented retry counter is
//! republished with exponential backoff, bounded by the max-attempts
//! policy and the queue's maximum delivery delay.
//!
//! The whole layer is best-effort: probe failures are logged and
//! swallowed, never propagated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use runfleet_github::{ScopeClients, ScopedClientFactory};
use runfleet_model::{JobMessage, JobStatus, RetryConfig, RunnerScope};

/// Queues cap delivery delay; anything longer is clamped.
const MAX_QUEUE_DELAY: Duration = Duration::from_secs(900);

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("queue publish failed: {0}")]
    Publish(String),
}

pub type RetryResult<T> = Result<T, RetryError>;

/// Seam to the delayed-delivery queue the scale-up intake consumes from.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn send_delayed(&self, message: JobMessage, delay: Duration) -> RetryResult<()>;
}

/// In-memory queue recording publishes, for tests and standalone mode.
#[derive(Default)]
pub struct InMemoryRetryQueue {
    published: Mutex<Vec<(JobMessage, Duration)>>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<(JobMessage, Duration)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn send_delayed(&self, message: JobMessage, delay: Duration) -> RetryResult<()> {
        self.published.lock().await.push((message, delay));
        Ok(())
    }
}

/// The retry republisher.
pub struct JobRetry {
    factory: Arc<dyn ScopedClientFactory>,
    queue: Arc<dyn RetryQueue>,
    config: RetryConfig,
    org_runners: bool,
}

impl JobRetry {
    pub fn new(
        factory: Arc<dyn ScopedClientFactory>,
        queue: Arc<dyn RetryQueue>,
        config: RetryConfig,
        org_runners: bool,
    ) -> Self {
        Self {
            factory,
            queue,
            config,
            org_runners,
        }
    }

    /// Delay before the next delivery of a message that has already been
    /// retried `attempts` times, clamped to the queue maximum.
    fn delay_for(&self, attempts: u32) -> Duration {
        let seconds =
            self.config.delay_in_seconds as f64 * self.config.delay_backoff.powi(attempts as i32);
        MAX_QUEUE_DELAY.min(Duration::from_secs_f64(seconds.max(0.0)))
    }

    /// Republish the message if its job is still queued and the attempt
    /// budget allows. Never fails; every error path is logged and dropped.
    pub async fn maybe_republish(&self, message: &JobMessage) {
        if !self.config.enable {
            return;
        }

        let attempts = message.retry_counter.unwrap_or(0);
        let next_counter = message.retry_counter.map_or(0, |c| c + 1);
        if next_counter >= self.config.max_attempts {
            info!(
                job = message.id,
                attempts, "retry budget exhausted, dropping job"
            );
            return;
        }

        let scope = RunnerScope::for_owner(
            self.org_runners,
            &message.repository_owner,
            &message.repository_name,
        );
        let mut clients = ScopeClients::new(self.factory.clone());
        let github = match clients.get(&scope, message.installation_id).await {
            Ok(client) => client,
            Err(e) => {
                warn!(job = message.id, error = %e, "retry probe client failed");
                return;
            }
        };

        let status = match github
            .get_workflow_job(&message.repository_owner, &message.repository_name, message.id)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(job = message.id, error = %e, "retry probe failed");
                return;
            }
        };
        if status != JobStatus::Queued {
            debug!(job = message.id, ?status, "job moved on, no retry");
            return;
        }

        let delay = self.delay_for(attempts);
        let mut republished = message.clone();
        republished.retry_counter = Some(next_counter);

        match self.queue.send_delayed(republished, delay).await {
            Ok(()) => info!(
                job = message.id,
                attempt = next_counter,
                delay_secs = delay.as_secs(),
                "job republished for retry"
            ),
            Err(e) => warn!(job = message.id, error = %e, "republish failed"),
        }
    }
}
