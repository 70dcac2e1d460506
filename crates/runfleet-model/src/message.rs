//! Queue message types for the scale-up pipeline.
//!
//! A `JobMessage` is the immutable payload routed from the webhook queue;
//! a `BatchEntry` pairs it with the queue delivery identifier used for
//! partial-batch failure reporting.

use serde::{Deserialize, Serialize};

/// The webhook event kind a message was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowJob,
    CheckRun,
}

/// Whether the repository owner is an organization or a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    Organization,
    User,
}

/// A queued scale-up request.
///
/// Wire field names match the webhook queue payload. `installation_id = 0`
/// means "resolve the installation on demand".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    /// Upstream job identifier.
    pub id: i64,
    #[serde(rename = "eventType")]
    pub event_kind: EventKind,
    #[serde(rename = "repositoryName")]
    pub repository_name: String,
    #[serde(rename = "repositoryOwner")]
    pub repository_owner: String,
    #[serde(rename = "installationId", default)]
    pub installation_id: u64,
    #[serde(rename = "repoOwnerType")]
    pub owner_kind: OwnerKind,
    /// Number of times this message has been re-published by the retry layer.
    #[serde(rename = "retryCounter", default, skip_serializing_if = "Option::is_none")]
    pub retry_counter: Option<u32>,
}

impl JobMessage {
    /// Retry counter with unsent messages ordered before any retry.
    pub fn retries(&self) -> u32 {
        self.retry_counter.unwrap_or(0)
    }
}

/// One message as delivered by the queue, with its delivery identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Opaque queue delivery id reported back on partial-batch failure.
    #[serde(rename = "messageId")]
    pub delivery_id: String,
    pub message: JobMessage,
}

/// Partial-batch outcome of one intake invocation.
///
/// `retry_delivery_ids` is the ordered subset of the input batch that the
/// queue must re-deliver. An empty list means the whole batch is settled.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    #[serde(rename = "batchItemFailures")]
    pub retry_delivery_ids: Vec<String>,
}

impl BatchOutcome {
    pub fn settled() -> Self {
        Self::default()
    }

    pub fn retry(ids: Vec<String>) -> Self {
        Self {
            retry_delivery_ids: ids,
        }
    }
}
