//! The `CloudClient` trait — the controller's handle on durable state.

use async_trait::async_trait;
use runfleet_model::{InstanceRecord, Tag};

use crate::error::CloudResult;
use crate::fleet::{FleetResult, FleetSpec};

/// Lifecycle states an inventory query can select on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceLifecycle {
    Pending,
    Running,
    Terminated,
}

/// Tag/state predicates for an inventory query.
///
/// Every query is implicitly restricted to instances carrying the
/// application marker; the environment narrows it to one deployment's
/// fleet. Implementations paginate transparently and merge pages.
#[derive(Debug, Clone)]
pub struct InstanceFilter {
    pub environment: String,
    pub owner: Option<String>,
    /// `Some(true)` selects orphan-tagged instances, `Some(false)` the
    /// rest; `None` does not filter on the orphan tag.
    pub orphan: Option<bool>,
    pub lifecycles: Vec<InstanceLifecycle>,
}

impl InstanceFilter {
    pub fn environment(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            owner: None,
            orphan: None,
            lifecycles: vec![InstanceLifecycle::Pending, InstanceLifecycle::Running],
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn orphan(mut self, orphan: bool) -> Self {
        self.orphan = Some(orphan);
        self
    }

    pub fn running_only(mut self) -> Self {
        self.lifecycles = vec![InstanceLifecycle::Running];
        self
    }
}

/// Cloud inventory and parameter-store operations consumed by the
/// control loops. Terminate and the tag operations are idempotent, which
/// is what makes mid-invocation death safe.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// List managed instances matching the filter, merged across pages.
    async fn list_instances(&self, filter: &InstanceFilter) -> CloudResult<Vec<InstanceRecord>>;

    /// One bulk-create call. Tags from the spec are applied at create
    /// time. Partial results are returned, never raised.
    async fn create_fleet(&self, spec: &FleetSpec) -> CloudResult<FleetResult>;

    /// Idempotent termination; unknown ids are not an error.
    async fn terminate(&self, instance_id: &str) -> CloudResult<()>;

    async fn tag(&self, instance_id: &str, tags: &[Tag]) -> CloudResult<()>;

    async fn untag(&self, instance_id: &str, tags: &[Tag]) -> CloudResult<()>;

    /// Blind-overwrite secret write.
    async fn put_secret(&self, path: &str, value: &str, tags: &[Tag]) -> CloudResult<()>;

    /// Fails with `CloudError::ParameterNotFound` when absent.
    async fn get_parameter(&self, name: &str) -> CloudResult<String>;

    async fn delete_parameter(&self, name: &str) -> CloudResult<()>;
}
