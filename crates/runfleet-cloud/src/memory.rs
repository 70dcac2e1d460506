//! In-memory `CloudClient` backend.
//!
//! Implements the full adapter contract over process-local maps, the
//! backend used by tests and the daemon's standalone mode. Fault knobs
//! (`fail_next_fleet`, `limit_fleet_capacity`) let tests drive the
//! partial-creation and error-classification paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use runfleet_model::{APPLICATION_MARKER, InstanceRecord, RunnerKind, Tag, keys};

use crate::client::{CloudClient, InstanceFilter, InstanceLifecycle};
use crate::error::{CloudError, CloudResult};
use crate::fleet::{FleetResult, FleetSpec};

#[derive(Debug, Clone)]
struct StoredInstance {
    launch_time: DateTime<Utc>,
    tags: BTreeMap<String, String>,
    lifecycle: InstanceLifecycle,
}

#[derive(Debug, Clone)]
struct Parameter {
    value: String,
    #[allow(dead_code)]
    tags: Vec<Tag>,
}

#[derive(Default)]
struct CloudState {
    instances: HashMap<String, StoredInstance>,
    parameters: HashMap<String, Parameter>,
    /// Error codes to return from the next create-fleet call, if set.
    next_fleet_errors: Option<Vec<String>>,
    /// Remaining creatable instances; `None` means unlimited.
    capacity: Option<u32>,
}

/// In-memory cloud backend.
#[derive(Clone)]
pub struct InMemoryCloud {
    state: Arc<RwLock<CloudState>>,
    id_counter: Arc<AtomicU64>,
    list_calls: Arc<AtomicU64>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CloudState::default())),
            id_counter: Arc::new(AtomicU64::new(0)),
            list_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_id(&self) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("i-{n:017x}")
    }

    /// Number of `list_instances` calls observed so far.
    pub fn list_call_count(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make the next create-fleet call return zero instances with these
    /// error codes.
    pub async fn fail_next_fleet(&self, codes: Vec<String>) {
        self.state.write().await.next_fleet_errors = Some(codes);
    }

    /// Cap the total number of instances this backend will still create.
    /// Requests beyond the cap produce `InsufficientInstanceCapacity`
    /// codes for the shortfall.
    pub async fn limit_fleet_capacity(&self, remaining: u32) {
        self.state.write().await.capacity = Some(remaining);
    }

    /// Insert an instance directly, bypassing create-fleet. Returns its id.
    pub async fn seed_instance(&self, launch_time: DateTime<Utc>, tags: Vec<Tag>) -> String {
        let id = self.next_id();
        let mut state = self.state.write().await;
        state.instances.insert(
            id.clone(),
            StoredInstance {
                launch_time,
                tags: tags.into_iter().map(|t| (t.key, t.value)).collect(),
                lifecycle: InstanceLifecycle::Running,
            },
        );
        id
    }

    /// Tag map of an instance, for assertions.
    pub async fn tags_of(&self, instance_id: &str) -> Option<BTreeMap<String, String>> {
        let state = self.state.read().await;
        state.instances.get(instance_id).map(|i| i.tags.clone())
    }

    pub async fn is_terminated(&self, instance_id: &str) -> bool {
        let state = self.state.read().await;
        state
            .instances
            .get(instance_id)
            .is_none_or(|i| i.lifecycle == InstanceLifecycle::Terminated)
    }

    /// Stored parameter value, for assertions.
    pub async fn parameter(&self, name: &str) -> Option<String> {
        let state = self.state.read().await;
        state.parameters.get(name).map(|p| p.value.clone())
    }

    fn to_record(id: &str, stored: &StoredInstance) -> InstanceRecord {
        InstanceRecord {
            instance_id: id.to_string(),
            launch_time: stored.launch_time,
            owner: stored.tags.get(keys::OWNER).cloned().unwrap_or_default(),
            runner_kind: stored
                .tags
                .get(keys::TYPE)
                .and_then(|t| RunnerKind::parse(t))
                .unwrap_or(RunnerKind::Repo),
            runner_id: stored
                .tags
                .get(keys::RUNNER_ID)
                .and_then(|v| v.parse().ok()),
            orphan: stored
                .tags
                .get(keys::ORPHAN)
                .is_some_and(|v| v == "true"),
        }
    }

    fn matches(filter: &InstanceFilter, stored: &StoredInstance) -> bool {
        if stored.tags.get(keys::APPLICATION).map(String::as_str) != Some(APPLICATION_MARKER) {
            return false;
        }
        if stored.tags.get(keys::ENVIRONMENT) != Some(&filter.environment) {
            return false;
        }
        if !filter.lifecycles.contains(&stored.lifecycle) {
            return false;
        }
        if let Some(owner) = &filter.owner
            && stored.tags.get(keys::OWNER) != Some(owner)
        {
            return false;
        }
        if let Some(orphan) = filter.orphan {
            let tagged = stored.tags.get(keys::ORPHAN).is_some_and(|v| v == "true");
            if tagged != orphan {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl CloudClient for InMemoryCloud {
    async fn list_instances(&self, filter: &InstanceFilter) -> CloudResult<Vec<InstanceRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        let mut records: Vec<InstanceRecord> = state
            .instances
            .iter()
            .filter(|(_, stored)| Self::matches(filter, stored))
            .map(|(id, stored)| Self::to_record(id, stored))
            .collect();
        // Deterministic order for callers that slice the result.
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(records)
    }

    async fn create_fleet(&self, spec: &FleetSpec) -> CloudResult<FleetResult> {
        let mut state = self.state.write().await;

        if let Some(codes) = state.next_fleet_errors.take() {
            debug!(count = spec.count, ?codes, "fleet request failed by injection");
            return Ok(FleetResult {
                instance_ids: vec![],
                errors: codes,
            });
        }

        let creatable = match state.capacity {
            Some(remaining) => spec.count.min(remaining),
            None => spec.count,
        };
        if let Some(remaining) = state.capacity.as_mut() {
            *remaining -= creatable;
        }

        let mut result = FleetResult::default();
        let now = Utc::now();
        for _ in 0..creatable {
            let id = self.next_id();
            state.instances.insert(
                id.clone(),
                StoredInstance {
                    launch_time: now,
                    tags: spec
                        .tags
                        .iter()
                        .map(|t| (t.key.clone(), t.value.clone()))
                        .collect(),
                    lifecycle: InstanceLifecycle::Running,
                },
            );
            result.instance_ids.push(id);
        }
        for _ in creatable..spec.count {
            result.errors.push("InsufficientInstanceCapacity".into());
        }

        debug!(
            requested = spec.count,
            created = result.instance_ids.len(),
            template = %spec.launch_template,
            "fleet request handled"
        );
        Ok(result)
    }

    async fn terminate(&self, instance_id: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        if let Some(stored) = state.instances.get_mut(instance_id) {
            stored.lifecycle = InstanceLifecycle::Terminated;
        }
        Ok(())
    }

    async fn tag(&self, instance_id: &str, tags: &[Tag]) -> CloudResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CloudError::InstanceNotFound(instance_id.to_string()))?;
        for tag in tags {
            stored.tags.insert(tag.key.clone(), tag.value.clone());
        }
        Ok(())
    }

    async fn untag(&self, instance_id: &str, tags: &[Tag]) -> CloudResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| CloudError::InstanceNotFound(instance_id.to_string()))?;
        for tag in tags {
            stored.tags.remove(&tag.key);
        }
        Ok(())
    }

    async fn put_secret(&self, path: &str, value: &str, tags: &[Tag]) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.parameters.insert(
            path.to_string(),
            Parameter {
                value: value.to_string(),
                tags: tags.to_vec(),
            },
        );
        Ok(())
    }

    async fn get_parameter(&self, name: &str) -> CloudResult<String> {
        let state = self.state.read().await;
        state
            .parameters
            .get(name)
            .map(|p| p.value.clone())
            .ok_or_else(|| CloudError::ParameterNotFound(name.to_string()))
    }

    async fn delete_parameter(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.parameters.remove(name);
        Ok(())
    }
}
