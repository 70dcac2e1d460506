//! runfleet-model — domain types for the runfleet control plane.
//!
//! These types represent the shared state fabric: queue messages coming in
//! from the CI webhook pipeline, owning scopes, cloud instance projections,
//! the instance tag schema, upstream runner/job projections, and the
//! environment-driven configuration surface of every control loop.
//!
//! All durable controller state lives in cloud instance tags and the
//! parameter store; these types are the in-memory projections of it.

pub mod config;
pub mod message;
pub mod runner;
pub mod scope;
pub mod tags;

pub use config::{
    ConfigError, EvictionStrategy, PoolConfig, RetryConfig, ScaleDownConfig, ScaleDownSchedule,
    ScaleUpConfig, TargetCapacityType,
};
pub use message::{BatchEntry, BatchOutcome, EventKind, JobMessage, OwnerKind};
pub use runner::{InstanceRecord, JobStatus, RunnerStatus, UpstreamRunner};
pub use scope::{CreatedBy, RunnerKind, RunnerScope};
pub use tags::{APPLICATION_MARKER, Tag, keys};
