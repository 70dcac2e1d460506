//! runfleet-cloud — cloud inventory and parameter-store adapter.
//!
//! The `CloudClient` trait is the controller's only handle on durable
//! state: tagged compute instances and secret parameters. The production
//! backend is deployment wiring; `InMemoryCloud` implements the same
//! contract over in-process maps for tests and standalone mode, the same
//! way the rest of the workspace fakes its collaborators.
//!
//! Fleet error codes are classified here: a fixed set of capacity-shaped
//! codes is retriable, everything else is fatal. Callers decide what a
//! zero-instance result means based on that classification.

pub mod client;
pub mod error;
pub mod fleet;
pub mod memory;

pub use client::{CloudClient, InstanceFilter, InstanceLifecycle};
pub use error::{CloudError, CloudResult};
pub use fleet::{FleetOutcome, FleetOverride, FleetResult, FleetSpec, is_retriable_code};
pub use memory::InMemoryCloud;
