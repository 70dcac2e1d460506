//! runfleet-scaledown — the two-phase scale-down reaper.
//!
//! Each pass first settles previously marked orphans (phase 1), then
//! evaluates the active fleet for idleness, minimum lifetime and boot-time
//! expiry (phase 2). The phases share per-invocation upstream caches and
//! run strictly in order; the last-chance probe in phase 1 closes the race
//! between phase-2 tagging and upstream re-registration.

pub mod error;
pub mod reaper;

pub use error::{ScaleDownError, ScaleDownResult};
pub use reaper::ScaleDown;
