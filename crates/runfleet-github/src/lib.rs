//! runfleet-github — upstream CI service adapter.
//!
//! `GithubOps` is the trait seam every control loop talks through; the
//! reqwest-backed `HttpGithub` is the production implementation and
//! `fake::FakeGithub` the in-memory one used by tests and standalone mode.
//!
//! Client objects are cheap but their construction involves at least one
//! upstream call, so `ScopeClients` caches one client per owning scope for
//! the duration of a batch — never longer, because installations and
//! tokens rotate.

pub mod clients;
pub mod endpoint;
pub mod error;
pub mod fake;
pub mod group_cache;
pub mod http;
pub mod ops;

pub use clients::{ScopeClients, ScopedClientFactory};
pub use endpoint::api_base_url;
pub use error::{GithubError, GithubResult};
pub use group_cache::RunnerGroupCache;
pub use http::{HttpGithub, TokenAuthFactory};
pub use ops::{GithubOps, JitConfig, JitConfigRequest, RunnerGroup};
