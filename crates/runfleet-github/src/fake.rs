//! In-memory `GithubOps` implementation for tests and standalone mode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use runfleet_model::{JobStatus, RunnerScope, RunnerStatus, UpstreamRunner};

use crate::clients::ScopedClientFactory;
use crate::error::{GithubError, GithubResult};
use crate::ops::{GithubOps, JitConfig, JitConfigRequest, RunnerGroup};

#[derive(Default)]
struct FakeState {
    jobs: HashMap<(String, String, i64), JobStatus>,
    runners: HashMap<String, Vec<UpstreamRunner>>,
    groups: HashMap<String, Vec<RunnerGroup>>,
    installations: HashMap<String, u64>,
    deleted: Vec<(String, u64)>,
    delete_fails: HashSet<u64>,
    fail_jobs: bool,
    fail_jit: bool,
    fail_token: bool,
}

#[derive(Default)]
struct Counters {
    get_job: AtomicU64,
    list_runners: AtomicU64,
    get_runner: AtomicU64,
    jit: AtomicU64,
    token: AtomicU64,
}

/// Shared-state fake upstream service.
#[derive(Clone, Default)]
pub struct FakeGithub {
    state: Arc<RwLock<FakeState>>,
    counters: Arc<Counters>,
    next_runner_id: Arc<AtomicU64>,
}

impl FakeGithub {
    pub fn new() -> Self {
        Self {
            next_runner_id: Arc::new(AtomicU64::new(1000)),
            ..Self::default()
        }
    }

    pub async fn set_job(&self, owner: &str, repo: &str, job_id: i64, status: JobStatus) {
        self.state
            .write()
            .await
            .jobs
            .insert((owner.into(), repo.into(), job_id), status);
    }

    pub async fn add_runner(&self, scope_path: &str, runner: UpstreamRunner) {
        self.state
            .write()
            .await
            .runners
            .entry(scope_path.to_string())
            .or_default()
            .push(runner);
    }

    pub async fn add_group(&self, org: &str, id: u64, name: &str) {
        self.state
            .write()
            .await
            .groups
            .entry(org.to_string())
            .or_default()
            .push(RunnerGroup {
                id,
                name: name.to_string(),
            });
    }

    pub async fn set_installation(&self, scope_path: &str, id: u64) {
        self.state
            .write()
            .await
            .installations
            .insert(scope_path.to_string(), id);
    }

    /// Make `delete_runner` fail for this runner id.
    pub async fn fail_delete(&self, runner_id: u64) {
        self.state.write().await.delete_fails.insert(runner_id);
    }

    pub async fn fail_job_lookups(&self) {
        self.state.write().await.fail_jobs = true;
    }

    pub async fn fail_jit_generation(&self) {
        self.state.write().await.fail_jit = true;
    }

    pub async fn fail_registration_tokens(&self) {
        self.state.write().await.fail_token = true;
    }

    pub async fn deleted(&self) -> Vec<(String, u64)> {
        self.state.read().await.deleted.clone()
    }

    pub fn get_job_calls(&self) -> u64 {
        self.counters.get_job.load(Ordering::SeqCst)
    }

    pub fn list_runner_calls(&self) -> u64 {
        self.counters.list_runners.load(Ordering::SeqCst)
    }

    pub fn get_runner_calls(&self) -> u64 {
        self.counters.get_runner.load(Ordering::SeqCst)
    }

    pub fn jit_calls(&self) -> u64 {
        self.counters.jit.load(Ordering::SeqCst)
    }

    pub fn token_calls(&self) -> u64 {
        self.counters.token.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GithubOps for FakeGithub {
    async fn create_registration_token(&self, _scope: &RunnerScope) -> GithubResult<String> {
        let n = self.counters.token.fetch_add(1, Ordering::SeqCst);
        if self.state.read().await.fail_token {
            return Err(GithubError::Api {
                status: 500,
                message: "token generation failed".into(),
            });
        }
        Ok(format!("reg-token-{n}"))
    }

    async fn generate_jit_config(
        &self,
        scope: &RunnerScope,
        request: &JitConfigRequest,
    ) -> GithubResult<JitConfig> {
        self.counters.jit.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if state.fail_jit {
            return Err(GithubError::Api {
                status: 500,
                message: "jit generation failed".into(),
            });
        }
        let runner_id = self.next_runner_id.fetch_add(1, Ordering::SeqCst);
        // A JIT config registers the runner immediately.
        state
            .runners
            .entry(scope.path())
            .or_default()
            .push(UpstreamRunner {
                id: runner_id,
                name: request.name.clone(),
                status: RunnerStatus::Offline,
                busy: false,
            });
        Ok(JitConfig {
            runner_id,
            encoded_jit_config: format!("jit:{}", request.name),
        })
    }

    async fn get_workflow_job(
        &self,
        owner: &str,
        repo: &str,
        job_id: i64,
    ) -> GithubResult<JobStatus> {
        self.counters.get_job.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if state.fail_jobs {
            return Err(GithubError::Api {
                status: 502,
                message: "job lookup failed".into(),
            });
        }
        state
            .jobs
            .get(&(owner.to_string(), repo.to_string(), job_id))
            .copied()
            .ok_or(GithubError::NotFound)
    }

    async fn list_runners(&self, scope: &RunnerScope) -> GithubResult<Vec<UpstreamRunner>> {
        self.counters.list_runners.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        Ok(state.runners.get(&scope.path()).cloned().unwrap_or_default())
    }

    async fn get_runner(
        &self,
        scope: &RunnerScope,
        runner_id: u64,
    ) -> GithubResult<UpstreamRunner> {
        self.counters.get_runner.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        state
            .runners
            .get(&scope.path())
            .and_then(|rs| rs.iter().find(|r| r.id == runner_id))
            .cloned()
            .ok_or(GithubError::NotFound)
    }

    async fn delete_runner(&self, scope: &RunnerScope, runner_id: u64) -> GithubResult<()> {
        let mut state = self.state.write().await;
        if state.delete_fails.contains(&runner_id) {
            return Err(GithubError::Api {
                status: 500,
                message: "deregistration failed".into(),
            });
        }
        let key = scope.path();
        if let Some(runners) = state.runners.get_mut(&key) {
            runners.retain(|r| r.id != runner_id);
        }
        state.deleted.push((key, runner_id));
        Ok(())
    }

    async fn list_runner_groups(&self, org: &str) -> GithubResult<Vec<RunnerGroup>> {
        let state = self.state.read().await;
        Ok(state.groups.get(org).cloned().unwrap_or_default())
    }

    async fn get_installation(&self, scope: &RunnerScope) -> GithubResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .installations
            .get(&scope.path())
            .copied()
            .unwrap_or(1))
    }
}

/// Factory handing out the same fake for every scope, counting creations.
pub struct FakeFactory {
    fake: FakeGithub,
    created: AtomicU64,
    fail: AtomicBool,
}

impl FakeFactory {
    pub fn new(fake: FakeGithub) -> Self {
        Self {
            fake,
            created: AtomicU64::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn clients_created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Make every subsequent client construction fail.
    pub fn fail_construction(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScopedClientFactory for FakeFactory {
    async fn client_for(
        &self,
        _scope: &RunnerScope,
        _installation_id: u64,
    ) -> GithubResult<Arc<dyn GithubOps>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GithubError::Api {
                status: 401,
                message: "client construction failed".into(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.fake.clone()))
    }
}
