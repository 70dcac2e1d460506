//! reqwest-backed `GithubOps` implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use runfleet_model::{JobStatus, RunnerScope, RunnerStatus, UpstreamRunner};

use crate::clients::ScopedClientFactory;
use crate::endpoint::api_base_url;
use crate::error::{GithubError, GithubResult};
use crate::ops::{GithubOps, JitConfig, JitConfigRequest, RunnerGroup};

const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Token-authenticated HTTP client against the upstream REST API.
pub struct HttpGithub {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl HttpGithub {
    pub fn new(ghes_url: Option<&str>, token: impl Into<String>) -> GithubResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("runfleet")
            .build()?;
        Ok(Self {
            http,
            api_base: api_base_url(ghes_url),
            token: token.into(),
        })
    }

    fn scope_prefix(scope: &RunnerScope) -> String {
        match scope {
            RunnerScope::Org { owner } => format!("orgs/{owner}"),
            RunnerScope::Repo { owner, repo } => format!("repos/{owner}/{repo}"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    async fn check(response: Response) -> GithubResult<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GithubError::NotFound);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GithubError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> GithubResult<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct JobResponse {
    status: String,
}

#[derive(Deserialize)]
struct RunnerDto {
    id: u64,
    name: String,
    status: String,
    busy: bool,
}

impl From<RunnerDto> for UpstreamRunner {
    fn from(dto: RunnerDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            status: RunnerStatus::parse(&dto.status),
            busy: dto.busy,
        }
    }
}

#[derive(Deserialize)]
struct RunnersPage {
    runners: Vec<RunnerDto>,
}

#[derive(Deserialize)]
struct JitRunnerDto {
    id: u64,
}

#[derive(Deserialize)]
struct JitResponse {
    runner: JitRunnerDto,
    encoded_jit_config: String,
}

#[derive(Serialize)]
struct JitBody<'a> {
    name: &'a str,
    runner_group_id: u64,
    labels: &'a [String],
}

#[derive(Deserialize)]
struct GroupsPage {
    runner_groups: Vec<RunnerGroup>,
}

#[derive(Deserialize)]
struct InstallationResponse {
    id: u64,
}

#[async_trait]
impl GithubOps for HttpGithub {
    async fn create_registration_token(&self, scope: &RunnerScope) -> GithubResult<String> {
        let url = self.url(&format!(
            "{}/actions/runners/registration-token",
            Self::scope_prefix(scope)
        ));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: TokenResponse = Self::check(response).await?.json().await?;
        Ok(body.token)
    }

    async fn generate_jit_config(
        &self,
        scope: &RunnerScope,
        request: &JitConfigRequest,
    ) -> GithubResult<JitConfig> {
        let url = self.url(&format!(
            "{}/actions/runners/generate-jitconfig",
            Self::scope_prefix(scope)
        ));
        let body = JitBody {
            name: &request.name,
            runner_group_id: request.runner_group_id,
            labels: &request.labels,
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let body: JitResponse = Self::check(response).await?.json().await?;
        Ok(JitConfig {
            runner_id: body.runner.id,
            encoded_jit_config: body.encoded_jit_config,
        })
    }

    async fn get_workflow_job(
        &self,
        owner: &str,
        repo: &str,
        job_id: i64,
    ) -> GithubResult<JobStatus> {
        let url = self.url(&format!("repos/{owner}/{repo}/actions/jobs/{job_id}"));
        let body: JobResponse = self.get_json(&url).await?;
        Ok(JobStatus::parse(&body.status))
    }

    async fn list_runners(&self, scope: &RunnerScope) -> GithubResult<Vec<UpstreamRunner>> {
        let prefix = Self::scope_prefix(scope);
        let mut runners = Vec::new();
        let mut page = 1usize;
        loop {
            let url = self.url(&format!(
                "{prefix}/actions/runners?per_page={PER_PAGE}&page={page}"
            ));
            let body: RunnersPage = self.get_json(&url).await?;
            let fetched = body.runners.len();
            runners.extend(body.runners.into_iter().map(UpstreamRunner::from));
            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }
        debug!(scope = %scope, count = runners.len(), "runners listed");
        Ok(runners)
    }

    async fn get_runner(
        &self,
        scope: &RunnerScope,
        runner_id: u64,
    ) -> GithubResult<UpstreamRunner> {
        let url = self.url(&format!(
            "{}/actions/runners/{runner_id}",
            Self::scope_prefix(scope)
        ));
        let dto: RunnerDto = self.get_json(&url).await?;
        Ok(dto.into())
    }

    async fn delete_runner(&self, scope: &RunnerScope, runner_id: u64) -> GithubResult<()> {
        let url = self.url(&format!(
            "{}/actions/runners/{runner_id}",
            Self::scope_prefix(scope)
        ));
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(GithubError::NotFound),
            status => Err(GithubError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn list_runner_groups(&self, org: &str) -> GithubResult<Vec<RunnerGroup>> {
        let mut groups = Vec::new();
        let mut page = 1usize;
        loop {
            let url = self.url(&format!(
                "orgs/{org}/actions/runner-groups?per_page={PER_PAGE}&page={page}"
            ));
            let body: GroupsPage = self.get_json(&url).await?;
            let fetched = body.runner_groups.len();
            groups.extend(body.runner_groups);
            if fetched < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(groups)
    }

    async fn get_installation(&self, scope: &RunnerScope) -> GithubResult<u64> {
        let url = self.url(&format!("{}/installation", Self::scope_prefix(scope)));
        let body: InstallationResponse = self.get_json(&url).await?;
        Ok(body.id)
    }
}

/// Factory producing token-authenticated clients per owning scope.
///
/// Construction performs the installation lookup when the message could
/// not name one, which is why callers cache clients per scope per batch.
pub struct TokenAuthFactory {
    ghes_url: Option<String>,
    token: String,
}

impl TokenAuthFactory {
    pub fn new(ghes_url: Option<String>, token: impl Into<String>) -> Self {
        Self {
            ghes_url,
            token: token.into(),
        }
    }
}

#[async_trait]
impl ScopedClientFactory for TokenAuthFactory {
    async fn client_for(
        &self,
        scope: &RunnerScope,
        installation_id: u64,
    ) -> GithubResult<Arc<dyn GithubOps>> {
        let client = HttpGithub::new(self.ghes_url.as_deref(), self.token.clone())?;
        if installation_id == 0 {
            let resolved = client.get_installation(scope).await?;
            debug!(scope = %scope, installation_id = resolved, "installation resolved on demand");
        }
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_prefix_selects_org_or_repo_route() {
        let org = RunnerScope::Org {
            owner: "acme".into(),
        };
        assert_eq!(HttpGithub::scope_prefix(&org), "orgs/acme");

        let repo = RunnerScope::Repo {
            owner: "acme".into(),
            repo: "widgets".into(),
        };
        assert_eq!(HttpGithub::scope_prefix(&repo), "repos/acme/widgets");
    }

    #[test]
    fn runner_dto_maps_status_strings() {
        let dto = RunnerDto {
            id: 7,
            name: "runner-i-1".into(),
            status: "offline".into(),
            busy: true,
        };
        let runner = UpstreamRunner::from(dto);
        assert_eq!(runner.status, RunnerStatus::Offline);
        assert!(runner.busy);
    }

    #[test]
    fn jit_response_shape() {
        let raw = r#"{"runner": {"id": 42, "name": "r"}, "encoded_jit_config": "abc=="}"#;
        let parsed: JitResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.runner.id, 42);
        assert_eq!(parsed.encoded_jit_config, "abc==");
    }
}
