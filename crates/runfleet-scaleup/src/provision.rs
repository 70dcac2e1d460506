//! Provisioning primitives: bulk instance creation and registration
//! secrets. Shared by the batch dispatcher and the pool top-up loop.

use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use runfleet_cloud::{FleetOutcome, FleetOverride, FleetSpec};
use runfleet_github::{GithubOps, JitConfigRequest};
use runfleet_model::{CreatedBy, RunnerScope, Tag, TargetCapacityType, keys, tags::launch_tags};

use crate::dispatcher::ScaleUp;
use crate::error::{ScaleError, ScaleResult};

/// Group used when no runner group is configured.
const DEFAULT_RUNNER_GROUP_ID: u64 = 1;

/// At this many secret writes per batch the parameter store's sustained
/// write rate becomes the constraint; writes are spaced instead of pooled.
const PACED_WRITE_THRESHOLD: usize = 40;
const PACED_WRITE_DELAY: Duration = Duration::from_millis(25);
const SECRET_WRITE_CONCURRENCY: usize = 8;

impl ScaleUp {
    /// Create `count` instances for the scope and provision their
    /// registration secrets. Returns the created instance ids; fewer than
    /// `count` is a partial result, not an error.
    pub async fn provision(
        &self,
        github: &dyn GithubOps,
        scope: &RunnerScope,
        count: u32,
        created_by: CreatedBy,
    ) -> ScaleResult<Vec<String>> {
        let spec = self.fleet_spec(scope, count, created_by).await?;
        let mut result = self.cloud.create_fleet(&spec).await?;

        // On-demand failover: a spot request that produced nothing and
        // tripped a configured code gets one second attempt.
        if result.instance_ids.is_empty()
            && spec.target_capacity_type == TargetCapacityType::Spot
            && result.errors.iter().any(|code| {
                self.config
                    .on_demand_failover_codes
                    .iter()
                    .any(|c| c == code)
            })
        {
            warn!(
                scope = %scope,
                codes = ?result.errors,
                "spot request unfulfilled, failing over to on-demand"
            );
            result = self.cloud.create_fleet(&spec.as_on_demand()).await?;
        }

        match result.outcome() {
            FleetOutcome::Created => {
                if !result.errors.is_empty() {
                    warn!(
                        scope = %scope,
                        created = result.instance_ids.len(),
                        codes = ?result.errors,
                        "partial fleet creation"
                    );
                }
            }
            FleetOutcome::Retriable => {
                return Err(ScaleError::Retriable {
                    failed_instance_count: count as usize,
                });
            }
            FleetOutcome::Fatal => {
                return Err(ScaleError::Fatal {
                    codes: result.errors,
                });
            }
        }

        info!(
            scope = %scope,
            created = result.instance_ids.len(),
            created_by = created_by.as_str(),
            "instances created"
        );

        self.provision_secrets(github, scope, &result.instance_ids)
            .await?;
        Ok(result.instance_ids)
    }

    async fn fleet_spec(
        &self,
        scope: &RunnerScope,
        count: u32,
        created_by: CreatedBy,
    ) -> ScaleResult<FleetSpec> {
        let ami = match &self.config.ami_ssm_parameter {
            Some(parameter) => Some(self.cloud.get_parameter(parameter).await?),
            None => None,
        };

        let mut overrides = Vec::new();
        for subnet in &self.config.subnets {
            for instance_type in &self.config.instance_types {
                overrides.push(FleetOverride {
                    subnet_id: subnet.clone(),
                    instance_type: instance_type.clone(),
                    ami: ami.clone(),
                });
            }
        }

        Ok(FleetSpec {
            launch_template: self.config.launch_template.clone(),
            count,
            overrides,
            tags: launch_tags(&self.config.environment, scope, created_by),
            allocation_strategy: self.config.allocation_strategy.clone(),
            max_spot_price: self.config.max_spot_price.clone(),
            target_capacity_type: self.config.target_capacity_type,
        })
    }

    fn jit_enabled(&self) -> bool {
        self.config.ephemeral && self.config.jit_config
    }

    /// Write one registration secret per created instance.
    ///
    /// Small batches run through a bounded worker pool; batches at or
    /// above the pacing threshold are written sequentially with a fixed
    /// delay to stay under the parameter store's sustained write rate.
    async fn provision_secrets(
        &self,
        github: &dyn GithubOps,
        scope: &RunnerScope,
        instance_ids: &[String],
    ) -> ScaleResult<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }

        let runner_group_id = if self.jit_enabled() {
            match (&self.config.runner_group_name, scope.is_org()) {
                (Some(name), true) => self
                    .group_cache
                    .resolve(github, scope.owner(), name)
                    .await
                    .map_err(|e| ScaleError::upstream(scope, e))?,
                _ => DEFAULT_RUNNER_GROUP_ID,
            }
        } else {
            DEFAULT_RUNNER_GROUP_ID
        };

        if instance_ids.len() >= PACED_WRITE_THRESHOLD {
            for (i, instance_id) in instance_ids.iter().enumerate() {
                self.provision_one(github, scope, instance_id, runner_group_id)
                    .await?;
                if i + 1 < instance_ids.len() {
                    tokio::time::sleep(PACED_WRITE_DELAY).await;
                }
            }
        } else {
            let results: Vec<ScaleResult<()>> = futures::stream::iter(instance_ids.to_vec())
                .map(|id| async move {
                    self.provision_one(github, scope, &id, runner_group_id)
                        .await
                })
                .buffer_unordered(SECRET_WRITE_CONCURRENCY)
                .collect()
                .await;
            for result in results {
                result?;
            }
        }
        Ok(())
    }

    async fn provision_one(
        &self,
        github: &dyn GithubOps,
        scope: &RunnerScope,
        instance_id: &str,
        runner_group_id: u64,
    ) -> ScaleResult<()> {
        let secret_path = format!("{}/{instance_id}", self.config.token_path);
        let secret_tags = [Tag::new("InstanceId", instance_id)];

        if self.jit_enabled() {
            let request = JitConfigRequest {
                name: format!("{}{instance_id}", self.config.name_prefix),
                runner_group_id,
                labels: self.config.runner_labels.clone(),
            };
            let jit = github
                .generate_jit_config(scope, &request)
                .await
                .map_err(|e| ScaleError::upstream(scope, e))?;

            // Registration is already observed at this point, so the
            // runner-id tag can be attached before the instance boots.
            self.cloud
                .tag(
                    instance_id,
                    &[Tag::new(keys::RUNNER_ID, jit.runner_id.to_string())],
                )
                .await?;
            self.cloud
                .put_secret(&secret_path, &jit.encoded_jit_config, &secret_tags)
                .await?;
        } else {
            let token = github
                .create_registration_token(scope)
                .await
                .map_err(|e| ScaleError::upstream(scope, e))?;
            let config_line = self.runner_config_line(scope, &token);
            self.cloud
                .put_secret(&secret_path, &config_line, &secret_tags)
                .await?;
        }
        Ok(())
    }

    /// Service configuration consumed by a non-JIT runner on boot.
    fn runner_config_line(&self, scope: &RunnerScope, token: &str) -> String {
        let mut parts = vec![
            format!("--url {}/{}", self.config.runner_base_url(), scope.path()),
            format!("--token {token}"),
        ];
        if !self.config.runner_labels.is_empty() {
            parts.push(format!("--labels {}", self.config.runner_labels.join(",")));
        }
        if self.config.disable_autoupdate {
            parts.push("--disableupdate".to_string());
        }
        if scope.is_org()
            && let Some(group) = &self.config.runner_group_name
        {
            parts.push(format!("--runnergroup {group}"));
        }
        if self.config.ephemeral {
            parts.push("--ephemeral".to_string());
        }
        parts.join(" ")
    }
}
