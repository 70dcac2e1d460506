//! Environment-driven configuration for the control loops.
//!
//! Every loop reads its configuration from the environment once per
//! invocation. Plain options are single variables; the scale-down schedule
//! and the job-retry policy arrive as JSON documents in `SCALE_DOWN_CONFIG`
//! and `JOB_RETRY_CONFIG`.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },

    #[error("invalid JSON in {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid cron expression in scale-down schedule: {0}")]
    Cron(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Environment access seam so configs can be parsed from a plain map in
/// tests without mutating process state.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

fn required(env: &dyn EnvSource, key: &str) -> ConfigResult<String> {
    env.get(key).ok_or_else(|| ConfigError::Missing(key.into()))
}

fn flag(env: &dyn EnvSource, key: &str, default: bool) -> ConfigResult<bool> {
    match env.get(key) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.into(),
                value: v,
            }),
        },
    }
}

fn number<T: FromStr>(env: &dyn EnvSource, key: &str, default: T) -> ConfigResult<T> {
    match env.get(key) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            key: key.into(),
            value: v,
        }),
    }
}

fn csv(env: &dyn EnvSource, key: &str) -> Vec<String> {
    env.get(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

// ── Scale-up ──────────────────────────────────────────────────────

/// Target capacity type for fleet requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetCapacityType {
    Spot,
    OnDemand,
}

impl TargetCapacityType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "spot" => Some(Self::Spot),
            "on-demand" => Some(Self::OnDemand),
            _ => None,
        }
    }
}

/// Configuration of the scale-up dispatcher and its provisioning primitives.
#[derive(Debug, Clone)]
pub struct ScaleUpConfig {
    /// Partitions fleets managed by distinct deployments.
    pub environment: String,
    /// Org-level runners when true; repo-level otherwise.
    pub org_runners: bool,
    /// Ephemeral runners accept only workflow-job events.
    pub ephemeral: bool,
    /// Just-in-time registration; implies ephemeral semantics when active.
    pub jit_config: bool,
    pub disable_autoupdate: bool,
    /// Query the upstream job before creating capacity for it.
    pub queued_check: bool,
    /// -1 disables the cap and skips the inventory query entirely.
    pub max_runners: i64,
    pub runner_labels: Vec<String>,
    pub runner_group_name: Option<String>,
    /// Prefix for runner names; the instance id is appended.
    pub name_prefix: String,
    /// GHES base URL; `None` targets the hosted service.
    pub ghes_url: Option<String>,
    /// Parameter-store prefix for per-instance registration secrets.
    pub token_path: String,
    /// Parameter-store prefix for the runner-group id cache.
    pub group_cache_path: String,
    pub launch_template: String,
    pub subnets: Vec<String>,
    pub instance_types: Vec<String>,
    pub allocation_strategy: String,
    pub max_spot_price: Option<String>,
    pub target_capacity_type: TargetCapacityType,
    pub ami_ssm_parameter: Option<String>,
    /// Fleet error codes that trigger a second on-demand create attempt.
    pub on_demand_failover_codes: Vec<String>,
}

impl ScaleUpConfig {
    pub fn from_env(env: &dyn EnvSource) -> ConfigResult<Self> {
        let target = env
            .get("INSTANCE_TARGET_CAPACITY_TYPE")
            .unwrap_or_else(|| "spot".to_string());
        let target_capacity_type =
            TargetCapacityType::parse(&target).ok_or_else(|| ConfigError::Invalid {
                key: "INSTANCE_TARGET_CAPACITY_TYPE".into(),
                value: target,
            })?;

        Ok(Self {
            environment: required(env, "ENVIRONMENT")?,
            org_runners: flag(env, "ENABLE_ORGANIZATION_RUNNERS", false)?,
            ephemeral: flag(env, "ENABLE_EPHEMERAL_RUNNERS", false)?,
            jit_config: flag(env, "ENABLE_JIT_CONFIG", false)?,
            disable_autoupdate: flag(env, "DISABLE_RUNNER_AUTOUPDATE", false)?,
            queued_check: flag(env, "ENABLE_JOB_QUEUED_CHECK", true)?,
            max_runners: number(env, "RUNNERS_MAXIMUM_COUNT", 3)?,
            runner_labels: csv(env, "RUNNER_LABELS"),
            runner_group_name: env.get("RUNNER_GROUP_NAME").filter(|s| !s.is_empty()),
            name_prefix: env.get("RUNNER_NAME_PREFIX").unwrap_or_default(),
            ghes_url: env.get("GHES_URL").filter(|s| !s.is_empty()),
            token_path: required(env, "SSM_TOKEN_PATH")?,
            group_cache_path: env
                .get("SSM_CONFIG_PATH")
                .unwrap_or_else(|| "/runfleet/config".to_string()),
            launch_template: required(env, "LAUNCH_TEMPLATE_NAME")?,
            subnets: csv(env, "SUBNET_IDS"),
            instance_types: csv(env, "INSTANCE_TYPES"),
            allocation_strategy: env
                .get("INSTANCE_ALLOCATION_STRATEGY")
                .unwrap_or_else(|| "lowest-price".to_string()),
            max_spot_price: env.get("INSTANCE_MAX_SPOT_PRICE").filter(|s| !s.is_empty()),
            target_capacity_type,
            ami_ssm_parameter: env
                .get("AMI_ID_SSM_PARAMETER_NAME")
                .filter(|s| !s.is_empty()),
            on_demand_failover_codes: csv(env, "ENABLE_ON_DEMAND_FAILOVER_FOR_ERRORS"),
        })
    }

    /// Base URL runners register against (not the API endpoint).
    pub fn runner_base_url(&self) -> String {
        self.ghes_url
            .clone()
            .unwrap_or_else(|| "https://github.com".to_string())
    }

    /// Unbounded scaling: skip the inventory query entirely.
    pub fn unbounded(&self) -> bool {
        self.max_runners == -1
    }
}

// ── Scale-down ────────────────────────────────────────────────────

/// Sort order for eviction candidates within an owner group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// One `SCALE_DOWN_CONFIG` entry: while `cron` matches, `idle_count` idle
/// runners are preserved and candidates are visited in `strategy` order.
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleDownSchedule {
    pub cron: String,
    #[serde(rename = "idleCount")]
    pub idle_count: u32,
    #[serde(rename = "evictionStrategy", default)]
    pub strategy: EvictionStrategy,
}

/// Configuration of the scale-down reaper.
#[derive(Debug, Clone)]
pub struct ScaleDownConfig {
    pub environment: String,
    pub ghes_url: Option<String>,
    /// Instances younger than this are never reclaimed.
    pub minimum_running_minutes: i64,
    /// Unregistered instances older than this are treated as orphans.
    pub boot_time_minutes: i64,
    pub schedules: Vec<ScaleDownSchedule>,
}

impl ScaleDownConfig {
    pub fn from_env(env: &dyn EnvSource) -> ConfigResult<Self> {
        let schedules = match env.get("SCALE_DOWN_CONFIG") {
            None => Vec::new(),
            Some(raw) => {
                let entries: Vec<ScaleDownSchedule> =
                    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                        key: "SCALE_DOWN_CONFIG".into(),
                        source,
                    })?;
                // Fail fast on unparsable cron expressions.
                for entry in &entries {
                    Schedule::from_str(&entry.cron)
                        .map_err(|_| ConfigError::Cron(entry.cron.clone()))?;
                }
                entries
            }
        };

        Ok(Self {
            environment: required(env, "ENVIRONMENT")?,
            ghes_url: env.get("GHES_URL").filter(|s| !s.is_empty()),
            minimum_running_minutes: number(env, "MINIMUM_RUNNING_TIME_IN_MINUTES", 5)?,
            boot_time_minutes: number(env, "RUNNER_BOOT_TIME_IN_MINUTES", 5)?,
            schedules,
        })
    }

    /// The schedule entry whose cron expression matches `now`, if any.
    /// The active entry supplies the idle quota and eviction order of a
    /// reaper pass; without one the pass keeps no idle runners.
    pub fn active_schedule(&self, now: DateTime<Utc>) -> Option<&ScaleDownSchedule> {
        self.schedules.iter().find(|entry| {
            Schedule::from_str(&entry.cron)
                .map(|s| s.includes(now))
                .unwrap_or(false)
        })
    }
}

// ── Pool ──────────────────────────────────────────────────────────

/// Configuration of the pool top-up loop.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Owning scope the pool is maintained for.
    pub owner: String,
    /// Minimum number of idle instances to keep alive.
    pub size: u32,
    pub boot_time_minutes: i64,
}

impl PoolConfig {
    pub fn from_env(env: &dyn EnvSource) -> ConfigResult<Self> {
        Ok(Self {
            owner: required(env, "RUNNER_OWNER")?,
            size: number(env, "RUNNER_POOL_SIZE", 0)?,
            boot_time_minutes: number(env, "RUNNER_BOOT_TIME_IN_MINUTES", 5)?,
        })
    }
}

// ── Job retry ─────────────────────────────────────────────────────

/// `JOB_RETRY_CONFIG` document controlling the retry republisher.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(rename = "maxAttempts", default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(rename = "delayInSeconds", default = "default_delay")]
    pub delay_in_seconds: u64,
    #[serde(rename = "delayBackoff", default = "default_backoff")]
    pub delay_backoff: f64,
    #[serde(rename = "queueUrl", default)]
    pub queue_url: String,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay() -> u64 {
    60
}

fn default_backoff() -> f64 {
    2.0
}

impl RetryConfig {
    pub fn from_env(env: &dyn EnvSource) -> ConfigResult<Self> {
        match env.get("JOB_RETRY_CONFIG") {
            None => Ok(Self {
                enable: false,
                max_attempts: default_max_attempts(),
                delay_in_seconds: default_delay(),
                delay_backoff: default_backoff(),
                queue_url: String::new(),
            }),
            Some(raw) => serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                key: "JOB_RETRY_CONFIG".into(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_env() -> HashMap<String, String> {
        HashMap::from([
            ("ENVIRONMENT".to_string(), "prod".to_string()),
            ("SSM_TOKEN_PATH".to_string(), "/runfleet/tokens".to_string()),
            ("LAUNCH_TEMPLATE_NAME".to_string(), "runners-lt".to_string()),
        ])
    }

    #[test]
    fn scale_up_defaults() {
        let cfg = ScaleUpConfig::from_env(&base_env()).unwrap();
        assert!(!cfg.org_runners);
        assert!(!cfg.ephemeral);
        assert!(cfg.queued_check);
        assert_eq!(cfg.max_runners, 3);
        assert!(!cfg.unbounded());
        assert_eq!(cfg.target_capacity_type, TargetCapacityType::Spot);
        assert_eq!(cfg.runner_base_url(), "https://github.com");
    }

    #[test]
    fn scale_up_reads_flags_and_lists() {
        let mut env = base_env();
        env.insert("ENABLE_ORGANIZATION_RUNNERS".into(), "true".into());
        env.insert("RUNNERS_MAXIMUM_COUNT".into(), "-1".into());
        env.insert("RUNNER_LABELS".into(), "linux, x64 ,gpu".into());
        env.insert("INSTANCE_TARGET_CAPACITY_TYPE".into(), "on-demand".into());
        env.insert("GHES_URL".into(), "https://ghe.example.com".into());

        let cfg = ScaleUpConfig::from_env(&env).unwrap();
        assert!(cfg.org_runners);
        assert!(cfg.unbounded());
        assert_eq!(cfg.runner_labels, vec!["linux", "x64", "gpu"]);
        assert_eq!(cfg.target_capacity_type, TargetCapacityType::OnDemand);
        assert_eq!(cfg.runner_base_url(), "https://ghe.example.com");
    }

    #[test]
    fn missing_required_variable_is_an_error() {
        let env: HashMap<String, String> = HashMap::new();
        let err = ScaleUpConfig::from_env(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn invalid_flag_is_rejected() {
        let mut env = base_env();
        env.insert("ENABLE_EPHEMERAL_RUNNERS".into(), "yes".into());
        let err = ScaleUpConfig::from_env(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn scale_down_parses_schedule_json() {
        let mut env = base_env();
        env.insert(
            "SCALE_DOWN_CONFIG".into(),
            r#"[{"cron": "* * * * * *", "idleCount": 2, "evictionStrategy": "newest_first"}]"#
                .into(),
        );

        let cfg = ScaleDownConfig::from_env(&env).unwrap();
        assert_eq!(cfg.schedules.len(), 1);
        assert_eq!(cfg.minimum_running_minutes, 5);

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 30).unwrap();
        let active = cfg.active_schedule(now).unwrap();
        assert_eq!(active.idle_count, 2);
        assert_eq!(active.strategy, EvictionStrategy::NewestFirst);
    }

    #[test]
    fn scale_down_rejects_malformed_json_and_cron() {
        let mut env = base_env();
        env.insert("SCALE_DOWN_CONFIG".into(), "not json".into());
        assert!(matches!(
            ScaleDownConfig::from_env(&env),
            Err(ConfigError::Json { .. })
        ));

        env.insert(
            "SCALE_DOWN_CONFIG".into(),
            r#"[{"cron": "every day", "idleCount": 1}]"#.into(),
        );
        assert!(matches!(
            ScaleDownConfig::from_env(&env),
            Err(ConfigError::Cron(_))
        ));
    }

    #[test]
    fn no_matching_schedule_yields_none() {
        let mut env = base_env();
        // Fires only at exactly midnight Jan 1.
        env.insert(
            "SCALE_DOWN_CONFIG".into(),
            r#"[{"cron": "0 0 0 1 1 *", "idleCount": 5}]"#.into(),
        );
        let cfg = ScaleDownConfig::from_env(&env).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 10, 30, 0).unwrap();
        assert!(cfg.active_schedule(now).is_none());
    }

    #[test]
    fn retry_config_defaults_to_disabled() {
        let env: HashMap<String, String> = HashMap::new();
        let cfg = RetryConfig::from_env(&env).unwrap();
        assert!(!cfg.enable);
        assert_eq!(cfg.max_attempts, 5);
    }

    #[test]
    fn retry_config_parses_document() {
        let env = HashMap::from([(
            "JOB_RETRY_CONFIG".to_string(),
            r#"{"enable": true, "maxAttempts": 3, "delayInSeconds": 30, "delayBackoff": 1.5, "queueUrl": "q"}"#
                .to_string(),
        )]);
        let cfg = RetryConfig::from_env(&env).unwrap();
        assert!(cfg.enable);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.delay_in_seconds, 30);
        assert_eq!(cfg.delay_backoff, 1.5);
        assert_eq!(cfg.queue_url, "q");
    }
}
