//! Projections of cloud instances and upstream runners/jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::RunnerKind;

/// Projection of a live managed cloud instance, decoded from its tag set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub launch_time: DateTime<Utc>,
    /// Value of the `Owner` tag: org name or `owner/repo`.
    pub owner: String,
    pub runner_kind: RunnerKind,
    /// Set once registration has been observed; never cleared afterwards.
    pub runner_id: Option<u64>,
    /// Set only by the scale-down reaper.
    pub orphan: bool,
}

impl InstanceRecord {
    /// Minutes elapsed since launch, saturating at zero for clock skew.
    pub fn minutes_running(&self, now: DateTime<Utc>) -> i64 {
        (now - self.launch_time).num_minutes().max(0)
    }
}

/// Status of a self-hosted runner as reported by the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Online,
    Offline,
    Other,
}

impl RunnerStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "offline" => Self::Offline,
            _ => Self::Other,
        }
    }
}

/// A self-hosted runner registration as listed upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRunner {
    pub id: u64,
    pub name: String,
    pub status: RunnerStatus,
    pub busy: bool,
}

/// Status of an upstream workflow job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Other,
}

impl JobStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            _ => Self::Other,
        }
    }
}
