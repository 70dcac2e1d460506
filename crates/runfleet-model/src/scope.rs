//! Owning scopes and runner categories.

use serde::{Deserialize, Serialize};

/// The administrative unit a runner belongs to: an organization, or a
/// single repository identified by its `owner/repo` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunnerScope {
    Org { owner: String },
    Repo { owner: String, repo: String },
}

impl RunnerScope {
    /// Build the scope for a message given the deployment's scope mode.
    pub fn for_owner(org_runners: bool, owner: &str, repo: &str) -> Self {
        if org_runners {
            Self::Org {
                owner: owner.to_string(),
            }
        } else {
            Self::Repo {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }
        }
    }

    /// Parse the `Owner` tag value back into a scope.
    pub fn parse(owner_tag: &str) -> Self {
        match owner_tag.split_once('/') {
            Some((owner, repo)) => Self::Repo {
                owner: owner.to_string(),
                repo: repo.to_string(),
            },
            None => Self::Org {
                owner: owner_tag.to_string(),
            },
        }
    }

    /// URL path segment: `owner` for org scopes, `owner/repo` otherwise.
    /// Also the value of the `Owner` instance tag.
    pub fn path(&self) -> String {
        match self {
            Self::Org { owner } => owner.clone(),
            Self::Repo { owner, repo } => format!("{owner}/{repo}"),
        }
    }

    pub fn kind(&self) -> RunnerKind {
        match self {
            Self::Org { .. } => RunnerKind::Org,
            Self::Repo { .. } => RunnerKind::Repo,
        }
    }

    pub fn is_org(&self) -> bool {
        matches!(self, Self::Org { .. })
    }

    /// The organization or user that owns the scope.
    pub fn owner(&self) -> &str {
        match self {
            Self::Org { owner } | Self::Repo { owner, .. } => owner,
        }
    }
}

impl std::fmt::Display for RunnerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Runner category recorded in the `Type` instance tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerKind {
    Org,
    Repo,
}

impl RunnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Org => "Org",
            Self::Repo => "Repo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Org" => Some(Self::Org),
            "Repo" => Some(Self::Repo),
            _ => None,
        }
    }
}

/// Which control loop created an instance, recorded in `ghr:created_by`.
///
/// The creator is always supplied by the caller; it is never derived from
/// the instance count of a fleet request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatedBy {
    ScaleUp,
    Pool,
}

impl CreatedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScaleUp => "scale-up",
            Self::Pool => "pool",
        }
    }
}
