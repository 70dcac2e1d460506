//! Instance tag schema.
//!
//! Tags are the single durable representation of controller state. Every
//! managed instance carries the marker, environment, category, owner and
//! creator tags from the moment the bulk-create call returns; the runner-id
//! and orphan tags are attached later by scale-up and scale-down.

use serde::{Deserialize, Serialize};

use crate::scope::{CreatedBy, RunnerScope};

/// Value of the application-marker tag; the authoritative membership
/// predicate for managed instances.
pub const APPLICATION_MARKER: &str = "runfleet";

/// Wire-visible tag keys.
pub mod keys {
    pub const APPLICATION: &str = "ghr:Application";
    pub const ENVIRONMENT: &str = "ghr:environment";
    pub const TYPE: &str = "Type";
    pub const OWNER: &str = "Owner";
    pub const CREATED_BY: &str = "ghr:created_by";
    pub const RUNNER_ID: &str = "ghr:github_runner_id";
    pub const ORPHAN: &str = "ghr:orphan";
}

/// A single key/value instance tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The tag set applied atomically with the bulk-create call.
pub fn launch_tags(environment: &str, scope: &RunnerScope, created_by: CreatedBy) -> Vec<Tag> {
    vec![
        Tag::new(keys::APPLICATION, APPLICATION_MARKER),
        Tag::new(keys::ENVIRONMENT, environment),
        Tag::new(keys::TYPE, scope.kind().as_str()),
        Tag::new(keys::OWNER, scope.path()),
        Tag::new(keys::CREATED_BY, created_by.as_str()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_tags_cover_every_required_key() {
        let scope = RunnerScope::Repo {
            owner: "acme".into(),
            repo: "widgets".into(),
        };
        let tags = launch_tags("prod", &scope, CreatedBy::ScaleUp);

        let get = |k: &str| {
            tags.iter()
                .find(|t| t.key == k)
                .map(|t| t.value.as_str())
        };
        assert_eq!(get(keys::APPLICATION), Some(APPLICATION_MARKER));
        assert_eq!(get(keys::ENVIRONMENT), Some("prod"));
        assert_eq!(get(keys::TYPE), Some("Repo"));
        assert_eq!(get(keys::OWNER), Some("acme/widgets"));
        assert_eq!(get(keys::CREATED_BY), Some("scale-up"));
        // Runner id and orphan tags are never part of the launch set.
        assert_eq!(get(keys::RUNNER_ID), None);
        assert_eq!(get(keys::ORPHAN), None);
    }
}
