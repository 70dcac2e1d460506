//! Bulk-create fleet requests and error-code classification.

use runfleet_model::{Tag, TargetCapacityType};

/// Fleet error codes that indicate a capacity or rate condition worth
/// retrying. Everything else is fatal.
const RETRIABLE_CODES: &[&str] = &[
    "UnfulfillableCapacity",
    "MaxSpotInstanceCountExceeded",
    "TargetCapacityLimitExceededException",
    "RequestLimitExceeded",
    "ResourceLimitExceeded",
    "MaxSpotFleetRequestCountExceeded",
    "InsufficientInstanceCapacity",
];

pub fn is_retriable_code(code: &str) -> bool {
    RETRIABLE_CODES.contains(&code)
}

/// One launch override: where and on what hardware an instance may land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetOverride {
    pub subnet_id: String,
    pub instance_type: String,
    /// AMI override resolved from the configured SSM parameter, if any.
    pub ami: Option<String>,
}

/// A single bulk-create request. Tags are applied atomically with the
/// create call; no window exists where an instance lacks its marker tags.
#[derive(Debug, Clone)]
pub struct FleetSpec {
    pub launch_template: String,
    pub count: u32,
    pub overrides: Vec<FleetOverride>,
    pub tags: Vec<Tag>,
    pub allocation_strategy: String,
    pub max_spot_price: Option<String>,
    pub target_capacity_type: TargetCapacityType,
}

impl FleetSpec {
    /// The same request re-targeted at on-demand capacity, for failover
    /// after a spot request fails entirely.
    pub fn as_on_demand(&self) -> Self {
        Self {
            target_capacity_type: TargetCapacityType::OnDemand,
            max_spot_price: None,
            ..self.clone()
        }
    }
}

/// Result of a bulk-create call: the instances that were created and the
/// per-failure error codes for the ones that were not.
#[derive(Debug, Clone, Default)]
pub struct FleetResult {
    pub instance_ids: Vec<String>,
    pub errors: Vec<String>,
}

/// Classification of a fleet result, driven by the retriable-code set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetOutcome {
    /// At least one instance was created; errors are ignored.
    Created,
    /// Zero instances and at least one retriable code.
    Retriable,
    /// Zero instances and only fatal codes.
    Fatal,
}

impl FleetResult {
    pub fn outcome(&self) -> FleetOutcome {
        if !self.instance_ids.is_empty() {
            FleetOutcome::Created
        } else if self.errors.iter().any(|c| is_retriable_code(c)) {
            FleetOutcome::Retriable
        } else {
            FleetOutcome::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_code_set() {
        assert!(is_retriable_code("InsufficientInstanceCapacity"));
        assert!(is_retriable_code("UnfulfillableCapacity"));
        assert!(!is_retriable_code("InvalidLaunchTemplateId.NotFound"));
        assert!(!is_retriable_code("UnauthorizedOperation"));
    }

    #[test]
    fn any_created_instance_wins_over_errors() {
        let result = FleetResult {
            instance_ids: vec!["i-1".into()],
            errors: vec!["InsufficientInstanceCapacity".into()],
        };
        assert_eq!(result.outcome(), FleetOutcome::Created);
    }

    #[test]
    fn zero_instances_with_retriable_code_is_retriable() {
        let result = FleetResult {
            instance_ids: vec![],
            errors: vec![
                "UnauthorizedOperation".into(),
                "RequestLimitExceeded".into(),
            ],
        };
        assert_eq!(result.outcome(), FleetOutcome::Retriable);
    }

    #[test]
    fn zero_instances_with_only_fatal_codes_is_fatal() {
        let result = FleetResult {
            instance_ids: vec![],
            errors: vec!["UnauthorizedOperation".into()],
        };
        assert_eq!(result.outcome(), FleetOutcome::Fatal);
    }

    #[test]
    fn on_demand_failover_retargets_capacity() {
        let spec = FleetSpec {
            launch_template: "lt".into(),
            count: 2,
            overrides: vec![],
            tags: vec![],
            allocation_strategy: "capacity-optimized".into(),
            max_spot_price: Some("0.5".into()),
            target_capacity_type: TargetCapacityType::Spot,
        };
        let failover = spec.as_on_demand();
        assert_eq!(failover.target_capacity_type, TargetCapacityType::OnDemand);
        assert_eq!(failover.max_spot_price, None);
        assert_eq!(failover.count, 2);
    }
}
