use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::allocation::{CategoryId, RegionId, ScopeKey, SupplierId};

/// Malformed or inconsistent rule/conflict definitions. Always fatal at load time.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RuleDefinitionError {
    #[error("rule definition #{index} has an empty `{field}`")]
    EmptyField { index: usize, field: &'static str },
    #[error("duplicate rule id `{rule_id}`")]
    DuplicateRuleId { rule_id: String },
    #[error("rule `{rule_id}` references undefined category `{category}`")]
    UnknownCategory { rule_id: String, category: String },
    #[error("rule book max_tier {max_tier} must be at least 26 to cover every tier band")]
    InvalidTierCeiling { max_tier: u32 },
    #[error("rule `{rule_id}` priority tier {tier} is outside 1..={max_tier}")]
    TierOutOfRange { rule_id: String, tier: u32, max_tier: u32 },
    #[error("rule `{rule_id}` condition `{condition}` is malformed: {reason}")]
    InvalidCondition { rule_id: String, condition: String, reason: String },
    #[error("rule `{rule_id}` references unknown metric `{metric}`")]
    UnknownMetric { rule_id: String, metric: String },
    #[error("rule `{rule_id}` uses unsupported comparison `{operator}` (expected <= or >=)")]
    UnsupportedComparison { rule_id: String, operator: String },
    #[error("rule `{rule_id}` threshold {threshold} is outside the metric domain {domain}")]
    ThresholdOutOfDomain { rule_id: String, threshold: f64, domain: String },
    #[error("rule `{rule_id}` metric `{metric}` cannot be bound to scope shape `{scope}`")]
    ScopeMismatch { rule_id: String, metric: String, scope: String },
    #[error("rule `{rule_id}` sensitivity band must be positive")]
    InvalidSensitivityBand { rule_id: String },
    #[error("conflict edge references unknown rule `{rule_id}`")]
    UnknownConflictRule { rule_id: String },
    #[error("rule `{rule_id}` cannot conflict with itself")]
    SelfConflict { rule_id: String },
    #[error("duplicate conflict edge between `{rule_a}` and `{rule_b}`")]
    DuplicateConflictEdge { rule_a: String, rule_b: String },
    #[error("conflict edge `{rule_a}`-`{rule_b}` has an empty conflict type")]
    EmptyConflictType { rule_a: String, rule_b: String },
    #[error("could not parse rule book: {0}")]
    Parse(String),
}

/// Allocation data that cannot form a valid snapshot.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("spend record #{index} has an empty `{field}`")]
    EmptyField { index: usize, field: &'static str },
    #[error("spend record #{index} has a negative amount")]
    NegativeAmount { index: usize },
    #[error("scope {scope} has no positive spend")]
    EmptyScope { scope: ScopeKey },
    #[error("supplier {supplier} is reported in regions {first} and {second} within {scope}")]
    InconsistentRegion { scope: ScopeKey, supplier: SupplierId, first: RegionId, second: RegionId },
    #[error("shares in {scope} sum to {total_pct}% instead of 100%")]
    ConservationBroken { scope: ScopeKey, total_pct: f64 },
}

/// A reallocation that cannot be materialized against a snapshot.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StepApplicationError {
    #[error("scope {scope} is not part of the snapshot")]
    UnknownScope { scope: ScopeKey },
    #[error("shift must be positive, got {shift_pct}")]
    NonPositiveShift { shift_pct: f64 },
    #[error("donor {supplier} holds no share in {scope}")]
    DonorNotInScope { scope: ScopeKey, supplier: SupplierId },
    #[error("donor {supplier} holds {available_pct}% but {requested_pct}% was requested")]
    InsufficientDonorShare { supplier: SupplierId, available_pct: f64, requested_pct: f64 },
    #[error("receiver {supplier} is not qualified for category {category}")]
    ReceiverNotQualified { supplier: SupplierId, category: CategoryId },
    #[error("receiver {supplier} would hold {resulting_pct}% above its capacity of {capacity_pct}%")]
    ReceiverCapacityExceeded { supplier: SupplierId, resulting_pct: f64, capacity_pct: f64 },
    #[error("donor and receiver are both {supplier}")]
    SelfTransfer { supplier: SupplierId },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    RuleDefinition(#[from] RuleDefinitionError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("input failure: {0}")]
    Input(String),
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::RuleDefinition(_) => "rule_definition",
            Self::Snapshot(_) => "allocation_data",
            Self::Configuration(_) => "config_validation",
            Self::Input(_) => "input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplicationError, RuleDefinitionError, SnapshotError};
    use crate::domain::allocation::ScopeKey;

    #[test]
    fn rule_definition_error_maps_to_rule_definition_class() {
        let error = ApplicationError::from(RuleDefinitionError::DuplicateRuleId {
            rule_id: "R001".to_owned(),
        });

        assert_eq!(error.error_class(), "rule_definition");
        assert_eq!(error.to_string(), "duplicate rule id `R001`");
    }

    #[test]
    fn snapshot_error_maps_to_allocation_data_class() {
        let error = ApplicationError::from(SnapshotError::EmptyScope {
            scope: ScopeKey::new("C1", "Oils"),
        });

        assert_eq!(error.error_class(), "allocation_data");
        assert!(error.to_string().contains("C1/Oils"));
    }
}
