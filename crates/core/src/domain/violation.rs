use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::allocation::ScopeKey;
use crate::domain::rule::{RiskLevel, RuleId, RuleKind};

/// One failed rule in one scope, as produced by a single evaluation pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub rule_id: RuleId,
    pub scope: ScopeKey,
    pub kind: RuleKind,
    pub priority_tier: u32,
    pub actual_value: f64,
    pub threshold: f64,
    pub delta: f64,
    pub risk_level: RiskLevel,
    pub detected_at_iteration: u32,
}

impl ViolationRecord {
    pub fn is_critical(&self) -> bool {
        self.risk_level == RiskLevel::Critical
    }

    /// Identity of the breach across evaluation passes.
    pub fn key(&self) -> (RuleId, ScopeKey) {
        (self.rule_id.clone(), self.scope.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Compliant,
    Warning,
    Violation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub scope: ScopeKey,
    pub actual_value: f64,
    pub threshold: f64,
    pub status: OutcomeStatus,
    pub recommendation: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Critical,
    Warning,
    Compliant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub violations_count: usize,
    pub warnings_count: usize,
    pub compliant_count: usize,
    pub total_rules_evaluated: usize,
    pub overall_status: OverallStatus,
}

/// Full pass result: every outcome plus the violation records derived from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub violations: Vec<ViolationRecord>,
    pub outcomes: Vec<RuleOutcome>,
    pub summary: EvaluationSummary,
}

impl EvaluationReport {
    pub fn violations_by_scope(&self) -> BTreeMap<ScopeKey, Vec<&ViolationRecord>> {
        group_by_scope(&self.violations)
    }
}

pub fn group_by_scope(violations: &[ViolationRecord]) -> BTreeMap<ScopeKey, Vec<&ViolationRecord>> {
    let mut grouped: BTreeMap<ScopeKey, Vec<&ViolationRecord>> = BTreeMap::new();
    for violation in violations {
        grouped.entry(violation.scope.clone()).or_default().push(violation);
    }
    grouped
}
