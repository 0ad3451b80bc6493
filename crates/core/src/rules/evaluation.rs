use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::allocation::ScopeKey;
use crate::domain::rule::{Comparison, RiskLevel, Rule, RuleId, RuleKind};
use crate::domain::violation::{
    EvaluationReport, EvaluationSummary, OutcomeStatus, OverallStatus, RuleOutcome,
    ViolationRecord,
};
use crate::rules::metrics::measure;
use crate::rules::registry::RuleSet;
use crate::snapshot::{AllocationSnapshot, ScopeAllocation};

/// Fraction of the threshold inside which a satisfied rule is reported as a warning.
const WARNING_RATIO: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub tolerance: f64,
    pub parallel: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self { tolerance: 0.01, parallel: true }
    }
}

/// Restricts a pass to a subset of scopes and/or rules. `None` means everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub scopes: Option<BTreeSet<ScopeKey>>,
    pub rule_ids: Option<BTreeSet<RuleId>>,
}

impl ScopeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn scope(scope: ScopeKey) -> Self {
        Self { scopes: Some(BTreeSet::from([scope])), rule_ids: None }
    }

    pub fn with_rules(mut self, rule_ids: impl IntoIterator<Item = RuleId>) -> Self {
        self.rule_ids = Some(rule_ids.into_iter().collect());
        self
    }

    pub fn includes_scope(&self, scope: &ScopeKey) -> bool {
        self.scopes.as_ref().map(|scopes| scopes.contains(scope)).unwrap_or(true)
    }

    pub fn includes_rule(&self, rule_id: &RuleId) -> bool {
        self.rule_ids.as_ref().map(|rule_ids| rule_ids.contains(rule_id)).unwrap_or(true)
    }
}

pub trait RuleEvaluator: Send + Sync {
    fn evaluate(
        &self,
        snapshot: &AllocationSnapshot,
        rules: &RuleSet,
        filter: &ScopeFilter,
        iteration: u32,
    ) -> Vec<ViolationRecord>;
}

#[derive(Clone, Debug, Default)]
pub struct DeterministicRuleEvaluator {
    settings: EvaluationSettings,
}

impl DeterministicRuleEvaluator {
    pub fn new(settings: EvaluationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> EvaluationSettings {
        self.settings
    }
}

impl RuleEvaluator for DeterministicRuleEvaluator {
    fn evaluate(
        &self,
        snapshot: &AllocationSnapshot,
        rules: &RuleSet,
        filter: &ScopeFilter,
        iteration: u32,
    ) -> Vec<ViolationRecord> {
        evaluate(snapshot, rules, filter, self.settings, iteration)
    }
}

/// Scored result of one rule in one scope, before classification.
struct Measurement<'a> {
    rule: &'a Rule,
    scope: &'a ScopeKey,
    actual: f64,
    satisfied: bool,
}

/// Evaluates every in-scope rule and returns only the failures, in a stable order.
pub fn evaluate(
    snapshot: &AllocationSnapshot,
    rules: &RuleSet,
    filter: &ScopeFilter,
    settings: EvaluationSettings,
    iteration: u32,
) -> Vec<ViolationRecord> {
    let mut violations = measure_all(snapshot, rules, filter, settings)
        .into_iter()
        .filter(|measurement| !measurement.satisfied)
        .map(|measurement| violation_record(&measurement, iteration))
        .collect::<Vec<_>>();
    sort_violations(&mut violations);

    tracing::debug!(
        event_name = "evaluation.pass.completed",
        snapshot_generation = snapshot.generation(),
        iteration,
        violation_count = violations.len(),
        "rule evaluation pass completed"
    );
    violations
}

/// Like [`evaluate`] but keeps compliant and near-threshold outcomes for reporting.
pub fn evaluate_report(
    snapshot: &AllocationSnapshot,
    rules: &RuleSet,
    filter: &ScopeFilter,
    settings: EvaluationSettings,
) -> EvaluationReport {
    let measurements = measure_all(snapshot, rules, filter, settings);
    let mut violations = Vec::new();
    let mut outcomes = Vec::with_capacity(measurements.len());

    for measurement in &measurements {
        let status = if !measurement.satisfied {
            violations.push(violation_record(measurement, 0));
            OutcomeStatus::Violation
        } else if approaching_threshold(measurement.rule, measurement.actual) {
            OutcomeStatus::Warning
        } else {
            OutcomeStatus::Compliant
        };

        outcomes.push(RuleOutcome {
            rule_id: measurement.rule.id.clone(),
            rule_name: measurement.rule.name.clone(),
            scope: measurement.scope.clone(),
            actual_value: measurement.actual,
            threshold: measurement.rule.threshold(),
            status,
            recommendation: measurement.rule.recommendation.clone(),
        });
    }
    sort_violations(&mut violations);

    let count = |status: OutcomeStatus| outcomes.iter().filter(|o| o.status == status).count();
    let violations_count = count(OutcomeStatus::Violation);
    let warnings_count = count(OutcomeStatus::Warning);
    let summary = EvaluationSummary {
        violations_count,
        warnings_count,
        compliant_count: count(OutcomeStatus::Compliant),
        total_rules_evaluated: outcomes.len(),
        overall_status: if violations_count > 0 {
            OverallStatus::Critical
        } else if warnings_count > 0 {
            OverallStatus::Warning
        } else {
            OverallStatus::Compliant
        },
    };

    EvaluationReport { violations, outcomes, summary }
}

/// Hard rules are always CRITICAL; soft rules grade by breach over the sensitivity band.
pub fn risk_level(rule: &Rule, delta: f64) -> RiskLevel {
    if rule.kind == RuleKind::Hard {
        return RiskLevel::Critical;
    }

    let steps = delta.abs() / rule.sensitivity_band;
    if steps < 1.0 {
        RiskLevel::Low
    } else if steps < 2.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

fn measure_all<'a>(
    snapshot: &'a AllocationSnapshot,
    rules: &'a RuleSet,
    filter: &ScopeFilter,
    settings: EvaluationSettings,
) -> Vec<Measurement<'a>> {
    let pairs = snapshot
        .scopes()
        .filter(|allocation| filter.includes_scope(&allocation.scope))
        .flat_map(|allocation| {
            rules
                .rules()
                .iter()
                .filter(|rule| filter.includes_rule(&rule.id))
                .map(move |rule| (allocation, rule))
        })
        .collect::<Vec<_>>();

    let score = |&(allocation, rule): &(&'a ScopeAllocation, &'a Rule)| {
        let actual = measure(rule.predicate.metric, allocation, snapshot);
        Measurement {
            rule,
            scope: &allocation.scope,
            actual,
            satisfied: rule.predicate.is_satisfied(actual, settings.tolerance),
        }
    };

    // Indexed collect keeps input order, so parallel and serial passes agree.
    if settings.parallel {
        pairs.par_iter().map(score).collect()
    } else {
        pairs.iter().map(score).collect()
    }
}

fn violation_record(measurement: &Measurement<'_>, iteration: u32) -> ViolationRecord {
    let rule = measurement.rule;
    let delta = rule.predicate.breach(measurement.actual);
    ViolationRecord {
        rule_id: rule.id.clone(),
        scope: measurement.scope.clone(),
        kind: rule.kind,
        priority_tier: rule.priority_tier,
        actual_value: measurement.actual,
        threshold: rule.threshold(),
        delta,
        risk_level: risk_level(rule, delta),
        detected_at_iteration: iteration,
    }
}

fn approaching_threshold(rule: &Rule, actual: f64) -> bool {
    let threshold = rule.threshold();
    if threshold <= 0.0 {
        return false;
    }
    match rule.predicate.comparison {
        Comparison::AtMost => actual > threshold * (1.0 - WARNING_RATIO),
        Comparison::AtLeast => actual < threshold * (1.0 + WARNING_RATIO),
    }
}

pub(crate) fn sort_violations(violations: &mut [ViolationRecord]) {
    violations.sort_by(|left, right| {
        (&left.scope, left.priority_tier, &left.rule_id).cmp(&(
            &right.scope,
            right.priority_tier,
            &right.rule_id,
        ))
    });
}
