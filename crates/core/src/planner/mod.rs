mod candidates;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::conflicts::ConflictGraph;
use crate::domain::allocation::ScopeKey;
use crate::domain::conflict::{ConflictEdge, StrategyKind};
use crate::domain::plan::{
    ExpectedDelta, RemediationPlan, RemediationStep, ReviewItem, ReviewReason,
};
use crate::domain::rule::{Metric, PriorityBand, Rule, RuleId};
use crate::domain::violation::{group_by_scope, ViolationRecord};
use crate::rules::evaluation::{evaluate, EvaluationSettings, ScopeFilter};
use crate::rules::metrics::measure;
use crate::rules::registry::RuleSet;
use crate::snapshot::{AllocationSnapshot, ScopeAllocation};

use candidates::{is_remediable, propose, GroupContext, ShareCaps};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    pub max_step_shift_pct: f64,
    pub max_steps_per_group: usize,
    pub evaluation: EvaluationSettings,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self { max_step_shift_pct: 25.0, max_steps_per_group: 32, evaluation: EvaluationSettings::default() }
    }
}

pub trait ResolutionPlanner: Send + Sync {
    fn plan(
        &self,
        snapshot: &AllocationSnapshot,
        violations: &[ViolationRecord],
        rules: &RuleSet,
        conflicts: &ConflictGraph,
    ) -> RemediationPlan;
}

#[derive(Clone, Debug, Default)]
pub struct ConflictAwarePlanner {
    settings: PlannerSettings,
}

impl ConflictAwarePlanner {
    pub fn new(settings: PlannerSettings) -> Self {
        Self { settings }
    }
}

impl ResolutionPlanner for ConflictAwarePlanner {
    fn plan(
        &self,
        snapshot: &AllocationSnapshot,
        violations: &[ViolationRecord],
        rules: &RuleSet,
        conflicts: &ConflictGraph,
    ) -> RemediationPlan {
        plan(snapshot, violations, rules, conflicts, self.settings)
    }
}

/// Violations of one scope that must be resolved together: a connected
/// component of the conflict graph restricted to the active rule ids.
struct ViolationGroup<'a> {
    scope: ScopeKey,
    members: Vec<(&'a ViolationRecord, &'a Rule)>,
    edges: Vec<ConflictEdge>,
}

impl ViolationGroup<'_> {
    fn band(&self) -> PriorityBand {
        self.members.first().map(|(_, rule)| rule.band()).unwrap_or(PriorityBand::Strategic)
    }

    fn rule_ids(&self) -> Vec<RuleId> {
        self.members.iter().map(|(record, _)| record.rule_id.clone()).collect()
    }

    fn strategies(&self) -> Vec<StrategyKind> {
        let mut kinds = Vec::new();
        for strategy in self.edges.iter().filter_map(|edge| edge.resolution_strategy.as_ref()) {
            if !kinds.contains(&strategy.kind) {
                kinds.push(strategy.kind);
            }
        }
        kinds
    }

    fn strategy_for(&self, driver: &RuleId) -> Option<StrategyKind> {
        let with_strategy = || self.edges.iter().filter(|edge| edge.resolution_strategy.is_some());
        with_strategy()
            .find(|edge| edge.touches(driver))
            .or_else(|| with_strategy().next())
            .and_then(|edge| edge.resolution_strategy.as_ref())
            .map(|strategy| strategy.kind)
    }
}

#[derive(Default)]
struct GroupResolution {
    steps: Vec<RemediationStep>,
    projected: Option<AllocationSnapshot>,
    review_items: Vec<ReviewItem>,
}

/// Orders violations into conflict-aware groups and synthesizes remediation
/// steps against a projected snapshot, tier by tier.
pub fn plan(
    snapshot: &AllocationSnapshot,
    violations: &[ViolationRecord],
    rules: &RuleSet,
    conflicts: &ConflictGraph,
    settings: PlannerSettings,
) -> RemediationPlan {
    let active = violations.iter().map(|record| record.rule_id.clone()).collect::<BTreeSet<_>>();
    let detected = conflicts.conflicts_among(&active);
    for edge in &detected {
        tracing::info!(
            event_name = "planner.conflict.detected",
            rule_a = %edge.rule_a,
            rule_b = %edge.rule_b,
            conflict_type = %edge.conflict_type,
            strategy = edge.resolution_strategy.as_ref().map(|s| s.kind.as_str()).unwrap_or("none"),
            "conflicting violations detected"
        );
    }

    let caps = ShareCaps::from_rules(rules);
    let mut projected = snapshot.clone();
    let mut steps: Vec<RemediationStep> = Vec::new();
    let mut review_items = Vec::new();

    for group in group_violations(violations, rules, conflicts) {
        let resolution = resolve_group(&group, &projected, rules, conflicts, caps, settings);
        for mut step in resolution.steps {
            step.sequence = steps.len() + 1;
            steps.push(step);
        }
        if let Some(next) = resolution.projected {
            projected = next;
        }
        for item in resolution.review_items {
            tracing::warn!(
                event_name = "planner.review.flagged",
                scope = %item.scope,
                rule_ids = ?item.rule_ids,
                reason = ?item.reason,
                "violation group needs human review"
            );
            review_items.push(item);
        }
    }

    let residual_violations =
        evaluate(&projected, rules, &ScopeFilter::all(), settings.evaluation, steps.len() as u32);

    RemediationPlan {
        steps,
        conflicts: detected,
        review_items,
        projected_snapshot: projected,
        residual_violations,
    }
}

fn group_violations<'a>(
    violations: &'a [ViolationRecord],
    rules: &'a RuleSet,
    conflicts: &ConflictGraph,
) -> Vec<ViolationGroup<'a>> {
    let mut groups = Vec::new();

    for (scope, records) in group_by_scope(violations) {
        let known = records
            .into_iter()
            .filter_map(|record| rules.get(&record.rule_id).map(|rule| (record, rule)))
            .collect::<Vec<_>>();
        let active = known.iter().map(|(record, _)| record.rule_id.clone()).collect::<BTreeSet<_>>();

        for component in conflicts.components_among(&active) {
            let mut members = known
                .iter()
                .filter(|(record, _)| component.contains(&record.rule_id))
                .copied()
                .collect::<Vec<_>>();
            members.sort_by(|left, right| violation_order(*left, *right));
            groups.push(ViolationGroup {
                scope: scope.clone(),
                members,
                edges: conflicts.conflicts_among(&component),
            });
        }
    }

    groups.sort_by(|left, right| match (left.members.first(), right.members.first()) {
        (Some(l), Some(r)) => violation_order(*l, *r).then_with(|| left.scope.cmp(&right.scope)),
        _ => left.scope.cmp(&right.scope),
    });
    groups
}

/// Tier band first, then worst normalized breach, then rule id.
fn violation_order(
    (left, left_rule): (&ViolationRecord, &Rule),
    (right, right_rule): (&ViolationRecord, &Rule),
) -> std::cmp::Ordering {
    left_rule
        .band()
        .cmp(&right_rule.band())
        .then_with(|| severity(right, right_rule).total_cmp(&severity(left, left_rule)))
        .then_with(|| left.rule_id.cmp(&right.rule_id))
}

fn severity(record: &ViolationRecord, rule: &Rule) -> f64 {
    record.delta / rule.sensitivity_band
}

fn resolve_group(
    group: &ViolationGroup<'_>,
    projected: &AllocationSnapshot,
    rules: &RuleSet,
    conflicts: &ConflictGraph,
    caps: ShareCaps,
    settings: PlannerSettings,
) -> GroupResolution {
    let tolerance = settings.evaluation.tolerance;
    let band = group.band();

    if let Some(edge) = group.edges.iter().find(|edge| edge.resolution_strategy.is_none()) {
        return GroupResolution {
            review_items: vec![ReviewItem::new(
                group.scope.clone(),
                group.rule_ids(),
                band,
                ReviewReason::UnresolvedConflict {
                    rule_a: edge.rule_a.clone(),
                    rule_b: edge.rule_b.clone(),
                },
            )],
            ..GroupResolution::default()
        };
    }

    let Some(allocation) = projected.scope(&group.scope) else {
        return GroupResolution::default();
    };

    let mut resolution = GroupResolution::default();
    let mut members = Vec::new();
    for (_, rule) in &group.members {
        if is_remediable(rule.predicate.metric, rule.predicate.comparison) {
            members.push(*rule);
        } else if !satisfied(rule, allocation, projected, tolerance) {
            resolution.review_items.push(ReviewItem::new(
                group.scope.clone(),
                vec![rule.id.clone()],
                rule.band(),
                ReviewReason::NoAutomatedRemediation { metric: rule.predicate.metric.name() },
            ));
        }
    }
    if members.iter().all(|rule| satisfied(rule, allocation, projected, tolerance)) {
        return resolution;
    }

    let context = GroupContext {
        strategies: group.strategies(),
        attribute_rules: members
            .iter()
            .copied()
            .filter(|rule| matches!(rule.predicate.metric, Metric::Weighted(_)))
            .collect(),
        caps,
        max_step_pct: settings.max_step_shift_pct,
        tolerance,
    };
    let watched = watched_rules(&members, rules, conflicts);

    let mut working = projected.clone();
    let mut group_steps = Vec::new();
    loop {
        let Some(current) = working.scope(&group.scope) else {
            break;
        };
        let Some(driver) = most_severe(&members, current, &working, tolerance) else {
            resolution.steps = group_steps;
            resolution.projected = Some(working);
            return resolution;
        };
        if group_steps.len() >= settings.max_steps_per_group {
            break;
        }

        let step = next_step(group, driver, &members, &watched, &context, &working, rules, band);
        match step {
            Some((step, next)) => {
                group_steps.push(step);
                working = next;
            }
            None => break,
        }
    }

    // Partial progress is discarded; the group goes to review as a whole.
    let remaining_breach = working
        .scope(&group.scope)
        .map(|current| members.iter().map(|rule| breach(rule, current, &working)).sum())
        .unwrap_or(0.0);
    let unresolved = members
        .iter()
        .filter(|rule| !satisfied(rule, allocation, projected, tolerance))
        .map(|rule| rule.id.clone())
        .collect();
    resolution.review_items.push(ReviewItem::new(
        group.scope.clone(),
        unresolved,
        band,
        ReviewReason::UnsatisfiableConstraintSet { remaining_breach },
    ));
    resolution
}

/// First proposal for `driver` that improves it without worsening a watched
/// rule or breaking a currently satisfied hard rule.
#[allow(clippy::too_many_arguments)]
fn next_step(
    group: &ViolationGroup<'_>,
    driver: &Rule,
    members: &[&Rule],
    watched: &[&Rule],
    context: &GroupContext<'_>,
    working: &AllocationSnapshot,
    rules: &RuleSet,
    band: PriorityBand,
) -> Option<(RemediationStep, AllocationSnapshot)> {
    let tolerance = context.tolerance;
    let before = working.scope(&group.scope)?;
    let intact_hard_rules = rules
        .rules()
        .iter()
        .filter(|rule| rule.is_hard() && satisfied(rule, before, working, tolerance))
        .collect::<Vec<_>>();

    for action in propose(driver, context, before, working) {
        let Ok(next) = working.apply(&group.scope, &action, tolerance) else {
            continue;
        };
        let Some(after) = next.scope(&group.scope) else {
            continue;
        };

        let improves = breach(driver, after, &next) < breach(driver, before, working) - tolerance;
        let worsens = watched
            .iter()
            .any(|rule| breach(rule, after, &next) > breach(rule, before, working) + tolerance);
        let breaks_hard = intact_hard_rules.iter().any(|rule| !satisfied(rule, after, &next, tolerance));
        if !improves || worsens || breaks_hard {
            continue;
        }

        let mut rationale_rule_ids = vec![driver.id.clone()];
        rationale_rule_ids.extend(
            members.iter().filter(|rule| rule.id != driver.id).map(|rule| rule.id.clone()),
        );
        let expected_deltas = watched
            .iter()
            .map(|rule| ExpectedDelta {
                rule_id: rule.id.clone(),
                breach_before: breach(rule, before, working),
                breach_after: breach(rule, after, &next),
            })
            .collect();

        let step = RemediationStep {
            sequence: 0,
            target_scope: group.scope.clone(),
            action,
            rationale_rule_ids,
            strategy: group.strategy_for(&driver.id),
            priority_band: band,
            expected_deltas,
        };
        return Some((step, next));
    }

    None
}

/// Group members followed by every rule they share a conflict edge with.
fn watched_rules<'a>(members: &[&'a Rule], rules: &'a RuleSet, conflicts: &ConflictGraph) -> Vec<&'a Rule> {
    let mut watched = members.to_vec();
    let mut neighbors = BTreeSet::new();
    for rule in members {
        neighbors.extend(conflicts.neighbors(&rule.id).cloned());
    }
    for rule_id in neighbors {
        if let Some(rule) = rules.get(&rule_id) {
            if !watched.iter().any(|known| known.id == rule.id) {
                watched.push(rule);
            }
        }
    }
    watched
}

fn most_severe<'a>(
    members: &[&'a Rule],
    allocation: &ScopeAllocation,
    snapshot: &AllocationSnapshot,
    tolerance: f64,
) -> Option<&'a Rule> {
    let mut worst: Option<(&'a Rule, f64)> = None;
    for &rule in members {
        if satisfied(rule, allocation, snapshot, tolerance) {
            continue;
        }
        let normalized = breach(rule, allocation, snapshot) / rule.sensitivity_band;
        if worst.map(|(_, current)| normalized > current).unwrap_or(true) {
            worst = Some((rule, normalized));
        }
    }
    worst.map(|(rule, _)| rule)
}

fn breach(rule: &Rule, allocation: &ScopeAllocation, snapshot: &AllocationSnapshot) -> f64 {
    rule.predicate.breach(measure(rule.predicate.metric, allocation, snapshot))
}

fn satisfied(rule: &Rule, allocation: &ScopeAllocation, snapshot: &AllocationSnapshot, tolerance: f64) -> bool {
    rule.predicate.is_satisfied(measure(rule.predicate.metric, allocation, snapshot), tolerance)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::{plan, PlannerSettings};
    use crate::conflicts::ConflictGraph;
    use crate::domain::allocation::{CategoryId, SpendRecord, SupplierCatalog, SupplierId, SupplierProfile};
    use crate::domain::conflict::ConflictDefinition;
    use crate::domain::plan::ReviewReason;
    use crate::domain::rule::{PriorityBand, RuleDefinition, RuleId, RuleKind, ScopeShape};
    use crate::rules::evaluation::{evaluate, EvaluationSettings, ScopeFilter};
    use crate::rules::registry::{RuleSet, RuleSetDefinition};
    use crate::snapshot::AllocationSnapshot;

    fn snapshot() -> AllocationSnapshot {
        let qualified = |id: &str, region: &str| {
            let mut profile = SupplierProfile::unrated(SupplierId::from(id), region.into());
            profile.categories = BTreeSet::from([CategoryId::from("Oils")]);
            profile
        };
        let record = |supplier: &str, amount: i64| SpendRecord {
            client: "C1".into(),
            category: "Oils".into(),
            supplier: supplier.into(),
            region: "APAC".into(),
            amount: Decimal::new(amount, 1),
        };
        AllocationSnapshot::from_spend_records(
            &[record("A", 935), record("B", 65)],
            Arc::new(SupplierCatalog::new(vec![
                qualified("N1", "EMEA"),
                qualified("N2", "AMER"),
                qualified("N3", "EMEA"),
            ])),
        )
        .expect("snapshot")
    }

    fn rule(id: &str, kind: RuleKind, tier: u32, scope: ScopeShape, condition: &str) -> RuleDefinition {
        RuleDefinition {
            id: id.to_owned(),
            name: id.to_owned(),
            category: "risk".to_owned(),
            kind,
            priority_tier: tier,
            scope,
            condition: condition.to_owned(),
            sensitivity_band: None,
            recommendation: None,
        }
    }

    fn rule_set(rules: Vec<RuleDefinition>) -> RuleSet {
        RuleSet::load(&RuleSetDefinition { max_tier: 34, categories: vec!["risk".to_owned()], rules })
            .expect("rules")
    }

    #[test]
    fn conflicting_pair_without_strategy_goes_to_review_untouched() {
        let snapshot = snapshot();
        let rules = rule_set(vec![
            rule("R001", RuleKind::Hard, 3, ScopeShape::Region, "max_region_share_pct <= 40"),
            rule("R003", RuleKind::Hard, 4, ScopeShape::Supplier, "max_supplier_share_pct <= 60"),
        ]);
        let conflicts = ConflictGraph::load(
            &[ConflictDefinition {
                rule_a: "R001".to_owned(),
                rule_b: "R003".to_owned(),
                conflict_type: "diversification_trade_off".to_owned(),
                strategy: None,
                strategy_description: None,
            }],
            &rules,
        )
        .expect("conflicts");
        let violations =
            evaluate(&snapshot, &rules, &ScopeFilter::all(), EvaluationSettings::default(), 0);

        let plan = plan(&snapshot, &violations, &rules, &conflicts, PlannerSettings::default());

        assert!(plan.steps.is_empty());
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.review_items.len(), 1);
        assert_eq!(plan.review_items[0].rule_ids, vec![RuleId::from("R001"), RuleId::from("R003")]);
        assert_eq!(
            plan.review_items[0].reason,
            ReviewReason::UnresolvedConflict { rule_a: RuleId::from("R001"), rule_b: RuleId::from("R003") }
        );
        assert_eq!(plan.residual_violations.len(), 2);
        assert_eq!(plan.projected_snapshot, snapshot);
    }

    #[test]
    fn critical_steps_precede_medium_steps_and_clear_every_breach() {
        let snapshot = snapshot();
        let rules = rule_set(vec![
            rule("R003", RuleKind::Hard, 4, ScopeShape::Supplier, "max_supplier_share_pct <= 60"),
            rule("R023", RuleKind::Soft, 16, ScopeShape::Portfolio, "hhi <= 2500"),
        ]);
        let violations =
            evaluate(&snapshot, &rules, &ScopeFilter::all(), EvaluationSettings::default(), 0);
        assert_eq!(violations.len(), 2);

        let plan = plan(&snapshot, &violations, &rules, &ConflictGraph::empty(), PlannerSettings::default());

        let bands = plan.steps.iter().map(|step| step.priority_band).collect::<Vec<_>>();
        assert!(bands.contains(&PriorityBand::Critical));
        assert!(bands.contains(&PriorityBand::Medium));
        assert!(bands.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(plan.steps.iter().enumerate().all(|(index, step)| step.sequence == index + 1));
        assert!(plan.steps.iter().all(|step| step.action.shift_pct <= 25.0 + 1e-9));
        assert!(plan.residual_violations.is_empty());
        assert!(plan.review_items.is_empty());
        assert!(plan.projected_snapshot.check_conservation().is_ok());
    }
}
