use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflicts::ConflictGraph;
use crate::domain::allocation::{SpendRecord, SupplierCatalog};
use crate::domain::plan::{
    ExecutionOutcome, RemediationPlan, ReviewItem, ReviewReason, StepStatus,
};
use crate::domain::violation::{EvaluationReport, ViolationRecord};
use crate::errors::ApplicationError;
use crate::optimizer::{CancellationToken, IterativeOptimizer, OptimizationSettings};
use crate::planner::{ConflictAwarePlanner, PlannerSettings, ResolutionPlanner};
use crate::rulebook::RuleBook;
use crate::rules::evaluation::{
    evaluate_report, DeterministicRuleEvaluator, EvaluationSettings, RuleEvaluator, ScopeFilter,
};
use crate::rules::registry::RuleSet;
use crate::snapshot::AllocationSnapshot;

/// Replans attempted after the first execution leaves critical violations.
pub const MAX_REFINEMENT_ROUNDS: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub evaluation: EvaluationSettings,
    pub planner: PlannerSettings,
    pub optimization: OptimizationSettings,
}

#[derive(Clone, Debug, Serialize)]
pub struct RemediationReport {
    pub analysis_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub input_fingerprint: String,
    pub initial_violations: Vec<ViolationRecord>,
    pub plan: RemediationPlan,
    pub execution: ExecutionOutcome,
    pub review_items: Vec<ReviewItem>,
    pub converged: bool,
}

/// Composes evaluation, planning and execution over one shared rule book.
#[derive(Clone)]
pub struct RemediationRuntime {
    rules: Arc<RuleSet>,
    conflicts: Arc<ConflictGraph>,
    settings: EngineSettings,
    evaluator: Arc<dyn RuleEvaluator>,
    planner: Arc<dyn ResolutionPlanner>,
    optimizer: IterativeOptimizer,
}

impl fmt::Debug for RemediationRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemediationRuntime")
            .field("rule_count", &self.rules.len())
            .field("conflict_count", &self.conflicts.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RemediationRuntime {
    pub fn new(rules: Arc<RuleSet>, conflicts: Arc<ConflictGraph>, settings: EngineSettings) -> Self {
        Self {
            rules,
            conflicts,
            settings,
            evaluator: Arc::new(DeterministicRuleEvaluator::new(settings.evaluation)),
            planner: Arc::new(ConflictAwarePlanner::new(settings.planner)),
            optimizer: IterativeOptimizer::new(settings.optimization),
        }
    }

    /// Swaps the planning stage; evaluation and execution stay deterministic.
    pub fn with_planner(mut self, planner: Arc<dyn ResolutionPlanner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn from_rule_book(book: &RuleBook, settings: EngineSettings) -> Self {
        Self::new(Arc::clone(&book.rules), Arc::clone(&book.conflicts), settings)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn conflicts(&self) -> &ConflictGraph {
        &self.conflicts
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn snapshot(
        &self,
        records: &[SpendRecord],
        catalog: Arc<SupplierCatalog>,
    ) -> Result<AllocationSnapshot, ApplicationError> {
        Ok(AllocationSnapshot::from_spend_records(records, catalog)?)
    }

    pub fn evaluate(&self, snapshot: &AllocationSnapshot) -> Vec<ViolationRecord> {
        self.evaluator.evaluate(snapshot, &self.rules, &ScopeFilter::all(), 0)
    }

    pub fn report(&self, snapshot: &AllocationSnapshot) -> EvaluationReport {
        evaluate_report(snapshot, &self.rules, &ScopeFilter::all(), self.settings.evaluation)
    }

    pub fn plan(&self, snapshot: &AllocationSnapshot) -> RemediationPlan {
        let violations = self.evaluate(snapshot);
        self.planner.plan(snapshot, &violations, &self.rules, &self.conflicts)
    }

    /// Plans, executes, and replans on the residual while critical violations
    /// remain, budget is left, and the previous round accepted a step.
    pub fn remediate(&self, snapshot: &AllocationSnapshot, cancel: &CancellationToken) -> RemediationReport {
        let initial_violations = self.evaluate(snapshot);
        let mut combined = self.planner.plan(snapshot, &initial_violations, &self.rules, &self.conflicts);
        let mut execution = self.optimizer.execute(snapshot, &combined, &self.rules, &self.conflicts, cancel);
        let mut review_items = Vec::new();
        merge_review_items(&mut review_items, &combined.review_items);

        for round in 1..=MAX_REFINEMENT_ROUNDS {
            if execution.converged || execution.cancelled || execution.budget_exhausted {
                break;
            }
            let remaining = self.optimizer.settings().max_iterations.saturating_sub(execution.iterations_used);
            if remaining == 0 {
                break;
            }

            let mut refined = self.planner.plan(
                &execution.final_snapshot,
                &execution.residual_violations,
                &self.rules,
                &self.conflicts,
            );
            merge_review_items(&mut review_items, &refined.review_items);
            if refined.steps.is_empty() {
                break;
            }
            let offset = combined.steps.len();
            for step in &mut refined.steps {
                step.sequence += offset;
            }

            tracing::debug!(
                event_name = "runtime.refinement.round",
                round,
                step_count = refined.steps.len(),
                remaining_iterations = remaining,
                "replanning on residual violations"
            );

            let round_budget = IterativeOptimizer::new(OptimizationSettings {
                max_iterations: remaining,
                ..self.optimizer.settings()
            });
            let next =
                round_budget.execute(&execution.final_snapshot, &refined, &self.rules, &self.conflicts, cancel);
            let progressed = next.step_outcomes.iter().any(|outcome| outcome.status == StepStatus::Accepted);

            combined.steps.extend(refined.steps);
            combined.projected_snapshot = refined.projected_snapshot;
            combined.residual_violations = refined.residual_violations;
            execution = ExecutionOutcome {
                step_outcomes: execution.step_outcomes.into_iter().chain(next.step_outcomes).collect(),
                iterations_used: execution.iterations_used + next.iterations_used,
                ..next
            };

            if !progressed {
                break;
            }
        }

        // Items are reported only while their violations are still open.
        review_items.retain(|item| {
            item.rule_ids.iter().any(|rule_id| {
                execution
                    .residual_violations
                    .iter()
                    .any(|record| &record.rule_id == rule_id && record.scope == item.scope)
            })
        });
        combined.review_items = review_items.clone();

        RemediationReport {
            analysis_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            input_fingerprint: snapshot.fingerprint(),
            initial_violations,
            converged: execution.converged,
            plan: combined,
            execution,
            review_items,
        }
    }

    pub fn analyze(
        &self,
        records: &[SpendRecord],
        catalog: Arc<SupplierCatalog>,
        cancel: &CancellationToken,
    ) -> Result<RemediationReport, ApplicationError> {
        let snapshot = self.snapshot(records, catalog)?;
        Ok(self.remediate(&snapshot, cancel))
    }
}

fn merge_review_items(target: &mut Vec<ReviewItem>, incoming: &[ReviewItem]) {
    for item in incoming {
        let duplicate = target
            .iter()
            .any(|known| known.scope == item.scope && known.rule_ids == item.rule_ids);
        if !duplicate {
            target.push(item.clone());
        }
    }
}

/// Human-readable, conflict-aware action plan for a remediation report.
pub fn render_action_plan(report: &RemediationReport) -> String {
    let mut lines = vec![
        format!("Remediation action plan {}", report.analysis_id),
        format!("Input: {}", report.input_fingerprint),
        format!(
            "Status: {}",
            if report.converged { "converged" } else { "not converged; escalate to human review" }
        ),
        format!(
            "Initial violations: {} ({} critical)",
            report.initial_violations.len(),
            report.initial_violations.iter().filter(|record| record.is_critical()).count()
        ),
        String::new(),
        "Conflicts detected:".to_string(),
    ];

    if report.plan.conflicts.is_empty() {
        lines.push("  (none)".to_string());
    }
    for edge in &report.plan.conflicts {
        let strategy = edge
            .resolution_strategy
            .as_ref()
            .map(|strategy| format!("{}: {}", strategy.kind.as_str(), strategy.description))
            .unwrap_or_else(|| "no registered strategy".to_string());
        lines.push(format!("  - {} <-> {} [{}] {}", edge.rule_a, edge.rule_b, edge.conflict_type, strategy));
    }

    lines.push(String::new());
    lines.push("Steps:".to_string());
    if report.plan.steps.is_empty() {
        lines.push("  (none)".to_string());
    }
    for step in &report.plan.steps {
        let status = report
            .execution
            .step_outcomes
            .iter()
            .find(|outcome| outcome.sequence == step.sequence)
            .map(|outcome| status_label(outcome.status))
            .unwrap_or("PENDING");
        let rationale =
            step.rationale_rule_ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        let via = step.strategy.map(|kind| format!(" via {}", kind.as_str())).unwrap_or_default();
        lines.push(format!(
            "  {}. [{}] {}: move {:.2}% from {} ({}) to {} ({}) for {}{} -> {}",
            step.sequence,
            step.priority_band.as_str(),
            step.target_scope,
            step.action.shift_pct,
            step.action.from_supplier,
            step.action.from_region,
            step.action.to_supplier,
            step.action.to_region,
            rationale,
            via,
            status
        ));
    }

    if !report.review_items.is_empty() {
        lines.push(String::new());
        lines.push("Needs human review:".to_string());
        for item in &report.review_items {
            let rules = item.rule_ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            lines.push(format!(
                "  - {} {} [{}]: {}",
                item.scope,
                rules,
                item.priority_band.as_str(),
                describe_reason(&item.reason)
            ));
        }
    }

    lines.push(String::new());
    lines.push("Residual violations:".to_string());
    if report.execution.residual_violations.is_empty() {
        lines.push("  (none)".to_string());
    }
    for record in &report.execution.residual_violations {
        lines.push(format!(
            "  - {} {}: actual {:.2} vs threshold {:.2} ({})",
            record.scope,
            record.rule_id,
            record.actual_value,
            record.threshold,
            record.risk_level.as_str()
        ));
    }

    lines.join("\n")
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Accepted => "ACCEPTED",
        StepStatus::Unresolved => "UNRESOLVED",
        StepStatus::AlreadySatisfied => "ALREADY_SATISFIED",
        StepStatus::Cancelled => "CANCELLED",
        StepStatus::BudgetExhausted => "BUDGET_EXHAUSTED",
    }
}

fn describe_reason(reason: &ReviewReason) -> String {
    match reason {
        ReviewReason::UnresolvedConflict { rule_a, rule_b } => {
            format!("conflict between {rule_a} and {rule_b} has no resolution strategy")
        }
        ReviewReason::NoAutomatedRemediation { metric } => {
            format!("no automated reallocation moves `{metric}`")
        }
        ReviewReason::UnsatisfiableConstraintSet { remaining_breach } => {
            format!("unsatisfiable with available qualified capacity (remaining breach {remaining_breach:.2})")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::{render_action_plan, EngineSettings, RemediationRuntime};
    use crate::conflicts::ConflictGraph;
    use crate::domain::allocation::{CategoryId, SpendRecord, SupplierCatalog, SupplierId, SupplierProfile};
    use crate::domain::plan::RemediationPlan;
    use crate::domain::violation::ViolationRecord;
    use crate::optimizer::CancellationToken;
    use crate::planner::ResolutionPlanner;
    use crate::rulebook::RuleBook;
    use crate::rules::registry::RuleSet;
    use crate::snapshot::AllocationSnapshot;

    /// Leaves every violation in place.
    struct StandStillPlanner;

    impl ResolutionPlanner for StandStillPlanner {
        fn plan(
            &self,
            snapshot: &AllocationSnapshot,
            violations: &[ViolationRecord],
            _rules: &RuleSet,
            _conflicts: &ConflictGraph,
        ) -> RemediationPlan {
            RemediationPlan {
                steps: Vec::new(),
                conflicts: Vec::new(),
                review_items: Vec::new(),
                projected_snapshot: snapshot.clone(),
                residual_violations: violations.to_vec(),
            }
        }
    }

    fn records() -> Vec<SpendRecord> {
        let record = |supplier: &str, amount: i64| SpendRecord {
            client: "C1".into(),
            category: "Oils".into(),
            supplier: supplier.into(),
            region: "APAC".into(),
            amount: Decimal::new(amount, 1),
        };
        vec![record("A", 935), record("B", 65)]
    }

    fn catalog() -> Arc<SupplierCatalog> {
        let qualified = |id: &str, region: &str| {
            let mut profile = SupplierProfile::unrated(SupplierId::from(id), region.into());
            profile.categories = BTreeSet::from([CategoryId::from("Oils")]);
            profile
        };
        Arc::new(SupplierCatalog::new(vec![
            qualified("N1", "EMEA"),
            qualified("N2", "AMER"),
            qualified("N3", "EMEA"),
        ]))
    }

    fn runtime() -> RemediationRuntime {
        RemediationRuntime::from_rule_book(&RuleBook::builtin().expect("rule book"), EngineSettings::default())
    }

    #[test]
    fn analyze_converges_and_renders_conflict_aware_plan() {
        let report = runtime().analyze(&records(), catalog(), &CancellationToken::new()).expect("report");

        assert!(report.converged);
        assert!(report.review_items.is_empty());
        assert!(report.execution.residual_violations.is_empty());
        assert!(report.input_fingerprint.starts_with("sha256:"));

        let text = render_action_plan(&report);
        assert!(text.contains("Status: converged"));
        assert!(text.contains("R001 <-> R003 [diversification_trade_off] diversify_out_of_region"));
        assert!(text.contains("move 25.00% from A (APAC) to N1 (EMEA)"));
        assert!(text.contains("-> ACCEPTED"));
    }

    #[test]
    fn remediating_a_converged_snapshot_adds_no_steps() {
        let runtime = runtime();
        let first = runtime.analyze(&records(), catalog(), &CancellationToken::new()).expect("report");

        let second = runtime.remediate(&first.execution.final_snapshot, &CancellationToken::new());

        assert!(second.plan.steps.is_empty());
        assert!(second.initial_violations.is_empty());
        assert!(second.converged);
    }

    #[test]
    fn invalid_spend_data_is_an_allocation_error() {
        let mut records = records();
        records[0].amount = Decimal::new(-1, 0);

        let error = runtime().analyze(&records, catalog(), &CancellationToken::new()).expect_err("invalid");
        assert_eq!(error.error_class(), "allocation_data");
    }

    #[test]
    fn planning_stage_can_be_swapped() {
        let runtime = runtime().with_planner(Arc::new(StandStillPlanner));

        let report = runtime.analyze(&records(), catalog(), &CancellationToken::new()).expect("report");

        assert!(report.plan.steps.is_empty());
        assert!(report.execution.step_outcomes.is_empty());
        assert_eq!(report.execution.iterations_used, 0);
        assert_eq!(report.execution.residual_violations, report.initial_violations);
        assert!(!report.converged);
        assert!(render_action_plan(&report).contains("not converged; escalate to human review"));
    }
}
