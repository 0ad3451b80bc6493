use serde::{Deserialize, Serialize};

use crate::domain::allocation::{RegionId, ScopeKey, SupplierId};
use crate::domain::conflict::{ConflictEdge, StrategyKind};
use crate::domain::rule::{PriorityBand, RuleId};
use crate::domain::violation::ViolationRecord;
use crate::snapshot::AllocationSnapshot;

/// Move `shift_pct` percentage points of a scope's spend from one supplier to another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReallocationAction {
    pub from_supplier: SupplierId,
    pub from_region: RegionId,
    pub to_supplier: SupplierId,
    pub to_region: RegionId,
    pub shift_pct: f64,
}

impl ReallocationAction {
    pub fn with_shift(&self, shift_pct: f64) -> Self {
        Self { shift_pct, ..self.clone() }
    }
}

/// Projected breach of one rule before and after a step; zero means satisfied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpectedDelta {
    pub rule_id: RuleId,
    pub breach_before: f64,
    pub breach_after: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemediationStep {
    pub sequence: usize,
    pub target_scope: ScopeKey,
    pub action: ReallocationAction,
    pub rationale_rule_ids: Vec<RuleId>,
    pub strategy: Option<StrategyKind>,
    pub priority_band: PriorityBand,
    pub expected_deltas: Vec<ExpectedDelta>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewReason {
    /// Two active violations conflict and no resolution strategy is registered.
    UnresolvedConflict { rule_a: RuleId, rule_b: RuleId },
    /// The metric has no reallocation that can move it toward compliance.
    NoAutomatedRemediation { metric: String },
    /// Qualifying capacity runs out before every breach in the group is cleared.
    UnsatisfiableConstraintSet { remaining_breach: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    NeedsHumanReview,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub scope: ScopeKey,
    pub rule_ids: Vec<RuleId>,
    pub priority_band: PriorityBand,
    pub status: ReviewStatus,
    pub reason: ReviewReason,
}

impl ReviewItem {
    pub fn new(
        scope: ScopeKey,
        rule_ids: Vec<RuleId>,
        priority_band: PriorityBand,
        reason: ReviewReason,
    ) -> Self {
        Self { scope, rule_ids, priority_band, status: ReviewStatus::NeedsHumanReview, reason }
    }

    pub fn covers(&self, rule_id: &RuleId, scope: &ScopeKey) -> bool {
        &self.scope == scope && self.rule_ids.contains(rule_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RemediationPlan {
    pub steps: Vec<RemediationStep>,
    pub conflicts: Vec<ConflictEdge>,
    pub review_items: Vec<ReviewItem>,
    pub projected_snapshot: AllocationSnapshot,
    pub residual_violations: Vec<ViolationRecord>,
}

impl RemediationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    PendingSteps,
    ApplyingStep,
    Validating,
    Accepted,
    Backtracked,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Accepted,
    Unresolved,
    AlreadySatisfied,
    Cancelled,
    BudgetExhausted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub sequence: usize,
    pub status: StepStatus,
    pub planned_shift_pct: f64,
    pub applied_shift_pct: f64,
    pub attempts: u32,
    pub trail: Vec<LoopState>,
    pub failure: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub final_snapshot: AllocationSnapshot,
    pub residual_violations: Vec<ViolationRecord>,
    pub converged: bool,
    pub step_outcomes: Vec<StepOutcome>,
    pub iterations_used: u32,
    pub cancelled: bool,
    pub budget_exhausted: bool,
}
