pub mod config;
pub mod conflicts;
pub mod domain;
pub mod errors;
pub mod optimizer;
pub mod planner;
pub mod rulebook;
pub mod rules;
pub mod runtime;
pub mod snapshot;

pub use conflicts::ConflictGraph;
pub use domain::allocation::{
    CategoryId, ClientId, CyberGrade, RegionId, ScopeKey, SpendRecord, SupplierAttribute,
    SupplierCatalog, SupplierId, SupplierProfile, SupplierShare,
};
pub use domain::conflict::{ConflictDefinition, ConflictEdge, ResolutionStrategy, StrategyKind};
pub use domain::plan::{
    ExecutionOutcome, ReallocationAction, RemediationPlan, RemediationStep, ReviewItem,
    ReviewReason, StepOutcome, StepStatus,
};
pub use domain::rule::{PriorityBand, RiskLevel, Rule, RuleDefinition, RuleId, RuleKind};
pub use domain::violation::{EvaluationReport, OverallStatus, ViolationRecord};
pub use errors::{ApplicationError, RuleDefinitionError, SnapshotError, StepApplicationError};
pub use optimizer::{execute, CancellationToken, IterativeOptimizer, OptimizationSettings};
pub use planner::{plan, ConflictAwarePlanner, PlannerSettings, ResolutionPlanner};
pub use rulebook::{RuleBook, RuleBookDocument, DEFAULT_RULE_BOOK};
pub use rules::{
    evaluate, evaluate_report, DeterministicRuleEvaluator, EvaluationSettings, RuleEvaluator,
    RuleSet, ScopeFilter,
};
pub use runtime::{render_action_plan, EngineSettings, RemediationReport, RemediationRuntime};
pub use snapshot::{AllocationSnapshot, ScopeAllocation};
