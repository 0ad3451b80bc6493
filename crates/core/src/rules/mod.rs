pub mod condition;
pub mod evaluation;
pub mod metrics;
pub mod registry;

pub use evaluation::{
    evaluate, evaluate_report, risk_level, DeterministicRuleEvaluator, EvaluationSettings,
    RuleEvaluator, ScopeFilter,
};
pub use registry::{RuleSet, RuleSetDefinition, DEFAULT_MAX_TIER};
