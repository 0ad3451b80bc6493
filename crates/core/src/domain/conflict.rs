use serde::{Deserialize, Serialize};

use crate::domain::rule::RuleId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Receivers must sit outside the donor supplier's region.
    DiversifyOutOfRegion,
    /// Receivers must individually meet every supplier-attribute rule of the group.
    QualifiedPoolOnly,
    /// Receivers must already hold share in the scope.
    IncumbentsOnly,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiversifyOutOfRegion => "diversify_out_of_region",
            Self::QualifiedPoolOnly => "qualified_pool_only",
            Self::IncumbentsOnly => "incumbents_only",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionStrategy {
    pub kind: StrategyKind,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDefinition {
    pub rule_a: String,
    pub rule_b: String,
    pub conflict_type: String,
    #[serde(default)]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub strategy_description: Option<String>,
}

/// Undirected antagonism between two rules; `rule_a < rule_b` after loading.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictEdge {
    pub rule_a: RuleId,
    pub rule_b: RuleId,
    pub conflict_type: String,
    pub resolution_strategy: Option<ResolutionStrategy>,
}

impl ConflictEdge {
    pub fn touches(&self, rule_id: &RuleId) -> bool {
        &self.rule_a == rule_id || &self.rule_b == rule_id
    }
}
