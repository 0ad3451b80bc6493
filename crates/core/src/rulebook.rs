use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conflicts::ConflictGraph;
use crate::domain::conflict::ConflictDefinition;
use crate::domain::rule::RuleDefinition;
use crate::errors::RuleDefinitionError;
use crate::rules::registry::{RuleSet, RuleSetDefinition, DEFAULT_MAX_TIER};

pub const DEFAULT_RULE_BOOK: &str = include_str!("../data/default_rule_book.toml");

fn default_max_tier() -> u32 {
    DEFAULT_MAX_TIER
}

/// Declarative rule book as delivered by the rule-definition collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleBookDocument {
    #[serde(default = "default_max_tier")]
    pub max_tier: u32,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
    #[serde(default)]
    pub conflicts: Vec<ConflictDefinition>,
}

impl RuleBookDocument {
    pub fn from_toml_str(raw: &str) -> Result<Self, RuleDefinitionError> {
        toml::from_str(raw).map_err(|error| RuleDefinitionError::Parse(error.to_string()))
    }
}

/// Validated rules plus their conflict graph, shareable across analyses.
#[derive(Clone, Debug)]
pub struct RuleBook {
    pub rules: Arc<RuleSet>,
    pub conflicts: Arc<ConflictGraph>,
}

impl RuleBook {
    pub fn load(document: &RuleBookDocument) -> Result<Self, RuleDefinitionError> {
        let rules = RuleSet::load(&RuleSetDefinition {
            max_tier: document.max_tier,
            categories: document.categories.clone(),
            rules: document.rules.clone(),
        })?;
        let conflicts = ConflictGraph::load(&document.conflicts, &rules)?;

        Ok(Self { rules: Arc::new(rules), conflicts: Arc::new(conflicts) })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, RuleDefinitionError> {
        Self::load(&RuleBookDocument::from_toml_str(raw)?)
    }

    pub fn builtin() -> Result<Self, RuleDefinitionError> {
        Self::from_toml_str(DEFAULT_RULE_BOOK)
    }
}

#[cfg(test)]
mod tests {
    use super::{RuleBook, RuleBookDocument};
    use crate::domain::conflict::StrategyKind;
    use crate::domain::rule::{PriorityBand, RuleId};
    use crate::errors::RuleDefinitionError;

    #[test]
    fn builtin_rule_book_loads_with_priority_order() {
        let book = RuleBook::builtin().expect("builtin rule book");

        let ids = book.rules.rules().iter().map(|rule| rule.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "R024", "R010", "R001", "R003", "R029", "R005", "R011", "R007", "R008", "R025", "R023",
                "R035", "R013", "R031", "R002", "R030", "R020",
            ]
        );
        assert_eq!(book.rules.get(&RuleId::from("R025")).map(|r| r.band()), Some(PriorityBand::HighRisk));
        assert_eq!(book.rules.get(&RuleId::from("R013")).map(|r| r.band()), Some(PriorityBand::Medium));
        assert_eq!(book.rules.get(&RuleId::from("R002")).map(|r| r.band()), Some(PriorityBand::Strategic));

        let edge = book
            .conflicts
            .edge_between(&RuleId::from("R003"), &RuleId::from("R001"))
            .expect("regional edge");
        assert_eq!(
            edge.resolution_strategy.as_ref().map(|strategy| strategy.kind),
            Some(StrategyKind::DiversifyOutOfRegion)
        );
        let unresolved = book
            .conflicts
            .edge_between(&RuleId::from("R002"), &RuleId::from("R023"))
            .expect("tail edge");
        assert!(unresolved.resolution_strategy.is_none());
    }

    #[test]
    fn malformed_toml_is_a_definition_error() {
        let error = RuleBookDocument::from_toml_str("rules = [").expect_err("parse failure");
        assert!(matches!(error, RuleDefinitionError::Parse(_)));
    }

    #[test]
    fn conflict_referencing_unknown_rule_fails_the_whole_book() {
        let raw = r#"
categories = ["concentration"]

[[rules]]
id = "R001"
name = "Regional Concentration"
category = "concentration"
kind = "hard"
priority_tier = 3
scope = "region"
condition = "max_region_share_pct <= 40"

[[conflicts]]
rule_a = "R001"
rule_b = "R404"
conflict_type = "missing"
"#;
        assert_eq!(
            RuleBook::from_toml_str(raw).map(|book| book.rules.len()),
            Err(RuleDefinitionError::UnknownConflictRule { rule_id: "R404".to_owned() })
        );
    }
}
