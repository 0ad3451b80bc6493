use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::rule::{Rule, RuleDefinition, RuleId, ScopeShape};
use crate::errors::RuleDefinitionError;
use crate::rules::condition::parse_condition;

pub const DEFAULT_MAX_TIER: u32 = 34;
const MIN_MAX_TIER: u32 = 26;

fn default_max_tier() -> u32 {
    DEFAULT_MAX_TIER
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleSetDefinition {
    #[serde(default = "default_max_tier")]
    pub max_tier: u32,
    pub categories: Vec<String>,
    pub rules: Vec<RuleDefinition>,
}

/// Validated rules ordered by `(priority_tier, id)`. Read-only after `load`.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSet {
    max_tier: u32,
    rules: Vec<Rule>,
    index: BTreeMap<RuleId, usize>,
}

impl RuleSet {
    pub fn load(definition: &RuleSetDefinition) -> Result<Self, RuleDefinitionError> {
        if definition.max_tier < MIN_MAX_TIER {
            return Err(RuleDefinitionError::InvalidTierCeiling { max_tier: definition.max_tier });
        }

        let categories = definition
            .categories
            .iter()
            .map(|category| category.trim().to_owned())
            .filter(|category| !category.is_empty())
            .collect::<BTreeSet<_>>();

        let mut seen = BTreeSet::new();
        let mut rules = Vec::with_capacity(definition.rules.len());
        for (index, raw) in definition.rules.iter().enumerate() {
            let rule = bind_rule(index, raw, &categories, definition.max_tier)?;
            if !seen.insert(rule.id.clone()) {
                return Err(RuleDefinitionError::DuplicateRuleId { rule_id: rule.id.0 });
            }
            rules.push(rule);
        }

        rules.sort_by(|left, right| {
            (left.priority_tier, &left.id).cmp(&(right.priority_tier, &right.id))
        });
        let index =
            rules.iter().enumerate().map(|(position, rule)| (rule.id.clone(), position)).collect();

        tracing::info!(
            event_name = "rules.registry.loaded",
            rule_count = rules.len(),
            category_count = categories.len(),
            max_tier = definition.max_tier,
            "rule registry loaded"
        );

        Ok(Self { max_tier: definition.max_tier, rules, index })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, rule_id: &RuleId) -> Option<&Rule> {
        self.index.get(rule_id).map(|position| &self.rules[*position])
    }

    pub fn contains(&self, rule_id: &RuleId) -> bool {
        self.index.contains_key(rule_id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn max_tier(&self) -> u32 {
        self.max_tier
    }
}

fn bind_rule(
    index: usize,
    raw: &RuleDefinition,
    categories: &BTreeSet<String>,
    max_tier: u32,
) -> Result<Rule, RuleDefinitionError> {
    let id = raw.id.trim();
    if id.is_empty() {
        return Err(RuleDefinitionError::EmptyField { index, field: "id" });
    }
    let name = raw.name.trim();
    if name.is_empty() {
        return Err(RuleDefinitionError::EmptyField { index, field: "name" });
    }

    let category = raw.category.trim();
    if !categories.contains(category) {
        return Err(RuleDefinitionError::UnknownCategory {
            rule_id: id.to_owned(),
            category: category.to_owned(),
        });
    }

    if raw.priority_tier == 0 || raw.priority_tier > max_tier {
        return Err(RuleDefinitionError::TierOutOfRange {
            rule_id: id.to_owned(),
            tier: raw.priority_tier,
            max_tier,
        });
    }

    let predicate = parse_condition(id, &raw.condition)?;
    if predicate.metric.scope_shape() != raw.scope {
        return Err(RuleDefinitionError::ScopeMismatch {
            rule_id: id.to_owned(),
            metric: predicate.metric.name(),
            scope: shape_name(raw.scope).to_owned(),
        });
    }

    let (low, high) = predicate.metric.domain();
    let above = high.map(|high| predicate.threshold > high).unwrap_or(false);
    if predicate.threshold < low || above {
        return Err(RuleDefinitionError::ThresholdOutOfDomain {
            rule_id: id.to_owned(),
            threshold: predicate.threshold,
            domain: match high {
                Some(high) => format!("[{low}, {high}]"),
                None => format!("[{low}, +inf)"),
            },
        });
    }

    let sensitivity_band =
        raw.sensitivity_band.unwrap_or_else(|| predicate.metric.default_sensitivity_band());
    if !(sensitivity_band.is_finite() && sensitivity_band > 0.0) {
        return Err(RuleDefinitionError::InvalidSensitivityBand { rule_id: id.to_owned() });
    }

    Ok(Rule {
        id: RuleId(id.to_owned()),
        name: name.to_owned(),
        category: category.to_owned(),
        kind: raw.kind,
        priority_tier: raw.priority_tier,
        scope: raw.scope,
        predicate,
        sensitivity_band,
        recommendation: raw
            .recommendation
            .as_ref()
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty()),
    })
}

fn shape_name(shape: ScopeShape) -> &'static str {
    match shape {
        ScopeShape::Region => "region",
        ScopeShape::Supplier => "supplier",
        ScopeShape::Portfolio => "portfolio",
    }
}

#[cfg(test)]
mod tests {
    use super::{RuleSet, RuleSetDefinition};
    use crate::domain::rule::{RuleDefinition, RuleId, RuleKind, ScopeShape};
    use crate::errors::RuleDefinitionError;

    fn definition(id: &str, tier: u32, scope: ScopeShape, condition: &str) -> RuleDefinition {
        RuleDefinition {
            id: id.to_owned(),
            name: format!("{id} rule"),
            category: "risk_management".to_owned(),
            kind: RuleKind::Hard,
            priority_tier: tier,
            scope,
            condition: condition.to_owned(),
            sensitivity_band: None,
            recommendation: None,
        }
    }

    fn rule_set(rules: Vec<RuleDefinition>) -> Result<RuleSet, RuleDefinitionError> {
        RuleSet::load(&RuleSetDefinition {
            max_tier: 34,
            categories: vec!["risk_management".to_owned(), "esg".to_owned()],
            rules,
        })
    }

    #[test]
    fn loads_and_orders_rules_by_tier_then_id() {
        let rules = rule_set(vec![
            definition("R023", 16, ScopeShape::Portfolio, "hhi <= 2500"),
            definition("R003", 4, ScopeShape::Supplier, "max_supplier_share_pct <= 60"),
            definition("R001", 3, ScopeShape::Region, "max_region_share_pct <= 40"),
        ])
        .expect("loaded");

        let ids = rules.rules().iter().map(|rule| rule.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["R001", "R003", "R023"]);
        assert_eq!(rules.get(&RuleId::from("R023")).map(|rule| rule.threshold()), Some(2500.0));
        assert_eq!(rules.get(&RuleId::from("R023")).map(|rule| rule.sensitivity_band), Some(1000.0));
    }

    #[test]
    fn duplicate_ids_fail_the_whole_registry() {
        let error = rule_set(vec![
            definition("R001", 3, ScopeShape::Region, "max_region_share_pct <= 40"),
            definition(" R001 ", 4, ScopeShape::Region, "max_region_share_pct <= 50"),
        ])
        .expect_err("duplicate");
        assert_eq!(error, RuleDefinitionError::DuplicateRuleId { rule_id: "R001".to_owned() });
    }

    #[test]
    fn rejects_unknown_category_and_tier_outside_bands() {
        let mut unknown = definition("R001", 3, ScopeShape::Region, "max_region_share_pct <= 40");
        unknown.category = "logistics".to_owned();
        assert!(matches!(rule_set(vec![unknown]), Err(RuleDefinitionError::UnknownCategory { .. })));

        let late = definition("R001", 35, ScopeShape::Region, "max_region_share_pct <= 40");
        assert!(matches!(rule_set(vec![late]), Err(RuleDefinitionError::TierOutOfRange { .. })));

        let zero = definition("R001", 0, ScopeShape::Region, "max_region_share_pct <= 40");
        assert!(matches!(rule_set(vec![zero]), Err(RuleDefinitionError::TierOutOfRange { .. })));
    }

    #[test]
    fn rejects_predicates_that_cannot_bind_to_declared_scope() {
        let error = rule_set(vec![definition(
            "R003",
            4,
            ScopeShape::Region,
            "max_supplier_share_pct <= 60",
        )])
        .expect_err("scope mismatch");
        assert!(matches!(error, RuleDefinitionError::ScopeMismatch { .. }));
    }

    #[test]
    fn rejects_thresholds_outside_metric_domain() {
        let error = rule_set(vec![definition(
            "R007",
            10,
            ScopeShape::Portfolio,
            "supplier.quality_rating >= 7",
        )])
        .expect_err("rating above five");
        assert!(matches!(error, RuleDefinitionError::ThresholdOutOfDomain { .. }));

        let error = rule_set(vec![definition("R001", 3, ScopeShape::Region, "max_region_share_pct <= 140")])
            .expect_err("share above hundred");
        assert!(matches!(error, RuleDefinitionError::ThresholdOutOfDomain { .. }));
    }

    #[test]
    fn rejects_tier_ceiling_below_strategic_band() {
        let error = RuleSet::load(&RuleSetDefinition {
            max_tier: 20,
            categories: vec!["risk_management".to_owned()],
            rules: Vec::new(),
        })
        .expect_err("ceiling");
        assert_eq!(error, RuleDefinitionError::InvalidTierCeiling { max_tier: 20 });
    }

    #[test]
    fn rejects_non_positive_sensitivity_band() {
        let mut rule = definition("R005", 6, ScopeShape::Portfolio, "supplier.esg_score >= 70");
        rule.sensitivity_band = Some(0.0);
        assert!(matches!(
            rule_set(vec![rule]),
            Err(RuleDefinitionError::InvalidSensitivityBand { .. })
        ));
    }
}
