use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::conflict::{ConflictDefinition, ConflictEdge, ResolutionStrategy, StrategyKind};
use crate::domain::rule::RuleId;
use crate::errors::RuleDefinitionError;
use crate::rules::registry::RuleSet;

/// Static, undirected conflict graph over rule ids. Read-only after load.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConflictGraph {
    edges: Vec<ConflictEdge>,
    adjacency: BTreeMap<RuleId, BTreeSet<RuleId>>,
}

impl ConflictGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(
        definitions: &[ConflictDefinition],
        rules: &RuleSet,
    ) -> Result<Self, RuleDefinitionError> {
        let mut edges: Vec<ConflictEdge> = Vec::with_capacity(definitions.len());
        let mut seen = BTreeSet::new();

        for definition in definitions {
            let first = known_rule(&definition.rule_a, rules)?;
            let second = known_rule(&definition.rule_b, rules)?;
            if first == second {
                return Err(RuleDefinitionError::SelfConflict { rule_id: first.0 });
            }
            let (rule_a, rule_b) = if first < second { (first, second) } else { (second, first) };

            let conflict_type = definition.conflict_type.trim();
            if conflict_type.is_empty() {
                return Err(RuleDefinitionError::EmptyConflictType {
                    rule_a: rule_a.0,
                    rule_b: rule_b.0,
                });
            }
            if !seen.insert((rule_a.clone(), rule_b.clone())) {
                return Err(RuleDefinitionError::DuplicateConflictEdge {
                    rule_a: rule_a.0,
                    rule_b: rule_b.0,
                });
            }

            let resolution_strategy = definition.strategy.map(|kind| ResolutionStrategy {
                kind,
                description: definition
                    .strategy_description
                    .as_deref()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_owned)
                    .unwrap_or_else(|| default_description(kind).to_owned()),
            });

            edges.push(ConflictEdge {
                rule_a,
                rule_b,
                conflict_type: conflict_type.to_owned(),
                resolution_strategy,
            });
        }
        edges.sort_by(|left, right| (&left.rule_a, &left.rule_b).cmp(&(&right.rule_a, &right.rule_b)));

        let mut adjacency: BTreeMap<RuleId, BTreeSet<RuleId>> = BTreeMap::new();
        for edge in &edges {
            adjacency.entry(edge.rule_a.clone()).or_default().insert(edge.rule_b.clone());
            adjacency.entry(edge.rule_b.clone()).or_default().insert(edge.rule_a.clone());
        }

        Ok(Self { edges, adjacency })
    }

    pub fn edges(&self) -> &[ConflictEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Induced subgraph: every edge whose endpoints are both in `active`.
    pub fn conflicts_among(&self, active: &BTreeSet<RuleId>) -> Vec<ConflictEdge> {
        self.edges
            .iter()
            .filter(|edge| active.contains(&edge.rule_a) && active.contains(&edge.rule_b))
            .cloned()
            .collect()
    }

    pub fn edge_between(&self, left: &RuleId, right: &RuleId) -> Option<&ConflictEdge> {
        let (rule_a, rule_b) = if left < right { (left, right) } else { (right, left) };
        self.edges.iter().find(|edge| &edge.rule_a == rule_a && &edge.rule_b == rule_b)
    }

    pub fn neighbors(&self, rule_id: &RuleId) -> impl Iterator<Item = &RuleId> {
        self.adjacency.get(rule_id).into_iter().flatten()
    }

    /// Connected components of the induced subgraph over `active`, each sorted,
    /// in order of their smallest member. Isolated rules form singleton components.
    pub fn components_among(&self, active: &BTreeSet<RuleId>) -> Vec<BTreeSet<RuleId>> {
        let mut visited = BTreeSet::new();
        let mut components = Vec::new();

        for start in active {
            if visited.contains(start) {
                continue;
            }

            let mut component = BTreeSet::new();
            let mut queue = VecDeque::from([start.clone()]);
            while let Some(current) = queue.pop_front() {
                if !visited.insert(current.clone()) {
                    continue;
                }
                for neighbor in self.neighbors(&current) {
                    if active.contains(neighbor) && !visited.contains(neighbor) {
                        queue.push_back(neighbor.clone());
                    }
                }
                component.insert(current);
            }
            components.push(component);
        }

        components
    }
}

fn known_rule(raw: &str, rules: &RuleSet) -> Result<RuleId, RuleDefinitionError> {
    let rule_id = RuleId::from(raw.trim());
    if !rules.contains(&rule_id) {
        return Err(RuleDefinitionError::UnknownConflictRule { rule_id: raw.trim().to_owned() });
    }
    Ok(rule_id)
}

fn default_description(kind: StrategyKind) -> &'static str {
    match kind {
        StrategyKind::DiversifyOutOfRegion => {
            "diversify into qualifying suppliers outside the overweight region"
        }
        StrategyKind::QualifiedPoolOnly => {
            "diversify within the candidate pool that meets every supplier-attribute rule"
        }
        StrategyKind::IncumbentsOnly => "rebalance among suppliers already holding share",
    }
}
