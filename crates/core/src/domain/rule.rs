use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::allocation::SupplierAttribute;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Hard,
    Soft,
}

/// Tier bands: Critical 1-5, High-Risk 6-15, Medium 16-25, Strategic 26-N.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    Critical,
    HighRisk,
    Medium,
    Strategic,
}

impl PriorityBand {
    pub const ALL: [PriorityBand; 4] =
        [Self::Critical, Self::HighRisk, Self::Medium, Self::Strategic];

    pub fn for_tier(tier: u32) -> Self {
        match tier {
            0..=5 => Self::Critical,
            6..=15 => Self::HighRisk,
            16..=25 => Self::Medium,
            _ => Self::Strategic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::HighRisk => "high_risk",
            Self::Medium => "medium",
            Self::Strategic => "strategic",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// The entity a predicate measures inside one `(client, category)` scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeShape {
    Region,
    Supplier,
    Portfolio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    MaxRegionSharePct,
    MaxSupplierSharePct,
    HighRiskCountrySharePct,
    Hhi,
    SupplierCount,
    TailSupplierCount,
    QualifiedCandidateCount,
    Weighted(SupplierAttribute),
}

impl Metric {
    pub fn parse(value: &str) -> Option<Self> {
        let metric = match value {
            "max_region_share_pct" => Self::MaxRegionSharePct,
            "max_supplier_share_pct" => Self::MaxSupplierSharePct,
            "high_risk_country_share_pct" => Self::HighRiskCountrySharePct,
            "hhi" => Self::Hhi,
            "supplier_count" => Self::SupplierCount,
            "tail_supplier_count" => Self::TailSupplierCount,
            "qualified_candidate_count" => Self::QualifiedCandidateCount,
            other => {
                let attribute = other.strip_prefix("supplier.")?;
                Self::Weighted(SupplierAttribute::parse(attribute)?)
            }
        };
        Some(metric)
    }

    pub fn name(&self) -> String {
        match self {
            Self::MaxRegionSharePct => "max_region_share_pct".to_string(),
            Self::MaxSupplierSharePct => "max_supplier_share_pct".to_string(),
            Self::HighRiskCountrySharePct => "high_risk_country_share_pct".to_string(),
            Self::Hhi => "hhi".to_string(),
            Self::SupplierCount => "supplier_count".to_string(),
            Self::TailSupplierCount => "tail_supplier_count".to_string(),
            Self::QualifiedCandidateCount => "qualified_candidate_count".to_string(),
            Self::Weighted(attribute) => format!("supplier.{}", attribute.as_str()),
        }
    }

    pub fn scope_shape(&self) -> ScopeShape {
        match self {
            Self::MaxRegionSharePct | Self::HighRiskCountrySharePct => ScopeShape::Region,
            Self::MaxSupplierSharePct => ScopeShape::Supplier,
            Self::Hhi
            | Self::SupplierCount
            | Self::TailSupplierCount
            | Self::QualifiedCandidateCount
            | Self::Weighted(_) => ScopeShape::Portfolio,
        }
    }

    /// Inclusive range of values the metric can take; `None` upper bound means unbounded.
    pub fn domain(&self) -> (f64, Option<f64>) {
        match self {
            Self::MaxRegionSharePct | Self::MaxSupplierSharePct | Self::HighRiskCountrySharePct => {
                (0.0, Some(100.0))
            }
            Self::Hhi => (0.0, Some(10_000.0)),
            Self::SupplierCount | Self::TailSupplierCount | Self::QualifiedCandidateCount => {
                (0.0, None)
            }
            Self::Weighted(attribute) => {
                let (low, high) = attribute.domain();
                (low, Some(high))
            }
        }
    }

    /// Width of one risk step for soft-rule grading when a rule does not declare its own.
    pub fn default_sensitivity_band(&self) -> f64 {
        match self {
            Self::MaxRegionSharePct | Self::MaxSupplierSharePct | Self::HighRiskCountrySharePct => {
                10.0
            }
            Self::Hhi => 1_000.0,
            Self::SupplierCount | Self::TailSupplierCount | Self::QualifiedCandidateCount => 1.0,
            Self::Weighted(SupplierAttribute::QualityRating) => 0.5,
            Self::Weighted(SupplierAttribute::DebtToEquity) => 0.5,
            Self::Weighted(SupplierAttribute::CybersecurityRating) => 1.0,
            Self::Weighted(SupplierAttribute::ResponseTimeHours) => 12.0,
            Self::Weighted(SupplierAttribute::CarbonFootprintKgCo2) => 250.0,
            Self::Weighted(_) => 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    AtMost,
    AtLeast,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::AtMost => "<=",
            Self::AtLeast => ">=",
        }
    }
}

/// A condition bound at load time: `metric <op> threshold`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub metric: Metric,
    pub comparison: Comparison,
    pub threshold: f64,
}

impl Predicate {
    /// Returns whether `actual` satisfies the predicate, allowing `tolerance` of float noise.
    pub fn is_satisfied(&self, actual: f64, tolerance: f64) -> bool {
        match self.comparison {
            Comparison::AtMost => actual <= self.threshold + tolerance,
            Comparison::AtLeast => actual >= self.threshold - tolerance,
        }
    }

    /// Distance from the threshold on the failing side; zero when satisfied.
    pub fn breach(&self, actual: f64) -> f64 {
        match self.comparison {
            Comparison::AtMost => (actual - self.threshold).max(0.0),
            Comparison::AtLeast => (self.threshold - actual).max(0.0),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric.name(), self.comparison.symbol(), self.threshold)
    }
}

/// Declarative rule record as delivered by the rule-book collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    pub category: String,
    pub kind: RuleKind,
    pub priority_tier: u32,
    pub scope: ScopeShape,
    pub condition: String,
    #[serde(default)]
    pub sensitivity_band: Option<f64>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Validated, immutable rule with its predicate bound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub category: String,
    pub kind: RuleKind,
    pub priority_tier: u32,
    pub scope: ScopeShape,
    pub predicate: Predicate,
    pub sensitivity_band: f64,
    pub recommendation: Option<String>,
}

impl Rule {
    pub fn threshold(&self) -> f64 {
        self.predicate.threshold
    }

    pub fn band(&self) -> PriorityBand {
        PriorityBand::for_tier(self.priority_tier)
    }

    pub fn is_hard(&self) -> bool {
        self.kind == RuleKind::Hard
    }
}
