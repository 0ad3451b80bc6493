use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(ClientId);
string_id!(CategoryId);
string_id!(SupplierId);
string_id!(RegionId);

/// One `(client, category)` pair; the unit every rule is evaluated against.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub client: ClientId,
    pub category: CategoryId,
}

impl ScopeKey {
    pub fn new(client: impl Into<String>, category: impl Into<String>) -> Self {
        Self { client: ClientId(client.into()), category: CategoryId(category.into()) }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client, self.category)
    }
}

/// Raw spend line as supplied by upstream data collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub client: ClientId,
    pub category: CategoryId,
    pub supplier: SupplierId,
    pub region: RegionId,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierShare {
    pub supplier_id: SupplierId,
    pub region: RegionId,
    pub amount: Decimal,
    pub share_pct: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierAttribute {
    EsgScore,
    QualityRating,
    DeliveryReliabilityPct,
    DebtToEquity,
    CapacityUtilizationPct,
    LeadTimeVariancePct,
    ResponseTimeHours,
    CybersecurityRating,
    InnovationScore,
    CarbonFootprintKgCo2,
    PerformanceScore,
}

impl SupplierAttribute {
    pub const ALL: [SupplierAttribute; 11] = [
        Self::EsgScore,
        Self::QualityRating,
        Self::DeliveryReliabilityPct,
        Self::DebtToEquity,
        Self::CapacityUtilizationPct,
        Self::LeadTimeVariancePct,
        Self::ResponseTimeHours,
        Self::CybersecurityRating,
        Self::InnovationScore,
        Self::CarbonFootprintKgCo2,
        Self::PerformanceScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EsgScore => "esg_score",
            Self::QualityRating => "quality_rating",
            Self::DeliveryReliabilityPct => "delivery_reliability_pct",
            Self::DebtToEquity => "debt_to_equity",
            Self::CapacityUtilizationPct => "capacity_utilization_pct",
            Self::LeadTimeVariancePct => "lead_time_variance_pct",
            Self::ResponseTimeHours => "response_time_hours",
            Self::CybersecurityRating => "cybersecurity_rating",
            Self::InnovationScore => "innovation_score",
            Self::CarbonFootprintKgCo2 => "carbon_footprint_kg_co2",
            Self::PerformanceScore => "performance_score",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attribute| attribute.as_str() == value)
    }

    /// Inclusive value domain used to validate thresholds at load time.
    pub fn domain(&self) -> (f64, f64) {
        match self {
            Self::EsgScore
            | Self::DeliveryReliabilityPct
            | Self::CapacityUtilizationPct
            | Self::InnovationScore
            | Self::PerformanceScore => (0.0, 100.0),
            Self::QualityRating => (0.0, 5.0),
            Self::DebtToEquity => (0.0, 20.0),
            Self::LeadTimeVariancePct => (0.0, 500.0),
            Self::ResponseTimeHours => (0.0, 720.0),
            Self::CybersecurityRating => (1.0, 5.0),
            Self::CarbonFootprintKgCo2 => (0.0, 100_000.0),
        }
    }
}

/// Letter grade from a supplier security assessment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CyberGrade {
    A,
    #[default]
    B,
    C,
    D,
    F,
}

impl CyberGrade {
    pub fn score(&self) -> f64 {
        match self {
            Self::A => 5.0,
            Self::B => 4.0,
            Self::C => 3.0,
            Self::D => 2.0,
            Self::F => 1.0,
        }
    }
}

fn default_lead_time_variance_pct() -> f64 {
    15.0
}

fn default_response_time_hours() -> f64 {
    24.0
}

fn default_innovation_score() -> f64 {
    60.0
}

fn default_carbon_footprint_kg_co2() -> f64 {
    500.0
}

fn default_performance_score() -> f64 {
    80.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierProfile {
    pub id: SupplierId,
    pub name: String,
    pub region: RegionId,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub categories: BTreeSet<CategoryId>,
    pub esg_score: f64,
    pub quality_rating: f64,
    pub delivery_reliability_pct: f64,
    pub debt_to_equity: f64,
    pub capacity_utilization_pct: f64,
    #[serde(default = "default_lead_time_variance_pct")]
    pub lead_time_variance_pct: f64,
    #[serde(default = "default_response_time_hours")]
    pub response_time_hours: f64,
    /// Unassessed suppliers count as grade B.
    #[serde(default)]
    pub cybersecurity_rating: CyberGrade,
    #[serde(default = "default_innovation_score")]
    pub innovation_score: f64,
    #[serde(default = "default_carbon_footprint_kg_co2")]
    pub carbon_footprint_kg_co2: f64,
    #[serde(default = "default_performance_score")]
    pub performance_score: f64,
    #[serde(default)]
    pub high_risk_country: bool,
    /// Largest share of a single scope this supplier can absorb.
    #[serde(default)]
    pub max_share_pct: Option<f64>,
}

impl SupplierProfile {
    /// Profile for a supplier that appears in spend data but not in the catalog.
    pub fn unrated(id: SupplierId, region: RegionId) -> Self {
        Self {
            name: id.0.clone(),
            id,
            region,
            country: String::new(),
            categories: BTreeSet::new(),
            esg_score: 75.0,
            quality_rating: 4.0,
            delivery_reliability_pct: 85.0,
            debt_to_equity: 1.5,
            capacity_utilization_pct: 70.0,
            lead_time_variance_pct: default_lead_time_variance_pct(),
            response_time_hours: default_response_time_hours(),
            cybersecurity_rating: CyberGrade::default(),
            innovation_score: default_innovation_score(),
            carbon_footprint_kg_co2: default_carbon_footprint_kg_co2(),
            performance_score: default_performance_score(),
            high_risk_country: false,
            max_share_pct: None,
        }
    }

    pub fn attribute(&self, attribute: SupplierAttribute) -> f64 {
        match attribute {
            SupplierAttribute::EsgScore => self.esg_score,
            SupplierAttribute::QualityRating => self.quality_rating,
            SupplierAttribute::DeliveryReliabilityPct => self.delivery_reliability_pct,
            SupplierAttribute::DebtToEquity => self.debt_to_equity,
            SupplierAttribute::CapacityUtilizationPct => self.capacity_utilization_pct,
            SupplierAttribute::LeadTimeVariancePct => self.lead_time_variance_pct,
            SupplierAttribute::ResponseTimeHours => self.response_time_hours,
            SupplierAttribute::CybersecurityRating => self.cybersecurity_rating.score(),
            SupplierAttribute::InnovationScore => self.innovation_score,
            SupplierAttribute::CarbonFootprintKgCo2 => self.carbon_footprint_kg_co2,
            SupplierAttribute::PerformanceScore => self.performance_score,
        }
    }

    pub fn qualified_for(&self, category: &CategoryId) -> bool {
        self.categories.contains(category)
    }
}

/// Read-only supplier master data shared by every snapshot of one analysis.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplierCatalog {
    #[serde(default)]
    pub suppliers: Vec<SupplierProfile>,
}

impl SupplierCatalog {
    pub fn new(mut suppliers: Vec<SupplierProfile>) -> Self {
        suppliers.sort_by(|left, right| left.id.cmp(&right.id));
        suppliers.dedup_by(|left, right| left.id == right.id);
        Self { suppliers }
    }

    pub fn get(&self, supplier_id: &SupplierId) -> Option<&SupplierProfile> {
        self.suppliers.iter().find(|profile| &profile.id == supplier_id)
    }

    pub fn qualified_for<'a, 'c>(
        &'a self,
        category: &'c CategoryId,
    ) -> impl Iterator<Item = &'a SupplierProfile> + 'c
    where
        'a: 'c,
    {
        self.suppliers.iter().filter(move |profile| profile.qualified_for(category))
    }
}
