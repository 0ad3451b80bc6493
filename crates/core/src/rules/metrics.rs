use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::domain::allocation::{RegionId, SupplierShare};
use crate::domain::rule::Metric;
use crate::snapshot::{AllocationSnapshot, ScopeAllocation};

/// Bottom share of spend whose supplier count `tail_supplier_count` reports.
pub const TAIL_SPEND_PCT: f64 = 20.0;

pub fn measure(metric: Metric, allocation: &ScopeAllocation, snapshot: &AllocationSnapshot) -> f64 {
    match metric {
        Metric::MaxRegionSharePct => dominant_region(allocation).map(|(_, share)| share).unwrap_or(0.0),
        Metric::MaxSupplierSharePct => {
            dominant_supplier(allocation).map(|share| share.share_pct).unwrap_or(0.0)
        }
        Metric::HighRiskCountrySharePct => allocation
            .shares
            .iter()
            .filter(|share| snapshot.profile(&share.supplier_id, &share.region).high_risk_country)
            .map(|share| share.share_pct)
            .sum(),
        Metric::Hhi => allocation.shares.iter().map(|share| share.share_pct * share.share_pct).sum(),
        Metric::SupplierCount => allocation.shares.len() as f64,
        Metric::TailSupplierCount => tail_supplier_count(allocation) as f64,
        Metric::QualifiedCandidateCount => {
            let mut qualified = snapshot
                .catalog()
                .qualified_for(&allocation.scope.category)
                .map(|profile| profile.id.clone())
                .collect::<BTreeSet<_>>();
            qualified.extend(allocation.shares.iter().map(|share| share.supplier_id.clone()));
            qualified.len() as f64
        }
        Metric::Weighted(attribute) => allocation
            .shares
            .iter()
            .map(|share| {
                share.share_pct / 100.0
                    * snapshot.profile(&share.supplier_id, &share.region).attribute(attribute)
            })
            .sum(),
    }
}

/// Region with the largest share; ties resolve to the lexically smallest region id.
pub fn dominant_region(allocation: &ScopeAllocation) -> Option<(RegionId, f64)> {
    allocation.region_shares().into_iter().max_by(|left, right| {
        left.1.total_cmp(&right.1).then_with(|| right.0.cmp(&left.0))
    })
}

/// Supplier with the largest share; ties resolve to the lexically smallest supplier id.
pub fn dominant_supplier(allocation: &ScopeAllocation) -> Option<&SupplierShare> {
    allocation.shares.iter().max_by(|left, right| by_share_then_reverse_id(left, right))
}

fn by_share_then_reverse_id(left: &SupplierShare, right: &SupplierShare) -> Ordering {
    left.share_pct
        .total_cmp(&right.share_pct)
        .then_with(|| right.supplier_id.cmp(&left.supplier_id))
}

fn tail_supplier_count(allocation: &ScopeAllocation) -> usize {
    let mut ascending = allocation.shares.iter().collect::<Vec<_>>();
    ascending.sort_by(|left, right| {
        left.share_pct.total_cmp(&right.share_pct).then_with(|| left.supplier_id.cmp(&right.supplier_id))
    });

    let mut cumulative = 0.0;
    let mut count = 0;
    for share in ascending {
        cumulative += share.share_pct;
        if cumulative > TAIL_SPEND_PCT {
            break;
        }
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::{dominant_region, dominant_supplier, measure};
    use crate::domain::allocation::{
        CategoryId, ScopeKey, SpendRecord, SupplierAttribute, SupplierCatalog, SupplierId,
        SupplierProfile,
    };
    use crate::domain::rule::Metric;
    use crate::snapshot::AllocationSnapshot;

    fn snapshot() -> AllocationSnapshot {
        let record = |supplier: &str, region: &str, amount: i64| SpendRecord {
            client: "C1".into(),
            category: "Oils".into(),
            supplier: supplier.into(),
            region: region.into(),
            amount: Decimal::new(amount, 0),
        };
        let mut risky = SupplierProfile::unrated(SupplierId::from("B"), "APAC".into());
        risky.high_risk_country = true;
        risky.esg_score = 40.0;
        let mut spare = SupplierProfile::unrated(SupplierId::from("X"), "EMEA".into());
        spare.categories = BTreeSet::from([CategoryId::from("Oils")]);
        AllocationSnapshot::from_spend_records(
            &[
                record("A", "APAC", 500),
                record("B", "APAC", 300),
                record("C", "EMEA", 150),
                record("D", "AMER", 50),
            ],
            Arc::new(SupplierCatalog::new(vec![risky, spare])),
        )
        .expect("snapshot")
    }

    fn value(metric: Metric) -> f64 {
        let snapshot = snapshot();
        let allocation = snapshot.scope(&ScopeKey::new("C1", "Oils")).expect("scope");
        measure(metric, allocation, &snapshot)
    }

    #[test]
    fn concentration_metrics_follow_share_distribution() {
        assert!((value(Metric::MaxRegionSharePct) - 80.0).abs() < 1e-9);
        assert!((value(Metric::MaxSupplierSharePct) - 50.0).abs() < 1e-9);
        assert!((value(Metric::Hhi) - (2500.0 + 900.0 + 225.0 + 25.0)).abs() < 1e-6);
        assert_eq!(value(Metric::SupplierCount), 4.0);
        assert_eq!(value(Metric::TailSupplierCount), 2.0);
        assert!((value(Metric::HighRiskCountrySharePct) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_attributes_use_catalog_or_neutral_defaults() {
        let expected = 0.5 * 75.0 + 0.3 * 40.0 + 0.15 * 75.0 + 0.05 * 75.0;
        assert!((value(Metric::Weighted(SupplierAttribute::EsgScore)) - expected).abs() < 1e-9);
    }

    #[test]
    fn qualified_candidates_include_incumbents_and_catalog_pool() {
        assert_eq!(value(Metric::QualifiedCandidateCount), 5.0);
    }

    #[test]
    fn dominant_entities_are_deterministic() {
        let snapshot = snapshot();
        let allocation = snapshot.scope(&ScopeKey::new("C1", "Oils")).expect("scope");
        assert_eq!(dominant_region(allocation).map(|(region, _)| region.0), Some("APAC".to_owned()));
        assert_eq!(dominant_supplier(allocation).map(|share| share.supplier_id.0.as_str()), Some("A"));
    }
}
