use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::domain::allocation::{RegionId, SupplierAttribute, SupplierId, SupplierProfile, SupplierShare};
use crate::domain::conflict::StrategyKind;
use crate::domain::plan::ReallocationAction;
use crate::domain::rule::{Comparison, Metric, Rule};
use crate::rules::metrics::{dominant_region, dominant_supplier, measure};
use crate::rules::registry::RuleSet;
use crate::snapshot::{AllocationSnapshot, ScopeAllocation};

/// Portfolio-wide ceilings every receiver must stay under, derived from the rule set.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct ShareCaps {
    pub supplier_pct: Option<f64>,
    pub region_pct: Option<f64>,
    pub screens_high_risk: bool,
}

impl ShareCaps {
    pub fn from_rules(rules: &RuleSet) -> Self {
        let mut caps = Self::default();
        for rule in rules.rules() {
            let predicate = &rule.predicate;
            match (predicate.metric, predicate.comparison) {
                (Metric::MaxSupplierSharePct, Comparison::AtMost) => {
                    caps.supplier_pct = Some(min_cap(caps.supplier_pct, predicate.threshold));
                }
                (Metric::MaxRegionSharePct, Comparison::AtMost) => {
                    caps.region_pct = Some(min_cap(caps.region_pct, predicate.threshold));
                }
                (Metric::HighRiskCountrySharePct, Comparison::AtMost) => {
                    caps.screens_high_risk = true;
                }
                _ => {}
            }
        }
        caps
    }
}

fn min_cap(current: Option<f64>, threshold: f64) -> f64 {
    current.map(|cap| cap.min(threshold)).unwrap_or(threshold)
}

/// Per-group constraints a receiver has to satisfy.
#[derive(Clone, Debug)]
pub(crate) struct GroupContext<'a> {
    pub strategies: Vec<StrategyKind>,
    pub attribute_rules: Vec<&'a Rule>,
    pub caps: ShareCaps,
    pub max_step_pct: f64,
    pub tolerance: f64,
}

impl GroupContext<'_> {
    fn uses(&self, kind: StrategyKind) -> bool {
        self.strategies.contains(&kind)
    }
}

/// A supplier that could absorb share in a scope: an incumbent or a qualified catalog entry.
#[derive(Clone, Debug)]
pub(crate) struct Candidate<'a> {
    pub supplier_id: SupplierId,
    pub region: RegionId,
    pub share_pct: f64,
    pub profile: Cow<'a, SupplierProfile>,
}

pub(crate) fn candidate_pool<'a>(
    allocation: &ScopeAllocation,
    snapshot: &'a AllocationSnapshot,
) -> Vec<Candidate<'a>> {
    let mut pool = BTreeMap::new();
    for share in &allocation.shares {
        pool.insert(
            share.supplier_id.clone(),
            Candidate {
                supplier_id: share.supplier_id.clone(),
                region: share.region.clone(),
                share_pct: share.share_pct,
                profile: snapshot.profile(&share.supplier_id, &share.region),
            },
        );
    }
    for profile in snapshot.catalog().qualified_for(&allocation.scope.category) {
        pool.entry(profile.id.clone()).or_insert_with(|| Candidate {
            supplier_id: profile.id.clone(),
            region: profile.region.clone(),
            share_pct: 0.0,
            profile: Cow::Borrowed(profile),
        });
    }
    pool.into_values().collect()
}

/// Whether the planner knows a reallocation that moves this predicate toward compliance.
pub(crate) fn is_remediable(metric: Metric, comparison: Comparison) -> bool {
    matches!(
        (metric, comparison),
        (Metric::MaxRegionSharePct, Comparison::AtMost)
            | (Metric::MaxSupplierSharePct, Comparison::AtMost)
            | (Metric::HighRiskCountrySharePct, Comparison::AtMost)
            | (Metric::Hhi, Comparison::AtMost)
            | (Metric::SupplierCount, Comparison::AtLeast)
            | (Metric::Weighted(_), _)
    )
}

enum Sizing {
    /// Shift exactly the breach, in share points.
    Breach(f64),
    /// Shift enough to cut HHI by the breach, capped at the pair's equalization point.
    Hhi(f64),
    /// Hand half the donor's share to a newcomer.
    HalfDonor,
    /// Shift enough to move the weighted average by the breach.
    Attribute { attribute: SupplierAttribute, breach: f64, donor_value: f64 },
}

enum ReceiverFilter {
    Any,
    OutsideRegion(RegionId),
    NotHighRisk,
    SmallerThanDonor,
    Newcomer,
    Better { attribute: SupplierAttribute, comparison: Comparison, donor_value: f64 },
}

struct Selection<'a> {
    donor: &'a SupplierShare,
    sizing: Sizing,
    filter: ReceiverFilter,
}

/// Candidate reallocations for `driver`, best first. Empty when nothing qualifies.
pub(crate) fn propose(
    driver: &Rule,
    context: &GroupContext<'_>,
    allocation: &ScopeAllocation,
    snapshot: &AllocationSnapshot,
) -> Vec<ReallocationAction> {
    let predicate = &driver.predicate;
    let breach = predicate.breach(measure(predicate.metric, allocation, snapshot));
    if breach <= 0.0 {
        return Vec::new();
    }
    let Some(selection) = select(driver, breach, allocation, snapshot) else {
        return Vec::new();
    };
    let donor = selection.donor;

    let mut receivers = candidate_pool(allocation, snapshot)
        .into_iter()
        .filter(|candidate| candidate.supplier_id != donor.supplier_id)
        .filter(|candidate| admits(&selection.filter, candidate, donor))
        .filter(|candidate| satisfies_group(context, candidate, donor))
        .filter_map(|candidate| {
            let amount = size(&selection.sizing, donor, &candidate)?
                .min(context.max_step_pct)
                .min(donor.share_pct)
                .min(headroom(context.caps, &candidate, allocation, &donor.region));
            (amount > context.tolerance).then_some((candidate, amount))
        })
        .collect::<Vec<_>>();

    receivers.sort_by(|(left, _), (right, _)| receiver_order(&selection.sizing, allocation, left, right));

    receivers
        .into_iter()
        .map(|(candidate, amount)| ReallocationAction {
            from_supplier: donor.supplier_id.clone(),
            from_region: donor.region.clone(),
            to_supplier: candidate.supplier_id,
            to_region: candidate.region,
            shift_pct: amount,
        })
        .collect()
}

fn select<'a>(
    driver: &Rule,
    breach: f64,
    allocation: &'a ScopeAllocation,
    snapshot: &AllocationSnapshot,
) -> Option<Selection<'a>> {
    let predicate = &driver.predicate;
    let selection = match (predicate.metric, predicate.comparison) {
        (Metric::MaxRegionSharePct, Comparison::AtMost) => {
            let (region, _) = dominant_region(allocation)?;
            Selection {
                donor: largest_where(allocation, |share| share.region == region)?,
                sizing: Sizing::Breach(breach),
                filter: ReceiverFilter::OutsideRegion(region),
            }
        }
        (Metric::MaxSupplierSharePct, Comparison::AtMost) => Selection {
            donor: dominant_supplier(allocation)?,
            sizing: Sizing::Breach(breach),
            filter: ReceiverFilter::Any,
        },
        (Metric::HighRiskCountrySharePct, Comparison::AtMost) => Selection {
            donor: largest_where(allocation, |share| {
                snapshot.profile(&share.supplier_id, &share.region).high_risk_country
            })?,
            sizing: Sizing::Breach(breach),
            filter: ReceiverFilter::NotHighRisk,
        },
        (Metric::Hhi, Comparison::AtMost) => Selection {
            donor: dominant_supplier(allocation)?,
            sizing: Sizing::Hhi(breach),
            filter: ReceiverFilter::SmallerThanDonor,
        },
        (Metric::SupplierCount, Comparison::AtLeast) => Selection {
            donor: dominant_supplier(allocation)?,
            sizing: Sizing::HalfDonor,
            filter: ReceiverFilter::Newcomer,
        },
        (Metric::Weighted(attribute), comparison) => {
            let value_of = |share: &SupplierShare| {
                snapshot.profile(&share.supplier_id, &share.region).attribute(attribute)
            };
            let donor = allocation.shares.iter().max_by(|left, right| {
                let worse = match comparison {
                    Comparison::AtLeast => value_of(*right).total_cmp(&value_of(*left)),
                    Comparison::AtMost => value_of(*left).total_cmp(&value_of(*right)),
                };
                worse
                    .then_with(|| left.share_pct.total_cmp(&right.share_pct))
                    .then_with(|| right.supplier_id.cmp(&left.supplier_id))
            })?;
            let donor_value = value_of(donor);
            Selection {
                donor,
                sizing: Sizing::Attribute { attribute, breach, donor_value },
                filter: ReceiverFilter::Better { attribute, comparison, donor_value },
            }
        }
        _ => return None,
    };
    Some(selection)
}

fn largest_where(
    allocation: &ScopeAllocation,
    predicate: impl Fn(&SupplierShare) -> bool,
) -> Option<&SupplierShare> {
    allocation.shares.iter().filter(|share| predicate(share)).max_by(|left, right| {
        left.share_pct
            .total_cmp(&right.share_pct)
            .then_with(|| right.supplier_id.cmp(&left.supplier_id))
    })
}

fn admits(filter: &ReceiverFilter, candidate: &Candidate<'_>, donor: &SupplierShare) -> bool {
    match filter {
        ReceiverFilter::Any => true,
        ReceiverFilter::OutsideRegion(region) => &candidate.region != region,
        ReceiverFilter::NotHighRisk => !candidate.profile.high_risk_country,
        ReceiverFilter::SmallerThanDonor => candidate.share_pct < donor.share_pct,
        ReceiverFilter::Newcomer => candidate.share_pct <= 0.0,
        ReceiverFilter::Better { attribute, comparison, donor_value } => {
            let value = candidate.profile.attribute(*attribute);
            match comparison {
                Comparison::AtLeast => value > *donor_value,
                Comparison::AtMost => value < *donor_value,
            }
        }
    }
}

fn satisfies_group(context: &GroupContext<'_>, candidate: &Candidate<'_>, donor: &SupplierShare) -> bool {
    if context.caps.screens_high_risk && candidate.profile.high_risk_country {
        return false;
    }
    if context.uses(StrategyKind::DiversifyOutOfRegion) && candidate.region == donor.region {
        return false;
    }
    if context.uses(StrategyKind::IncumbentsOnly) && candidate.share_pct <= 0.0 {
        return false;
    }
    if context.uses(StrategyKind::QualifiedPoolOnly) {
        return context.attribute_rules.iter().all(|rule| match rule.predicate.metric {
            Metric::Weighted(attribute) => rule
                .predicate
                .is_satisfied(candidate.profile.attribute(attribute), context.tolerance),
            _ => true,
        });
    }
    true
}

fn size(sizing: &Sizing, donor: &SupplierShare, candidate: &Candidate<'_>) -> Option<f64> {
    match sizing {
        Sizing::Breach(breach) => Some(*breach),
        Sizing::Hhi(breach) => {
            let gap = donor.share_pct - candidate.share_pct;
            if gap <= 0.0 {
                return None;
            }
            // Moving x cuts HHI by 2x(gap - x); solve for the smaller root.
            let discriminant = gap * gap - 2.0 * breach;
            if discriminant >= 0.0 {
                Some((gap - discriminant.sqrt()) / 2.0)
            } else {
                Some(gap / 2.0)
            }
        }
        Sizing::HalfDonor => Some(donor.share_pct / 2.0),
        Sizing::Attribute { attribute, breach, donor_value } => {
            let spread = (candidate.profile.attribute(*attribute) - donor_value).abs();
            (spread > 0.0).then(|| breach * 100.0 / spread)
        }
    }
}

/// Share points `candidate` can still absorb without tripping a cap.
pub(crate) fn headroom(
    caps: ShareCaps,
    candidate: &Candidate<'_>,
    allocation: &ScopeAllocation,
    donor_region: &RegionId,
) -> f64 {
    let mut room = 100.0 - candidate.share_pct;
    if let Some(cap) = caps.supplier_pct {
        room = room.min(cap - candidate.share_pct);
    }
    if let Some(cap) = caps.region_pct {
        if &candidate.region != donor_region {
            room = room.min(cap - allocation.region_share(&candidate.region));
        }
    }
    if let Some(capacity) = candidate.profile.max_share_pct {
        room = room.min(capacity - candidate.share_pct);
    }
    room.max(0.0)
}

fn receiver_order(
    sizing: &Sizing,
    allocation: &ScopeAllocation,
    left: &Candidate<'_>,
    right: &Candidate<'_>,
) -> Ordering {
    if let Sizing::Attribute { attribute, donor_value, .. } = sizing {
        let left_value = left.profile.attribute(*attribute);
        let right_value = right.profile.attribute(*attribute);
        // Larger distance from the donor moves the average furthest per point shifted.
        let by_spread = (right_value - donor_value).abs().total_cmp(&(left_value - donor_value).abs());
        return by_spread.then_with(|| left.supplier_id.cmp(&right.supplier_id));
    }

    allocation
        .region_share(&left.region)
        .total_cmp(&allocation.region_share(&right.region))
        .then_with(|| left.share_pct.total_cmp(&right.share_pct))
        .then_with(|| right.profile.esg_score.total_cmp(&left.profile.esg_score))
        .then_with(|| left.supplier_id.cmp(&right.supplier_id))
}
