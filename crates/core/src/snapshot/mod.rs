use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::domain::allocation::{
    RegionId, ScopeKey, SpendRecord, SupplierCatalog, SupplierId, SupplierProfile, SupplierShare,
};
use crate::domain::plan::ReallocationAction;
use crate::errors::{SnapshotError, StepApplicationError};

/// Float slack allowed when checking that a scope's shares sum to 100%.
pub const CONSERVATION_EPSILON: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScopeAllocation {
    pub scope: ScopeKey,
    pub total: Decimal,
    pub shares: Vec<SupplierShare>,
}

impl ScopeAllocation {
    pub fn share_of(&self, supplier_id: &SupplierId) -> Option<&SupplierShare> {
        self.shares.iter().find(|share| &share.supplier_id == supplier_id)
    }

    pub fn total_share_pct(&self) -> f64 {
        self.shares.iter().map(|share| share.share_pct).sum()
    }

    pub fn region_shares(&self) -> BTreeMap<RegionId, f64> {
        let mut regions = BTreeMap::new();
        for share in &self.shares {
            *regions.entry(share.region.clone()).or_insert(0.0) += share.share_pct;
        }
        regions
    }

    pub fn region_share(&self, region: &RegionId) -> f64 {
        self.shares.iter().filter(|share| &share.region == region).map(|share| share.share_pct).sum()
    }

    fn verify_conservation(&self) -> Result<(), SnapshotError> {
        let total_pct = self.total_share_pct();
        if (total_pct - 100.0).abs() > CONSERVATION_EPSILON {
            return Err(SnapshotError::ConservationBroken { scope: self.scope.clone(), total_pct });
        }
        Ok(())
    }
}

/// Immutable point-in-time spend distribution. Every change yields a new value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AllocationSnapshot {
    generation: u32,
    #[serde(serialize_with = "serialize_scopes")]
    scopes: BTreeMap<ScopeKey, ScopeAllocation>,
    #[serde(skip)]
    catalog: Arc<SupplierCatalog>,
}

fn serialize_scopes<S>(
    scopes: &BTreeMap<ScopeKey, ScopeAllocation>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(scopes.values())
}

impl AllocationSnapshot {
    /// Aggregates raw spend lines into per-scope supplier shares.
    pub fn from_spend_records(
        records: &[SpendRecord],
        catalog: Arc<SupplierCatalog>,
    ) -> Result<Self, SnapshotError> {
        let mut amounts: BTreeMap<ScopeKey, BTreeMap<SupplierId, (RegionId, Decimal)>> =
            BTreeMap::new();

        for (index, record) in records.iter().enumerate() {
            let client = record.client.0.trim();
            if client.is_empty() {
                return Err(SnapshotError::EmptyField { index, field: "client" });
            }
            let category = record.category.0.trim();
            if category.is_empty() {
                return Err(SnapshotError::EmptyField { index, field: "category" });
            }
            let supplier = record.supplier.0.trim();
            if supplier.is_empty() {
                return Err(SnapshotError::EmptyField { index, field: "supplier" });
            }
            let region = record.region.0.trim();
            if region.is_empty() {
                return Err(SnapshotError::EmptyField { index, field: "region" });
            }
            if record.amount < Decimal::ZERO {
                return Err(SnapshotError::NegativeAmount { index });
            }

            let scope = ScopeKey::new(client, category);
            let region = RegionId(region.to_owned());
            let entry = amounts
                .entry(scope.clone())
                .or_default()
                .entry(SupplierId(supplier.to_owned()))
                .or_insert_with(|| (region.clone(), Decimal::ZERO));
            if entry.0 != region {
                return Err(SnapshotError::InconsistentRegion {
                    scope,
                    supplier: SupplierId(supplier.to_owned()),
                    first: entry.0.clone(),
                    second: region,
                });
            }
            entry.1 += record.amount;
        }

        let mut scopes = BTreeMap::new();
        for (scope, suppliers) in amounts {
            let total = suppliers.values().map(|(_, amount)| *amount).sum::<Decimal>();
            if total <= Decimal::ZERO {
                return Err(SnapshotError::EmptyScope { scope });
            }

            let shares = suppliers
                .into_iter()
                .filter(|(_, (_, amount))| *amount > Decimal::ZERO)
                .map(|(supplier_id, (region, amount))| SupplierShare {
                    supplier_id,
                    region,
                    amount,
                    share_pct: percent_of(amount, total),
                })
                .collect::<Vec<_>>();

            let allocation = ScopeAllocation { scope: scope.clone(), total, shares };
            allocation.verify_conservation()?;
            scopes.insert(scope, allocation);
        }

        Ok(Self { generation: 0, scopes, catalog })
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn scopes(&self) -> impl Iterator<Item = &ScopeAllocation> {
        self.scopes.values()
    }

    pub fn scope(&self, scope: &ScopeKey) -> Option<&ScopeAllocation> {
        self.scopes.get(scope)
    }

    pub fn catalog(&self) -> &SupplierCatalog {
        &self.catalog
    }

    /// Catalog profile for a supplier, or neutral defaults when it is unknown.
    pub fn profile(&self, supplier_id: &SupplierId, region: &RegionId) -> Cow<'_, SupplierProfile> {
        match self.catalog.get(supplier_id) {
            Some(profile) => Cow::Borrowed(profile),
            None => Cow::Owned(SupplierProfile::unrated(supplier_id.clone(), region.clone())),
        }
    }

    /// Materializes `action` as a new snapshot; `self` is left untouched.
    pub fn apply(
        &self,
        scope: &ScopeKey,
        action: &ReallocationAction,
        tolerance: f64,
    ) -> Result<Self, StepApplicationError> {
        if !(action.shift_pct > 0.0) {
            return Err(StepApplicationError::NonPositiveShift { shift_pct: action.shift_pct });
        }
        if action.from_supplier == action.to_supplier {
            return Err(StepApplicationError::SelfTransfer {
                supplier: action.from_supplier.clone(),
            });
        }

        let current = self
            .scopes
            .get(scope)
            .ok_or_else(|| StepApplicationError::UnknownScope { scope: scope.clone() })?;
        let donor = current.share_of(&action.from_supplier).ok_or_else(|| {
            StepApplicationError::DonorNotInScope {
                scope: scope.clone(),
                supplier: action.from_supplier.clone(),
            }
        })?;
        if donor.share_pct + tolerance < action.shift_pct {
            return Err(StepApplicationError::InsufficientDonorShare {
                supplier: action.from_supplier.clone(),
                available_pct: donor.share_pct,
                requested_pct: action.shift_pct,
            });
        }
        let shift = action.shift_pct.min(donor.share_pct);

        let incumbent = current.share_of(&action.to_supplier);
        let receiver_profile = self.catalog.get(&action.to_supplier);
        let receiver_region = match (incumbent, receiver_profile) {
            (Some(share), _) => share.region.clone(),
            (None, Some(profile)) if profile.qualified_for(&scope.category) => {
                profile.region.clone()
            }
            _ => {
                return Err(StepApplicationError::ReceiverNotQualified {
                    supplier: action.to_supplier.clone(),
                    category: scope.category.clone(),
                })
            }
        };

        let resulting_pct = incumbent.map(|share| share.share_pct).unwrap_or(0.0) + shift;
        if let Some(capacity_pct) = receiver_profile.and_then(|profile| profile.max_share_pct) {
            if resulting_pct > capacity_pct + tolerance {
                return Err(StepApplicationError::ReceiverCapacityExceeded {
                    supplier: action.to_supplier.clone(),
                    resulting_pct,
                    capacity_pct,
                });
            }
        }

        let mut next = current.clone();
        for share in &mut next.shares {
            if share.supplier_id == action.from_supplier {
                share.share_pct -= shift;
            } else if share.supplier_id == action.to_supplier {
                share.share_pct += shift;
            }
        }
        if incumbent.is_none() {
            next.shares.push(SupplierShare {
                supplier_id: action.to_supplier.clone(),
                region: receiver_region,
                amount: Decimal::ZERO,
                share_pct: shift,
            });
        }
        next.shares.retain(|share| share.share_pct > CONSERVATION_EPSILON);
        next.shares.sort_by(|left, right| left.supplier_id.cmp(&right.supplier_id));
        for share in &mut next.shares {
            share.amount = amount_for(next.total, share.share_pct);
        }
        next.verify_conservation()?;

        let mut scopes = self.scopes.clone();
        scopes.insert(scope.clone(), next);
        Ok(Self { generation: self.generation + 1, scopes, catalog: Arc::clone(&self.catalog) })
    }

    /// Returns the first scope whose shares do not sum to 100%.
    pub fn check_conservation(&self) -> Result<(), SnapshotError> {
        self.scopes.values().try_for_each(ScopeAllocation::verify_conservation)
    }

    /// Stable content hash of the allocation, independent of generation.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(&self.scopes.values().collect::<Vec<_>>())
            .unwrap_or_else(|error| format!("serialization_error:{error}"));
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("sha256:{:x}", hasher.finalize())
    }
}

fn percent_of(amount: Decimal, total: Decimal) -> f64 {
    (amount / total * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}

fn amount_for(total: Decimal, share_pct: f64) -> Decimal {
    let fraction = Decimal::from_f64(share_pct / 100.0).unwrap_or(Decimal::ZERO);
    (total * fraction).round_dp(2)
}
