use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use spendguard_core::{
    CancellationToken, CategoryId, EngineSettings, PriorityBand, RegionId, RemediationRuntime,
    ReviewReason, RuleBook, RuleId, ScopeKey, SpendRecord, StepStatus, StrategyKind, SupplierCatalog,
    SupplierId, SupplierProfile,
};

const TOLERANCE: f64 = 0.01;

fn record(supplier: &str, region: &str, amount: i64) -> SpendRecord {
    SpendRecord {
        client: "C1".into(),
        category: "Oils".into(),
        supplier: supplier.into(),
        region: region.into(),
        amount: Decimal::new(amount, 1),
    }
}

fn qualified(id: &str, region: &str, esg_score: f64) -> SupplierProfile {
    let mut profile = SupplierProfile::unrated(SupplierId::from(id), RegionId::from(region));
    profile.categories = BTreeSet::from([CategoryId::from("Oils")]);
    profile.esg_score = esg_score;
    profile
}

fn apac_records() -> Vec<SpendRecord> {
    vec![record("A", "APAC", 935), record("B", "APAC", 65)]
}

fn apac_catalog() -> Arc<SupplierCatalog> {
    Arc::new(SupplierCatalog::new(vec![
        qualified("N1", "EMEA", 82.0),
        qualified("N2", "AMER", 78.0),
        qualified("N3", "EMEA", 76.0),
    ]))
}

fn runtime_with(settings: EngineSettings) -> RemediationRuntime {
    RemediationRuntime::from_rule_book(&RuleBook::builtin().expect("builtin rule book"), settings)
}

fn runtime() -> RemediationRuntime {
    runtime_with(EngineSettings::default())
}

fn scope() -> ScopeKey {
    ScopeKey::new("C1", "Oils")
}

fn ids(rule_ids: &[&str]) -> Vec<RuleId> {
    rule_ids.iter().map(|id| RuleId::from(*id)).collect()
}

#[test]
fn apac_oils_concentration_converges_through_out_of_region_moves() {
    let report = runtime().analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("report");

    let initial = report.initial_violations.iter().map(|record| record.rule_id.clone()).collect::<Vec<_>>();
    for rule_id in ids(&["R001", "R003", "R023"]) {
        assert!(initial.contains(&rule_id), "expected initial violation {rule_id}");
    }
    assert!(report
        .plan
        .conflicts
        .iter()
        .any(|edge| edge.rule_a == RuleId::from("R001") && edge.rule_b == RuleId::from("R003")));

    assert!(report.converged);
    assert!(report.execution.residual_violations.is_empty());
    assert!(report.execution.step_outcomes.iter().all(|outcome| outcome.status == StepStatus::Accepted));

    let allocation = report.execution.final_snapshot.scope(&scope()).expect("scope");
    assert!(allocation.region_share(&RegionId::from("APAC")) <= 40.0 + TOLERANCE);
    assert!(allocation.shares.iter().all(|share| share.share_pct <= 60.0 + TOLERANCE));

    let qualified_receivers = BTreeSet::from(["N1", "N2", "N3"]);
    for step in &report.plan.steps {
        assert!(qualified_receivers.contains(step.action.to_supplier.0.as_str()));
        if step.priority_band == PriorityBand::Critical {
            assert_ne!(step.action.to_region, RegionId::from("APAC"));
        }
    }
}

#[test]
fn steps_follow_priority_bands() {
    let report = runtime().analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("report");

    assert_eq!(report.plan.steps.first().map(|step| step.priority_band), Some(PriorityBand::Critical));
    let bands = report.plan.steps.iter().map(|step| step.priority_band).collect::<Vec<_>>();
    assert!(bands.windows(2).all(|pair| pair[0] <= pair[1]), "bands out of order: {bands:?}");
    let sequences = report.plan.steps.iter().map(|step| step.sequence).collect::<Vec<_>>();
    assert_eq!(sequences, (1..=report.plan.steps.len()).collect::<Vec<_>>());
}

#[test]
fn every_snapshot_conserves_share() {
    let report = runtime().analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("report");

    for snapshot in [&report.plan.projected_snapshot, &report.execution.final_snapshot] {
        assert!(snapshot.check_conservation().is_ok());
        for allocation in snapshot.scopes() {
            assert!((allocation.total_share_pct() - 100.0).abs() <= TOLERANCE);
            assert!(allocation.shares.iter().all(|share| share.share_pct >= 0.0));
        }
    }
}

#[test]
fn identical_inputs_produce_identical_plans_and_outcomes() {
    let first = runtime().analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("first");
    let second = runtime().analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("second");

    assert_eq!(first.input_fingerprint, second.input_fingerprint);
    assert_eq!(first.plan, second.plan);
    assert_eq!(first.execution, second.execution);
    assert_ne!(first.analysis_id, second.analysis_id);
}

#[test]
fn sequential_and_parallel_runs_agree() {
    let mut sequential = EngineSettings::default();
    sequential.evaluation.parallel = false;
    sequential.planner.evaluation.parallel = false;
    sequential.optimization.evaluation.parallel = false;
    sequential.optimization.parallel_shrink = false;

    let parallel = runtime().analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("parallel");
    let sequential =
        runtime_with(sequential).analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("sequential");

    assert_eq!(parallel.initial_violations, sequential.initial_violations);
    assert_eq!(parallel.plan.steps, sequential.plan.steps);
    assert_eq!(parallel.execution.final_snapshot, sequential.execution.final_snapshot);
}

#[test]
fn remediating_the_result_again_is_a_no_op() {
    let runtime = runtime();
    let report = runtime.analyze(&apac_records(), apac_catalog(), &CancellationToken::new()).expect("report");

    let again = runtime.remediate(&report.execution.final_snapshot, &CancellationToken::new());

    assert!(again.plan.steps.is_empty());
    assert_eq!(again.execution.final_snapshot, report.execution.final_snapshot);
    assert!(again.converged);
}

#[test]
fn sole_qualified_supplier_is_escalated_without_steps() {
    let catalog = Arc::new(SupplierCatalog::new(vec![qualified("A", "APAC", 75.0)]));

    let report = runtime().analyze(&[record("A", "APAC", 10_000)], catalog, &CancellationToken::new()).expect("report");

    assert!(report.plan.steps.is_empty());
    assert!(!report.converged);
    assert!(report.review_items.iter().any(|item| {
        matches!(item.reason, ReviewReason::UnsatisfiableConstraintSet { .. })
            && item.rule_ids.contains(&RuleId::from("R001"))
    }));
    assert!(report
        .review_items
        .iter()
        .any(|item| matches!(item.reason, ReviewReason::NoAutomatedRemediation { .. })));
    let residual = report.execution.residual_violations.iter().map(|record| record.rule_id.clone()).collect::<Vec<_>>();
    assert!(residual.contains(&RuleId::from("R001")));
    assert!(residual.contains(&RuleId::from("R003")));
}

#[test]
fn cancelled_run_stops_before_the_first_step() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = runtime().analyze(&apac_records(), apac_catalog(), &cancel).expect("report");

    assert!(report.execution.cancelled);
    assert!(!report.converged);
    assert!(report.execution.step_outcomes.iter().all(|outcome| outcome.status == StepStatus::Cancelled));
    assert_eq!(report.execution.iterations_used, 0);
}

const REGION_AND_ESG: &str = r#"
categories = ["concentration", "esg"]

[[rules]]
id = "R001"
name = "Regional Concentration"
category = "concentration"
kind = "hard"
priority_tier = 3
scope = "region"
condition = "max_region_share_pct <= 40%"

[[rules]]
id = "R005"
name = "ESG Compliance"
category = "esg"
kind = "soft"
priority_tier = 6
scope = "portfolio"
condition = "supplier.esg_score >= 70"
"#;

const REGION_ESG_CONFLICT: &str = r#"
[[conflicts]]
rule_a = "R001"
rule_b = "R005"
conflict_type = "diversification_vs_esg"
strategy = "qualified_pool_only"
"#;

/// APAC holds 90% through two ESG-60 incumbents. Two ESG-90 incumbents sit
/// in EMEA and AMER at 5% each, while two ESG-40 catalog suppliers wait in
/// empty regions, so region-first receiver ordering prefers the low-ESG pair.
fn region_and_esg_report(book: &str) -> spendguard_core::RemediationReport {
    let book = RuleBook::from_toml_str(book).expect("rule book");
    let runtime = RemediationRuntime::from_rule_book(&book, EngineSettings::default());
    let catalog = Arc::new(SupplierCatalog::new(vec![
        qualified("A", "APAC", 60.0),
        qualified("B", "APAC", 60.0),
        qualified("Q1", "EMEA", 90.0),
        qualified("Q2", "AMER", 90.0),
        qualified("L1", "LATAM", 40.0),
        qualified("L2", "MEA", 40.0),
    ]));
    let records = [
        record("A", "APAC", 550),
        record("B", "APAC", 350),
        record("Q1", "EMEA", 50),
        record("Q2", "AMER", 50),
    ];
    runtime.analyze(&records, catalog, &CancellationToken::new()).expect("report")
}

fn receivers(report: &spendguard_core::RemediationReport, driver: &str) -> Vec<String> {
    report
        .plan
        .steps
        .iter()
        .filter(|step| step.rationale_rule_ids.first() == Some(&RuleId::from(driver)))
        .map(|step| step.action.to_supplier.0.clone())
        .collect()
}

#[test]
fn conflicting_esg_rule_keeps_low_esg_receivers_out() {
    let report = region_and_esg_report(&format!("{REGION_AND_ESG}{REGION_ESG_CONFLICT}"));

    assert_eq!(receivers(&report, "R001"), vec!["Q1", "Q2"]);
    assert!(report.plan.steps.iter().all(|step| {
        step.rationale_rule_ids == ids(&["R001", "R005"])
            && step.strategy == Some(StrategyKind::QualifiedPoolOnly)
    }));
    assert_eq!(report.plan.conflicts.len(), 1);
    assert!(report.converged);
    assert!(report.review_items.is_empty());
    assert!(report.execution.residual_violations.is_empty());
    assert!(report
        .execution
        .step_outcomes
        .iter()
        .all(|outcome| outcome.status == StepStatus::Accepted));
}

#[test]
fn without_the_conflict_edge_the_low_esg_receivers_are_used() {
    let report = region_and_esg_report(REGION_AND_ESG);

    assert_eq!(receivers(&report, "R001"), vec!["L1", "L2"]);
    assert!(report.plan.conflicts.is_empty());
    // The ESG rule is repaired afterwards as its own group, out of the low-ESG suppliers.
    let esg_steps = report
        .plan
        .steps
        .iter()
        .filter(|step| step.rationale_rule_ids == ids(&["R005"]))
        .collect::<Vec<_>>();
    assert!(!esg_steps.is_empty());
    assert!(esg_steps.iter().all(|step| step.action.from_supplier.0.starts_with('L')));
    assert!(report.converged);
    assert!(report.execution.residual_violations.is_empty());
}
