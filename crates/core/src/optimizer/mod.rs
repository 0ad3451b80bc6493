mod cancel;

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use cancel::CancellationToken;

use crate::conflicts::ConflictGraph;
use crate::domain::plan::{
    ExecutionOutcome, LoopState, RemediationPlan, RemediationStep, StepOutcome, StepStatus,
};
use crate::domain::rule::RuleId;
use crate::domain::violation::ViolationRecord;
use crate::rules::evaluation::{evaluate, sort_violations, EvaluationSettings, ScopeFilter};
use crate::rules::registry::RuleSet;
use crate::snapshot::AllocationSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSettings {
    /// Upper bound on apply/validate cycles across the whole run.
    pub max_iterations: u32,
    pub shrink_factor: f64,
    pub max_shrink_attempts: u32,
    pub parallel_shrink: bool,
    pub evaluation: EvaluationSettings,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            shrink_factor: 0.5,
            max_shrink_attempts: 3,
            parallel_shrink: true,
            evaluation: EvaluationSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct IterativeOptimizer {
    settings: OptimizationSettings,
}

impl IterativeOptimizer {
    pub fn new(settings: OptimizationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> OptimizationSettings {
        self.settings
    }

    pub fn execute(
        &self,
        initial: &AllocationSnapshot,
        plan: &RemediationPlan,
        rules: &RuleSet,
        conflicts: &ConflictGraph,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        execute(initial, plan, rules, conflicts, self.settings, cancel)
    }
}

/// One candidate magnitude for a step, validated against its own snapshot.
struct Attempt {
    shift_pct: f64,
    verdict: Result<(AllocationSnapshot, Vec<ViolationRecord>), String>,
}

struct StepContext<'a> {
    step: &'a RemediationStep,
    rules: &'a RuleSet,
    watched: BTreeSet<RuleId>,
    scope_before: Vec<ViolationRecord>,
    evaluation: EvaluationSettings,
}

/// Applies plan steps one at a time, validating each against the rule set and
/// backtracking with shrinking magnitudes when a step regresses.
pub fn execute(
    initial: &AllocationSnapshot,
    plan: &RemediationPlan,
    rules: &RuleSet,
    conflicts: &ConflictGraph,
    settings: OptimizationSettings,
    cancel: &CancellationToken,
) -> ExecutionOutcome {
    let mut current = initial.clone();
    let mut violations = evaluate(&current, rules, &ScopeFilter::all(), settings.evaluation, 0);
    let mut iterations = 0u32;
    let mut step_outcomes = Vec::with_capacity(plan.steps.len());
    let mut cancelled = false;
    let mut budget_exhausted = false;

    for step in &plan.steps {
        if !cancelled && cancel.is_cancelled() {
            cancelled = true;
            tracing::warn!(
                event_name = "optimizer.run.cancelled",
                sequence = step.sequence,
                iterations_used = iterations,
                "optimization run cancelled; keeping last validated snapshot"
            );
        }
        if cancelled {
            step_outcomes.push(skipped(step, StepStatus::Cancelled));
            continue;
        }
        if budget_exhausted || iterations >= settings.max_iterations {
            budget_exhausted = true;
            step_outcomes.push(skipped(step, StepStatus::BudgetExhausted));
            continue;
        }

        let scope_before = violations
            .iter()
            .filter(|record| record.scope == step.target_scope)
            .cloned()
            .collect::<Vec<_>>();
        let still_open = step
            .rationale_rule_ids
            .iter()
            .any(|rule_id| scope_before.iter().any(|record| &record.rule_id == rule_id));
        if !still_open {
            step_outcomes.push(skipped(step, StepStatus::AlreadySatisfied));
            continue;
        }

        let mut watched = step.rationale_rule_ids.iter().cloned().collect::<BTreeSet<_>>();
        for rule_id in &step.rationale_rule_ids {
            watched.extend(conflicts.neighbors(rule_id).cloned());
        }
        let context = StepContext { step, rules, watched, scope_before, evaluation: settings.evaluation };

        let (outcome, accepted) = run_step(&context, &current, settings, &mut iterations, cancel);
        if outcome.status == StepStatus::Cancelled {
            cancelled = true;
            tracing::warn!(
                event_name = "optimizer.run.cancelled",
                sequence = step.sequence,
                iterations_used = iterations,
                "optimization run cancelled mid-step; keeping last validated snapshot"
            );
        }
        if let Some((snapshot, scope_after)) = accepted {
            violations.retain(|record| record.scope != step.target_scope);
            violations.extend(scope_after);
            sort_violations(&mut violations);
            current = snapshot;
        }
        if outcome.status == StepStatus::BudgetExhausted {
            budget_exhausted = true;
        }
        step_outcomes.push(outcome);
    }

    let residual_violations =
        evaluate(&current, rules, &ScopeFilter::all(), settings.evaluation, iterations);
    let converged = !residual_violations.iter().any(ViolationRecord::is_critical);

    tracing::info!(
        event_name = "optimizer.run.completed",
        converged,
        cancelled,
        budget_exhausted,
        iterations_used = iterations,
        residual_count = residual_violations.len(),
        "optimization run completed"
    );

    ExecutionOutcome {
        final_snapshot: current,
        residual_violations,
        converged,
        step_outcomes,
        iterations_used: iterations,
        cancelled,
        budget_exhausted,
    }
}

fn run_step(
    context: &StepContext<'_>,
    current: &AllocationSnapshot,
    settings: OptimizationSettings,
    iterations: &mut u32,
    cancel: &CancellationToken,
) -> (StepOutcome, Option<(AllocationSnapshot, Vec<ViolationRecord>)>) {
    let step = context.step;
    let planned = step.action.shift_pct;
    let magnitudes = (0..=settings.max_shrink_attempts)
        .map(|attempt| planned * settings.shrink_factor.powi(attempt as i32))
        .collect::<Vec<_>>();

    let mut trail = vec![LoopState::PendingSteps];
    let mut attempts = 0u32;
    let mut failure = None;

    let mut record = |attempt: Attempt, trail: &mut Vec<LoopState>| {
        trail.push(LoopState::ApplyingStep);
        trail.push(LoopState::Validating);
        match attempt.verdict {
            Ok(accepted) => {
                trail.push(LoopState::Accepted);
                Some((attempt.shift_pct, accepted))
            }
            Err(reason) => {
                trail.push(LoopState::Backtracked);
                tracing::debug!(
                    event_name = "optimizer.step.backtracked",
                    sequence = step.sequence,
                    shift_pct = attempt.shift_pct,
                    reason = %reason,
                    "remediation step backtracked"
                );
                failure = Some(reason);
                None
            }
        }
    };

    let mut accepted = None;
    let mut interrupted = false;
    let mut remaining = magnitudes.as_slice();
    while let Some((&magnitude, rest)) = remaining.split_first() {
        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        if *iterations >= settings.max_iterations {
            break;
        }

        // After the full-size attempt fails, shrink branches are independent
        // and can be validated concurrently.
        let parallel = settings.parallel_shrink && attempts > 0 && !rest.is_empty();
        if parallel {
            let budget = (settings.max_iterations - *iterations) as usize;
            let branch = &remaining[..remaining.len().min(budget)];
            let base = *iterations;
            *iterations += branch.len() as u32;
            attempts += branch.len() as u32;

            let results = branch
                .par_iter()
                .enumerate()
                .map(|(offset, &shift_pct)| attempt(context, current, shift_pct, base + offset as u32 + 1))
                .collect::<Vec<_>>();
            // Magnitudes descend, so the first accepted branch is the largest.
            for result in results {
                if let Some(found) = record(result, &mut trail) {
                    accepted = Some(found);
                    break;
                }
            }
            remaining = &remaining[branch.len()..];
        } else {
            *iterations += 1;
            attempts += 1;
            let result = attempt(context, current, magnitude, *iterations);
            accepted = record(result, &mut trail);
            remaining = rest;
        }

        if accepted.is_some() {
            break;
        }
    }

    let (status, applied_shift_pct, snapshot) = match accepted {
        Some((shift_pct, snapshot)) => {
            tracing::info!(
                event_name = "optimizer.step.accepted",
                sequence = step.sequence,
                scope = %step.target_scope,
                from_supplier = %step.action.from_supplier,
                to_supplier = %step.action.to_supplier,
                shift_pct,
                "remediation step accepted"
            );
            (StepStatus::Accepted, shift_pct, Some(snapshot))
        }
        None if interrupted => (StepStatus::Cancelled, 0.0, None),
        None if !remaining.is_empty() => (StepStatus::BudgetExhausted, 0.0, None),
        None => {
            tracing::warn!(
                event_name = "optimizer.step.unresolved",
                sequence = step.sequence,
                scope = %step.target_scope,
                attempts,
                "remediation step unresolved after shrink attempts"
            );
            (StepStatus::Unresolved, 0.0, None)
        }
    };

    let outcome = StepOutcome {
        sequence: step.sequence,
        status,
        planned_shift_pct: planned,
        applied_shift_pct,
        attempts,
        trail,
        failure: if status == StepStatus::Accepted { None } else { failure },
    };
    (outcome, snapshot)
}

fn attempt(context: &StepContext<'_>, current: &AllocationSnapshot, shift_pct: f64, iteration: u32) -> Attempt {
    Attempt { shift_pct, verdict: validate(context, current, shift_pct, iteration) }
}

/// Accepts when a rationale rule improves, no watched rule regresses and no
/// new critical violation appears in the target scope.
fn validate(
    context: &StepContext<'_>,
    current: &AllocationSnapshot,
    shift_pct: f64,
    iteration: u32,
) -> Result<(AllocationSnapshot, Vec<ViolationRecord>), String> {
    let step = context.step;
    let tolerance = context.evaluation.tolerance;
    let action = step.action.with_shift(shift_pct);
    let next = current.apply(&step.target_scope, &action, tolerance).map_err(|error| error.to_string())?;

    let filter = ScopeFilter::scope(step.target_scope.clone());
    let scope_after = evaluate(&next, context.rules, &filter, context.evaluation, iteration);

    let improved = step.rationale_rule_ids.iter().any(|rule_id| {
        breach(&scope_after, rule_id) < breach(&context.scope_before, rule_id) - tolerance
    });
    if !improved {
        return Err("no rationale rule moved toward compliance".to_owned());
    }

    if let Some(rule_id) = context
        .watched
        .iter()
        .find(|&rule_id| breach(&scope_after, rule_id) > breach(&context.scope_before, rule_id) + tolerance)
    {
        return Err(format!("rule {rule_id} regressed"));
    }

    if let Some(record) = scope_after.iter().find(|record| {
        record.is_critical() && !context.scope_before.iter().any(|before| before.rule_id == record.rule_id)
    }) {
        return Err(format!("new critical violation of rule {}", record.rule_id));
    }

    Ok((next, scope_after))
}

fn breach(records: &[ViolationRecord], rule_id: &RuleId) -> f64 {
    records.iter().find(|record| &record.rule_id == rule_id).map(|record| record.delta).unwrap_or(0.0)
}

fn skipped(step: &RemediationStep, status: StepStatus) -> StepOutcome {
    StepOutcome {
        sequence: step.sequence,
        status,
        planned_shift_pct: step.action.shift_pct,
        applied_shift_pct: 0.0,
        attempts: 0,
        trail: vec![LoopState::PendingSteps],
        failure: None,
    }
}
