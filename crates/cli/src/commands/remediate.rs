use spendguard_core::config::AppConfig;
use spendguard_core::{render_action_plan, CancellationToken, RemediationRuntime};

use crate::commands::inputs::{InputPaths, Inputs};
use crate::commands::{CommandResult, EXIT_NOT_CONVERGED, EXIT_VALIDATION};

pub fn run(config: &AppConfig, paths: &InputPaths, text: bool) -> CommandResult {
    let inputs = match Inputs::load(config, paths) {
        Ok(inputs) => inputs,
        Err(failure) => return failure.into_result("remediate"),
    };

    let runtime = RemediationRuntime::from_rule_book(&inputs.rule_book, config.engine_settings());
    let report = match runtime.analyze(&inputs.records, inputs.catalog, &CancellationToken::new()) {
        Ok(report) => report,
        Err(error) => {
            return CommandResult::failure("remediate", error.error_class(), error.to_string(), EXIT_VALIDATION)
        }
    };

    tracing::info!(
        event_name = "cli.remediate.completed",
        analysis_id = %report.analysis_id,
        converged = report.converged,
        steps = report.plan.steps.len(),
        review_items = report.review_items.len(),
        "remediation finished"
    );

    let exit_code = if report.converged { 0 } else { EXIT_NOT_CONVERGED };
    if text {
        return CommandResult { exit_code, output: render_action_plan(&report) };
    }
    CommandResult::document("remediate", &report, exit_code)
}
