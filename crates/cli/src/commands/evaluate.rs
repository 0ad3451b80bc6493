use spendguard_core::config::AppConfig;
use spendguard_core::RemediationRuntime;

use crate::commands::inputs::{InputPaths, Inputs};
use crate::commands::{CommandResult, EXIT_VALIDATION};

pub fn run(config: &AppConfig, paths: &InputPaths) -> CommandResult {
    let inputs = match Inputs::load(config, paths) {
        Ok(inputs) => inputs,
        Err(failure) => return failure.into_result("evaluate"),
    };

    let runtime = RemediationRuntime::from_rule_book(&inputs.rule_book, config.engine_settings());
    let snapshot = match runtime.snapshot(&inputs.records, inputs.catalog) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            return CommandResult::failure("evaluate", error.error_class(), error.to_string(), EXIT_VALIDATION)
        }
    };

    let report = runtime.report(&snapshot);
    tracing::info!(
        event_name = "cli.evaluate.completed",
        violations = report.summary.violations_count,
        warnings = report.summary.warnings_count,
        "evaluation finished"
    );
    CommandResult::document("evaluate", &report, 0)
}
