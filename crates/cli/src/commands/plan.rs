use spendguard_core::config::AppConfig;
use spendguard_core::RemediationRuntime;

use crate::commands::inputs::{InputPaths, Inputs};
use crate::commands::{CommandResult, EXIT_VALIDATION};

/// Prints the planned steps without executing them.
pub fn run(config: &AppConfig, paths: &InputPaths) -> CommandResult {
    let inputs = match Inputs::load(config, paths) {
        Ok(inputs) => inputs,
        Err(failure) => return failure.into_result("plan"),
    };

    let runtime = RemediationRuntime::from_rule_book(&inputs.rule_book, config.engine_settings());
    let snapshot = match runtime.snapshot(&inputs.records, inputs.catalog) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            return CommandResult::failure("plan", error.error_class(), error.to_string(), EXIT_VALIDATION)
        }
    };

    let plan = runtime.plan(&snapshot);
    tracing::info!(
        event_name = "cli.plan.completed",
        steps = plan.steps.len(),
        review_items = plan.review_items.len(),
        "plan built"
    );
    CommandResult::document("plan", &plan, 0)
}
