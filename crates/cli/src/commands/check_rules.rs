use std::path::Path;

use spendguard_core::config::AppConfig;
use spendguard_core::PriorityBand;

use crate::commands::inputs::{load_rule_book, rule_book_path};
use crate::commands::CommandResult;

/// Validates a rule book and summarizes it per priority band.
pub fn run(config: &AppConfig, explicit: Option<&Path>) -> CommandResult {
    let book = match load_rule_book(rule_book_path(config, explicit)) {
        Ok(book) => book,
        Err(failure) => return failure.into_result("check-rules"),
    };

    let bands = PriorityBand::ALL
        .iter()
        .map(|band| {
            let count = book.rules.rules().iter().filter(|rule| rule.band() == *band).count();
            format!("{}={count}", band.as_str())
        })
        .collect::<Vec<_>>()
        .join(", ");
    let unresolved = book.conflicts.edges().iter().filter(|edge| edge.resolution_strategy.is_none()).count();

    CommandResult::success(
        "check-rules",
        format!(
            "loaded {} rules ({bands}) and {} conflict edges ({unresolved} without a resolution strategy)",
            book.rules.len(),
            book.conflicts.len()
        ),
    )
}
