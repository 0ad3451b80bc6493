use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use spendguard_core::config::AppConfig;
use spendguard_core::{RuleBook, SpendRecord, SupplierCatalog};

use crate::commands::{CommandResult, EXIT_VALIDATION};

/// File arguments shared by the analysis commands.
#[derive(Debug, Clone, Default)]
pub struct InputPaths {
    pub spend: PathBuf,
    pub catalog: Option<PathBuf>,
    pub rule_book: Option<PathBuf>,
}

#[derive(Debug)]
pub struct InputFailure {
    pub error_class: &'static str,
    pub message: String,
}

impl InputFailure {
    fn new(error_class: &'static str, message: impl Into<String>) -> Self {
        Self { error_class, message: message.into() }
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.error_class, self.message, EXIT_VALIDATION)
    }
}

#[derive(Debug)]
pub struct Inputs {
    pub rule_book: RuleBook,
    pub catalog: Arc<SupplierCatalog>,
    pub records: Vec<SpendRecord>,
}

impl Inputs {
    pub fn load(config: &AppConfig, paths: &InputPaths) -> Result<Self, InputFailure> {
        let rule_book = load_rule_book(rule_book_path(config, paths.rule_book.as_deref()))?;
        let catalog_path = paths.catalog.as_deref().or(config.inputs.supplier_catalog_path.as_deref());
        let catalog = match catalog_path {
            Some(path) => read_catalog(path).map_err(|error| InputFailure::new("input", format!("{error:#}")))?,
            None => SupplierCatalog::default(),
        };
        let records =
            read_spend(&paths.spend).map_err(|error| InputFailure::new("input", format!("{error:#}")))?;

        Ok(Self { rule_book, catalog: Arc::new(catalog), records })
    }
}

pub fn rule_book_path<'a>(config: &'a AppConfig, explicit: Option<&'a Path>) -> Option<&'a Path> {
    explicit.or(config.inputs.rule_book_path.as_deref())
}

/// Reads the rule book at `path`, or the built-in one when no path is configured.
pub fn load_rule_book(path: Option<&Path>) -> Result<RuleBook, InputFailure> {
    let loaded = match path {
        Some(path) => {
            let raw = read_file(path, "rule book")
                .map_err(|error| InputFailure::new("input", format!("{error:#}")))?;
            RuleBook::from_toml_str(&raw)
        }
        None => RuleBook::builtin(),
    };
    loaded.map_err(|error| InputFailure::new("rule_definition", error.to_string()))
}

fn read_catalog(path: &Path) -> Result<SupplierCatalog> {
    let raw = read_file(path, "supplier catalog")?;
    let document: SupplierCatalog = toml::from_str(&raw)
        .with_context(|| format!("could not parse supplier catalog `{}`", path.display()))?;
    Ok(SupplierCatalog::new(document.suppliers))
}

fn read_spend(path: &Path) -> Result<Vec<SpendRecord>> {
    let raw = read_file(path, "spend records")?;
    serde_json::from_str(&raw).with_context(|| format!("could not parse spend records `{}`", path.display()))
}

fn read_file(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("could not read {what} `{}`", path.display()))
}
