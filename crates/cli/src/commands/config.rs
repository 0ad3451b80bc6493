use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use spendguard_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{CommandResult, EXIT_VALIDATION};

/// Effective configuration with the source of every value.
pub fn run(config_path: Option<&Path>) -> CommandResult {
    let options = LoadOptions { config_path: config_path.map(Path::to_path_buf), ..LoadOptions::default() };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_VALIDATION,
            )
        }
    };

    let config_file_path = detect_config_path(config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };
    let optional_path = |path: &Option<PathBuf>| {
        path.as_ref().map(|path| path.display().to_string()).unwrap_or_else(|| "<builtin>".to_string())
    };

    let engine = &config.engine;
    let fields = [
        ("engine.max_iterations", engine.max_iterations.to_string(), vec!["SPENDGUARD_ENGINE_MAX_ITERATIONS"]),
        ("engine.shrink_factor", engine.shrink_factor.to_string(), vec!["SPENDGUARD_ENGINE_SHRINK_FACTOR"]),
        (
            "engine.max_shrink_attempts",
            engine.max_shrink_attempts.to_string(),
            vec!["SPENDGUARD_ENGINE_MAX_SHRINK_ATTEMPTS"],
        ),
        (
            "engine.max_step_shift_pct",
            engine.max_step_shift_pct.to_string(),
            vec!["SPENDGUARD_ENGINE_MAX_STEP_SHIFT_PCT"],
        ),
        (
            "engine.share_tolerance_pct",
            engine.share_tolerance_pct.to_string(),
            vec!["SPENDGUARD_ENGINE_SHARE_TOLERANCE_PCT"],
        ),
        (
            "engine.parallel_evaluation",
            engine.parallel_evaluation.to_string(),
            vec!["SPENDGUARD_ENGINE_PARALLEL_EVALUATION"],
        ),
        ("engine.parallel_shrink", engine.parallel_shrink.to_string(), vec!["SPENDGUARD_ENGINE_PARALLEL_SHRINK"]),
        ("inputs.rule_book_path", optional_path(&config.inputs.rule_book_path), vec!["SPENDGUARD_RULE_BOOK_PATH"]),
        (
            "inputs.supplier_catalog_path",
            optional_path(&config.inputs.supplier_catalog_path),
            vec!["SPENDGUARD_SUPPLIER_CATALOG_PATH"],
        ),
        ("logging.level", config.logging.level.clone(), vec!["SPENDGUARD_LOGGING_LEVEL", "SPENDGUARD_LOG_LEVEL"]),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            vec!["SPENDGUARD_LOGGING_FORMAT", "SPENDGUARD_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in &fields {
        let key: &str = key;
        lines.push(render_line(key, value, source(key, env_keys.as_slice())));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("spendguard.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/spendguard.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
