use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::optimizer::OptimizationSettings;
use crate::planner::PlannerSettings;
use crate::rules::evaluation::EvaluationSettings;
use crate::runtime::EngineSettings;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub inputs: InputConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineConfig {
    pub max_iterations: u32,
    pub shrink_factor: f64,
    pub max_shrink_attempts: u32,
    pub max_step_shift_pct: f64,
    pub share_tolerance_pct: f64,
    pub parallel_evaluation: bool,
    pub parallel_shrink: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InputConfig {
    pub rule_book_path: Option<PathBuf>,
    pub supplier_catalog_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub max_iterations: Option<u32>,
    pub max_step_shift_pct: Option<f64>,
    pub rule_book_path: Option<PathBuf>,
    pub supplier_catalog_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                max_iterations: 64,
                shrink_factor: 0.5,
                max_shrink_attempts: 3,
                max_step_shift_pct: 25.0,
                share_tolerance_pct: 0.01,
                parallel_evaluation: true,
                parallel_shrink: true,
            },
            inputs: InputConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("spendguard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Library settings derived from the `[engine]` section.
    pub fn engine_settings(&self) -> EngineSettings {
        let engine = &self.engine;
        let evaluation = EvaluationSettings {
            tolerance: engine.share_tolerance_pct,
            parallel: engine.parallel_evaluation,
        };
        EngineSettings {
            evaluation,
            planner: PlannerSettings {
                max_step_shift_pct: engine.max_step_shift_pct,
                evaluation,
                ..PlannerSettings::default()
            },
            optimization: OptimizationSettings {
                max_iterations: engine.max_iterations,
                shrink_factor: engine.shrink_factor,
                max_shrink_attempts: engine.max_shrink_attempts,
                parallel_shrink: engine.parallel_shrink,
                evaluation,
            },
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(engine) = patch.engine {
            if let Some(max_iterations) = engine.max_iterations {
                self.engine.max_iterations = max_iterations;
            }
            if let Some(shrink_factor) = engine.shrink_factor {
                self.engine.shrink_factor = shrink_factor;
            }
            if let Some(max_shrink_attempts) = engine.max_shrink_attempts {
                self.engine.max_shrink_attempts = max_shrink_attempts;
            }
            if let Some(max_step_shift_pct) = engine.max_step_shift_pct {
                self.engine.max_step_shift_pct = max_step_shift_pct;
            }
            if let Some(share_tolerance_pct) = engine.share_tolerance_pct {
                self.engine.share_tolerance_pct = share_tolerance_pct;
            }
            if let Some(parallel_evaluation) = engine.parallel_evaluation {
                self.engine.parallel_evaluation = parallel_evaluation;
            }
            if let Some(parallel_shrink) = engine.parallel_shrink {
                self.engine.parallel_shrink = parallel_shrink;
            }
        }

        if let Some(inputs) = patch.inputs {
            if let Some(rule_book_path) = inputs.rule_book_path {
                self.inputs.rule_book_path = Some(rule_book_path);
            }
            if let Some(supplier_catalog_path) = inputs.supplier_catalog_path {
                self.inputs.supplier_catalog_path = Some(supplier_catalog_path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SPENDGUARD_ENGINE_MAX_ITERATIONS") {
            self.engine.max_iterations = parse_u32("SPENDGUARD_ENGINE_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("SPENDGUARD_ENGINE_SHRINK_FACTOR") {
            self.engine.shrink_factor = parse_f64("SPENDGUARD_ENGINE_SHRINK_FACTOR", &value)?;
        }
        if let Some(value) = read_env("SPENDGUARD_ENGINE_MAX_SHRINK_ATTEMPTS") {
            self.engine.max_shrink_attempts =
                parse_u32("SPENDGUARD_ENGINE_MAX_SHRINK_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SPENDGUARD_ENGINE_MAX_STEP_SHIFT_PCT") {
            self.engine.max_step_shift_pct =
                parse_f64("SPENDGUARD_ENGINE_MAX_STEP_SHIFT_PCT", &value)?;
        }
        if let Some(value) = read_env("SPENDGUARD_ENGINE_SHARE_TOLERANCE_PCT") {
            self.engine.share_tolerance_pct =
                parse_f64("SPENDGUARD_ENGINE_SHARE_TOLERANCE_PCT", &value)?;
        }
        if let Some(value) = read_env("SPENDGUARD_ENGINE_PARALLEL_EVALUATION") {
            self.engine.parallel_evaluation =
                parse_bool("SPENDGUARD_ENGINE_PARALLEL_EVALUATION", &value)?;
        }
        if let Some(value) = read_env("SPENDGUARD_ENGINE_PARALLEL_SHRINK") {
            self.engine.parallel_shrink = parse_bool("SPENDGUARD_ENGINE_PARALLEL_SHRINK", &value)?;
        }

        if let Some(value) = read_env("SPENDGUARD_RULE_BOOK_PATH") {
            self.inputs.rule_book_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("SPENDGUARD_SUPPLIER_CATALOG_PATH") {
            self.inputs.supplier_catalog_path = Some(PathBuf::from(value));
        }

        let log_level =
            read_env("SPENDGUARD_LOGGING_LEVEL").or_else(|| read_env("SPENDGUARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SPENDGUARD_LOGGING_FORMAT").or_else(|| read_env("SPENDGUARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(max_iterations) = overrides.max_iterations {
            self.engine.max_iterations = max_iterations;
        }
        if let Some(max_step_shift_pct) = overrides.max_step_shift_pct {
            self.engine.max_step_shift_pct = max_step_shift_pct;
        }
        if let Some(rule_book_path) = overrides.rule_book_path {
            self.inputs.rule_book_path = Some(rule_book_path);
        }
        if let Some(supplier_catalog_path) = overrides.supplier_catalog_path {
            self.inputs.supplier_catalog_path = Some(supplier_catalog_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_engine(&self.engine)?;
        validate_inputs(&self.inputs)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("spendguard.toml"), PathBuf::from("config/spendguard.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.max_iterations == 0 || engine.max_iterations > 10_000 {
        return Err(ConfigError::Validation(
            "engine.max_iterations must be in range 1..=10000".to_string(),
        ));
    }

    if !(engine.shrink_factor > 0.0 && engine.shrink_factor < 1.0) {
        return Err(ConfigError::Validation(
            "engine.shrink_factor must be strictly between 0 and 1".to_string(),
        ));
    }

    if engine.max_shrink_attempts > 16 {
        return Err(ConfigError::Validation(
            "engine.max_shrink_attempts must be in range 0..=16".to_string(),
        ));
    }

    if !(engine.max_step_shift_pct > 0.0 && engine.max_step_shift_pct <= 100.0) {
        return Err(ConfigError::Validation(
            "engine.max_step_shift_pct must be in range (0, 100]".to_string(),
        ));
    }

    if !(engine.share_tolerance_pct > 0.0 && engine.share_tolerance_pct <= 1.0) {
        return Err(ConfigError::Validation(
            "engine.share_tolerance_pct must be in range (0, 1]".to_string(),
        ));
    }

    Ok(())
}

fn validate_inputs(inputs: &InputConfig) -> Result<(), ConfigError> {
    let paths = [
        ("inputs.rule_book_path", &inputs.rule_book_path),
        ("inputs.supplier_catalog_path", &inputs.supplier_catalog_path),
    ];
    for (key, path) in paths {
        if path.as_ref().map(|path| path.as_os_str().is_empty()).unwrap_or(false) {
            return Err(ConfigError::Validation(format!("{key} must not be empty when set")));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    engine: Option<EnginePatch>,
    inputs: Option<InputPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_iterations: Option<u32>,
    shrink_factor: Option<f64>,
    max_shrink_attempts: Option<u32>,
    max_step_shift_pct: Option<f64>,
    share_tolerance_pct: Option<f64>,
    parallel_evaluation: Option<bool>,
    parallel_shrink: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct InputPatch {
    rule_book_path: Option<PathBuf>,
    supplier_catalog_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_loop_parameters() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        let settings = config.engine_settings();

        ensure(settings.optimization.max_iterations == 64, "default budget should be 64")?;
        ensure(settings.optimization.shrink_factor == 0.5, "default shrink factor should be 0.5")?;
        ensure(settings.optimization.max_shrink_attempts == 3, "default shrink attempts should be 3")?;
        ensure(settings.planner.max_step_shift_pct == 25.0, "default step cap should be 25")?;
        ensure(settings.evaluation.tolerance == 0.01, "default tolerance should be 0.01")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SPENDGUARD_RULES", "/srv/rules/book.toml");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("spendguard.toml");
            fs::write(
                &path,
                r#"
[inputs]
rule_book_path = "${TEST_SPENDGUARD_RULES}"

[engine]
shrink_factor = 0.25
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.inputs.rule_book_path == Some(PathBuf::from("/srv/rules/book.toml")),
                "rule book path should be interpolated from environment",
            )?;
            ensure(config.engine.shrink_factor == 0.25, "shrink factor should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_SPENDGUARD_RULES"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGUARD_LOG_LEVEL", "warn");
        env::set_var("SPENDGUARD_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["SPENDGUARD_LOG_LEVEL", "SPENDGUARD_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGUARD_ENGINE_MAX_ITERATIONS", "200");
        env::set_var("SPENDGUARD_ENGINE_PARALLEL_SHRINK", "false");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("spendguard.toml");
            fs::write(
                &path,
                r#"
[engine]
max_iterations = 10
max_step_shift_pct = 15.0
parallel_shrink = true

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    max_step_shift_pct: Some(30.0),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.engine.max_iterations == 200, "env budget should win over file")?;
            ensure(!config.engine.parallel_shrink, "env parallel flag should win over file")?;
            ensure(config.engine.max_step_shift_pct == 30.0, "override step cap should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["SPENDGUARD_ENGINE_MAX_ITERATIONS", "SPENDGUARD_ENGINE_PARALLEL_SHRINK"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGUARD_ENGINE_SHRINK_FACTOR", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("engine.shrink_factor")
            );
            ensure(has_message, "validation failure should mention engine.shrink_factor")
        })();

        clear_vars(&["SPENDGUARD_ENGINE_SHRINK_FACTOR"]);
        result
    }

    #[test]
    fn malformed_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGUARD_ENGINE_MAX_ITERATIONS", "many");

        let result = (|| -> Result<(), String> {
            let rejected = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::InvalidEnvOverride { ref key, .. })
                    if key == "SPENDGUARD_ENGINE_MAX_ITERATIONS"
            );
            ensure(rejected, "non-numeric iteration budget should be rejected")
        })();

        clear_vars(&["SPENDGUARD_ENGINE_MAX_ITERATIONS"]);
        result
    }

    #[test]
    fn missing_required_file_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(ref missing)) if missing == &path),
            "missing required config should be reported with its path",
        )
    }
}
