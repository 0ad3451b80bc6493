pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use spendguard_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use commands::inputs::InputPaths;
use commands::{CommandResult, EXIT_VALIDATION};

#[derive(Debug, Parser)]
#[command(
    name = "spendguard",
    about = "Spendguard procurement remediation CLI",
    long_about = "Evaluate supplier allocations against a procurement rule book, plan conflict-aware reallocations, and run the iterative remediation loop.",
    after_help = "Examples:\n  spendguard check-rules\n  spendguard evaluate --spend spend.json --catalog suppliers.toml\n  spendguard remediate --spend spend.json --catalog suppliers.toml --text"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a spendguard.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the configured log level")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "Override the configured log format (compact|pretty|json)")]
    log_format: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct InputArgs {
    #[arg(long, help = "JSON array of spend records")]
    spend: PathBuf,
    #[arg(long, help = "Supplier catalog TOML (defaults to [inputs].supplier_catalog_path)")]
    catalog: Option<PathBuf>,
    #[arg(long, help = "Rule book TOML (defaults to the built-in rule book)")]
    rule_book: Option<PathBuf>,
}

impl From<InputArgs> for InputPaths {
    fn from(args: InputArgs) -> Self {
        Self { spend: args.spend, catalog: args.catalog, rule_book: args.rule_book }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Evaluate every rule against the current allocation")]
    Evaluate(InputArgs),
    #[command(about = "Build the conflict-aware remediation plan without executing it")]
    Plan(InputArgs),
    #[command(about = "Plan and execute remediation; exits 3 when critical violations remain")]
    Remediate {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long, help = "Print the human-readable action plan instead of JSON")]
        text: bool,
    },
    #[command(about = "Validate a rule book and its conflict graph")]
    CheckRules {
        #[arg(long)]
        rule_book: Option<PathBuf>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

pub fn init_logging(config: &AppConfig) {
    use spendguard_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let result = execute(cli);

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn execute(cli: Cli) -> CommandResult {
    let config_path = cli.config.clone();
    if let Command::Config = cli.command {
        return commands::config::run(config_path.as_deref());
    }

    let log_format = match cli.log_format.as_deref().map(str::parse::<LogFormat>).transpose() {
        Ok(format) => format,
        Err(error) => {
            return CommandResult::failure("startup", "config_validation", error.to_string(), EXIT_VALIDATION)
        }
    };
    let options = LoadOptions {
        config_path: cli.config,
        require_file: false,
        overrides: ConfigOverrides { log_level: cli.log_level, log_format, ..ConfigOverrides::default() },
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "startup",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_VALIDATION,
            )
        }
    };
    init_logging(&config);

    match cli.command {
        Command::Evaluate(inputs) => commands::evaluate::run(&config, &inputs.into()),
        Command::Plan(inputs) => commands::plan::run(&config, &inputs.into()),
        Command::Remediate { inputs, text } => commands::remediate::run(&config, &inputs.into(), text),
        Command::CheckRules { rule_book } => commands::check_rules::run(&config, rule_book.as_deref()),
        Command::Config => commands::config::run(config_path.as_deref()),
    }
}
