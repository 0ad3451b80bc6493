use std::process::ExitCode;

fn main() -> ExitCode {
    spendguard_cli::run()
}
