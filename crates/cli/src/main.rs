use std::process::ExitCode;

fn main() -> ExitCode {
    flux_cli::run()
}
