pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "flux",
    about = "Flux operator CLI",
    long_about = "Operate the Flux purchase-intent service: migrations, demo fixtures, expiration sweeps, config inspection, and readiness checks.",
    after_help = "Examples:\n  flux migrate\n  flux seed\n  flux sweep --batch-size 50\n  flux doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo agent and user fixtures (idempotent)")]
    Seed,
    #[command(about = "Expire every pending intent whose approval window has closed")]
    Sweep {
        #[arg(long, help = "Intents expired per storage round trip (defaults to lifecycle.sweep_batch_size)")]
        batch_size: Option<u32>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Sweep { batch_size } => commands::sweep::run(batch_size),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
