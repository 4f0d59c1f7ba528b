pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff operator CLI",
    long_about = "Operate the Signoff approval workflow: migrations, directory fixtures, config inspection, readiness checks and request inspection.",
    after_help = "Examples:\n  signoff doctor --json\n  signoff migrate\n  signoff inspect REQ-ID --chain"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic member/project/stage directory fixture")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution"
    )]
    Config,
    #[command(about = "Validate config, database connectivity and schema version")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print a request with its consensus tally as JSON")]
    Inspect {
        #[arg(help = "Request identifier")]
        request_id: String,
        #[arg(long, help = "Include the parent-ward re-request chain")]
        chain: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Inspect { request_id, chain } => commands::inspect::run(&request_id, chain),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
