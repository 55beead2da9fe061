pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "callsync",
    about = "callsync operator CLI",
    long_about = "Inspect callsync configuration and check platform credential readiness.",
    after_help = "Examples:\n  callsync config\n  callsync doctor --json\n  callsync doctor --refresh"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, platform credentials and the OAuth token exchange")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(
            long,
            help = "Exchange the configured refresh token (the platform may rotate it)"
        )]
        refresh: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Doctor { json, refresh } => commands::doctor::run(json, refresh),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
