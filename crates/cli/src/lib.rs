pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cleanq",
    about = "cleanq operator CLI",
    long_about = "Inspect configuration, check readiness, and manage the cleaning request queue file.",
    after_help = "Examples:\n  cleanq doctor --json\n  cleanq config\n  cleanq init\n  cleanq queue"
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
    #[command(about = "Validate config, backend target, queue readability, and response log path")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Create the queue file with its header if it does not exist")]
    Init,
    #[command(about = "Print the queue summary table")]
    Queue,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Init => commands::init::run(),
        Command::Queue => commands::queue::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
