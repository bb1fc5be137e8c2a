pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "slotline",
    about = "Slotline operator CLI",
    long_about = "Inspect configuration, check provider readiness, and replay scripted SMS conversations against the booking pipeline.",
    after_help = "Examples:\n  slotline doctor --json\n  slotline config\n  slotline simulate --script demo.toml"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to slotline.toml or config/slotline.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, provider credentials, and scheduling rules")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Replay a scripted conversation through the pipeline with offline providers")]
    Simulate {
        #[arg(long, help = "TOML script of user messages and model completions")]
        script: Option<PathBuf>,
        #[arg(long, help = "Log every pipeline stage to stderr")]
        trace: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(config_path) }
        }
        Command::Doctor { json } => commands::CommandResult {
            exit_code: 0,
            output: commands::doctor::run(config_path, json),
        },
        Command::Simulate { script, trace } => {
            commands::simulate::run(config_path, script.as_deref(), trace)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
