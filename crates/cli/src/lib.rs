pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "answerbot",
    about = "Answerbot operator CLI",
    long_about = "Apply migrations, inspect configuration, and check readiness of the Answer bot runtime.",
    after_help = "Examples:\n  answerbot doctor --json\n  answerbot config\n  answerbot bot-config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, and the field encryption self-test")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the stored bot configuration with credentials redacted")]
    BotConfig,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::BotConfig => commands::bot_config::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
