mod cli;
mod commands;
mod config;
mod paths;
mod provider;
mod stack;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::Outcome;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub stack: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state_dir: cli.state_dir,
        stack: cli.stack,
    };

    match run(&ctx, cli.command).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            ui::error(&format!("{err:#}"));
            ExitCode::from(commands::error_exit_code(&err))
        }
    }
}

async fn run(ctx: &Context, command: Command) -> Result<Outcome> {
    match command {
        Command::Plan => commands::plan::run(ctx),
        Command::Apply(args) => commands::apply::run(ctx, apply_args(&args)).await,
        Command::Destroy(args) => commands::apply::destroy(ctx, apply_args(&args)).await,
        Command::Status => commands::status::run(ctx),
        Command::Outputs { json } => commands::outputs::run(ctx, json),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "keel", &mut io::stdout());
            Ok(Outcome::Success)
        }
    }
}

fn apply_args(args: &cli::ApplyArgs) -> commands::apply::ApplyArgs {
    commands::apply::ApplyArgs {
        yes: args.yes,
        jobs: args.jobs.map(usize::from),
    }
}
