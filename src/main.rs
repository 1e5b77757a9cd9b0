mod cli;
mod commands;
mod config;
mod progress;
mod select;
mod settings;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, ConfigParser};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub profile: Option<String>,
    pub region: String,
    pub config_file: String,
    pub config_parser: Option<ConfigParser>,
    pub state_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    config::load_env();
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

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        profile: cli.profile,
        region: cli.region,
        config_file: cli.config_file,
        config_parser: cli.config_parser,
        state_file: cli.state_file,
    };

    match cli.command {
        Command::Deploy(args) => commands::deploy::run(&ctx, &args),
        Command::Start(args) => commands::start::run(&ctx, &args),
        Command::Stop(args) => commands::stop::run(&ctx, &args),
        Command::Remove(args) => commands::remove::run(&ctx, &args),
        Command::Build(args) => commands::build::run(&ctx, &args),
        Command::Results(args) => commands::results::run(&ctx, &args),
        Command::Logs(args) => commands::logs::run(&ctx, &args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "canaryctl", &mut io::stdout());
            Ok(())
        }
    }
}
