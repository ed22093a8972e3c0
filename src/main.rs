mod cli;
mod commands;
mod config;
mod progress;
mod props;
mod resource;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, ConfigCommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: config::Config,
    /// Console inventory snapshot in use
    pub inventory: PathBuf,
}

fn main() -> ExitCode {
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
        Err(e) => {
            ui::error(&commands::render_error(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let inventory = match cli.inventory {
        Some(path) => path,
        None => config.inventory_path()?,
    };

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config,
        inventory,
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Facts(target) => commands::facts::run(&ctx, &target),
        Command::Config(cmd) => match cmd {
            ConfigCommand::Show => commands::config::show(&ctx),
        },
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "hmcctl", &mut io::stdout());
            Ok(())
        }
    }
}
