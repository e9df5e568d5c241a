mod assets;
mod cli;
mod commands;
mod components;
mod config;
mod host;
mod paths;
mod progress;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// `--config`, if given
    pub config: Option<String>,
}

fn main() -> Result<()> {
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
    };
    log::debug!("verbosity {}", ctx.verbose);

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::Plan => commands::plan::run(&ctx),
        Command::Diff => commands::diff::run(&ctx),
        Command::Params { component } => commands::params::run(&ctx, component.as_deref()),
        Command::Validate => commands::validate::run(&ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "clusterform", &mut io::stdout());
            Ok(())
        }
    }
}
