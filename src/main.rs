mod cli;
mod commands;
mod config;
mod schema;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use topology::ExecutionMode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub file: Option<String>,
    pub params: Vec<(String, String)>,
    pub mode: ExecutionMode,
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
        file: cli.file,
        params: cli.params,
        mode: if cli.publish {
            ExecutionMode::Publish
        } else {
            ExecutionMode::Run
        },
    };

    match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, args),
        Command::Publish { output } => commands::publish::run(&ctx, output.as_deref()),
        Command::Graph => commands::graph::run(&ctx),
        Command::Validate => commands::validate::run(&ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "apphost", &mut io::stdout());
            Ok(())
        }
    }
}
