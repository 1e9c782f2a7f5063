mod cli;
mod commands;
mod config;
mod paths;
mod processor;
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
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Test(args) => commands::inspect::test(&ctx, &args.file),
        Command::Validate(args) => commands::inspect::validate(&ctx, &args.file),
        Command::Show(args) => commands::inspect::show(&ctx, &args.file),
        Command::Get(args) => commands::inspect::get(&ctx, &args.file, &args.identifier),
        Command::Export(args) => commands::inspect::export(&ctx, &args.file, &args.identifier),
        Command::History(cmd) => commands::history::run(&ctx, cmd),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "confctl", &mut io::stdout());
            Ok(())
        }
    }
}
