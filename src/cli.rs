//! CLI entry point (§0.4): a single flattened command, no subcommands. Loads
//! configuration, resolves the program to run, wires the state store,
//! worktree manager, multiplexer controller, and lifecycle engine together,
//! then hands off to the UI event loop.

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::config::Config;
use crate::lifecycle::LifecycleEngine;
use crate::multiplexer;
use crate::state::StateStore;
use crate::ui;

#[derive(Parser, Debug)]
#[command(name = "workloom", version, about = "A terminal workbench for concurrent AI coding agent sessions")]
pub struct Cli {
    /// Auto-confirm toggle: seeds each new instance's auto-confirm flag.
    #[arg(short = 'y', long = "auto-yes")]
    pub auto_yes: bool,

    /// Override the configured default program for this run.
    #[arg(short = 'p', long = "program")]
    pub program: Option<String>,

    /// Raise the log filter to `debug`.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Parse just the CLI flags, before logging is initialized (`--verbose`
/// decides the default log level, so parsing must happen first).
pub fn parse() -> Cli {
    Cli::parse()
}

pub fn run(cli: Cli, config: Config) -> Result<()> {
    let program = config
        .resolve_program(cli.program.as_deref())
        .context("failed to resolve the agent program to run")?;

    let repo_path = std::env::current_dir().context("failed to determine current directory")?;
    if !crate::git::is_git_repo_at(&repo_path).unwrap_or(false) {
        bail!("workloom must be run from inside a git repository");
    }

    let state_dir = crate::config::state_dir().context("failed to resolve state directory")?;
    let store = StateStore::new(&state_dir).context("failed to open state store")?;

    let mux = multiplexer::create_controller();
    let engine = LifecycleEngine::new(repo_path.clone(), mux.clone(), config.tmux_session_prefix.clone());

    let mut config = config;
    config.default_program = program;

    ui::run(config, store, engine, mux, cli.auto_yes)
}

pub fn log_level(cli_verbose: bool, config: &Config) -> String {
    if cli_verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    }
}
