mod cli;
mod cmd;
mod config;
mod git;
mod lifecycle;
mod logger;
mod multiplexer;
mod reconcile;
mod state;
mod ui;

use anyhow::Result;
use tracing::{error, info};

use crate::config::Config;

fn main() -> Result<()> {
    let cli = cli::parse();

    // A missing config file falls back to defaults (§0.3); a malformed one
    // is a fatal startup error, but logging must come up either way so the
    // failure is recorded.
    let config = Config::load();
    let log_level = cli::log_level(cli.verbose, config.as_ref().unwrap_or(&Config::default()));
    logger::init(&log_level)?;

    info!(args = ?std::env::args().collect::<Vec<_>>(), "workloom start");

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!(error = ?err, "workloom failed to load configuration");
            return Err(err);
        }
    };

    match cli::run(cli, config) {
        Ok(result) => {
            info!("workloom finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "workloom failed");
            Err(err)
        }
    }
}
