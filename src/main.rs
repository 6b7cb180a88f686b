mod config;
mod engine;
mod random;
mod report;
mod stats;


use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::engine::Simulation;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: ranslice <config-file>");
        std::process::exit(2);
    }

    // Configuration load happens before the subscriber exists: a missing
    // or unparseable file is reported straight to stderr by the error path.
    let config = Config::from_path(&args[1]).context("loading configuration")?;
    init_tracing(&config)?;

    info!("Starting ranslice v{}", env!("CARGO_PKG_VERSION"));
    info!(path = %args[1], "configuration loaded");

    let mut sim = Simulation::from_config(&config).context("building simulation")?;
    sim.run();

    print!("{}", report::render(&sim, &config)?);

    Ok(())
}

/// Route per-event logs to the configured log file, or to stderr under the
/// usual env-filter control. File logging defaults to debug so the full
/// event stream lands in the file.
fn init_tracing(config: &Config) -> Result<()> {
    if config.settings.logging {
        // Presence is validated with the configuration.
        let path = config.settings.log_file.as_deref().unwrap_or("ranslice.log");
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating log file {path}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ranslice=debug".into()),
            )
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ranslice=info".into()),
            )
            .init();
    }
    Ok(())
}
