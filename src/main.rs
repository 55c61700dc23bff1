use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contagion::{Config, Engine};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the seed from the configuration.
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the simulation headless and print a summary.
    Run {
        #[arg(long)]
        ticks: u64,

        /// Log population counts every this many ticks.
        #[arg(long, default_value_t = 60)]
        report_every: u64,

        /// Print the summary as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and exit.
    Check,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mut cfg = match &args.config {
        Some(file) => Config::from_file(file).context("failed to construct cfg")?,
        None => Config::default(),
    };
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }

    match args.command {
        Command::Run {
            ticks,
            report_every,
            json,
        } => run_simulation(cfg, ticks, report_every, json)?,
        Command::Check => {
            cfg.validate().context("failed to validate config")?;
            log::info!("{cfg:#?}");
            log::info!("configuration is valid");
        }
    }

    Ok(())
}

fn run_simulation(cfg: Config, ticks: u64, report_every: u64, json: bool) -> Result<()> {
    let mut engine = Engine::new(cfg).context("failed to construct engine")?;

    for _ in 0..ticks {
        let snapshot = engine.step()?;
        if report_every > 0 && snapshot.tick % report_every == 0 {
            let counts = snapshot.counts;
            log::info!(
                "tick {:>6}: susceptible {:>5} infected {:>5} recovered {:>5} deceased {:>5}",
                snapshot.tick,
                counts.susceptible,
                counts.infected,
                counts.recovered,
                counts.deceased
            );
        }
    }

    for event in engine.statistics().events() {
        log::info!("tick {:>6}: {:?}", event.tick, event.kind);
    }

    let summary = engine.summary();
    if json {
        let out = serde_json::to_string_pretty(&summary).context("failed to serialize summary")?;
        println!("{out}");
    } else {
        log::info!("{summary:#?}");
    }

    Ok(())
}
