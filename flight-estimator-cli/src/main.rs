mod args;
mod config;
mod stream;
mod telemetry_csv;

use anyhow::{Result, anyhow};
use args::{Cli, ModeSelect, ReplayCli, SimulateCli};
use clap::Parser;
use config::{CliConfig, load_estimator_config};
use flight_estimator_core::sim::{SimConfig, simulate_flight};
use log::LevelFilter;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init()?;

    let args = Cli::parse();
    match args.mode {
        ModeSelect::Replay(args) => replay(args).await,
        ModeSelect::Simulate(args) => simulate(args).await,
        ModeSelect::ConfigTemplate(args) => {
            CliConfig::default().save(&args.path)?;
            log::info!("default config written to {}", args.path.display());
            Ok(())
        }
    }
}

async fn replay(args: ReplayCli) -> Result<()> {
    let config = load_estimator_config(args.config.as_deref())?;
    let samples = telemetry_csv::read_samples(&args.input)?;
    let first = samples
        .first()
        .ok_or(anyhow!("{} has no telemetry rows", args.input.display()))?;
    log::info!("replaying {} samples from {}", samples.len(), args.input.display());

    let arm_at = args.arm_at.unwrap_or(first.timestamp_us);
    stream::run(samples, Some(arm_at), config, args.output.as_deref()).await?;
    Ok(())
}

async fn simulate(args: SimulateCli) -> Result<()> {
    let config = load_estimator_config(args.config.as_deref())?;
    let sim = SimConfig {
        seed: args.seed,
        ..Default::default()
    };
    let flight = simulate_flight(&sim)?;
    log::info!(
        "simulated flight: apogee {:.1} m at {:.1} s, touchdown at {:.1} s",
        flight.apogee_altitude_m,
        flight.apogee_time_s,
        flight.landing_time_s
    );

    if let Some(path) = args.samples.as_deref() {
        telemetry_csv::write_samples(path, &flight.samples)?;
        log::info!("samples written to {}", path.display());
    }

    // arm halfway through the pad wait
    let arm_at = (sim.pad_time_s * 0.5 * 1_000_000.0) as u64;
    let summary = stream::run(flight.samples, Some(arm_at), config, args.output.as_deref()).await?;

    if let Some(apogee_time_s) = summary.apogee_time_s {
        log::info!(
            "apogee detected {:.2} s after the true apogee",
            apogee_time_s - flight.apogee_time_s
        );
    }
    Ok(())
}
