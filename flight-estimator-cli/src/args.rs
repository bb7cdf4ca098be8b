use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

#[derive(Parser, Debug)]
#[command(name = "Flight Estimator")]
#[command(bin_name = "flight-estimator")]
pub struct Cli {
    #[clap(subcommand)]
    pub mode: ModeSelect,
}

#[derive(Subcommand, Debug)]
pub enum ModeSelect {
    #[command(about = "replay a recorded telemetry csv through the estimator")]
    Replay(ReplayCli),

    #[command(about = "fly a synthetic rocket through the estimator")]
    Simulate(SimulateCli),

    #[command(about = "write the default estimator config to a toml file")]
    ConfigTemplate(ConfigTemplateCli),
}

#[derive(Parser, Debug)]
pub struct ReplayCli {
    #[arg(long, help = "telemetry csv")]
    pub input: PathBuf,
    #[arg(long, help = "enriched telemetry as json lines, stdout when omitted")]
    pub output: Option<PathBuf>,
    #[arg(long, help = "estimator config toml, created with defaults if missing")]
    pub config: Option<PathBuf>,
    #[arg(long, help = "arm at this timestamp (us), defaults to the first sample")]
    pub arm_at: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct SimulateCli {
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, help = "enriched telemetry as json lines, stdout when omitted")]
    pub output: Option<PathBuf>,
    #[arg(long, help = "estimator config toml, created with defaults if missing")]
    pub config: Option<PathBuf>,
    #[arg(long, help = "also write the generated samples as a replayable csv")]
    pub samples: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ConfigTemplateCli {
    pub path: PathBuf,
}
