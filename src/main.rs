use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;

use govmetrics::config::Config;
use govmetrics::services::pipeline::{self, Stage};

#[derive(Parser)]
#[command(name = "govmetrics")]
#[command(about = "Token distribution and governance participation metrics")]
struct Args {
    /// Data root, overrides DATA_PATH
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split raw holder exports into filtered and unfiltered snapshots
    ProcessHolders,
    /// Compute distribution metrics for every snapshot
    Metrics,
    /// Count ignored exchange addresses per token
    ExchangeSummary,
    /// Running proposal counts per token
    CumulativeProposals,
    /// Proposal participation rates
    Participation,
    /// Proposal voter turnout rates
    Turnout,
    /// Trend tests and participation/turnout correlations
    Trends,
    /// Run every stage in order
    All,
}

impl Commands {
    fn stages(&self) -> Vec<Stage> {
        match self {
            Commands::ProcessHolders => vec![Stage::ProcessHolders],
            Commands::Metrics => vec![Stage::Metrics],
            Commands::ExchangeSummary => vec![Stage::ExchangeSummary],
            Commands::CumulativeProposals => vec![Stage::CumulativeProposals],
            Commands::Participation => vec![Stage::Participation],
            Commands::Turnout => vec![Stage::Turnout],
            Commands::Trends => vec![Stage::Trends],
            Commands::All => Stage::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(data_path) = args.data_path {
        config.data_path = data_path;
    }
    if !config.has_credentials() {
        tracing::warn!("No CoinGecko credentials configured, running offline");
    }

    let stages = args.command.unwrap_or(Commands::All).stages();
    let summaries = pipeline::run(&config, &stages).await?;

    let skipped: usize = summaries.iter().map(|s| s.skipped).sum();
    tracing::info!("{} stage summaries, {} units skipped", summaries.len(), skipped);
    Ok(())
}
