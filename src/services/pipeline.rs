use anyhow::Result;
use std::fmt;

use crate::config::Config;
use crate::services::excluded_addresses::{run_exchange_summary_stage, ExchangeAddressBook};
use crate::services::holders::process_raw_snapshots;
use crate::services::participation::run_participation_stage;
use crate::services::proposals::run_cumulative_stage;
use crate::services::snapshots::run_metrics_stage;
use crate::services::trends::run_trends_stage;
use crate::services::turnout::run_turnout_stage;
use crate::store::init::init_layout;
use crate::types::models::StageSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ProcessHolders,
    Metrics,
    ExchangeSummary,
    CumulativeProposals,
    Participation,
    Turnout,
    Trends,
}

impl Stage {
    /// Run order of a full pipeline. Every stage reads only tables written
    /// by the stages before it.
    pub const ALL: [Stage; 7] = [
        Stage::ProcessHolders,
        Stage::Metrics,
        Stage::ExchangeSummary,
        Stage::CumulativeProposals,
        Stage::Participation,
        Stage::Turnout,
        Stage::Trends,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ProcessHolders => "process-holders",
            Stage::Metrics => "metrics",
            Stage::ExchangeSummary => "exchange-summary",
            Stage::CumulativeProposals => "cumulative-proposals",
            Stage::Participation => "participation",
            Stage::Turnout => "turnout",
            Stage::Trends => "trends",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one stage. Only failures to load a required table are returned;
/// per-unit failures are counted in the summaries.
pub async fn run_stage(config: &Config, stage: Stage) -> Result<Vec<StageSummary>> {
    tracing::info!("Starting stage {}", stage);
    let summaries = match stage {
        Stage::ProcessHolders => {
            let book = ExchangeAddressBook::load(config)?;
            vec![process_raw_snapshots(config, &book)?]
        }
        Stage::Metrics => vec![run_metrics_stage(config)?],
        Stage::ExchangeSummary => {
            let book = ExchangeAddressBook::load(config)?;
            vec![run_exchange_summary_stage(config, &book)?]
        }
        Stage::CumulativeProposals => vec![run_cumulative_stage(config)?],
        Stage::Participation => vec![run_participation_stage(config).await?],
        Stage::Turnout => vec![run_turnout_stage(config)?],
        Stage::Trends => run_trends_stage(config)?,
    };
    tracing::info!("Finished stage {}", stage);
    Ok(summaries)
}

/// Runs `stages` strictly in order after preparing the output layout.
pub async fn run(config: &Config, stages: &[Stage]) -> Result<Vec<StageSummary>> {
    init_layout(config)?;

    let mut summaries = Vec::new();
    for stage in stages {
        summaries.extend(run_stage(config, *stage).await?);
    }

    tracing::info!("Pipeline complete");
    for summary in &summaries {
        summary.log();
    }
    Ok(summaries)
}

pub async fn run_all(config: &Config) -> Result<Vec<StageSummary>> {
    run(config, &Stage::ALL).await
}
