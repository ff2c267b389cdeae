use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::store::models::CumulativeProposalRecord;
use crate::store::operations::write_table;
use crate::store::queries::{load_combined_tokens, load_proposals};
use crate::store::schema::{CUMULATIVE_PROPOSALS_COLUMNS, CUMULATIVE_PROPOSALS_CSV};
use crate::types::models::{ProposalRecord, StageSummary};
use crate::types::tokens::TokenRegistry;

/// Running proposal count per token, one row per (token, close date).
pub fn cumulative_proposals(proposals: &[ProposalRecord], registry: &TokenRegistry) -> (Vec<CumulativeProposalRecord>, StageSummary) {
    let mut summary = StageSummary::new("cumulative-proposals");
    let mut counts: BTreeMap<&str, BTreeMap<NaiveDate, usize>> = BTreeMap::new();

    for proposal in proposals {
        match proposal.end_date() {
            Some(date) => {
                *counts.entry(proposal.token_id.as_str()).or_default().entry(date).or_default() += 1;
                summary.succeeded += 1;
            }
            None => {
                tracing::warn!("Proposal {} has an invalid end timestamp {}", proposal.proposal_id, proposal.end);
                summary.skipped += 1;
            }
        }
        summary.attempted += 1;
    }

    let mut records = Vec::new();
    for (token_id, per_day) in counts {
        let name = registry.display_name(token_id);
        if let (Some(first), Some(last)) = (per_day.keys().next(), per_day.keys().next_back()) {
            tracing::info!("{}: first proposal {}, last proposal {}", name, first, last);
        }

        let mut running = 0;
        for (date, count) in per_day {
            running += count;
            records.push(CumulativeProposalRecord {
                id: token_id.to_string(),
                name: name.clone(),
                date,
                cumulative_proposals: running,
            });
        }
    }

    (records, summary)
}

pub fn run_cumulative_stage(config: &Config) -> Result<StageSummary> {
    let proposals = load_proposals(config)?;
    let names = load_combined_tokens(config)?
        .into_iter()
        .filter_map(|t| t.name.map(|name| (t.id, name)));
    let registry = TokenRegistry::new().with_names(names);

    let (records, summary) = cumulative_proposals(&proposals, &registry);
    write_table(&config.path(CUMULATIVE_PROPOSALS_CSV), CUMULATIVE_PROPOSALS_COLUMNS, &records)?;

    summary.log();
    Ok(summary)
}
