use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::services::interpolation::HolderSeries;
use crate::store::operations::write_table;
use crate::store::queries::{load_metrics, load_votes, read_table};
use crate::store::schema::{PROPOSALS_CSV, TURNOUT_COLUMNS, VOTER_TURNOUT_CSV};
use crate::types::models::{
    unix_seconds_to_date, FilterVariant, ProposalRecord, StageSummary, TurnoutRecord, VoteRecord,
};

/// Votes of one proposal.
#[derive(Debug, Clone)]
pub struct ProposalVotes {
    pub proposal_id: String,
    pub token_id: String,
    pub voters: HashSet<String>,
    /// Latest vote, Unix seconds.
    pub latest_created: i64,
}

/// Groups votes by proposal, in order of first appearance. The token is the
/// one on the proposal's first vote.
pub fn group_votes(votes: &[VoteRecord]) -> Vec<ProposalVotes> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut grouped: Vec<ProposalVotes> = Vec::new();

    for vote in votes {
        let slot = *index.entry(vote.proposal_id.as_str()).or_insert_with(|| {
            grouped.push(ProposalVotes {
                proposal_id: vote.proposal_id.clone(),
                token_id: vote.token_id.clone(),
                voters: HashSet::new(),
                latest_created: vote.created,
            });
            grouped.len() - 1
        });
        let entry = &mut grouped[slot];
        entry.voters.insert(vote.voter.clone());
        entry.latest_created = entry.latest_created.max(vote.created);
    }

    grouped
}

/// `unique_voters / holders`, or 0 when the holder estimate is not
/// positive. The zero is a guard value, not a measured turnout.
pub fn turnout_rate(unique_voters: usize, holders: f64) -> f64 {
    if holders > 0.0 {
        unique_voters as f64 / holders
    } else {
        0.0
    }
}

fn turnout_record(
    votes: &ProposalVotes,
    end_dates: &HashMap<&str, NaiveDate>,
    series: &HashMap<String, HolderSeries>,
) -> AnalysisResult<TurnoutRecord> {
    let end_date = match end_dates.get(votes.proposal_id.as_str()) {
        Some(date) => *date,
        None => unix_seconds_to_date(votes.latest_created).ok_or_else(|| {
            AnalysisError::Input(format!("invalid vote timestamp {}", votes.latest_created))
        })?,
    };

    let holders = series
        .get(&votes.token_id)
        .ok_or_else(|| AnalysisError::Coverage { token_id: votes.token_id.clone(), date: end_date })?
        .estimate(end_date)?;

    let unique_voters = votes.voters.len();
    if holders <= 0.0 {
        tracing::warn!(
            "Proposal {} has no holders for {} on {}, turnout set to 0",
            votes.proposal_id,
            votes.token_id,
            end_date
        );
    }

    Ok(TurnoutRecord {
        proposal_id: votes.proposal_id.clone(),
        end_date,
        token_id: votes.token_id.clone(),
        unique_voters,
        unique_token_holders: holders,
        voter_turnout_rate: turnout_rate(unique_voters, holders),
    })
}

/// Voter turnout for every proposal with votes. The close date comes from
/// the proposal table, or from the latest vote when the proposal is absent.
pub fn calculate_turnout(
    votes: &[VoteRecord],
    proposals: &[ProposalRecord],
    series: &HashMap<String, HolderSeries>,
) -> (Vec<TurnoutRecord>, StageSummary) {
    let end_dates: HashMap<&str, NaiveDate> = proposals
        .iter()
        .filter_map(|p| p.end_date().map(|d| (p.proposal_id.as_str(), d)))
        .collect();

    let mut summary = StageSummary::new("turnout");
    let mut records = Vec::new();

    for proposal_votes in group_votes(votes) {
        let outcome = turnout_record(&proposal_votes, &end_dates, series);
        summary.record(&outcome);
        match outcome {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("Skipping turnout for proposal {}: {}", proposal_votes.proposal_id, e),
        }
    }

    (records, summary)
}

pub fn run_turnout_stage(config: &Config) -> Result<StageSummary> {
    let votes = load_votes(config)?;
    let metrics = load_metrics(config, FilterVariant::Filtered)?;
    let series = HolderSeries::from_metrics(&metrics);

    let proposals_path = config.path(PROPOSALS_CSV);
    let proposals: Vec<ProposalRecord> = if proposals_path.exists() {
        read_table(&proposals_path)?
    } else {
        tracing::warn!("No proposal table, using latest vote time as close date");
        Vec::new()
    };

    let (records, summary) = calculate_turnout(&votes, &proposals, &series);
    write_table(&config.path(VOTER_TURNOUT_CSV), TURNOUT_COLUMNS, &records)?;

    tracing::info!("Total proposals analyzed: {}", records.len());
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts(d: NaiveDate) -> i64 {
        d.and_hms_opt(12, 0, 0).unwrap().and_utc().timestamp()
    }

    fn vote(proposal: &str, voter: &str, token: &str, created: i64) -> VoteRecord {
        VoteRecord {
            proposal_id: proposal.to_string(),
            voter: voter.to_string(),
            token_id: token.to_string(),
            created,
        }
    }

    fn holder_series() -> HashMap<String, HolderSeries> {
        HashMap::from([(
            "aave".to_string(),
            HolderSeries::new("aave", vec![(date(2023, 1, 1), 2000.0), (date(2023, 1, 21), 4000.0)]),
        )])
    }

    #[test]
    fn test_turnout_rate_reference() {
        assert!((turnout_rate(150, 3000.0) - 0.05).abs() < 1e-15);
        assert_eq!(turnout_rate(150, 0.0), 0.0);
    }

    #[test]
    fn test_group_votes_counts_distinct_voters() {
        let votes = vec![
            vote("p1", "0xa", "aave", 10),
            vote("p2", "0xa", "uniswap", 5),
            vote("p1", "0xb", "aave", 30),
            vote("p1", "0xa", "aave", 20),
        ];
        let grouped = group_votes(&votes);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].proposal_id, "p1");
        assert_eq!(grouped[0].voters.len(), 2);
        assert_eq!(grouped[0].latest_created, 30);
        assert_eq!(grouped[1].token_id, "uniswap");
    }

    #[test]
    fn test_turnout_uses_interpolated_holders() {
        let d = date(2023, 1, 11);
        let votes: Vec<VoteRecord> = (0..150)
            .map(|i| vote("p1", &format!("0x{}", i), "aave", ts(d)))
            .collect();

        let (records, summary) = calculate_turnout(&votes, &[], &holder_series());

        assert_eq!(summary.succeeded, 1);
        let record = &records[0];
        assert_eq!(record.end_date, d);
        assert_eq!(record.unique_voters, 150);
        assert!((record.unique_token_holders - 3000.0).abs() < 1e-9);
        assert!((record.voter_turnout_rate - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_proposal_end_date_takes_precedence() {
        let votes = vec![vote("p1", "0xa", "aave", ts(date(2023, 1, 5)))];
        let proposals = vec![ProposalRecord {
            token_id: "aave".to_string(),
            proposal_id: "p1".to_string(),
            end: ts(date(2023, 1, 21)),
            scores_total: 1.0,
            votes: 1,
        }];

        let (records, _) = calculate_turnout(&votes, &proposals, &holder_series());
        assert_eq!(records[0].end_date, date(2023, 1, 21));
        assert_eq!(records[0].unique_token_holders, 4000.0);
    }

    #[test]
    fn test_out_of_coverage_and_unknown_token_are_skipped() {
        let votes = vec![
            vote("p1", "0xa", "aave", ts(date(2023, 2, 1))),
            vote("p2", "0xa", "balancer", ts(date(2023, 1, 5))),
            vote("p3", "0xa", "aave", ts(date(2023, 1, 1))),
        ];

        let (records, summary) = calculate_turnout(&votes, &[], &holder_series());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].proposal_id, "p3");
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.skipped, 2);
    }
}
