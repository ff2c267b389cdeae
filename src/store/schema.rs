//! Table locations (relative to the data root) and their column layouts.

pub const RAW_HOLDERS_DIR: &str = "raw/token_holders";
pub const EXCHANGE_ADDRESSES_CSV: &str = "raw/exchange_addresses.csv";
pub const PROPOSALS_CSV: &str = "raw/proposals/proposals.csv";
pub const VOTES_CSV: &str = "raw/proposals/proposal_votes.csv";
pub const MARKET_DATA_DIR: &str = "raw/market_data";

pub const PROCESSED_HOLDERS_DIR: &str = "processed/token_holders";
pub const COMBINED_TOKENS_CSV: &str = "processed/combined_tokens.csv";
pub const IGNORED_ADDRESSES_SUMMARY_CSV: &str = "processed/ignored_addresses_summary.csv";

pub const METRICS_DIR: &str = "metrics";
pub const PARTICIPATION_RATES_CSV: &str = "metrics/participation_rates.csv";
pub const VOTER_TURNOUT_CSV: &str = "metrics/voter_turnout_rates.csv";
pub const CUMULATIVE_PROPOSALS_CSV: &str = "metrics/cumulative_proposals.csv";

pub const STATISTICS_DIR: &str = "statistics";
pub const TREND_RESULTS_CSV: &str = "statistics/mann_kendall_trend_results.csv";
pub const PARTICIPATION_TREND_RESULTS_CSV: &str =
    "statistics/mann_kendall_trend_results_participation.csv";
pub const SPEARMAN_RESULTS_CSV: &str = "statistics/spearman_correlation_results.csv";

pub const METRICS_COLUMNS: &[&str] = &[
    "date",
    "token_id",
    "gini_coefficient",
    "nakamoto_coefficient",
    "shannon_entropy",
    "hhi",
    "theil_index",
    "unique_holders",
];

pub const PARTICIPATION_COLUMNS: &[&str] = &[
    "id",
    "name",
    "proposal_id",
    "date",
    "price",
    "market_cap",
    "circulating_supply",
    "votes",
    "participation_rate",
];

pub const TURNOUT_COLUMNS: &[&str] = &[
    "proposal_id",
    "end_date",
    "token_id",
    "unique_voters",
    "unique_token_holders",
    "voter_turnout_rate",
];

pub const CUMULATIVE_PROPOSALS_COLUMNS: &[&str] = &["id", "name", "date", "cumulative_proposals"];

pub const IGNORED_ADDRESSES_COLUMNS: &[&str] = &["Token", "Ignored Addresses"];

pub const CORRELATION_COLUMNS: &[&str] = &["token", "spearman_corr", "p_value"];

/// Series names used by the participation trend table.
pub const PARTICIPATION_SERIES: &str = "participation";
pub const TURNOUT_SERIES: &str = "turnout";

/// Header of a wide trend table: `token` then a stat and p-value column
/// per series.
pub fn trend_columns(series: &[&str]) -> Vec<String> {
    let mut columns = vec!["token".to_string()];
    for name in series {
        columns.push(format!("{}_trend_stat", name));
        columns.push(format!("{}_p_value", name));
    }
    columns
}
