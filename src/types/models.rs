use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::raw::proposal_ref;

/// Which holder set a snapshot was computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterVariant {
    /// Known exchange and custodial addresses removed.
    #[default]
    Filtered,
    /// Raw holder set.
    Unfiltered,
}

impl FilterVariant {
    pub fn all() -> [FilterVariant; 2] {
        [FilterVariant::Filtered, FilterVariant::Unfiltered]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterVariant::Filtered => "filtered",
            FilterVariant::Unfiltered => "unfiltered",
        }
    }
}

impl fmt::Display for FilterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Amount")]
    pub amount: f64,
}

/// Balances of every holder of one token on one date.
#[derive(Debug, Clone)]
pub struct HolderSnapshot {
    pub token_id: String,
    pub date: NaiveDate,
    pub holders: Vec<Holder>,
}

impl HolderSnapshot {
    pub fn balances(&self) -> Vec<f64> {
        self.holders.iter().map(|h| h.amount).collect()
    }
}

/// One row of the metrics table. Column order is the table's column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub date: NaiveDate,
    pub token_id: String,
    pub gini_coefficient: f64,
    pub nakamoto_coefficient: usize,
    pub shannon_entropy: f64,
    pub hhi: f64,
    pub theil_index: f64,
    pub unique_holders: usize,
    #[serde(skip)]
    pub variant: FilterVariant,
}

impl MetricRecord {
    /// Metric columns tested for monotonic trends, in report order.
    pub const TREND_METRICS: [&'static str; 6] = [
        "gini_coefficient",
        "hhi",
        "theil_index",
        "shannon_entropy",
        "unique_holders",
        "nakamoto_coefficient",
    ];

    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "gini_coefficient" => Some(self.gini_coefficient),
            "nakamoto_coefficient" => Some(self.nakamoto_coefficient as f64),
            "shannon_entropy" => Some(self.shannon_entropy),
            "hhi" => Some(self.hhi),
            "theil_index" => Some(self.theil_index),
            "unique_holders" => Some(self.unique_holders as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProposalRecord {
    #[serde(rename = "id")]
    pub token_id: String,
    pub proposal_id: String,
    /// Close time, Unix seconds.
    pub end: i64,
    pub scores_total: f64,
    pub votes: u64,
}

impl ProposalRecord {
    pub fn end_date(&self) -> Option<NaiveDate> {
        unix_seconds_to_date(self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoteRecord {
    #[serde(alias = "proposal", deserialize_with = "proposal_ref")]
    pub proposal_id: String,
    pub voter: String,
    pub token_id: String,
    /// Unix seconds.
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    #[serde(rename = "id")]
    pub token_id: String,
    pub name: String,
    pub proposal_id: String,
    pub date: NaiveDate,
    pub price: f64,
    pub market_cap: f64,
    pub circulating_supply: f64,
    pub votes: u64,
    pub participation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnoutRecord {
    pub proposal_id: String,
    pub end_date: NaiveDate,
    pub token_id: String,
    pub unique_voters: usize,
    pub unique_token_holders: f64,
    pub voter_turnout_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    NoTrend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendResult {
    pub token: String,
    pub metric: String,
    /// Kendall's tau.
    pub tau: f64,
    pub p_value: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub token: String,
    pub spearman_corr: f64,
    pub p_value: f64,
}

/// Price and market cap resolved for one token on one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketQuote {
    pub price: f64,
    pub market_cap: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: &'static str,
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
}

impl StageSummary {
    pub fn new(stage: &'static str) -> Self {
        Self { stage, ..Default::default() }
    }

    pub fn record<T, E>(&mut self, outcome: &Result<T, E>) {
        self.attempted += 1;
        if outcome.is_ok() {
            self.succeeded += 1;
        } else {
            self.skipped += 1;
        }
    }

    pub fn skip(&mut self) {
        self.attempted += 1;
        self.skipped += 1;
    }

    pub fn log(&self) {
        tracing::info!(
            "[{}] attempted: {}, succeeded: {}, skipped: {}",
            self.stage,
            self.attempted,
            self.succeeded,
            self.skipped
        );
    }
}

pub fn unix_seconds_to_date(seconds: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.date_naive())
}

pub fn unix_millis_to_date(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}
