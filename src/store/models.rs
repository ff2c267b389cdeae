use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeAddressRecord {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CombinedTokenRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnoredAddressSummaryRecord {
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "Ignored Addresses")]
    pub ignored_addresses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeProposalRecord {
    pub id: String,
    pub name: String,
    pub date: NaiveDate,
    pub cumulative_proposals: usize,
}

/// Daily market data in the `market_chart` shape: `[timestamp_ms, value]`
/// pairs, where the value may be null.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketChartRecord {
    #[serde(default)]
    pub prices: Vec<(f64, Option<f64>)>,
    #[serde(default)]
    pub market_caps: Vec<(f64, Option<f64>)>,
}
