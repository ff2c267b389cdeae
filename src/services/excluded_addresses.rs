use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::store::models::{ExchangeAddressRecord, IgnoredAddressSummaryRecord};
use crate::store::operations::write_table;
use crate::store::queries::load_exchange_addresses;
use crate::store::schema::{IGNORED_ADDRESSES_COLUMNS, IGNORED_ADDRESSES_SUMMARY_CSV};
use crate::types::models::{Holder, StageSummary};
use crate::types::tokens::TokenRegistry;

/// Known exchange and custodial addresses, per token.
#[derive(Debug, Clone, Default)]
pub struct ExchangeAddressBook {
    by_token: HashMap<String, HashSet<String>>,
    /// Table rows per token, duplicates included.
    rows: HashMap<String, usize>,
    total: usize,
}

impl ExchangeAddressBook {
    pub fn from_records(records: &[ExchangeAddressRecord]) -> Self {
        let mut by_token: HashMap<String, HashSet<String>> = HashMap::new();
        let mut rows: HashMap<String, usize> = HashMap::new();
        for record in records {
            let token = record.id.trim().to_lowercase();
            *rows.entry(token.clone()).or_default() += 1;
            by_token
                .entry(token)
                .or_default()
                .insert(record.address.trim().to_lowercase());
        }
        Self { by_token, rows, total: records.len() }
    }

    pub fn load(config: &Config) -> Result<Self> {
        let book = Self::from_records(&load_exchange_addresses(config)?);
        tracing::info!("Loaded {} exchange addresses for {} tokens", book.total, book.by_token.len());
        Ok(book)
    }

    pub fn is_excluded(&self, token_id: &str, address: &str) -> bool {
        self.by_token
            .get(&token_id.to_lowercase())
            .map(|set| set.contains(&address.to_lowercase()))
            .unwrap_or(false)
    }

    /// Holders of `token_id` that are not known exchange addresses.
    pub fn filter(&self, token_id: &str, holders: &[Holder]) -> Vec<Holder> {
        holders
            .iter()
            .filter(|h| !self.is_excluded(token_id, &h.address))
            .cloned()
            .collect()
    }

    /// Rows listed for `token_id`, duplicate rows included.
    pub fn count_for(&self, token_id: &str) -> usize {
        self.rows.get(&token_id.to_lowercase()).copied().unwrap_or(0)
    }

    /// Distinct addresses excluded for `token_id`.
    pub fn distinct_for(&self, token_id: &str) -> usize {
        self.by_token
            .get(&token_id.to_lowercase())
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Number of rows in the source table.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Ignored address rows per study token, by display name.
    pub fn summary(&self, registry: &TokenRegistry) -> Vec<IgnoredAddressSummaryRecord> {
        TokenRegistry::study_tokens()
            .into_iter()
            .map(|name| {
                let ids = registry.ids_for(name);
                let ignored_addresses = ids.iter().map(|id| self.count_for(id)).sum();
                let distinct: usize = ids.iter().map(|id| self.distinct_for(id)).sum();
                tracing::info!("{}: {} addresses ignored ({} distinct)", name, ignored_addresses, distinct);
                IgnoredAddressSummaryRecord { token: name.to_string(), ignored_addresses }
            })
            .collect()
    }
}

pub fn run_exchange_summary_stage(config: &Config, book: &ExchangeAddressBook) -> Result<StageSummary> {
    let records = book.summary(&TokenRegistry::new());
    write_table(&config.path(IGNORED_ADDRESSES_SUMMARY_CSV), IGNORED_ADDRESSES_COLUMNS, &records)?;
    tracing::info!("Total exchange addresses: {}", book.total());

    let mut summary = StageSummary::new("exchange-summary");
    summary.attempted = records.len();
    summary.succeeded = records.len();
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, address: &str) -> ExchangeAddressRecord {
        ExchangeAddressRecord { id: id.to_string(), address: address.to_string() }
    }

    fn holder(address: &str, amount: f64) -> Holder {
        Holder { address: address.to_string(), amount }
    }

    #[test]
    fn test_filter_is_per_token_and_case_insensitive() {
        let book = ExchangeAddressBook::from_records(&[
            record("aave", "0xBINANCE"),
            record("uniswap", "0xcoinbase"),
        ]);
        let holders = vec![holder("0xbinance", 10.0), holder("0xCoinbase", 5.0), holder("0xalice", 1.0)];

        let aave = book.filter("aave", &holders);
        assert_eq!(aave.len(), 2);
        assert!(aave.iter().all(|h| h.address != "0xbinance"));

        let uni = book.filter("uniswap", &holders);
        assert_eq!(uni.len(), 2);
        assert!(uni.iter().all(|h| h.address != "0xCoinbase"));

        assert_eq!(book.filter("balancer", &holders).len(), 3);
    }

    #[test]
    fn test_summary_counts() {
        let book = ExchangeAddressBook::from_records(&[
            record("aave", "0x1"),
            record("aave", "0x2"),
            record("yearn-finance", "0x3"),
            record("compound", "0x4"),
        ]);
        let summary = book.summary(&TokenRegistry::new());

        assert_eq!(book.total(), 4);
        assert_eq!(summary.len(), 6);
        let aave = summary.iter().find(|r| r.token == "Aave").unwrap();
        assert_eq!(aave.ignored_addresses, 2);
        let yearn = summary.iter().find(|r| r.token == "Yearn Finance").unwrap();
        assert_eq!(yearn.ignored_addresses, 1);
        let uni = summary.iter().find(|r| r.token == "Uniswap").unwrap();
        assert_eq!(uni.ignored_addresses, 0);
    }

    #[test]
    fn test_summary_counts_duplicate_rows() {
        let book = ExchangeAddressBook::from_records(&[
            record("aave", "0x1"),
            record("aave", "0x1"),
            record("Aave", "0X1"),
            record("aave", "0x2"),
        ]);

        assert_eq!(book.count_for("aave"), 4);
        assert_eq!(book.distinct_for("aave"), 2);
        let summary = book.summary(&TokenRegistry::new());
        let aave = summary.iter().find(|r| r.token == "Aave").unwrap();
        assert_eq!(aave.ignored_addresses, 4);
    }
}
