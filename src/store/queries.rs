use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::store::models::{CombinedTokenRecord, ExchangeAddressRecord, MarketChartRecord};
use crate::store::schema;
use crate::types::models::{
    FilterVariant, Holder, MetricRecord, ParticipationRecord, ProposalRecord, TurnoutRecord,
    VoteRecord,
};
use crate::types::raw::RawHolderRow;

/// A snapshot file found on disk: `<root>/<date>/<token_id>.csv`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotFile {
    pub date: String,
    pub token_id: String,
    pub path: PathBuf,
}

/// Reads a required table. A missing or unreadable file is fatal; rows
/// that fail to decode are logged and skipped.
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open table {}", path.display()))?;

    let mut rows = Vec::new();
    let mut malformed = 0usize;
    for (line, row) in reader.deserialize::<T>().enumerate() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => {
                malformed += 1;
                tracing::warn!("Skipping malformed row {} in {}: {}", line + 1, path.display(), e);
            }
        }
    }

    tracing::info!(
        "Loaded {} rows from {} ({} malformed)",
        rows.len(),
        path.display(),
        malformed
    );
    Ok(rows)
}

pub fn load_proposals(config: &Config) -> Result<Vec<ProposalRecord>> {
    read_table(&config.path(schema::PROPOSALS_CSV))
}

pub fn load_votes(config: &Config) -> Result<Vec<VoteRecord>> {
    read_table(&config.path(schema::VOTES_CSV))
}

pub fn load_metrics(config: &Config, variant: FilterVariant) -> Result<Vec<MetricRecord>> {
    let mut records: Vec<MetricRecord> = read_table(&config.metrics_csv(variant))?;
    for record in &mut records {
        record.variant = variant;
    }
    Ok(records)
}

pub fn load_participation(config: &Config) -> Result<Vec<ParticipationRecord>> {
    read_table(&config.path(schema::PARTICIPATION_RATES_CSV))
}

pub fn load_turnout(config: &Config) -> Result<Vec<TurnoutRecord>> {
    read_table(&config.path(schema::VOTER_TURNOUT_CSV))
}

pub fn load_exchange_addresses(config: &Config) -> Result<Vec<ExchangeAddressRecord>> {
    read_table(&config.path(schema::EXCHANGE_ADDRESSES_CSV))
}

/// Token names are optional; the registry covers missing entries.
pub fn load_combined_tokens(config: &Config) -> Result<Vec<CombinedTokenRecord>> {
    let path = config.path(schema::COMBINED_TOKENS_CSV);
    if !path.exists() {
        tracing::info!("No combined tokens table at {}, using built-in names", path.display());
        return Ok(Vec::new());
    }
    read_table(&path)
}

/// Cached market chart for a token, `None` if it was never downloaded.
pub fn load_market_chart(config: &Config, token_id: &str) -> Result<Option<MarketChartRecord>> {
    let path = config.market_data_file(token_id);
    if !path.exists() {
        return Ok(None);
    }
    let body = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read market data {}", path.display()))?;
    let chart = serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse market data {}", path.display()))?;
    Ok(Some(chart))
}

/// Lists `<root>/<date>/<token>.csv` files, sorted by date then token.
pub fn list_snapshot_files(root: &Path) -> Result<Vec<SnapshotFile>> {
    let mut files = Vec::new();
    let dates = fs::read_dir(root)
        .with_context(|| format!("Failed to list snapshot directory {}", root.display()))?;

    for date_entry in dates {
        let date_entry = date_entry?;
        if !date_entry.file_type()?.is_dir() {
            continue;
        }
        let date = date_entry.file_name().to_string_lossy().to_string();

        for entry in fs::read_dir(date_entry.path())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(token_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            files.push(SnapshotFile {
                date: date.clone(),
                token_id: token_id.to_string(),
                path: path.clone(),
            });
        }
    }

    files.sort();
    Ok(files)
}

/// Reads a processed snapshot (`Address, Amount`).
pub fn read_processed_snapshot(path: &Path) -> AnalysisResult<Vec<Holder>> {
    read_unit(path, |row: Holder| row)
}

/// Reads a raw export whose cells are dictionary literals.
pub fn read_raw_snapshot(path: &Path) -> AnalysisResult<Vec<Holder>> {
    read_unit(path, |row: RawHolderRow| row.into())
}

/// Unit-level read: any failure rejects the whole file.
fn read_unit<T, F>(path: &Path, convert: F) -> AnalysisResult<Vec<Holder>>
where
    T: DeserializeOwned,
    F: Fn(T) -> Holder,
{
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| AnalysisError::Input(format!("{}: {}", path.display(), e)))?;

    reader
        .deserialize::<T>()
        .map(|row| {
            row.map(&convert)
                .map_err(|e| AnalysisError::Input(format!("{}: {}", path.display(), e)))
        })
        .collect()
}
