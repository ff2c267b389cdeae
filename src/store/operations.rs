use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::store::models::MarketChartRecord;
use crate::types::models::{Holder, TrendResult};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Writes rows under an explicit header, so empty tables still carry one.
pub fn write_table<T: Serialize>(path: &Path, columns: &[&str], rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create table {}", path.display()))?;

    writer.write_record(columns)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    tracing::info!("Saved {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// One row of a wide trend table: the token and, per series, either a
/// result or nothing (series skipped for that token).
pub type TrendRow = (String, Vec<Option<TrendResult>>);

pub fn write_trend_table(path: &Path, columns: &[String], rows: &[TrendRow]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create table {}", path.display()))?;

    writer.write_record(columns)?;
    for (token, results) in rows {
        let mut record = vec![token.clone()];
        for result in results {
            match result {
                Some(r) => {
                    record.push(r.tau.to_string());
                    record.push(r.p_value.to_string());
                }
                None => {
                    record.push(String::new());
                    record.push(String::new());
                }
            }
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;

    tracing::info!("Saved {} trend rows to {}", rows.len(), path.display());
    Ok(())
}

pub fn write_snapshot(path: &Path, holders: &[Holder]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create snapshot {}", path.display()))?;
    if holders.is_empty() {
        writer.write_record(["Address", "Amount"])?;
    }
    for holder in holders {
        writer.serialize(holder)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_market_chart(config: &Config, token_id: &str, chart: &MarketChartRecord) -> Result<()> {
    let path = config.market_data_file(token_id);
    ensure_parent(&path)?;
    let body = serde_json::to_string(chart)?;
    fs::write(&path, body)
        .with_context(|| format!("Failed to cache market data {}", path.display()))?;
    tracing::info!("Cached market data for {} at {}", token_id, path.display());
    Ok(())
}
