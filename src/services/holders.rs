use anyhow::Result;
use rayon::prelude::*;

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::services::excluded_addresses::ExchangeAddressBook;
use crate::store::operations::write_snapshot;
use crate::store::queries::{list_snapshot_files, read_raw_snapshot, SnapshotFile};
use crate::types::models::{FilterVariant, Holder, StageSummary};

/// Holders with a positive balance; zero and negative rows never reach the
/// metrics engine.
pub fn positive_holders(holders: Vec<Holder>) -> Vec<Holder> {
    holders.into_iter().filter(|h| h.amount > 0.0).collect()
}

/// Splits one parsed snapshot into its unfiltered and filtered variants.
pub fn split_variants(
    token_id: &str,
    holders: Vec<Holder>,
    book: &ExchangeAddressBook,
) -> (Vec<Holder>, Vec<Holder>) {
    let unfiltered = positive_holders(holders);
    let filtered = book.filter(token_id, &unfiltered);
    (unfiltered, filtered)
}

fn process_file(config: &Config, file: &SnapshotFile, book: &ExchangeAddressBook) -> AnalysisResult<(usize, usize)> {
    let holders = read_raw_snapshot(&file.path)?;
    let (unfiltered, filtered) = split_variants(&file.token_id, holders, book);

    for (variant, rows) in [
        (FilterVariant::Unfiltered, &unfiltered),
        (FilterVariant::Filtered, &filtered),
    ] {
        let path = config
            .processed_holders_dir(variant)
            .join(&file.date)
            .join(format!("{}.csv", file.token_id));
        write_snapshot(&path, rows).map_err(|e| AnalysisError::Input(format!("{:#}", e)))?;
    }

    Ok((unfiltered.len(), filtered.len()))
}

/// Decodes every raw holder export and writes both processed variants from
/// the same parse.
pub fn process_raw_snapshots(config: &Config, book: &ExchangeAddressBook) -> Result<StageSummary> {
    let files = list_snapshot_files(&config.raw_holders_dir())?;
    tracing::info!("Processing {} raw holder snapshots", files.len());

    let outcomes: Vec<(&SnapshotFile, AnalysisResult<(usize, usize)>)> = files
        .par_iter()
        .map(|file| (file, process_file(config, file, book)))
        .collect();

    let mut summary = StageSummary::new("process-holders");
    for (file, outcome) in &outcomes {
        match outcome {
            Ok((unfiltered, filtered)) => tracing::debug!(
                "Processed {} {}: {} holders, {} after exchange filter",
                file.date,
                file.token_id,
                unfiltered,
                filtered
            ),
            Err(e) => tracing::warn!("Skipping snapshot {} {}: {}", file.date, file.token_id, e),
        }
        summary.record(outcome);
    }

    summary.log();
    Ok(summary)
}
