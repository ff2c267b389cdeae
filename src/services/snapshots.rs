use anyhow::Result;
use chrono::NaiveDate;
use rayon::prelude::*;

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::services::distribution;
use crate::store::operations::write_table;
use crate::store::queries::{list_snapshot_files, read_processed_snapshot, SnapshotFile};
use crate::store::schema::METRICS_COLUMNS;
use crate::types::models::{FilterVariant, HolderSnapshot, MetricRecord, StageSummary};

pub fn parse_snapshot_date(folder: &str) -> AnalysisResult<NaiveDate> {
    NaiveDate::parse_from_str(folder, "%Y-%m-%d")
        .map_err(|e| AnalysisError::Input(format!("invalid snapshot date {:?}: {}", folder, e)))
}

pub fn metric_record(snapshot: &HolderSnapshot, variant: FilterVariant) -> AnalysisResult<MetricRecord> {
    let metrics = distribution::compute(&snapshot.balances())?;
    Ok(MetricRecord {
        date: snapshot.date,
        token_id: snapshot.token_id.clone(),
        gini_coefficient: metrics.gini_coefficient,
        nakamoto_coefficient: metrics.nakamoto_coefficient,
        shannon_entropy: metrics.shannon_entropy,
        hhi: metrics.hhi,
        theil_index: metrics.theil_index,
        unique_holders: metrics.unique_holders,
        variant,
    })
}

fn load_snapshot(file: &SnapshotFile) -> AnalysisResult<HolderSnapshot> {
    Ok(HolderSnapshot {
        token_id: file.token_id.clone(),
        date: parse_snapshot_date(&file.date)?,
        holders: read_processed_snapshot(&file.path)?,
    })
}

/// Computes one metrics record per snapshot file of `variant`. Bad units are
/// logged and skipped; the result is ordered by date then token.
pub fn aggregate_variant(config: &Config, variant: FilterVariant) -> Result<(Vec<MetricRecord>, StageSummary)> {
    let files = list_snapshot_files(&config.processed_holders_dir(variant))?;
    tracing::info!("Computing {} metrics for {} snapshots", variant, files.len());

    let outcomes: Vec<(&SnapshotFile, AnalysisResult<MetricRecord>)> = files
        .par_iter()
        .map(|file| {
            let record = load_snapshot(file).and_then(|snapshot| metric_record(&snapshot, variant));
            (file, record)
        })
        .collect();

    let mut summary = StageSummary::new("metrics");
    let mut records = Vec::with_capacity(outcomes.len());
    for (file, outcome) in outcomes {
        summary.record(&outcome);
        match outcome {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                "Skipping {} snapshot {} for {}: {}",
                variant,
                file.date,
                file.token_id,
                e
            ),
        }
    }

    records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.token_id.cmp(&b.token_id)));
    Ok((records, summary))
}

/// Writes the filtered and unfiltered metrics tables.
pub fn run_metrics_stage(config: &Config) -> Result<StageSummary> {
    let mut total = StageSummary::new("metrics");

    for variant in FilterVariant::all() {
        let (records, summary) = aggregate_variant(config, variant)?;
        write_table(&config.metrics_csv(variant), METRICS_COLUMNS, &records)?;

        total.attempted += summary.attempted;
        total.succeeded += summary.succeeded;
        total.skipped += summary.skipped;
    }

    total.log();
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::models::Holder;

    #[test]
    fn test_parse_snapshot_date() {
        assert_eq!(
            parse_snapshot_date("2023-06-30").unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap()
        );
        assert!(matches!(parse_snapshot_date("june"), Err(AnalysisError::Input(_))));
    }

    #[test]
    fn test_metric_record_counts_holders() {
        let snapshot = HolderSnapshot {
            token_id: "aave".to_string(),
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            holders: [10.0, 20.0, 30.0, 40.0]
                .iter()
                .enumerate()
                .map(|(i, amount)| Holder { address: format!("0x{}", i), amount: *amount })
                .collect(),
        };

        let record = metric_record(&snapshot, FilterVariant::Unfiltered).unwrap();
        assert_eq!(record.unique_holders, 4);
        assert_eq!(record.nakamoto_coefficient, 2);
        assert_eq!(record.variant, FilterVariant::Unfiltered);
        assert!((record.gini_coefficient - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_metric_record_rejects_single_holder() {
        let snapshot = HolderSnapshot {
            token_id: "aave".to_string(),
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            holders: vec![Holder { address: "0x1".to_string(), amount: 5.0 }],
        };
        assert!(matches!(
            metric_record(&snapshot, FilterVariant::Filtered),
            Err(AnalysisError::DegenerateInput(_))
        ));
    }
}
