use chrono::NaiveDate;
use std::collections::HashMap;

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::models::MetricRecord;

/// Holder counts of one token at its snapshot dates, sorted by date.
#[derive(Debug, Clone)]
pub struct HolderSeries {
    token_id: String,
    points: Vec<(NaiveDate, f64)>,
}

impl HolderSeries {
    /// Sorts the points; when a date repeats the last value wins.
    pub fn new(token_id: impl Into<String>, mut points: Vec<(NaiveDate, f64)>) -> Self {
        points.sort_by_key(|(date, _)| *date);
        let mut deduped: Vec<(NaiveDate, f64)> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.0 == point.0 => *last = point,
                _ => deduped.push(point),
            }
        }
        Self { token_id: token_id.into(), points: deduped }
    }

    /// One series per token from a metrics table.
    pub fn from_metrics(records: &[MetricRecord]) -> HashMap<String, HolderSeries> {
        let mut grouped: HashMap<String, Vec<(NaiveDate, f64)>> = HashMap::new();
        for record in records {
            grouped
                .entry(record.token_id.clone())
                .or_default()
                .push((record.date, record.unique_holders as f64));
        }
        grouped
            .into_iter()
            .map(|(token_id, points)| (token_id.clone(), HolderSeries::new(token_id, points)))
            .collect()
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Holder count at `date`, linearly interpolated between the bracketing
    /// snapshots. Dates outside the covered range are an error; there is no
    /// extrapolation.
    pub fn estimate(&self, date: NaiveDate) -> AnalysisResult<f64> {
        let coverage = || AnalysisError::Coverage { token_id: self.token_id.clone(), date };

        let idx = self.points.partition_point(|(d, _)| *d < date);
        let after = *self.points.get(idx).ok_or_else(coverage)?;
        if after.0 == date {
            return Ok(after.1);
        }
        let before = *idx
            .checked_sub(1)
            .and_then(|i| self.points.get(i))
            .ok_or_else(coverage)?;

        let span_days = (after.0 - before.0).num_days() as f64;
        let elapsed_days = (date - before.0).num_days() as f64;
        Ok(before.1 + (after.1 - before.1) * elapsed_days / span_days)
    }
}
