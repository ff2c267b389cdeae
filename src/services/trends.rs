//! Monotonic-trend and rank-correlation tests over the metric tables.
//!
//! Series that are too short or constant are skipped, never reported as a
//! zero or NaN result.

use anyhow::Result;
use chrono::NaiveDate;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::store::operations::{write_table, write_trend_table, TrendRow};
use crate::store::queries::{load_metrics, load_participation, load_turnout};
use crate::store::schema::{
    self, CORRELATION_COLUMNS, PARTICIPATION_SERIES, PARTICIPATION_TREND_RESULTS_CSV, SPEARMAN_RESULTS_CSV,
    TREND_RESULTS_CSV, TURNOUT_SERIES,
};
use crate::types::models::{
    CorrelationResult, FilterVariant, MetricRecord, ParticipationRecord, StageSummary, TrendDirection, TrendResult,
    TurnoutRecord,
};
use crate::types::tokens::TokenRegistry;

/// Minimum observations for a decentralization metric trend.
pub const MIN_METRIC_OBSERVATIONS: usize = 2;
/// Minimum paired observations for participation and turnout tests.
pub const MIN_PARTICIPATION_OBSERVATIONS: usize = 10;
pub const SIGNIFICANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannKendall {
    pub s: f64,
    pub var_s: f64,
    pub z: f64,
    pub tau: f64,
    pub p_value: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spearman {
    pub rho: f64,
    pub p_value: f64,
}

fn check_series(values: &[f64], min: usize, label: &str) -> AnalysisResult<()> {
    if values.len() < min {
        return Err(AnalysisError::InsufficientSample(format!(
            "{}: {} observations, need {}",
            label,
            values.len(),
            min
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::Input(format!("{}: non-finite observation", label)));
    }
    if values.iter().all(|v| *v == values[0]) {
        return Err(AnalysisError::InsufficientSample(format!("{}: no variation", label)));
    }
    Ok(())
}

fn standard_normal() -> AnalysisResult<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| AnalysisError::Input(e.to_string()))
}

/// Sizes of groups of equal values.
fn tie_groups(values: &[f64]) -> Vec<usize> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut groups = Vec::new();
    let mut run = 1usize;
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
        } else {
            groups.push(run);
            run = 1;
        }
    }
    if !sorted.is_empty() {
        groups.push(run);
    }
    groups
}

/// Mann-Kendall test with tie-corrected variance and continuity
/// correction. Tau is `S / (n(n-1)/2)`; the p-value is two-sided.
pub fn mann_kendall(values: &[f64]) -> AnalysisResult<MannKendall> {
    check_series(values, MIN_METRIC_OBSERVATIONS, "mann-kendall")?;
    let n = values.len();
    let n_f64 = n as f64;

    let mut s = 0.0;
    for i in 0..n - 1 {
        for j in i + 1..n {
            s += match values[j].partial_cmp(&values[i]) {
                Some(std::cmp::Ordering::Greater) => 1.0,
                Some(std::cmp::Ordering::Less) => -1.0,
                _ => 0.0,
            };
        }
    }

    let tie_term: f64 = tie_groups(values)
        .into_iter()
        .filter(|t| *t > 1)
        .map(|t| {
            let t = t as f64;
            t * (t - 1.0) * (2.0 * t + 5.0)
        })
        .sum();
    let var_s = (n_f64 * (n_f64 - 1.0) * (2.0 * n_f64 + 5.0) - tie_term) / 18.0;

    let z = if s > 0.0 {
        (s - 1.0) / var_s.sqrt()
    } else if s < 0.0 {
        (s + 1.0) / var_s.sqrt()
    } else {
        0.0
    };

    let p_value = 2.0 * (1.0 - standard_normal()?.cdf(z.abs()));
    let tau = s / (0.5 * n_f64 * (n_f64 - 1.0));

    let direction = if p_value < SIGNIFICANCE && z > 0.0 {
        TrendDirection::Increasing
    } else if p_value < SIGNIFICANCE && z < 0.0 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::NoTrend
    };

    Ok(MannKendall { s, var_s, z, tau, p_value, direction })
}

/// 1-based ranks, ties sharing their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        cov += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x).powi(2);
        var_y += (b - mean_y).powi(2);
    }
    cov / (var_x * var_y).sqrt()
}

/// Spearman rank correlation; the two-sided p-value uses the t
/// distribution with n - 2 degrees of freedom.
pub fn spearman(x: &[f64], y: &[f64]) -> AnalysisResult<Spearman> {
    if x.len() != y.len() {
        return Err(AnalysisError::Input(format!(
            "spearman: series lengths differ ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    check_series(x, 3, "spearman x")?;
    check_series(y, 3, "spearman y")?;

    let rho = pearson(&average_ranks(x), &average_ranks(y)).clamp(-1.0, 1.0);
    let df = (x.len() - 2) as f64;

    let p_value = if (1.0 - rho.abs()) <= f64::EPSILON {
        0.0
    } else {
        let t = rho * (df / ((1.0 - rho) * (1.0 + rho))).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| AnalysisError::Input(e.to_string()))?;
        2.0 * (1.0 - dist.cdf(t.abs()))
    };

    Ok(Spearman { rho, p_value })
}

fn log_unknown_tokens<'a>(registry: &TokenRegistry, token_ids: impl Iterator<Item = &'a str>) {
    let unknown: BTreeSet<&str> = token_ids.filter(|id| !registry.is_known(id)).collect();
    if !unknown.is_empty() {
        tracing::warn!("No display name for {:?}, reporting identifiers as is", unknown);
    }
}

fn trend_result(token: &str, metric: &str, values: &[f64]) -> AnalysisResult<TrendResult> {
    let mk = mann_kendall(values)?;
    Ok(TrendResult {
        token: token.to_string(),
        metric: metric.to_string(),
        tau: mk.tau,
        p_value: mk.p_value,
        direction: mk.direction,
    })
}

/// Runs one series test, logging why a skipped series was skipped.
fn keep(outcome: AnalysisResult<TrendResult>, token: &str, metric: &str, summary: &mut StageSummary) -> Option<TrendResult> {
    summary.record(&outcome);
    match outcome {
        Ok(result) => {
            tracing::info!(
                "{} trend for {}: tau = {:.4}, p-value = {:.4} ({:?})",
                metric,
                token,
                result.tau,
                result.p_value,
                result.direction
            );
            Some(result)
        }
        Err(e) if e.is_expected() => {
            tracing::info!("Skipping {} trend for {}: {}", metric, token, e);
            None
        }
        Err(e) => {
            tracing::warn!("Skipping {} trend for {}: {}", metric, token, e);
            None
        }
    }
}

/// One row per token with at least `MIN_METRIC_OBSERVATIONS` snapshots;
/// constant metrics leave their cells empty.
pub fn metric_trends(records: &[MetricRecord], registry: &TokenRegistry) -> (Vec<TrendRow>, StageSummary) {
    let mut by_token: BTreeMap<String, Vec<&MetricRecord>> = BTreeMap::new();
    for record in records {
        by_token.entry(registry.display_name(&record.token_id)).or_default().push(record);
    }
    log_unknown_tokens(registry, records.iter().map(|r| r.token_id.as_str()));

    let mut summary = StageSummary::new("metric-trends");
    let mut rows = Vec::new();

    for (token, mut token_records) in by_token {
        if token_records.len() < MIN_METRIC_OBSERVATIONS {
            tracing::info!(
                "Not enough data for trend analysis for {} (only {} entries)",
                token,
                token_records.len()
            );
            continue;
        }
        token_records.sort_by_key(|r| r.date);

        let results: Vec<Option<TrendResult>> = MetricRecord::TREND_METRICS
            .iter()
            .map(|metric| {
                let values: Vec<f64> = token_records.iter().filter_map(|r| r.metric(metric)).collect();
                keep(trend_result(&token, metric, &values), &token, metric, &mut summary)
            })
            .collect();

        if results.iter().any(Option::is_some) {
            rows.push((token, results));
        }
    }

    (rows, summary)
}

/// A proposal with both a participation rate and a turnout rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairedObservation {
    pub date: NaiveDate,
    pub participation_rate: f64,
    pub voter_turnout_rate: f64,
}

/// Inner join on proposal id and token display name, grouped by token.
pub fn join_rates(
    participation: &[ParticipationRecord],
    turnout: &[TurnoutRecord],
    registry: &TokenRegistry,
) -> BTreeMap<String, Vec<PairedObservation>> {
    let turnout_by_key: HashMap<(String, String), &TurnoutRecord> = turnout
        .iter()
        .map(|t| ((t.proposal_id.clone(), registry.display_name(&t.token_id)), t))
        .collect();

    let mut joined: BTreeMap<String, Vec<PairedObservation>> = BTreeMap::new();
    for p in participation {
        let token = registry.display_name(&p.token_id);
        if let Some(t) = turnout_by_key.get(&(p.proposal_id.clone(), token.clone())) {
            joined.entry(token).or_default().push(PairedObservation {
                date: p.date,
                participation_rate: p.participation_rate,
                voter_turnout_rate: t.voter_turnout_rate,
            });
        }
    }

    log_unknown_tokens(registry, participation.iter().map(|p| p.token_id.as_str()));
    for observations in joined.values_mut() {
        observations.sort_by_key(|o| o.date);
    }
    tracing::info!(
        "Joined {} proposals across {} tokens",
        joined.values().map(Vec::len).sum::<usize>(),
        joined.len()
    );
    joined
}

/// Participation and turnout trends per token with at least
/// `MIN_PARTICIPATION_OBSERVATIONS` paired proposals.
pub fn participation_trends(joined: &BTreeMap<String, Vec<PairedObservation>>) -> (Vec<TrendRow>, StageSummary) {
    let mut summary = StageSummary::new("participation-trends");
    let mut rows = Vec::new();

    for (token, observations) in joined {
        if observations.len() < MIN_PARTICIPATION_OBSERVATIONS {
            tracing::info!(
                "Not enough data for trend analysis for {} (only {} entries)",
                token,
                observations.len()
            );
            continue;
        }

        let participation: Vec<f64> = observations.iter().map(|o| o.participation_rate).collect();
        let turnout: Vec<f64> = observations.iter().map(|o| o.voter_turnout_rate).collect();

        let results = vec![
            keep(trend_result(token, PARTICIPATION_SERIES, &participation), token, PARTICIPATION_SERIES, &mut summary),
            keep(trend_result(token, TURNOUT_SERIES, &turnout), token, TURNOUT_SERIES, &mut summary),
        ];
        if results.iter().any(Option::is_some) {
            rows.push((token.clone(), results));
        }
    }

    (rows, summary)
}

/// Spearman correlation between participation and turnout per token.
pub fn correlations(joined: &BTreeMap<String, Vec<PairedObservation>>) -> (Vec<CorrelationResult>, StageSummary) {
    let mut summary = StageSummary::new("correlations");
    let mut results = Vec::new();

    for (token, observations) in joined {
        if observations.len() < MIN_PARTICIPATION_OBSERVATIONS {
            tracing::info!(
                "Not enough data for Spearman correlation for {} (only {} entries)",
                token,
                observations.len()
            );
            continue;
        }

        let participation: Vec<f64> = observations.iter().map(|o| o.participation_rate).collect();
        let turnout: Vec<f64> = observations.iter().map(|o| o.voter_turnout_rate).collect();

        let outcome = spearman(&participation, &turnout);
        summary.record(&outcome);
        match outcome {
            Ok(s) => {
                tracing::info!("Spearman correlation for {}: rho = {:.4}, p-value = {:.4}", token, s.rho, s.p_value);
                results.push(CorrelationResult { token: token.clone(), spearman_corr: s.rho, p_value: s.p_value });
            }
            Err(e) => tracing::info!("Skipping Spearman correlation for {}: {}", token, e),
        }
    }

    (results, summary)
}

pub fn run_trends_stage(config: &Config) -> Result<Vec<StageSummary>> {
    let registry = TokenRegistry::new();

    let metrics = load_metrics(config, FilterVariant::Filtered)?;
    let (metric_rows, metric_summary) = metric_trends(&metrics, &registry);
    let metric_columns = schema::trend_columns(&MetricRecord::TREND_METRICS);
    write_trend_table(&config.path(TREND_RESULTS_CSV), &metric_columns, &metric_rows)?;

    let participation = load_participation(config)?;
    let turnout = load_turnout(config)?;
    let joined = join_rates(&participation, &turnout, &registry);

    let (participation_rows, participation_summary) = participation_trends(&joined);
    let participation_columns = schema::trend_columns(&[PARTICIPATION_SERIES, TURNOUT_SERIES]);
    write_trend_table(
        &config.path(PARTICIPATION_TREND_RESULTS_CSV),
        &participation_columns,
        &participation_rows,
    )?;

    let (correlation_rows, correlation_summary) = correlations(&joined);
    write_table(&config.path(SPEARMAN_RESULTS_CSV), CORRELATION_COLUMNS, &correlation_rows)?;

    let summaries = vec![metric_summary, participation_summary, correlation_summary];
    for summary in &summaries {
        summary.log();
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + chrono::Duration::days(day as i64)
    }

    #[test]
    fn test_increasing_series_has_significant_positive_trend() {
        let values: Vec<f64> = (0..20).map(|i| i as f64 * 1.5).collect();
        let mk = mann_kendall(&values).unwrap();

        assert_eq!(mk.s, 190.0);
        assert!((mk.var_s - 950.0).abs() < 1e-9);
        assert!((mk.tau - 1.0).abs() < 1e-12);
        assert!(mk.p_value < 0.05);
        assert_eq!(mk.direction, TrendDirection::Increasing);
    }

    #[test]
    fn test_short_increasing_series_is_positive() {
        let mk = mann_kendall(&[1.0, 2.0]).unwrap();
        assert!(mk.tau > 0.0);
        // continuity correction zeroes z for n = 2
        assert!((mk.p_value - 1.0).abs() < 1e-12);

        let mk = mann_kendall(&[5.0, 3.0, 1.0]).unwrap();
        assert!(mk.tau < 0.0);
    }

    #[test]
    fn test_tie_correction() {
        // ties: two 2.0 values
        let mk = mann_kendall(&[1.0, 2.0, 2.0, 3.0]).unwrap();
        assert_eq!(mk.s, 5.0);
        // (4*3*13 - 2*1*9) / 18
        assert!((mk.var_s - 138.0 / 18.0).abs() < 1e-12);
    }

    #[test]
    fn test_mann_kendall_rejects_short_and_constant() {
        assert!(matches!(mann_kendall(&[1.0]), Err(AnalysisError::InsufficientSample(_))));
        assert!(matches!(mann_kendall(&[2.0; 12]), Err(AnalysisError::InsufficientSample(_))));
    }

    #[test]
    fn test_average_ranks_with_ties() {
        assert_eq!(average_ranks(&[10.0, 30.0, 20.0, 20.0]), vec![1.0, 4.0, 2.5, 2.5]);
    }

    #[test]
    fn test_spearman_monotone_and_reversed() {
        let x: Vec<f64> = (1..=12).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let s = spearman(&x, &y).unwrap();
        assert!((s.rho - 1.0).abs() < 1e-12);
        assert_eq!(s.p_value, 0.0);

        let reversed: Vec<f64> = x.iter().rev().cloned().collect();
        assert!((spearman(&x, &reversed).unwrap().rho + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_spearman_p_value_in_range() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let y = [2.0, 1.0, 4.0, 3.0, 6.0, 5.0, 8.0, 7.0, 10.0, 9.0];
        let s = spearman(&x, &y).unwrap();
        // 1 - 6*10/(10*99)
        assert!((s.rho - (1.0 - 60.0 / 990.0)).abs() < 1e-12);
        assert!(s.p_value > 0.0 && s.p_value < 0.001);
    }

    #[test]
    fn test_spearman_rejects_constant_series() {
        let x = [1.0; 10];
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(matches!(spearman(&x, &y), Err(AnalysisError::InsufficientSample(_))));
    }

    fn metric(token: &str, day: u32, gini: f64, nakamoto: usize) -> MetricRecord {
        MetricRecord {
            date: date(day),
            token_id: token.to_string(),
            gini_coefficient: gini,
            nakamoto_coefficient: nakamoto,
            shannon_entropy: 5.0 - gini,
            hhi: gini / 10.0,
            theil_index: gini * 2.0,
            unique_holders: 100 + day as usize,
            variant: FilterVariant::Filtered,
        }
    }

    #[test]
    fn test_metric_trends_skip_constant_metric_and_short_token() {
        let records = vec![
            metric("aave", 2, 0.7, 3),
            metric("aave", 0, 0.5, 3),
            metric("aave", 1, 0.6, 3),
            metric("uniswap", 0, 0.9, 1),
        ];
        let (rows, summary) = metric_trends(&records, &TokenRegistry::new());

        assert_eq!(rows.len(), 1);
        let (token, results) = &rows[0];
        assert_eq!(token, "Aave");
        assert_eq!(results.len(), 6);
        // gini sorted by date is increasing
        assert!(results[0].as_ref().unwrap().tau > 0.0);
        // nakamoto is constant
        assert!(results[5].is_none());
        assert_eq!(summary.attempted, 6);
        assert_eq!(summary.skipped, 1);
    }

    fn participation(token: &str, proposal: &str, day: u32, rate: f64) -> ParticipationRecord {
        ParticipationRecord {
            token_id: token.to_string(),
            name: token.to_string(),
            proposal_id: proposal.to_string(),
            date: date(day),
            price: 1.0,
            market_cap: 1.0,
            circulating_supply: 1.0,
            votes: 1,
            participation_rate: rate,
        }
    }

    fn turnout(token: &str, proposal: &str, day: u32, rate: f64) -> TurnoutRecord {
        TurnoutRecord {
            proposal_id: proposal.to_string(),
            end_date: date(day),
            token_id: token.to_string(),
            unique_voters: 1,
            unique_token_holders: 1.0,
            voter_turnout_rate: rate,
        }
    }

    #[test]
    fn test_join_and_participation_tests() {
        let mut part = Vec::new();
        let mut turn = Vec::new();
        for i in 0..12u32 {
            let id = format!("p{}", i);
            part.push(participation("yearn-finance", &id, i, 0.01 * (i + 1) as f64));
            turn.push(turnout("yearn.finance", &id, i, 0.002 * (i + 1) as f64));
        }
        // short token and unmatched proposal
        part.push(participation("aave", "a1", 0, 0.1));
        turn.push(turnout("aave", "a1", 0, 0.1));
        part.push(participation("aave", "orphan", 1, 0.1));

        let joined = join_rates(&part, &turn, &TokenRegistry::new());
        assert_eq!(joined["Yearn Finance"].len(), 12);
        assert_eq!(joined["Aave"].len(), 1);

        let (rows, _) = participation_trends(&joined);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "Yearn Finance");
        let participation_trend = rows[0].1[0].as_ref().unwrap();
        assert!(participation_trend.tau > 0.0 && participation_trend.p_value < 0.05);

        let (correlations, summary) = correlations(&joined);
        assert_eq!(correlations.len(), 1);
        assert!((correlations[0].spearman_corr - 1.0).abs() < 1e-12);
        assert_eq!(summary.attempted, 1);
    }

    #[test]
    fn test_constant_turnout_leaves_its_cells_empty() {
        let mut part = Vec::new();
        let mut turn = Vec::new();
        for i in 0..10u32 {
            let id = format!("p{}", i);
            part.push(participation("balancer", &id, i, 0.01 * (10 - i) as f64));
            turn.push(turnout("balancer", &id, i, 0.25));
        }
        let joined = join_rates(&part, &turn, &TokenRegistry::new());

        let (rows, summary) = participation_trends(&joined);
        assert_eq!(rows.len(), 1);
        let (token, results) = &rows[0];
        assert_eq!(token, "Balancer");
        let participation_trend = results[0].as_ref().unwrap();
        assert!(participation_trend.tau < 0.0);
        assert_eq!(participation_trend.direction, TrendDirection::Decreasing);
        assert!(results[1].is_none());
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);

        // no correlation against a constant series
        let (correlations, summary) = correlations(&joined);
        assert!(correlations.is_empty());
        assert_eq!(summary.skipped, 1);
    }
}
