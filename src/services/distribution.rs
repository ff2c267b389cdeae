//! Decentralization estimators over a vector of holder balances.
//!
//! Every function here is pure. Degenerate vectors (empty, all zero, or
//! containing a negative or non-finite balance) are rejected instead of
//! producing NaN or infinity.

use crate::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistributionMetrics {
    pub gini_coefficient: f64,
    pub nakamoto_coefficient: usize,
    pub shannon_entropy: f64,
    pub hhi: f64,
    pub theil_index: f64,
    pub unique_holders: usize,
}

/// Checks the vector and returns its total supply.
fn total_supply(balances: &[f64]) -> AnalysisResult<f64> {
    if balances.is_empty() {
        return Err(AnalysisError::DegenerateInput("no holders".to_string()));
    }
    if let Some((index, &value)) = balances
        .iter()
        .enumerate()
        .find(|(_, b)| !b.is_finite() || **b < 0.0)
    {
        return Err(AnalysisError::InvalidBalance { index, value });
    }

    let total: f64 = balances.iter().sum();
    if total <= 0.0 {
        return Err(AnalysisError::DegenerateInput("all balances are zero".to_string()));
    }
    Ok(total)
}

/// `Σ(2i - n - 1)·b_i / (n·Σb)` over balances sorted ascending, i from 1.
/// Undefined for fewer than two holders.
pub fn gini_coefficient(balances: &[f64]) -> AnalysisResult<f64> {
    let total = total_supply(balances)?;
    let n = balances.len();
    if n < 2 {
        return Err(AnalysisError::DegenerateInput(format!(
            "gini coefficient needs at least 2 holders, got {}",
            n
        )));
    }

    let mut sorted = balances.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n_f64 = n as f64;
    let numerator: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, amount)| (2.0 * (i + 1) as f64 - n_f64 - 1.0) * amount)
        .sum();

    Ok(numerator / (n_f64 * total))
}

/// Smallest number of largest holders whose combined balance strictly
/// exceeds half of the supply. Partial sums that reach exactly half up to
/// rounding error do not count as a majority.
pub fn nakamoto_coefficient(balances: &[f64]) -> AnalysisResult<usize> {
    total_supply(balances)?;

    let mut sorted = balances.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    // both sides summed in the same order
    let total: f64 = sorted.iter().sum();
    let threshold = 0.5 * total;
    let tolerance = total * (sorted.len() as f64 * f64::EPSILON).max(1e-12);

    let mut cumulative = 0.0;
    for (i, amount) in sorted.iter().enumerate() {
        cumulative += amount;
        if cumulative - threshold > tolerance {
            return Ok(i + 1);
        }
    }
    Ok(sorted.len())
}

/// Entropy of the supply shares in bits. Zero shares contribute nothing.
pub fn shannon_entropy(balances: &[f64]) -> AnalysisResult<f64> {
    let total = total_supply(balances)?;
    let entropy: f64 = balances
        .iter()
        .map(|b| b / total)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.log2())
        .sum();
    Ok(entropy)
}

/// Sum of squared supply shares, in (0, 1].
pub fn hhi(balances: &[f64]) -> AnalysisResult<f64> {
    let total = total_supply(balances)?;
    Ok(balances.iter().map(|b| (b / total).powi(2)).sum())
}

/// Theil T index: `(1/n)·Σ (b_i/μ)·ln(b_i/μ)` with μ the mean balance.
/// Zero balances contribute zero (the limit of x·ln x) but still count in
/// `n`.
pub fn theil_index(balances: &[f64]) -> AnalysisResult<f64> {
    let total = total_supply(balances)?;
    let n = balances.len() as f64;
    let mean = total / n;

    let sum: f64 = balances
        .iter()
        .map(|b| b / mean)
        .filter(|ratio| *ratio > 0.0)
        .map(|ratio| ratio * ratio.ln())
        .sum();
    Ok(sum / n)
}

pub fn compute(balances: &[f64]) -> AnalysisResult<DistributionMetrics> {
    Ok(DistributionMetrics {
        gini_coefficient: gini_coefficient(balances)?,
        nakamoto_coefficient: nakamoto_coefficient(balances)?,
        shannon_entropy: shannon_entropy(balances)?,
        hhi: hhi(balances)?,
        theil_index: theil_index(balances)?,
        unique_holders: balances.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPS,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_reference_vector() {
        let balances = [10.0, 20.0, 30.0, 40.0];
        let metrics = compute(&balances).unwrap();

        assert_close(metrics.gini_coefficient, 0.25);
        assert_close(metrics.hhi, 0.30);
        assert_eq!(metrics.nakamoto_coefficient, 2);
        assert!((metrics.shannon_entropy - 1.846_439_3).abs() < 1e-6);
        assert!((metrics.theil_index - 0.106_440_1).abs() < 1e-6);
        assert_eq!(metrics.unique_holders, 4);
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = compute(&[40.0, 10.0, 30.0, 20.0]).unwrap();
        let b = compute(&[10.0, 20.0, 30.0, 40.0]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_equal_balances() {
        for n in [2usize, 3, 4, 7, 10] {
            let balances = vec![5.0; n];
            let metrics = compute(&balances).unwrap();

            assert_close(metrics.gini_coefficient, 0.0);
            assert_close(metrics.theil_index, 0.0);
            assert_close(metrics.hhi, 1.0 / n as f64);
            assert_close(metrics.shannon_entropy, (n as f64).log2());
            assert_eq!(metrics.nakamoto_coefficient, n / 2 + 1);
        }
    }

    #[test]
    fn test_equal_fractional_balances_need_strict_majority() {
        for value in [0.1, 0.2, 0.3, 0.7, 1.1, 33.3] {
            for n in 2usize..=40 {
                assert_eq!(
                    nakamoto_coefficient(&vec![value; n]).unwrap(),
                    n / 2 + 1,
                    "{} holders of {}",
                    n,
                    value
                );
            }
        }
    }

    #[test]
    fn test_single_dominant_holder() {
        let mut balances = vec![0.0; 9];
        balances.push(1_000.0);
        let metrics = compute(&balances).unwrap();

        // (n - 1) / n, approaching 1 as n grows
        assert_close(metrics.gini_coefficient, 0.9);
        assert_eq!(metrics.nakamoto_coefficient, 1);
        assert_close(metrics.hhi, 1.0);
        assert_close(metrics.shannon_entropy, 0.0);
        assert_close(metrics.theil_index, (10.0f64).ln());
    }

    #[test]
    fn test_largest_holder_majority_gives_one() {
        assert_eq!(nakamoto_coefficient(&[51.0, 20.0, 29.0]).unwrap(), 1);
        // exactly half is not a majority
        assert_eq!(nakamoto_coefficient(&[50.0, 25.0, 25.0]).unwrap(), 2);
    }

    #[test]
    fn test_scale_invariance() {
        let balances = [3.0, 7.0, 11.0, 150.0, 0.5];
        let scaled: Vec<f64> = balances.iter().map(|b| b * 1_000_000.0).collect();

        let a = compute(&balances).unwrap();
        let b = compute(&scaled).unwrap();

        assert!((a.gini_coefficient - b.gini_coefficient).abs() < 1e-12);
        assert!((a.hhi - b.hhi).abs() < 1e-12);
        assert!((a.shannon_entropy - b.shannon_entropy).abs() < 1e-12);
        assert!((a.theil_index - b.theil_index).abs() < 1e-12);
        assert_eq!(a.nakamoto_coefficient, b.nakamoto_coefficient);
    }

    #[test]
    fn test_single_holder() {
        assert_eq!(shannon_entropy(&[42.0]).unwrap(), 0.0);
        assert_eq!(hhi(&[42.0]).unwrap(), 1.0);
        assert_eq!(nakamoto_coefficient(&[42.0]).unwrap(), 1);
        assert!(matches!(
            gini_coefficient(&[42.0]),
            Err(AnalysisError::DegenerateInput(_))
        ));
        assert!(compute(&[42.0]).is_err());
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        assert!(matches!(compute(&[]), Err(AnalysisError::DegenerateInput(_))));
        assert!(matches!(
            compute(&[0.0, 0.0, 0.0]),
            Err(AnalysisError::DegenerateInput(_))
        ));
        assert_eq!(
            compute(&[1.0, -2.0, 3.0]),
            Err(AnalysisError::InvalidBalance { index: 1, value: -2.0 })
        );
        assert!(matches!(
            hhi(&[1.0, f64::NAN]),
            Err(AnalysisError::InvalidBalance { index: 1, .. })
        ));
    }
}
