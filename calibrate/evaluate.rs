//! Calibration checks for p-values generated under the null.
//!
//! Correctly calibrated p-values are uniform, so the fraction below any α should
//! be α and the empirical CDF should follow the identity line. The report keeps
//! the observed rate, its Monte Carlo standard error, and the direction of any
//! departure so conservative and anti-conservative procedures can be told apart.

use crate::error::{CalibrationError, check_p_value};
use itertools::Itertools;
use ndarray::ArrayView1;
use serde::Serialize;
use std::fmt;

/// Nominal levels checked when the caller does not supply any.
pub const DEFAULT_THRESHOLDS: [f64; 3] = [0.01, 0.05, 0.1];

/// Direction of a departure from the nominal rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Skew {
    Calibrated,
    /// Fewer rejections than nominal; p-values lean toward 1.
    Conservative,
    /// More rejections than nominal; p-values lean toward 0.
    AntiConservative,
}

impl Skew {
    pub fn classify(observed: f64, alpha: f64, tolerance: f64) -> Self {
        let deviation = observed - alpha;
        if deviation > tolerance {
            Self::AntiConservative
        } else if deviation < -tolerance {
            Self::Conservative
        } else {
            Self::Calibrated
        }
    }
}

impl fmt::Display for Skew {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Calibrated => "calibrated",
            Self::Conservative => "conservative",
            Self::AntiConservative => "anti-conservative",
        };
        f.write_str(label)
    }
}

/// Observed rejection rate at one nominal level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdRate {
    pub alpha: f64,
    /// Fraction of p-values strictly below `alpha`.
    pub observed: f64,
    /// Binomial standard error `√(α(1−α)/n)` of the rate under exact calibration.
    pub std_error: f64,
}

impl ThresholdRate {
    /// Signed departure `observed − α`.
    pub fn deviation(&self) -> f64 {
        self.observed - self.alpha
    }

    pub fn skew(&self, tolerance: f64) -> Skew {
        Skew::classify(self.observed, self.alpha, tolerance)
    }
}

/// Observed versus nominal rejection rates for one vector of null p-values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub n: usize,
    pub rates: Vec<ThresholdRate>,
    /// Kolmogorov–Smirnov distance between the empirical CDF and the identity.
    pub max_deviation: f64,
}

impl CalibrationReport {
    /// The rate recorded for `alpha`, if that threshold was evaluated.
    pub fn rate_at(&self, alpha: f64) -> Option<&ThresholdRate> {
        self.rates.iter().find(|rate| rate.alpha == alpha)
    }

    /// Largest absolute departure from nominal over the evaluated thresholds.
    pub fn worst_deviation(&self) -> f64 {
        self.rates
            .iter()
            .map(|rate| rate.deviation().abs())
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rates = self
            .rates
            .iter()
            .map(|rate| format!("P(p<{})={:.4}", rate.alpha, rate.observed))
            .join("  ");
        write!(f, "n={} {} KS={:.4}", self.n, rates, self.max_deviation)
    }
}

pub(crate) fn check_threshold(alpha: f64) -> Result<(), CalibrationError> {
    if alpha > 0.0 && alpha <= 1.0 {
        Ok(())
    } else {
        Err(CalibrationError::Domain {
            what: "threshold",
            value: alpha,
            lower: 0.0,
            upper: 1.0,
        })
    }
}

fn check_p_values(pvalues: ArrayView1<f64>) -> Result<(), CalibrationError> {
    if pvalues.is_empty() {
        return Err(CalibrationError::EmptyInput("p-values to evaluate"));
    }
    pvalues.iter().try_for_each(|&p| check_p_value(p))
}

/// Fraction of `pvalues` strictly below each threshold.
pub fn evaluate(
    pvalues: ArrayView1<f64>,
    thresholds: &[f64],
) -> Result<CalibrationReport, CalibrationError> {
    check_p_values(pvalues)?;
    if thresholds.is_empty() {
        return Err(CalibrationError::EmptyInput("thresholds"));
    }
    for &alpha in thresholds {
        check_threshold(alpha)?;
    }

    let n = pvalues.len();
    let n_f = n as f64;
    let rates = thresholds
        .iter()
        .map(|&alpha| {
            let below = pvalues.iter().filter(|&&p| p < alpha).count();
            ThresholdRate {
                alpha,
                observed: below as f64 / n_f,
                std_error: (alpha * (1.0 - alpha) / n_f).sqrt(),
            }
        })
        .collect();

    let max_deviation = max_ecdf_deviation(pvalues)?;
    Ok(CalibrationReport {
        n,
        rates,
        max_deviation,
    })
}

/// Sorted values paired with `rank / n`, the step points of the empirical CDF.
pub fn empirical_cdf(pvalues: ArrayView1<f64>) -> Result<Vec<(f64, f64)>, CalibrationError> {
    check_p_values(pvalues)?;
    let n = pvalues.len() as f64;
    Ok(pvalues
        .iter()
        .copied()
        .sorted_by(f64::total_cmp)
        .enumerate()
        .map(|(idx, p)| (p, (idx + 1) as f64 / n))
        .collect())
}

/// Supremum distance between the empirical CDF and the uniform CDF.
pub fn max_ecdf_deviation(pvalues: ArrayView1<f64>) -> Result<f64, CalibrationError> {
    let n = pvalues.len() as f64;
    let curve = empirical_cdf(pvalues)?;
    // The ECDF jumps from (i-1)/n to i/n at the i-th order statistic; both sides count.
    Ok(curve
        .iter()
        .map(|&(p, upper)| {
            let lower = upper - 1.0 / n;
            (upper - p).max(p - lower)
        })
        .fold(0.0, f64::max))
}
