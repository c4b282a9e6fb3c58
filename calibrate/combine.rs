//! Meta-analytic combination of per-test p-values into one p-value per feature.
//!
//! Each row of a [`PValueMatrix`] is combined on its own, so the rows are mapped in
//! parallel. MinP and MaxP apply the correction that would be exact for independent
//! tests; measuring how badly that assumption fails under correlation is the point
//! of the calibration experiments.

use crate::config::NumericsConfig;
use crate::distributions::{chi_squared_sf, normal_quantile, normal_sf};
use crate::error::CalibrationError;
use crate::types::{CombinedPValues, PValueMatrix};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Default floor applied to exact zeros before Fisher's logarithm.
pub const DEFAULT_FISHER_EPSILON: f64 = 1e-300;

/// Default distance from 1 applied before Stouffer's normal quantile.
///
/// Near 1 the quantile is taken of `1 − p`, which has no resolution left below
/// about 1e-16. Small p-values need no floor and pass through unchanged.
pub const DEFAULT_STOUFFER_EPSILON: f64 = 1e-15;

/// Contribution of a p-value of exactly 1 to the Cauchy statistic.
const CAUCHY_UNIT_P_TERM: f64 = -1e15;

/// Below this the Cauchy term uses the `1 / (p·π)` tail expansion.
const CAUCHY_SMALL_P: f64 = 1e-15;

/// Available combination rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    /// `−2·Σ ln pᵢ` against a chi-squared with `2k` degrees of freedom.
    Fisher,
    /// Equal-weight sum of `Φ⁻¹(1 − pᵢ)` scaled by `1/√k`.
    Stouffer,
    /// Šidák correction of the smallest p-value, `1 − (1 − min)^k`.
    MinP,
    /// `max^k`, the independence null of the largest p-value.
    MaxP,
    /// Equal-weight Cauchy combination, `0.5 − atan(T/k)/π`.
    Cauchy,
}

impl MethodKind {
    pub const ALL: [MethodKind; 5] = [
        MethodKind::Fisher,
        MethodKind::Stouffer,
        MethodKind::MinP,
        MethodKind::MaxP,
        MethodKind::Cauchy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Fisher => "fisher",
            Self::Stouffer => "stouffer",
            Self::MinP => "minp",
            Self::MaxP => "maxp",
            Self::Cauchy => "cauchy",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Combines every row of `pvalues` with `method`.
pub fn combine(
    pvalues: &PValueMatrix,
    method: MethodKind,
    numerics: &NumericsConfig,
) -> Result<CombinedPValues, CalibrationError> {
    numerics.validate()?;
    let combined: Vec<f64> = pvalues
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| internal::combine_validated(row, method, numerics))
        .collect::<Result<Vec<f64>, CalibrationError>>()?;
    Ok(CombinedPValues::new(Array1::from_vec(combined)))
}

/// Combines a single row, validating it first.
pub fn combine_row(
    row: ArrayView1<f64>,
    method: MethodKind,
    numerics: &NumericsConfig,
) -> Result<f64, CalibrationError> {
    if row.is_empty() {
        return Err(CalibrationError::EmptyInput("tests per feature"));
    }
    for &p in row.iter() {
        crate::error::check_p_value(p)?;
    }
    numerics.validate()?;
    internal::combine_validated(row, method, numerics)
}

mod internal {
    use super::*;

    pub(super) fn combine_validated(
        row: ArrayView1<f64>,
        method: MethodKind,
        numerics: &NumericsConfig,
    ) -> Result<f64, CalibrationError> {
        let combined = match method {
            MethodKind::Fisher => fisher(row, numerics.fisher_epsilon)?,
            MethodKind::Stouffer => stouffer(row, numerics.stouffer_epsilon),
            MethodKind::MinP => min_p(row),
            MethodKind::MaxP => max_p(row),
            MethodKind::Cauchy => cauchy(row),
        };
        if combined.is_nan() {
            return Err(CalibrationError::Numerical(format!(
                "{method} combination of {row} produced NaN"
            )));
        }
        Ok(combined.clamp(0.0, 1.0))
    }

    fn fisher(row: ArrayView1<f64>, epsilon: f64) -> Result<f64, CalibrationError> {
        let statistic = -2.0 * row.iter().map(|&p| p.max(epsilon).ln()).sum::<f64>();
        chi_squared_sf(statistic, 2.0 * row.len() as f64)
    }

    fn stouffer(row: ArrayView1<f64>, epsilon: f64) -> f64 {
        // Φ⁻¹(1 − p) = −Φ⁻¹(p), which keeps precision for small p. Only the upper
        // end is capped, so an exact zero gives +∞ and the combined value is 0.
        let z_sum: f64 = row
            .iter()
            .map(|&p| -normal_quantile(p.min(1.0 - epsilon)))
            .sum();
        if z_sum == f64::INFINITY {
            return 0.0;
        }
        normal_sf(z_sum / (row.len() as f64).sqrt())
    }

    fn min_p(row: ArrayView1<f64>) -> f64 {
        let k = row.len() as f64;
        let smallest = row.iter().copied().fold(f64::INFINITY, f64::min);
        // 1 − (1 − m)^k written to stay accurate for tiny m.
        -(k * (-smallest).ln_1p()).exp_m1()
    }

    fn max_p(row: ArrayView1<f64>) -> f64 {
        let k = row.len() as i32;
        let largest = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        largest.powi(k)
    }

    fn cauchy(row: ArrayView1<f64>) -> f64 {
        let k = row.len() as f64;
        let mut statistic = 0.0;
        for &p in row.iter() {
            if p <= 0.0 {
                return 0.0;
            }
            statistic += if p >= 1.0 {
                CAUCHY_UNIT_P_TERM
            } else if p < CAUCHY_SMALL_P {
                1.0 / (p * PI)
            } else {
                ((0.5 - p) * PI).tan()
            };
        }
        0.5 - (statistic / k).atan() / PI
    }
}
