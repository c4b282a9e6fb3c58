//! Reference distributions used by the combiners and the regression fitter.
//!
//! These are thin wrappers over `statrs` so the rest of the crate can treat the
//! normal, chi-squared and F distributions as pure functions with documented
//! domains. Degrees of freedom are validated here; callers validate p-values.

use crate::error::CalibrationError;
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor};
use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;

/// Standard normal CDF, Φ(x).
#[inline]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal upper tail, 1 − Φ(x), computed without cancellation.
#[inline]
pub fn normal_sf(x: f64) -> f64 {
    0.5 * erfc(x / SQRT_2)
}

/// Standard normal quantile, Φ⁻¹(p). Returns ±∞ at the closed endpoints.
#[inline]
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Upper-tail probability of a chi-squared distribution, P(X > x).
pub fn chi_squared_sf(x: f64, df: f64) -> Result<f64, CalibrationError> {
    let dist = ChiSquared::new(df).map_err(|e| {
        CalibrationError::Numerical(format!("invalid chi-squared degrees of freedom {df}: {e}"))
    })?;
    if x <= 0.0 {
        return Ok(1.0);
    }
    Ok(dist.sf(x))
}

/// Upper-tail probability of an F distribution, P(F > x).
pub fn f_sf(x: f64, df_num: f64, df_den: f64) -> Result<f64, CalibrationError> {
    let dist = FisherSnedecor::new(df_num, df_den).map_err(|e| {
        CalibrationError::Numerical(format!(
            "invalid F degrees of freedom ({df_num}, {df_den}): {e}"
        ))
    })?;
    if x <= 0.0 {
        return Ok(1.0);
    }
    if x.is_infinite() {
        return Ok(0.0);
    }
    Ok(dist.sf(x).clamp(0.0, 1.0))
}
