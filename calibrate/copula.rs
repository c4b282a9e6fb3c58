//! Correlated uniform generation through a Gaussian copula.
//!
//! A nominal rank correlation `r` is mapped to the Pearson correlation of the
//! latent normals with `ρ = 2·sin(π·r/6)`. Every pair of the `d` columns shares the
//! same `ρ`, which models several tests applied to the same underlying data.
//! The latent draws are correlated with the lower Cholesky factor and pushed
//! through Φ, so each column is marginally uniform on (0, 1).

use crate::distributions::normal_cdf;
use crate::error::CalibrationError;
use crate::types::PValueMatrix;
use ndarray::{Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{Cholesky, UPLO};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Converts a nominal rank correlation in `[-1, 1]` to the latent Pearson correlation.
pub fn rank_to_pearson(r: f64) -> Result<f64, CalibrationError> {
    if !(-1.0..=1.0).contains(&r) {
        return Err(CalibrationError::Domain {
            what: "rank correlation",
            value: r,
            lower: -1.0,
            upper: 1.0,
        });
    }
    Ok(2.0 * (r * PI / 6.0).sin())
}

/// Builds the `d × d` Toeplitz matrix with first row `[1, ρ, ρ, …]`.
pub fn equicorrelation_matrix(rho: f64, d: usize) -> Result<Array2<f64>, CalibrationError> {
    if d < 2 {
        return Err(CalibrationError::Shape {
            context: "correlated dimensions (at least 2)",
            expected: 2,
            found: d,
        });
    }
    if !(-1.0..=1.0).contains(&rho) {
        return Err(CalibrationError::Domain {
            what: "pairwise correlation",
            value: rho,
            lower: -1.0,
            upper: 1.0,
        });
    }
    Ok(Array2::from_shape_fn(
        (d, d),
        |(i, j)| if i == j { 1.0 } else { rho },
    ))
}

/// Lower-triangular `L` with `L·Lᵀ = P`.
///
/// Fails with a numerical error when `P` is not positive definite, which happens
/// for negative `ρ` below `-1/(d-1)` and for an exact `|ρ| = 1`. The mapping from
/// `r = ±1` lands one ulp inside that boundary, so two columns still factor.
pub fn cholesky_lower(matrix: ArrayView2<f64>) -> Result<Array2<f64>, CalibrationError> {
    if matrix.nrows() != matrix.ncols() {
        return Err(CalibrationError::Shape {
            context: "square correlation matrix",
            expected: matrix.nrows(),
            found: matrix.ncols(),
        });
    }
    let lower = matrix.cholesky(UPLO::Lower).map_err(|e| {
        CalibrationError::Numerical(format!(
            "correlation matrix is not positive definite: {e}"
        ))
    })?;
    if lower.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::Numerical(
            "Cholesky factor contains non-finite entries".to_string(),
        ));
    }
    Ok(lower)
}

/// Correlated uniforms from pre-drawn standard normals `z` (shape `n × d`).
///
/// This is the deterministic half of [`generate`]; tests feed it fixed draws.
pub fn generate_from_normals(z: ArrayView2<f64>, r: f64) -> Result<PValueMatrix, CalibrationError> {
    let d = z.ncols();
    if z.nrows() == 0 {
        return Err(CalibrationError::EmptyInput("draws"));
    }
    let rho = rank_to_pearson(r)?;
    let correlation = equicorrelation_matrix(rho, d)?;
    let lower = cholesky_lower(correlation.view())?;
    log::debug!("Copula draw: r={r:.4}, rho={rho:.4}, n={}, d={d}", z.nrows());

    let correlated = z.dot(&lower.t());
    PValueMatrix::new(correlated.mapv(normal_cdf))
}

/// Draws `n` rows of `d` correlated uniforms at nominal rank correlation `r`.
///
/// Determinism depends only on `rng`: the normals are drawn row by row.
pub fn generate<R: Rng + ?Sized>(
    r: f64,
    n: usize,
    d: usize,
    rng: &mut R,
) -> Result<PValueMatrix, CalibrationError> {
    if n == 0 {
        return Err(CalibrationError::EmptyInput("draws"));
    }
    // Fail before spending time on the draws.
    let rho = rank_to_pearson(r)?;
    equicorrelation_matrix(rho, d)?;

    let z = random_standard_normal((n, d), rng);
    generate_from_normals(z.view(), r)
}

/// An `n × d` matrix of independent standard normals.
pub fn random_standard_normal<R: Rng + ?Sized>(shape: (usize, usize), rng: &mut R) -> Array2<f64> {
    Array2::from_shape_fn(shape, |_| rng.sample(StandardNormal))
}

/// Sample Pearson correlation of two columns.
///
/// For uniform margins this is also their Spearman correlation, which the
/// Gaussian copula sets to `r` in expectation.
pub fn empirical_correlation(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64, CalibrationError> {
    if a.len() != b.len() {
        return Err(CalibrationError::Shape {
            context: "paired columns",
            expected: a.len(),
            found: b.len(),
        });
    }
    if a.len() < 2 {
        return Err(CalibrationError::EmptyInput("paired observations"));
    }
    let n = a.len() as f64;
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        return Err(CalibrationError::Numerical(
            "correlation of a constant column is undefined".to_string(),
        ));
    }
    Ok(cov / denom)
}
