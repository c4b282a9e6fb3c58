use crate::distributions::f_sf;
use crate::error::CalibrationError;
use crate::selection::ModelFit;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, concatenate};
use ndarray_linalg::LeastSquaresSvd;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Information criterion used to rank competing fits. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationCriterion {
    /// Akaike: `−2·logL + 2·k`.
    Aic,
    /// Schwarz: `−2·logL + ln(n)·k`.
    Bic,
}

impl InformationCriterion {
    fn penalty_per_parameter(self, n: usize) -> f64 {
        match self {
            Self::Aic => 2.0,
            Self::Bic => (n as f64).ln(),
        }
    }
}

/// Everything a single ordinary-least-squares fit reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub rss: f64,
    pub f_statistic: f64,
    /// P-value of the overall F-test against the intercept-only model.
    pub f_pvalue: f64,
    pub log_likelihood: f64,
    /// Estimated parameters: coefficients, intercept and residual variance.
    pub num_parameters: usize,
    pub n: usize,
}

impl LinearFit {
    pub fn information_criterion(&self, criterion: InformationCriterion) -> f64 {
        -2.0 * self.log_likelihood
            + criterion.penalty_per_parameter(self.n) * self.num_parameters as f64
    }
}

/// The seam between the selection pipeline and whatever fits the candidate models.
///
/// One call yields both the score used for selection and the significance p-value,
/// so a model is never fitted twice.
pub trait ModelFitter: Sync {
    fn fit(&self, y: ArrayView1<f64>, predictors: ArrayView2<f64>) -> Result<ModelFit, CalibrationError>;
}

/// Gaussian linear model with an intercept, fitted by least squares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OlsFitter {
    pub criterion: InformationCriterion,
}

impl OlsFitter {
    pub fn new(criterion: InformationCriterion) -> Self {
        Self { criterion }
    }
}

impl Default for OlsFitter {
    fn default() -> Self {
        Self::new(InformationCriterion::Aic)
    }
}

impl ModelFitter for OlsFitter {
    fn fit(&self, y: ArrayView1<f64>, predictors: ArrayView2<f64>) -> Result<ModelFit, CalibrationError> {
        let fit = linear_model_fit(y, predictors)?;
        Ok(ModelFit {
            score: fit.information_criterion(self.criterion),
            p_value: fit.f_pvalue,
        })
    }
}

/// Fits `y ~ 1 + predictors` and returns the overall F-test and likelihood.
pub fn linear_model_fit(
    y: ArrayView1<f64>,
    predictors: ArrayView2<f64>,
) -> Result<LinearFit, CalibrationError> {
    let n = y.len();
    let p = predictors.ncols();
    if p == 0 {
        return Err(CalibrationError::EmptyInput("predictors"));
    }
    if predictors.nrows() != n {
        return Err(CalibrationError::Shape {
            context: "predictor rows",
            expected: n,
            found: predictors.nrows(),
        });
    }
    if n <= p + 1 {
        return Err(CalibrationError::Shape {
            context: "observations (more than predictors + 1)",
            expected: p + 2,
            found: n,
        });
    }
    if y.iter().chain(predictors.iter()).any(|v| !v.is_finite()) {
        return Err(CalibrationError::Numerical(
            "regression input contains non-finite values".to_string(),
        ));
    }

    let design = with_intercept(predictors)?;
    let solution = design.least_squares(&y)?.solution;
    let fitted = design.dot(&solution);
    let rss: f64 = y
        .iter()
        .zip(fitted.iter())
        .map(|(&obs, &fit)| (obs - fit).powi(2))
        .sum();
    let mean = y.sum() / n as f64;
    let tss: f64 = y.iter().map(|&obs| (obs - mean).powi(2)).sum();

    let df_model = p as f64;
    let df_resid = (n - p - 1) as f64;
    let explained = (tss - rss).max(0.0);
    let f_statistic = if rss > 0.0 {
        (explained / df_model) / (rss / df_resid)
    } else {
        f64::INFINITY
    };
    let f_pvalue = f_sf(f_statistic, df_model, df_resid)?;

    let n_f = n as f64;
    // Profile log-likelihood at the maximum-likelihood variance RSS / n.
    let log_likelihood = -0.5 * n_f * ((2.0 * PI).ln() + (rss.max(f64::MIN_POSITIVE) / n_f).ln() + 1.0);

    Ok(LinearFit {
        rss,
        f_statistic,
        f_pvalue,
        log_likelihood,
        num_parameters: p + 2,
        n,
    })
}

fn with_intercept(predictors: ArrayView2<f64>) -> Result<Array2<f64>, CalibrationError> {
    let ones = Array2::<f64>::ones((predictors.nrows(), 1));
    concatenate(Axis(1), &[ones.view(), predictors.view()]).map_err(|e| CalibrationError::Numerical(format!(
        "could not assemble design matrix: {e}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn exact_line_has_zero_residual() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![3.0, 5.0, 7.0, 9.0, 11.0];
        let fit = linear_model_fit(y.view(), x.view()).unwrap();
        assert_abs_diff_eq!(fit.rss, 0.0, epsilon = 1e-18);
        assert!(fit.f_pvalue < 1e-12);
    }

    #[test]
    fn f_test_matches_hand_computation() {
        // y = [1, 3, 2, 5, 4], x = [1, 2, 3, 4, 5]: slope 0.8, intercept 0.6,
        // fitted [1.4, 2.2, 3.0, 3.8, 4.6], RSS = 3.6, TSS = 10, F = 6.4 / 1.2.
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 3.0, 2.0, 5.0, 4.0];
        let fit = linear_model_fit(y.view(), x.view()).unwrap();
        assert_abs_diff_eq!(fit.rss, 3.6, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.f_statistic, 6.4 / 1.2, epsilon = 1e-9);
        assert_abs_diff_eq!(
            fit.f_pvalue,
            crate::distributions::f_sf(6.4 / 1.2, 1.0, 3.0).unwrap(),
            epsilon = 1e-9
        );
        assert_eq!(fit.num_parameters, 3);
    }

    #[test]
    fn aic_matches_gaussian_likelihood_formula() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 3.0, 2.0, 5.0, 4.0];
        let fit = linear_model_fit(y.view(), x.view()).unwrap();
        let n = 5.0_f64;
        let expected_aic = n * (2.0 * PI).ln() + n * (3.6_f64 / n).ln() + n + 2.0 * 3.0;
        assert_abs_diff_eq!(
            fit.information_criterion(InformationCriterion::Aic),
            expected_aic,
            epsilon = 1e-9
        );
        let expected_bic = expected_aic - 6.0 + n.ln() * 3.0;
        assert_abs_diff_eq!(
            fit.information_criterion(InformationCriterion::Bic),
            expected_bic,
            epsilon = 1e-9
        );
    }

    #[test]
    fn fitter_reports_score_and_p_value_together() {
        let x = array![[0.2], [1.1], [-0.4], [0.9], [-1.3], [0.5]];
        let y = array![0.1, 0.8, -0.2, 0.3, -0.9, 0.0];
        let fit = linear_model_fit(y.view(), x.view()).unwrap();
        let model = OlsFitter::default().fit(y.view(), x.view()).unwrap();
        assert_eq!(model.p_value, fit.f_pvalue);
        assert_eq!(model.score, fit.information_criterion(InformationCriterion::Aic));
    }

    #[test]
    fn design_matrix_gets_a_leading_intercept_column() {
        let x = array![[2.0, 5.0], [3.0, 7.0]];
        let design = with_intercept(x.view()).unwrap();
        assert_eq!(design, array![[1.0, 2.0, 5.0], [1.0, 3.0, 7.0]]);
    }

    #[test]
    fn shape_problems_are_rejected() {
        let y = Array1::from(vec![1.0, 2.0, 3.0]);
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 7.0]];
        assert!(matches!(
            linear_model_fit(y.view(), x.view()).unwrap_err(),
            CalibrationError::Shape { .. }
        ));
        let x = array![[1.0], [2.0]];
        assert!(matches!(
            linear_model_fit(y.view(), x.view()).unwrap_err(),
            CalibrationError::Shape { .. }
        ));
        let x = Array2::<f64>::zeros((3, 0));
        assert!(matches!(
            linear_model_fit(y.view(), x.view()).unwrap_err(),
            CalibrationError::EmptyInput(_)
        ));
    }
}
