//! Model selection followed by false-discovery-rate correction.
//!
//! Each unit moves through three states: [`FittedUnit`] holds one
//! `(score, p-value)` pair per candidate model, [`SelectedUnit`] records the
//! index of the minimum score, and [`CorrectedUnit`] carries the
//! Benjamini–Hochberg adjusted p-value at that index. The adjustment always runs
//! over every candidate, since reporting the winner's raw p-value ignores the
//! search and is anti-conservative.
//!
//! Ties on the score go to the first candidate in input order.

use crate::error::{CalibrationError, check_p_value};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Output of fitting one candidate model to one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelFit {
    /// Information-criterion score; lower is better.
    pub score: f64,
    /// Significance p-value of the model.
    pub p_value: f64,
}

impl ModelFit {
    pub fn new(score: f64, p_value: f64) -> Self {
        Self { score, p_value }
    }
}

impl From<(f64, f64)> for ModelFit {
    fn from((score, p_value): (f64, f64)) -> Self {
        Self { score, p_value }
    }
}

/// How the candidate models of the simulation draw on the unit's covariates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateLayout {
    /// Model `j` uses covariate `j` alone; all models have equal size.
    Disjoint,
    /// Model `j` uses covariates `0..=j`.
    Nested,
}

impl CandidateLayout {
    /// Column range of the covariate matrix used by candidate `model`.
    pub fn columns(self, model: usize) -> std::ops::Range<usize> {
        match self {
            Self::Disjoint => model..model + 1,
            Self::Nested => 0..model + 1,
        }
    }

    pub fn predictors_in_model(self, model: usize) -> usize {
        self.columns(model).len()
    }
}

/// Benjamini–Hochberg adjusted p-values, in input order.
///
/// The adjusted value at rank `i` of `m` is `min over j ≥ i of p₍ⱼ₎·m/j`, capped at 1,
/// so adjusted values never fall below their raw values and are non-decreasing in rank.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Result<Vec<f64>, CalibrationError> {
    if pvalues.is_empty() {
        return Err(CalibrationError::EmptyInput("p-values to adjust"));
    }
    for &p in pvalues {
        check_p_value(p)?;
    }

    let m = pvalues.len();
    let m_f = m as f64;
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut adjusted = vec![0.0; m];
    let mut running_min = 1.0_f64;
    for rank in (0..m).rev() {
        let idx = order[rank];
        // The factor m/rank is at least 1, so the product never rounds below p.
        let scaled = pvalues[idx] * (m_f / (rank + 1) as f64);
        running_min = running_min.min(scaled);
        adjusted[idx] = running_min;
    }
    Ok(adjusted)
}

/// A unit whose candidate models have all been fitted.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedUnit {
    fits: Vec<ModelFit>,
}

impl FittedUnit {
    pub fn new(fits: Vec<ModelFit>) -> Result<Self, CalibrationError> {
        if fits.is_empty() {
            return Err(CalibrationError::EmptyInput("candidate model fits"));
        }
        for fit in &fits {
            check_p_value(fit.p_value)?;
            if fit.score.is_nan() {
                return Err(CalibrationError::Numerical(
                    "information-criterion score is NaN".to_string(),
                ));
            }
        }
        Ok(Self { fits })
    }

    pub fn fits(&self) -> &[ModelFit] {
        &self.fits
    }

    /// Picks the minimum score, first index on ties.
    pub fn select(self) -> SelectedUnit {
        let mut best = 0;
        for (idx, fit) in self.fits.iter().enumerate().skip(1) {
            if fit.score < self.fits[best].score {
                best = idx;
            }
        }
        let ties = self
            .fits
            .iter()
            .filter(|fit| fit.score == self.fits[best].score)
            .count();
        if ties > 1 {
            log::debug!("{ties} candidate models tie on score; keeping index {best}");
        }
        SelectedUnit {
            fits: self.fits,
            selected: best,
        }
    }
}

/// A unit with its best-scoring model chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedUnit {
    fits: Vec<ModelFit>,
    selected: usize,
}

impl SelectedUnit {
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// The uncorrected p-value of the winner.
    pub fn raw_p_value(&self) -> f64 {
        self.fits[self.selected].p_value
    }

    /// Adjusts all candidate p-values and keeps the winner's.
    pub fn correct(self) -> Result<CorrectedUnit, CalibrationError> {
        let raw: Vec<f64> = self.fits.iter().map(|fit| fit.p_value).collect();
        let adjusted = benjamini_hochberg(&raw)?;
        Ok(CorrectedUnit {
            selected: self.selected,
            raw_p_value: raw[self.selected],
            corrected_p_value: adjusted[self.selected],
        })
    }
}

/// Final per-unit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrectedUnit {
    pub selected: usize,
    pub raw_p_value: f64,
    pub corrected_p_value: f64,
}

/// Selects the minimum-score model and returns its FDR-corrected p-value.
pub fn correct_selected_pvalue(fits: &[ModelFit]) -> Result<f64, CalibrationError> {
    Ok(FittedUnit::new(fits.to_vec())?
        .select()
        .correct()?
        .corrected_p_value)
}

/// The winner's raw p-value, ignoring the selection step.
pub fn naive_selected_pvalue(fits: &[ModelFit]) -> Result<f64, CalibrationError> {
    Ok(FittedUnit::new(fits.to_vec())?.select().raw_p_value())
}

/// Runs selection and correction for every unit in parallel, preserving unit order.
pub fn correct_units(units: &[Vec<ModelFit>]) -> Result<Vec<CorrectedUnit>, CalibrationError> {
    if units.is_empty() {
        return Err(CalibrationError::EmptyInput("units"));
    }
    units
        .par_iter()
        .map(|fits| FittedUnit::new(fits.clone())?.select().correct())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fits(pairs: &[(f64, f64)]) -> Vec<ModelFit> {
        pairs.iter().copied().map(ModelFit::from).collect()
    }

    #[test]
    fn bh_matches_hand_computation() {
        let adjusted = benjamini_hochberg(&[0.01, 0.04, 0.20]).unwrap();
        let expected = [0.03, 0.06, 0.20];
        for (a, e) in adjusted.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn bh_is_monotone_in_rank_and_never_below_raw() {
        let raw = [0.20, 0.01, 0.04, 0.039, 0.9, 0.0, 1.0];
        let adjusted = benjamini_hochberg(&raw).unwrap();
        for (&a, &p) in adjusted.iter().zip(raw.iter()) {
            assert!(a >= p, "adjusted {a} below raw {p}");
            assert!(a <= 1.0);
        }
        let mut order: Vec<usize> = (0..raw.len()).collect();
        order.sort_by(|&a, &b| raw[a].total_cmp(&raw[b]));
        for pair in order.windows(2) {
            assert!(adjusted[pair[0]] <= adjusted[pair[1]]);
        }
    }

    #[test]
    fn bh_never_rounds_the_largest_p_value_down() {
        // 0.9439788927320165·3/3 evaluated left to right lands one ulp below p.
        let raw = [0.2, 0.5, 0.9439788927320165];
        let adjusted = benjamini_hochberg(&raw).unwrap();
        assert_eq!(adjusted[2], raw[2]);
        for (&a, &p) in adjusted.iter().zip(raw.iter()) {
            assert!(a >= p, "adjusted {a} below raw {p}");
        }

        let unit = fits(&[(5.0, 0.2), (6.0, 0.5), (1.0, 0.9439788927320165)]);
        assert!(correct_selected_pvalue(&unit).unwrap() >= naive_selected_pvalue(&unit).unwrap());
    }

    #[test]
    fn bh_enforces_step_up_minimum() {
        // 0.02·3/2 = 0.03 would exceed 0.025·3/3 = 0.025, so rank 2 takes 0.025.
        let adjusted = benjamini_hochberg(&[0.015, 0.02, 0.025]).unwrap();
        assert_abs_diff_eq!(adjusted[0], 0.025, epsilon = 1e-12);
        assert_abs_diff_eq!(adjusted[1], 0.025, epsilon = 1e-12);
        assert_abs_diff_eq!(adjusted[2], 0.025, epsilon = 1e-12);
    }

    #[test]
    fn selection_takes_minimum_score_with_first_index_on_ties() {
        let unit = FittedUnit::new(fits(&[(10.0, 0.5), (7.0, 0.2), (7.0, 0.01)])).unwrap();
        let selected = unit.select();
        assert_eq!(selected.selected(), 1);
        assert_eq!(selected.raw_p_value(), 0.2);
    }

    #[test]
    fn corrected_value_comes_from_the_full_candidate_set() {
        let unit = fits(&[(12.0, 0.04), (9.5, 0.01), (11.0, 0.20)]);
        let corrected = correct_selected_pvalue(&unit).unwrap();
        assert_abs_diff_eq!(corrected, 0.03, epsilon = 1e-12);
        assert_eq!(naive_selected_pvalue(&unit).unwrap(), 0.01);
    }

    #[test]
    fn select_then_correct_equals_correct_then_select() {
        let units = [
            fits(&[(3.0, 0.3), (1.0, 0.02), (2.0, 0.5)]),
            fits(&[(0.5, 0.9), (4.0, 0.001), (0.7, 0.04), (9.0, 0.3)]),
            fits(&[(1.0, 1.0), (1.0, 0.0)]),
        ];
        for unit in &units {
            let selected = FittedUnit::new(unit.clone()).unwrap().select().selected();
            let raw: Vec<f64> = unit.iter().map(|fit| fit.p_value).collect();
            let adjusted_first = benjamini_hochberg(&raw).unwrap()[selected];
            assert_eq!(correct_selected_pvalue(unit).unwrap(), adjusted_first);
        }
    }

    #[test]
    fn single_candidate_is_left_unchanged() {
        assert_eq!(correct_selected_pvalue(&fits(&[(4.0, 0.07)])).unwrap(), 0.07);
    }

    #[test]
    fn empty_and_invalid_inputs_are_rejected() {
        assert!(matches!(
            correct_selected_pvalue(&[]).unwrap_err(),
            CalibrationError::EmptyInput(_)
        ));
        assert!(matches!(
            correct_selected_pvalue(&fits(&[(1.0, 1.5)])).unwrap_err(),
            CalibrationError::Domain { .. }
        ));
        assert!(matches!(
            correct_selected_pvalue(&fits(&[(f64::NAN, 0.5)])).unwrap_err(),
            CalibrationError::Numerical(_)
        ));
        assert!(benjamini_hochberg(&[]).is_err());
        assert!(correct_units(&[]).is_err());
    }

    #[test]
    fn units_are_processed_in_order() {
        let units = vec![
            fits(&[(1.0, 0.01), (2.0, 0.04), (3.0, 0.2)]),
            fits(&[(5.0, 0.5), (4.0, 0.6)]),
        ];
        let outcomes = correct_units(&units).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].selected, 0);
        assert_abs_diff_eq!(outcomes[0].corrected_p_value, 0.03, epsilon = 1e-12);
        assert_eq!(outcomes[1].selected, 1);
        assert_abs_diff_eq!(outcomes[1].corrected_p_value, 0.6, epsilon = 1e-12);
        assert!(outcomes.iter().all(|o| o.corrected_p_value >= o.raw_p_value));
    }
}
