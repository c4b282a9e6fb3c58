use approx::assert_abs_diff_eq;
use metacal::config::ExperimentConfig;
use metacal::error::CalibrationError;
use metacal::progress::{NoopProgress, SimulationProgress, SimulationStage};
use metacal::regression::{InformationCriterion, ModelFitter, OlsFitter};
use metacal::selection::{CandidateLayout, ModelFit, correct_units};
use metacal::simulation::{run_selection_experiment, run_selection_experiment_with, simulate_unit};
use ndarray::{ArrayView1, ArrayView2};
use std::sync::atomic::{AtomicUsize, Ordering};

fn selection_config(layout: CandidateLayout, units: usize, models: usize) -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.seed = 99;
    config.selection.units = units;
    config.selection.samples_per_unit = 30;
    config.selection.candidate_models = models;
    config.selection.layout = layout;
    config
}

#[test]
fn raw_winner_p_values_are_anti_conservative_and_correction_restores_the_level() {
    let config = selection_config(CandidateLayout::Disjoint, 2000, 4);
    let result = run_selection_experiment(&config, &NoopProgress).unwrap();

    // With four equal-size models the lowest AIC is the smallest p-value.
    let raw = result.raw.rate_at(0.05).unwrap().observed;
    assert!(raw > 0.12, "raw selected rate {raw}");
    let corrected = result.corrected.rate_at(0.05).unwrap().observed;
    assert!(corrected < 0.08, "corrected rate {corrected}");
    assert!(corrected < raw);

    for outcome in &result.outcomes {
        assert!(outcome.corrected_p_value >= outcome.raw_p_value);
        assert!(outcome.corrected_p_value <= 1.0);
    }
    assert_eq!(result.selection_counts.len(), 4);
    assert!(result.selection_counts.iter().all(|&count| count > 300));
}

#[test]
fn bic_and_nested_models_still_never_lower_a_p_value() {
    let mut config = selection_config(CandidateLayout::Nested, 300, 3);
    config.selection.criterion = InformationCriterion::Bic;
    let result = run_selection_experiment(&config, &NoopProgress).unwrap();
    assert_eq!(result.outcomes.len(), 300);
    assert!(
        result
            .outcomes
            .iter()
            .all(|o| o.corrected_p_value >= o.raw_p_value)
    );
}

#[test]
fn experiment_matches_unit_by_unit_correction() {
    let config = selection_config(CandidateLayout::Disjoint, 40, 3);
    let fitter = OlsFitter::default();
    let result = run_selection_experiment_with(&config, &fitter, &NoopProgress).unwrap();

    let fits: Vec<Vec<ModelFit>> = (0..40)
        .map(|unit| simulate_unit(&config, &fitter, unit).unwrap().fits().to_vec())
        .collect();
    assert_eq!(correct_units(&fits).unwrap(), result.outcomes);
}

/// Scores each candidate by its width so the narrowest model always wins.
struct WidthFitter;

impl ModelFitter for WidthFitter {
    fn fit(
        &self,
        y: ArrayView1<f64>,
        predictors: ArrayView2<f64>,
    ) -> Result<ModelFit, CalibrationError> {
        let p_value = if y[0] > 0.0 { 0.01 } else { 0.5 };
        Ok(ModelFit::new(predictors.ncols() as f64, p_value))
    }
}

#[test]
fn any_fitter_can_drive_the_experiment() {
    let config = selection_config(CandidateLayout::Nested, 50, 3);
    let result = run_selection_experiment_with(&config, &WidthFitter, &NoopProgress).unwrap();
    assert_eq!(result.selection_counts, vec![50, 0, 0]);
    for outcome in &result.outcomes {
        // Three equal p-values are left unchanged by the adjustment.
        assert_abs_diff_eq!(outcome.corrected_p_value, outcome.raw_p_value, epsilon = 1e-15);
    }
}

#[derive(Default)]
struct CountingProgress {
    started: AtomicUsize,
    advanced: AtomicUsize,
    finished: AtomicUsize,
}

impl SimulationProgress for CountingProgress {
    fn on_stage_start(&self, stage: SimulationStage, total: usize) {
        assert_eq!(stage, SimulationStage::UnitFitting);
        self.started.store(total, Ordering::SeqCst);
    }

    fn on_stage_advance(&self, stage: SimulationStage, completed: usize) {
        assert_eq!(stage, SimulationStage::UnitFitting);
        self.advanced.fetch_max(completed, Ordering::SeqCst);
    }

    fn on_stage_finish(&self, stage: SimulationStage) {
        assert_eq!(stage, SimulationStage::UnitFitting);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn progress_observer_sees_every_unit() {
    let config = selection_config(CandidateLayout::Disjoint, 64, 2);
    let progress = CountingProgress::default();
    run_selection_experiment(&config, &progress).unwrap();
    assert_eq!(progress.started.load(Ordering::SeqCst), 64);
    assert_eq!(progress.advanced.load(Ordering::SeqCst), 64);
    assert_eq!(progress.finished.load(Ordering::SeqCst), 1);
}
