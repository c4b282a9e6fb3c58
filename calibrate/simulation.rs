//! Experiment drivers that generate null data, run a p-value procedure and
//! evaluate the result.
//!
//! The copula experiment feeds correlated uniforms through every combiner. The
//! selection experiment simulates units whose response is independent of all
//! covariates, picks a model per unit and compares the raw winner p-values with
//! their FDR-corrected counterparts. Both are deterministic given the seed in
//! [`ExperimentConfig`].

use crate::combine::{MethodKind, combine};
use crate::config::ExperimentConfig;
use crate::copula::{self, empirical_correlation, random_standard_normal, rank_to_pearson};
use crate::error::CalibrationError;
use crate::evaluate::{CalibrationReport, evaluate};
use crate::progress::{SimulationProgress, SimulationStage};
use crate::regression::{ModelFitter, OlsFitter};
use crate::selection::{CorrectedUnit, FittedUnit, ModelFit};
use ndarray::{Array1, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Calibration of one combination method at one dependence level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodCalibration {
    pub method: MethodKind,
    pub report: CalibrationReport,
}

/// Results for one point of a rank-correlation sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopulaCalibration {
    pub rank_correlation: f64,
    pub pearson_correlation: f64,
    /// Sample correlation between the first two generated columns.
    pub observed_correlation: f64,
    pub methods: Vec<MethodCalibration>,
}

impl CopulaCalibration {
    pub fn report_for(&self, method: MethodKind) -> Option<&CalibrationReport> {
        self.methods
            .iter()
            .find(|entry| entry.method == method)
            .map(|entry| &entry.report)
    }
}

/// Generates correlated null p-values at `r` and evaluates every combiner on them.
pub fn run_copula_experiment<R: Rng + ?Sized>(
    config: &ExperimentConfig,
    r: f64,
    rng: &mut R,
) -> Result<CopulaCalibration, CalibrationError> {
    let pearson_correlation = rank_to_pearson(r)?;
    let pvalues = copula::generate(r, config.copula.features, config.copula.tests, rng)?;
    let observed_correlation = empirical_correlation(pvalues.column(0), pvalues.column(1))?;
    log::info!(
        "Generated {} x {} null p-values at r={r:.3} (rho={pearson_correlation:.4}, observed {observed_correlation:.4})",
        pvalues.num_features(),
        pvalues.num_tests()
    );

    let mut methods = Vec::with_capacity(MethodKind::ALL.len());
    for method in MethodKind::ALL {
        let combined = combine(&pvalues, method, &config.numerics)?;
        let report = evaluate(combined.as_view(), &config.evaluation.thresholds)?;
        log::info!("  {method:<8} {report}");
        methods.push(MethodCalibration { method, report });
    }

    Ok(CopulaCalibration {
        rank_correlation: r,
        pearson_correlation,
        observed_correlation,
        methods,
    })
}

/// Runs [`run_copula_experiment`] for every configured rank correlation.
///
/// Sweep point `i` draws from its own generator seeded with `seed + i`.
pub fn run_copula_sweep(
    config: &ExperimentConfig,
    progress: &dyn SimulationProgress,
) -> Result<Vec<CopulaCalibration>, CalibrationError> {
    let stage = SimulationStage::CopulaSweep;
    let points = &config.copula.rank_correlations;
    progress.on_stage_start(stage, points.len());

    let mut results = Vec::with_capacity(points.len());
    for (idx, &r) in points.iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(idx as u64));
        results.push(run_copula_experiment(config, r, &mut rng)?);
        progress.on_stage_advance(stage, idx + 1);
    }

    progress.on_stage_finish(stage);
    Ok(results)
}

/// Outcome of the model-selection experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionCalibration {
    pub outcomes: Vec<CorrectedUnit>,
    /// Calibration of the winners' uncorrected p-values.
    pub raw: CalibrationReport,
    /// Calibration of the winners' FDR-corrected p-values.
    pub corrected: CalibrationReport,
    /// How often each candidate model was selected.
    pub selection_counts: Vec<usize>,
}

/// Fits every candidate model to one simulated null unit.
///
/// The response and the covariates are independent standard normals drawn from a
/// generator seeded with `seed + unit`, so each unit can be reproduced alone.
pub fn simulate_unit<F: ModelFitter + ?Sized>(
    config: &ExperimentConfig,
    fitter: &F,
    unit: usize,
) -> Result<FittedUnit, CalibrationError> {
    let selection = &config.selection;
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(unit as u64));
    let m = selection.samples_per_unit;
    let y: Array1<f64> = random_standard_normal((m, 1), &mut rng).column(0).to_owned();
    // Both layouts draw on one column per candidate.
    let covariates = random_standard_normal((m, selection.candidate_models), &mut rng);

    let fits = (0..selection.candidate_models)
        .map(|model| {
            let columns = selection.layout.columns(model);
            fitter.fit(y.view(), covariates.slice(s![.., columns]))
        })
        .collect::<Result<Vec<ModelFit>, CalibrationError>>()?;
    FittedUnit::new(fits)
}

/// Simulates, selects and corrects every unit with least-squares fits scored by
/// the configured information criterion.
pub fn run_selection_experiment(
    config: &ExperimentConfig,
    progress: &dyn SimulationProgress,
) -> Result<SelectionCalibration, CalibrationError> {
    log::info!("Scoring candidates by {:?}", config.selection.criterion);
    let fitter = OlsFitter::new(config.selection.criterion);
    run_selection_experiment_with(config, &fitter, progress)
}

/// Simulates, selects and corrects every unit, then evaluates both p-value sets.
///
/// `fitter` decides both the score and the p-value of each candidate.
pub fn run_selection_experiment_with<F: ModelFitter + ?Sized>(
    config: &ExperimentConfig,
    fitter: &F,
    progress: &dyn SimulationProgress,
) -> Result<SelectionCalibration, CalibrationError> {
    let stage = SimulationStage::UnitFitting;
    let units = config.selection.units;
    progress.on_stage_start(stage, units);
    log::info!(
        "Fitting {} candidate models ({:?}) for {units} units of {} samples",
        config.selection.candidate_models,
        config.selection.layout,
        config.selection.samples_per_unit
    );

    let completed = AtomicUsize::new(0);
    let outcomes = (0..units)
        .into_par_iter()
        .map(|unit| -> Result<CorrectedUnit, CalibrationError> {
            let outcome = simulate_unit(config, fitter, unit)?.select().correct()?;
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            progress.on_stage_advance(stage, done);
            Ok(outcome)
        })
        .collect::<Result<Vec<CorrectedUnit>, CalibrationError>>()?;
    progress.on_stage_finish(stage);

    let raw_p: Array1<f64> = outcomes.iter().map(|o| o.raw_p_value).collect();
    let corrected_p: Array1<f64> = outcomes.iter().map(|o| o.corrected_p_value).collect();
    let thresholds = &config.evaluation.thresholds;
    let raw = evaluate(raw_p.view(), thresholds)?;
    let corrected = evaluate(corrected_p.view(), thresholds)?;

    let mut selection_counts = vec![0usize; config.selection.candidate_models];
    for outcome in &outcomes {
        selection_counts[outcome.selected] += 1;
    }
    log::info!("  raw       {raw}");
    log::info!("  corrected {corrected}");
    log::debug!("Selection counts per candidate: {selection_counts:?}");

    Ok(SelectionCalibration {
        outcomes,
        raw,
        corrected,
        selection_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::regression::InformationCriterion;
    use crate::selection::CandidateLayout;

    fn small_config() -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.copula.features = 400;
        config.copula.rank_correlations = vec![0.0, 0.5];
        config.selection.units = 50;
        config.selection.samples_per_unit = 20;
        config
    }

    #[test]
    fn sweep_reports_every_method_at_every_point() {
        let config = small_config();
        let results = run_copula_sweep(&config, &NoopProgress).unwrap();
        assert_eq!(results.len(), 2);
        for point in &results {
            assert_eq!(point.methods.len(), MethodKind::ALL.len());
            for method in MethodKind::ALL {
                let report = point.report_for(method).unwrap();
                assert_eq!(report.n, 400);
                assert_eq!(report.rates.len(), 3);
            }
        }
        assert_eq!(results[0].pearson_correlation, 0.0);
    }

    #[test]
    fn sweep_is_reproducible() {
        let config = small_config();
        let first = run_copula_sweep(&config, &NoopProgress).unwrap();
        let second = run_copula_sweep(&config, &NoopProgress).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unit_simulation_is_deterministic_per_index() {
        let config = small_config();
        let fitter = OlsFitter::default();
        let a = simulate_unit(&config, &fitter, 17).unwrap();
        let b = simulate_unit(&config, &fitter, 17).unwrap();
        let c = simulate_unit(&config, &fitter, 18).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.fits().len(), config.selection.candidate_models);
    }

    #[test]
    fn nested_layout_grows_the_model() {
        let mut config = small_config();
        config.selection.layout = CandidateLayout::Nested;
        let result = run_selection_experiment(&config, &NoopProgress).unwrap();
        assert_eq!(result.outcomes.len(), 50);
        assert_eq!(result.selection_counts.iter().sum::<usize>(), 50);
    }

    #[test]
    fn configured_criterion_drives_the_default_fitter() {
        let mut config = small_config();
        config.selection.layout = CandidateLayout::Nested;
        config.selection.units = 200;
        config.selection.criterion = InformationCriterion::Bic;
        let bic = run_selection_experiment(&config, &NoopProgress).unwrap();
        let explicit = run_selection_experiment_with(
            &config,
            &OlsFitter::new(InformationCriterion::Bic),
            &NoopProgress,
        )
        .unwrap();
        assert_eq!(bic, explicit);

        config.selection.criterion = InformationCriterion::Aic;
        let aic = run_selection_experiment(&config, &NoopProgress).unwrap();
        // The heavier BIC penalty favours the smallest nested model more often.
        assert!(bic.selection_counts[0] > aic.selection_counts[0]);
    }

    #[test]
    fn corrected_rates_never_exceed_raw_rates() {
        let config = small_config();
        let result = run_selection_experiment(&config, &NoopProgress).unwrap();
        for (raw, corrected) in result.raw.rates.iter().zip(result.corrected.rates.iter()) {
            assert!(corrected.observed <= raw.observed);
        }
    }
}
