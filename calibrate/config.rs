use crate::combine::{DEFAULT_FISHER_EPSILON, DEFAULT_STOUFFER_EPSILON};
use crate::error::CalibrationError;
use crate::evaluate::DEFAULT_THRESHOLDS;
use crate::regression::InformationCriterion;
use crate::selection::CandidateLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable TOML layout of an experiment. Every
// section carries `#[serde(default)]` so a file only needs the values it overrides.

/// Floors and clamps applied to boundary p-values before a logarithm or quantile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericsConfig {
    /// Exact zeros are raised to this value before `ln` in Fisher's method.
    pub fisher_epsilon: f64,
    /// P-values above `1 − ε` are lowered to it before `Φ⁻¹` in Stouffer's method.
    pub stouffer_epsilon: f64,
}

impl Default for NumericsConfig {
    fn default() -> Self {
        Self {
            fisher_epsilon: DEFAULT_FISHER_EPSILON,
            stouffer_epsilon: DEFAULT_STOUFFER_EPSILON,
        }
    }
}

impl NumericsConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !(self.fisher_epsilon > 0.0 && self.fisher_epsilon < 1.0) {
            return Err(CalibrationError::Domain {
                what: "fisher_epsilon",
                value: self.fisher_epsilon,
                lower: f64::MIN_POSITIVE,
                upper: 1.0,
            });
        }
        if !(self.stouffer_epsilon > 0.0 && self.stouffer_epsilon < 0.5) {
            return Err(CalibrationError::Domain {
                what: "stouffer_epsilon",
                value: self.stouffer_epsilon,
                lower: f64::MIN_POSITIVE,
                upper: 0.5,
            });
        }
        Ok(())
    }
}

/// Thresholds at which observed rejection rates are compared with their nominal level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub thresholds: Vec<f64>,
    /// Absolute departure from α beyond which a rate counts as miscalibrated.
    pub tolerance: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_THRESHOLDS.to_vec(),
            tolerance: 0.005,
        }
    }
}

/// Size and dependence settings for the correlated-combiner experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopulaConfig {
    /// Number of features, i.e. rows of correlated p-values.
    pub features: usize,
    /// Number of tests combined per feature.
    pub tests: usize,
    /// Nominal rank correlations to sweep.
    pub rank_correlations: Vec<f64>,
}

impl Default for CopulaConfig {
    fn default() -> Self {
        Self {
            features: 5000,
            tests: 2,
            rank_correlations: vec![0.0, 0.25, 0.5, 0.75],
        }
    }
}

/// Settings for the model-selection correction experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Independent units (genes), each fitted and corrected on its own.
    pub units: usize,
    /// Observations per unit.
    pub samples_per_unit: usize,
    /// Competing models fitted per unit.
    pub candidate_models: usize,
    pub layout: CandidateLayout,
    pub criterion: InformationCriterion,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            units: 2000,
            samples_per_unit: 30,
            candidate_models: 3,
            layout: CandidateLayout::Disjoint,
            criterion: InformationCriterion::Aic,
        }
    }
}

/// The complete, immutable description of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub seed: u64,
    pub numerics: NumericsConfig,
    pub evaluation: EvaluationConfig,
    pub copula: CopulaConfig,
    pub selection: SelectionConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            numerics: NumericsConfig::default(),
            evaluation: EvaluationConfig::default(),
            copula: CopulaConfig::default(),
            selection: SelectionConfig::default(),
        }
    }
}

/// Custom error type for configuration loading, saving and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] CalibrationError),
}

impl ExperimentConfig {
    /// Checks every section, reporting the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.numerics.validate()?;
        if self.evaluation.thresholds.is_empty() {
            return Err(CalibrationError::EmptyInput("evaluation thresholds").into());
        }
        for &alpha in &self.evaluation.thresholds {
            crate::evaluate::check_threshold(alpha)?;
        }
        if !(self.evaluation.tolerance >= 0.0 && self.evaluation.tolerance < 1.0) {
            return Err(CalibrationError::Domain {
                what: "evaluation tolerance",
                value: self.evaluation.tolerance,
                lower: 0.0,
                upper: 1.0,
            }
            .into());
        }
        if self.copula.features == 0 {
            return Err(CalibrationError::EmptyInput("copula features").into());
        }
        if self.copula.tests < 2 {
            return Err(CalibrationError::Shape {
                context: "copula tests (at least 2)",
                expected: 2,
                found: self.copula.tests,
            }
            .into());
        }
        if self.copula.rank_correlations.is_empty() {
            return Err(CalibrationError::EmptyInput("rank correlations").into());
        }
        for &r in &self.copula.rank_correlations {
            crate::copula::rank_to_pearson(r)?;
        }
        if self.selection.units == 0 {
            return Err(CalibrationError::EmptyInput("selection units").into());
        }
        if self.selection.candidate_models == 0 {
            return Err(CalibrationError::EmptyInput("candidate models").into());
        }
        let largest_model = self
            .selection
            .layout
            .predictors_in_model(self.selection.candidate_models - 1);
        if self.selection.samples_per_unit <= largest_model + 1 {
            return Err(CalibrationError::Shape {
                context: "samples per unit (more than predictors + 1)",
                expected: largest_model + 2,
                found: self.selection.samples_per_unit,
            }
            .into());
        }
        Ok(())
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }
}
