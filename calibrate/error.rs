use thiserror::Error;

/// Errors raised by the generators, combiners, evaluators and correctors.
///
/// Every component validates its inputs before computing anything, so an error
/// always describes the caller's input rather than a partially finished result.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Shape mismatch in {context}: expected {expected}, found {found}.")]
    Shape {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{what} must lie in [{lower}, {upper}], but was {value}.")]
    Domain {
        what: &'static str,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Linear algebra routine failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("Received an empty collection of {0}.")]
    EmptyInput(&'static str),
}

impl CalibrationError {
    /// True for failures of a decomposition or an undefined floating-point operation.
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical(_) | Self::Linalg(_))
    }

    pub(crate) fn p_value(value: f64) -> Self {
        Self::Domain {
            what: "p-value",
            value,
            lower: 0.0,
            upper: 1.0,
        }
    }
}

/// Checks a single p-value against the closed unit interval. NaN is rejected.
pub(crate) fn check_p_value(value: f64) -> Result<(), CalibrationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CalibrationError::p_value(value))
    }
}
