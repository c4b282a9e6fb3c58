use crate::error::{CalibrationError, check_p_value};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::ops::Deref;

/// A features × tests matrix of p-values.
///
/// Construction validates that every entry lies in `[0, 1]` and that there is at
/// least one row and one column, so downstream combiners never re-check the domain.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct PValueMatrix(Array2<f64>);

impl PValueMatrix {
    pub fn new(values: Array2<f64>) -> Result<Self, CalibrationError> {
        if values.nrows() == 0 {
            return Err(CalibrationError::EmptyInput("p-value rows"));
        }
        if values.ncols() == 0 {
            return Err(CalibrationError::EmptyInput("tests per feature"));
        }
        for &p in values.iter() {
            check_p_value(p)?;
        }
        Ok(Self(values))
    }

    /// Builds a matrix from row vectors, rejecting ragged input.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, CalibrationError> {
        let first = rows
            .first()
            .ok_or(CalibrationError::EmptyInput("p-value rows"))?;
        let width = first.len();
        if let Some(bad) = rows.iter().find(|row| row.len() != width) {
            return Err(CalibrationError::Shape {
                context: "p-value row length",
                expected: width,
                found: bad.len(),
            });
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let values = Array2::from_shape_vec((rows.len(), width), flat).map_err(|e| {
            CalibrationError::Numerical(format!("could not assemble p-value matrix: {e}"))
        })?;
        Self::new(values)
    }

    pub fn num_features(&self) -> usize {
        self.0.nrows()
    }

    pub fn num_tests(&self) -> usize {
        self.0.ncols()
    }

    pub fn as_view(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.0
    }
}

impl Deref for PValueMatrix {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<Array2<f64>> for PValueMatrix {
    type Error = CalibrationError;

    fn try_from(values: Array2<f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

/// One combined p-value per feature, in the row order of the source matrix.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct CombinedPValues(pub Array1<f64>);

impl CombinedPValues {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.0
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }
}

impl Deref for CombinedPValues {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array1<f64>> for CombinedPValues {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<CombinedPValues> for Array1<f64> {
    fn from(values: CombinedPValues) -> Self {
        values.0
    }
}
