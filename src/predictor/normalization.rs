//! Per-dimension standardization of problem parameters.
//!
//! Statistics are fit once on the training split and then frozen; the same
//! [`Normalizer`] is applied to test data and to states seen in deployment.
//! Dimensions with zero spread keep a unit scale so constant features pass
//! through centered rather than blowing up.
use crate::predictor::errors::{PredictorError, PredictorResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl Normalizer {
    /// Fit mean and population standard deviation on `train` (`N × d`).
    ///
    /// # Errors
    /// [`PredictorError::EmptyTrainingSplit`] when `train` has no rows.
    pub fn fit(train: ArrayView2<'_, f64>) -> PredictorResult<Self> {
        let mean = train.mean_axis(Axis(0)).ok_or(PredictorError::EmptyTrainingSplit)?;
        let std = train.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
        Ok(Self { mean, std })
    }

    /// Identity statistics for `dim` features.
    pub fn identity(dim: usize) -> Self {
        Self { mean: Array1::zeros(dim), std: Array1::ones(dim) }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }

    fn check_width(&self, found: usize) -> PredictorResult<()> {
        if found != self.dim() {
            return Err(PredictorError::ShapeMismatch {
                what: "normalized feature width",
                expected: self.dim(),
                found,
            });
        }
        Ok(())
    }

    /// `(x − mean) / std`, row-wise.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] on a width mismatch.
    pub fn normalize(&self, x: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        self.check_width(x.ncols())?;
        Ok((&x - &self.mean) / &self.std)
    }

    /// `x · std + mean`, row-wise.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] on a width mismatch.
    pub fn denormalize(&self, x: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        self.check_width(x.ncols())?;
        Ok(&x * &self.std + &self.mean)
    }

    /// Normalize a single parameter vector.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] on a length mismatch.
    pub fn normalize_row(&self, x: ArrayView1<'_, f64>) -> PredictorResult<Array1<f64>> {
        self.check_width(x.len())?;
        Ok((&x - &self.mean) / &self.std)
    }
}
