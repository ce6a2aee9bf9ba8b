//! adam — first-order optimizer state for mini-batch training.
//!
//! Purpose
//! -------
//! Hold the Adam moment estimates for a flattened parameter vector and apply
//! bias-corrected updates. The trainer owns one [`AdamState`] next to the
//! predictor parameters and replaces both together after every batch, so a
//! reader never observes parameters and moments from different steps.
//!
//! Conventions
//! -----------
//! - Parameters and gradients are flat `Array1<f64>` vectors of equal length.
//! - The learning rate is passed per call so that plateau decay can change it
//!   without touching the optimizer state.
use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::validation::{validate_grad, verify_learning_rate},
};
use ndarray::Array1;

/// Validated Adam hyperparameters.
///
/// Default: `learning_rate = 1e-3`, `beta1 = 0.9`, `beta2 = 0.999`,
/// `epsilon = 1e-8`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamOptions {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl AdamOptions {
    /// Construct validated options.
    ///
    /// # Errors
    /// - [`OptError::InvalidLearningRate`] for a non-positive or non-finite rate.
    /// - [`OptError::InvalidMomentDecay`] if `beta1` or `beta2` is outside `[0, 1)`.
    /// - [`OptError::InvalidEpsilon`] for a non-positive or non-finite epsilon.
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> OptResult<Self> {
        verify_learning_rate(learning_rate)?;
        for (name, value) in [("beta1", beta1), ("beta2", beta2)] {
            if !(0.0..1.0).contains(&value) {
                return Err(OptError::InvalidMomentDecay { name, value });
            }
        }
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(OptError::InvalidEpsilon { value: epsilon });
        }
        Ok(Self { learning_rate, beta1, beta2, epsilon })
    }
}

impl Default for AdamOptions {
    fn default() -> Self {
        Self { learning_rate: 1e-3, beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }
    }
}

/// Adam moment estimates and step counter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdamState {
    first_moment: Array1<f64>,
    second_moment: Array1<f64>,
    step: u64,
}

impl AdamState {
    /// Zero-initialized state for `dim` parameters.
    pub fn new(dim: usize) -> Self {
        Self { first_moment: Array1::zeros(dim), second_moment: Array1::zeros(dim), step: 0 }
    }

    /// Number of updates applied so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn dim(&self) -> usize {
        self.first_moment.len()
    }

    /// Compute one Adam update without mutating anything.
    ///
    /// Returns the updated parameter vector together with the next optimizer
    /// state so the caller can commit both at once.
    ///
    /// # Errors
    /// - [`OptError::StateDimMismatch`] if `params` does not match the state.
    /// - Gradient validation errors (length, finiteness).
    /// - [`OptError::InvalidLearningRate`] for an invalid `learning_rate`.
    pub fn propose(
        &self, params: &Array1<f64>, grad: &Array1<f64>, opts: &AdamOptions, learning_rate: f64,
    ) -> OptResult<(Array1<f64>, AdamState)> {
        if params.len() != self.dim() {
            return Err(OptError::StateDimMismatch { expected: self.dim(), found: params.len() });
        }
        validate_grad(grad, self.dim())?;
        verify_learning_rate(learning_rate)?;

        let step = self.step + 1;
        let m = opts.beta1 * &self.first_moment + (1.0 - opts.beta1) * grad;
        let v = opts.beta2 * &self.second_moment + (1.0 - opts.beta2) * &grad.mapv(|g| g * g);
        let bias1 = 1.0 - opts.beta1.powi(step as i32);
        let bias2 = 1.0 - opts.beta2.powi(step as i32);

        let mut next = params.clone();
        ndarray::Zip::from(&mut next).and(&m).and(&v).for_each(|p, &mi, &vi| {
            let m_hat = mi / bias1;
            let v_hat = vi / bias2;
            *p -= learning_rate * m_hat / (v_hat.sqrt() + opts.epsilon);
        });
        Ok((next, AdamState { first_moment: m, second_moment: v, step }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // Option validation and the first bias-corrected step.

    #[test]
    // Purpose
    // -------
    // The first Adam step moves every coordinate by ≈ `lr` against the sign
    // of its gradient.
    //
    // Given
    // -----
    // Zero state, params `(1, 1)`, gradient `(2, −0.5)`, `lr = 0.1`.
    //
    // Expect
    // ------
    // Params `(0.9, 1.1)` and `step == 1`; the original state is untouched.
    fn first_step_moves_by_learning_rate() {
        // Arrange
        let state = AdamState::new(2);
        let opts = AdamOptions::default();

        // Act
        let (next, next_state) =
            state.propose(&array![1.0, 1.0], &array![2.0, -0.5], &opts, 0.1).unwrap();

        // Assert
        assert_abs_diff_eq!(next[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(next[1], 1.1, epsilon = 1e-6);
        assert_eq!(next_state.step(), 1);
        assert_eq!(state.step(), 0);
    }

    #[test]
    // Purpose
    // -------
    // Invalid hyperparameters and mismatched dimensions are rejected.
    //
    // Given
    // -----
    // `beta1 = 1.0`, `epsilon = 0`, and a length-3 parameter vector against
    // a length-2 state.
    //
    // Expect
    // ------
    // The matching error variants.
    fn rejects_invalid_options_and_shapes() {
        assert!(matches!(
            AdamOptions::new(1e-3, 1.0, 0.999, 1e-8),
            Err(OptError::InvalidMomentDecay { name: "beta1", .. })
        ));
        assert!(matches!(
            AdamOptions::new(1e-3, 0.9, 0.999, 0.0),
            Err(OptError::InvalidEpsilon { .. })
        ));
        let state = AdamState::new(2);
        let err = state
            .propose(&array![1.0, 2.0, 3.0], &array![0.0, 0.0, 0.0], &AdamOptions::default(), 0.1)
            .unwrap_err();
        assert_eq!(err, OptError::StateDimMismatch { expected: 2, found: 3 });
    }
}
