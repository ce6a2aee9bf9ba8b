//! Validation helpers for the minimizer and the Adam optimizer.
//!
//! - **Tolerance checks**: [`verify_tol_grad`], [`verify_tol_cost`].
//! - **Gradient validation**: [`validate_grad`] enforces dimension and
//!   finite entries.
//! - **Parameter estimates**: [`validate_theta_hat`].
//! - **Objective values**: [`validate_value`].
//! - **Learning rates**: [`verify_learning_rate`].
use crate::optimization::{
    errors::{OptError, OptResult},
    minimizer::types::{Grad, Theta},
};

/// Validate the optional gradient‐norm tolerance.
///
/// # Errors
/// Returns [`OptError::InvalidTolGrad`] if the value is non-finite or ≤ 0.0.
pub fn verify_tol_grad(tol: Option<f64>) -> OptResult<()> {
    if let Some(tol) = tol {
        if !tol.is_finite() {
            return Err(OptError::InvalidTolGrad { tol, reason: "Tolerance must be finite." });
        }
        if tol <= 0.0 {
            return Err(OptError::InvalidTolGrad { tol, reason: "Tolerance must be positive." });
        }
    }
    Ok(())
}

/// Validate the optional cost‐change tolerance.
///
/// # Errors
/// Returns [`OptError::InvalidTolCost`] if the value is non-finite or ≤ 0.0.
pub fn verify_tol_cost(tol: Option<f64>) -> OptResult<()> {
    if let Some(tol) = tol {
        if !tol.is_finite() {
            return Err(OptError::InvalidTolCost { tol, reason: "Tolerance must be finite." });
        }
        if tol <= 0.0 {
            return Err(OptError::InvalidTolCost { tol, reason: "Tolerance must be positive." });
        }
    }
    Ok(())
}

/// Validate a learning rate (Adam step size, pretraining step size).
///
/// # Errors
/// Returns [`OptError::InvalidLearningRate`] if the value is non-finite or ≤ 0.0.
pub fn verify_learning_rate(value: f64) -> OptResult<()> {
    if !value.is_finite() {
        return Err(OptError::InvalidLearningRate {
            value,
            reason: "Learning rate must be finite.",
        });
    }
    if value <= 0.0 {
        return Err(OptError::InvalidLearningRate {
            value,
            reason: "Learning rate must be positive.",
        });
    }
    Ok(())
}

/// Validate a gradient vector against dimension and finiteness.
///
/// # Errors
/// - [`OptError::GradientDimMismatch`] if length does not match `dim`.
/// - [`OptError::InvalidGradient`] with the index/value of the first
///   offending element.
pub fn validate_grad(grad: &Grad, dim: usize) -> OptResult<()> {
    if grad.len() != dim {
        return Err(OptError::GradientDimMismatch { expected: dim, found: grad.len() });
    }
    for (index, &value) in grad.iter().enumerate() {
        if !value.is_finite() {
            return Err(OptError::InvalidGradient {
                index,
                value,
                reason: "Gradient elements must be finite.",
            });
        }
    }
    Ok(())
}

/// Validate and unwrap an estimated parameter vector (`theta_hat`).
///
/// # Errors
/// - [`OptError::MissingThetaHat`] if no vector was provided.
/// - [`OptError::InvalidThetaHat`] if any element is non-finite.
pub fn validate_theta_hat(theta_hat: Option<Theta>) -> OptResult<Theta> {
    match theta_hat {
        Some(t) => {
            for (index, &value) in t.iter().enumerate() {
                if !value.is_finite() {
                    return Err(OptError::InvalidThetaHat {
                        index,
                        value,
                        reason: "Parameter estimates must be finite.",
                    });
                }
            }
            Ok(t)
        }
        None => Err(OptError::MissingThetaHat),
    }
}

/// Validate that a scalar objective value is finite.
///
/// # Errors
/// Returns [`OptError::NonFiniteCost`] if the value is `NaN` or infinite.
pub fn validate_value(value: f64) -> OptResult<()> {
    if !value.is_finite() {
        return Err(OptError::NonFiniteCost { value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // Scope
    // -----
    // Acceptance and rejection paths for the shared validators.

    #[test]
    // Purpose
    // -------
    // `validate_grad` reports the first non-finite entry.
    //
    // Given
    // -----
    // A length-3 gradient whose second entry is NaN.
    //
    // Expect
    // ------
    // `InvalidGradient { index: 1, .. }`.
    fn validate_grad_reports_first_non_finite_entry() {
        // Arrange
        let grad = array![0.0, f64::NAN, f64::INFINITY];

        // Act
        let err = validate_grad(&grad, 3).unwrap_err();

        // Assert
        assert!(matches!(err, OptError::InvalidGradient { index: 1, .. }));
    }

    #[test]
    // Purpose
    // -------
    // Dimension mismatch is caught before finiteness.
    //
    // Given
    // -----
    // A length-2 gradient validated against dim 3.
    //
    // Expect
    // ------
    // `GradientDimMismatch { expected: 3, found: 2 }`.
    fn validate_grad_rejects_wrong_length() {
        let grad = array![1.0, 2.0];
        assert_eq!(
            validate_grad(&grad, 3),
            Err(OptError::GradientDimMismatch { expected: 3, found: 2 })
        );
    }

    #[test]
    // Purpose
    // -------
    // Tolerance and learning-rate validators accept positive finite values
    // and `None`, and reject zero.
    //
    // Given
    // -----
    // A mix of valid and invalid inputs.
    //
    // Expect
    // ------
    // `Ok` for valid inputs, the matching error variant otherwise.
    fn scalar_validators_accept_and_reject() {
        assert!(verify_tol_grad(None).is_ok());
        assert!(verify_tol_cost(Some(1e-8)).is_ok());
        assert!(verify_learning_rate(1e-3).is_ok());
        assert!(matches!(verify_tol_grad(Some(0.0)), Err(OptError::InvalidTolGrad { .. })));
        assert!(matches!(
            verify_learning_rate(f64::NAN),
            Err(OptError::InvalidLearningRate { .. })
        ));
        assert!(matches!(validate_theta_hat(None), Err(OptError::MissingThetaHat)));
    }
}
