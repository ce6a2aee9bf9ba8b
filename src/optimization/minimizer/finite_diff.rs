//! minimizer::finite_diff — finite-difference gradients with error capture.
//!
//! Purpose
//! -------
//! Provide finite-difference gradients of scalar functions whose evaluation
//! can fail. `finitediff` closures must return `f64`, so failures are
//! captured into a shared `RefCell<Option<Error>>` and surfaced once the
//! difference scheme has finished.
//!
//! Key behaviors
//! -------------
//! - [`run_fd_diff`]: forward differences with error capture and
//!   post-hoc validation.
//! - [`central_gradient`]: central differences of a fallible function,
//!   falling back to [`run_fd_diff`] when a captured error or a non-finite
//!   entry shows up.
//!
//! Downstream usage
//! ----------------
//! - The argmin adapter uses these helpers when an objective has no
//!   analytic gradient.
//! - Fixed-point operators without an analytic adjoint compute their
//!   vector-Jacobian products as the gradient of `φ(z) = vᵀT(z)` through
//!   [`central_gradient`].
use crate::optimization::{
    errors::OptResult,
    minimizer::{
        types::{Grad, Theta},
        validation::validate_grad,
    },
};
use argmin::core::Error;
use finitediff::FiniteDiff;
use std::cell::RefCell;

/// Forward-difference gradient of `func` at `theta`, with error capture.
///
/// Clears `closure_err`, runs `forward_diff`, returns any captured error and
/// finally validates the gradient.
///
/// # Errors
/// - Any error captured inside `func`.
/// - `OptError::GradientDimMismatch` / `OptError::InvalidGradient` from
///   [`validate_grad`].
pub fn run_fd_diff<G: Fn(&Theta) -> f64>(
    theta: &Theta, func: &G, closure_err: &RefCell<Option<Error>>,
) -> OptResult<Grad> {
    closure_err.replace(None);
    let fd_grad = theta.forward_diff(func);
    let dim = theta.len();
    if let Some(err) = closure_err.take() {
        return Err(err.into());
    }
    validate_grad(&fd_grad, dim)?;
    Ok(fd_grad)
}

/// Central-difference gradient of a fallible scalar function.
///
/// Parameters
/// ----------
/// - `theta`: `&Theta`
///   Evaluation point; its length fixes the gradient dimension.
/// - `func`: `&G`
///   Scalar function returning `OptResult<f64>`.
///
/// Returns
/// -------
/// `OptResult<Grad>`
///   Central-difference gradient when every evaluation succeeded and the
///   result is finite; otherwise the forward-difference retry.
///
/// Errors
/// ------
/// - The first error raised by `func` on the forward path.
/// - Validation errors when the forward gradient is still not finite.
pub fn central_gradient<G>(theta: &Theta, func: &G) -> OptResult<Grad>
where
    G: Fn(&Theta) -> OptResult<f64>,
{
    let closure_err: RefCell<Option<Error>> = RefCell::new(None);
    let wrapped = |t: &Theta| -> f64 {
        match func(t) {
            Ok(v) => v,
            Err(e) => {
                let mut slot = closure_err.borrow_mut();
                if slot.is_none() {
                    *slot = Some(Error::from(e));
                }
                f64::NAN
            }
        }
    };
    let grad = theta.central_diff(&wrapped);
    if closure_err.borrow().is_none() && validate_grad(&grad, theta.len()).is_ok() {
        return Ok(grad);
    }
    run_fd_diff(theta, &wrapped, &closure_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::errors::OptError;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // Central/forward finite-difference gradients and error propagation.

    #[test]
    // Purpose
    // -------
    // Central differences recover the gradient of a smooth function.
    //
    // Given
    // -----
    // `f(x) = x₀² + 3x₁` at `(1, 2)`.
    //
    // Expect
    // ------
    // Gradient ≈ `(2, 3)`.
    fn central_gradient_matches_closed_form() {
        let theta = array![1.0, 2.0];
        let g = central_gradient(&theta, &|t: &Theta| Ok(t[0] * t[0] + 3.0 * t[1])).unwrap();
        assert_abs_diff_eq!(g[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g[1], 3.0, epsilon = 1e-6);
    }

    #[test]
    // Purpose
    // -------
    // A failing evaluation is surfaced as the original `OptError`.
    //
    // Given
    // -----
    // A function that always fails with `NonFiniteCost`.
    //
    // Expect
    // ------
    // `Err(NonFiniteCost)`.
    fn central_gradient_propagates_closure_error() {
        let theta = array![0.0];
        let err = central_gradient(&theta, &|_: &Theta| {
            Err(OptError::NonFiniteCost { value: f64::NAN })
        })
        .unwrap_err();
        assert!(matches!(err, OptError::NonFiniteCost { .. }));
    }
}
