//! Adapter that exposes a user [`Objective`] as an `argmin` problem.
//!
//! The cost is the objective itself. If no analytic gradient is provided the
//! adapter finite-differences the cost, central first and forward as a
//! fallback.
use std::cell::RefCell;

use crate::optimization::{
    errors::OptError,
    minimizer::{
        finite_diff::run_fd_diff,
        traits::Objective,
        types::{Cost, Grad, Theta},
        validation::validate_grad,
    },
};
use argmin::core::{CostFunction, Error, Gradient};
use finitediff::FiniteDiff;

/// Bridges a user [`Objective`] to `argmin`'s `CostFunction` and `Gradient`.
#[derive(Debug, Clone)]
pub struct ArgMinAdapter<'a, F: Objective> {
    pub f: &'a F,
    pub data: &'a F::Data,
}

impl<'a, F: Objective> ArgMinAdapter<'a, F> {
    /// Construct a new adapter over a user objective and its data.
    pub fn new(f: &'a F, data: &'a F::Data) -> Self {
        Self { f, data }
    }
}

impl<'a, F: Objective> CostFunction for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Output = Cost;

    /// Evaluate `c(θ)`, rejecting non-finite values.
    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        let output = self.f.value(theta, self.data)?;
        if !output.is_finite() {
            return Err((OptError::NonFiniteCost { value: output }).into());
        }
        Ok(output)
    }
}

impl<'a, F: Objective> Gradient for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Gradient = Grad;

    /// Evaluate `∇c(θ)`.
    ///
    /// Uses the analytic gradient when the objective provides one. Otherwise
    /// a central-difference gradient of the cost is attempted; if any cost
    /// evaluation failed (captured in `closure_err`) or the result is not
    /// finite, the forward-difference path in [`run_fd_diff`] is used.
    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, Error> {
        let dim = theta.len();
        match self.f.grad(theta, self.data) {
            Ok(g) => {
                validate_grad(&g, dim)?;
                Ok(g)
            }
            Err(OptError::GradientNotImplemented) => {
                let closure_err: RefCell<Option<Error>> = RefCell::new(None);
                let cost_func = |theta: &Theta| -> f64 {
                    match self.cost(theta) {
                        Ok(val) => val,
                        Err(e) => {
                            let mut slot = closure_err.borrow_mut();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            f64::NAN
                        }
                    }
                };
                let fd_grad = theta.central_diff(&cost_func);
                if closure_err.borrow().is_none() && validate_grad(&fd_grad, dim).is_ok() {
                    return Ok(fd_grad);
                }
                Ok(run_fd_diff(theta, &cost_func, &closure_err)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::errors::OptResult;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // Gradient dispatch: analytic path vs finite-difference fallback.

    struct Quadratic {
        analytic: bool,
    }

    impl Objective for Quadratic {
        type Data = ();

        fn value(&self, theta: &Theta, _: &()) -> OptResult<Cost> {
            Ok(0.5 * theta.dot(theta) + theta[0])
        }

        fn check(&self, _: &Theta, _: &()) -> OptResult<()> {
            Ok(())
        }

        fn grad(&self, theta: &Theta, _: &()) -> OptResult<Grad> {
            if !self.analytic {
                return Err(OptError::GradientNotImplemented);
            }
            let mut g = theta.clone();
            g[0] += 1.0;
            Ok(g)
        }
    }

    #[test]
    // Purpose
    // -------
    // The finite-difference fallback agrees with the analytic gradient.
    //
    // Given
    // -----
    // `c(θ) = ½‖θ‖² + θ₀` with and without an analytic gradient.
    //
    // Expect
    // ------
    // Both paths return `θ + e₀` up to FD accuracy.
    fn fd_gradient_matches_analytic_gradient() {
        // Arrange
        let theta = array![0.3, -1.2, 2.0];
        let analytic = Quadratic { analytic: true };
        let numeric = Quadratic { analytic: false };

        // Act
        let g_a = ArgMinAdapter::new(&analytic, &()).gradient(&theta).unwrap();
        let g_n = ArgMinAdapter::new(&numeric, &()).gradient(&theta).unwrap();

        // Assert
        for (a, n) in g_a.iter().zip(g_n.iter()) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-5);
        }
    }
}
