//! High-level entry point for minimizing a user-provided [`Objective`].
//!
//! Selects an L-BFGS solver with either Hager–Zhang or More–Thuente line
//! search, wraps the objective in an [`ArgMinAdapter`] and delegates the run
//! to [`run_lbfgs`].
use crate::optimization::{
    errors::OptResult,
    minimizer::{
        adapter::ArgMinAdapter,
        builders::{build_optimizer_hager_zhang, build_optimizer_more_thuente},
        run::run_lbfgs,
        traits::{LineSearcher, MinimizeOptions, Objective, OptimOutcome},
        types::Theta,
    },
};

/// Minimize an objective `c(θ)` using L-BFGS with the chosen line search.
///
/// # Errors
/// - Propagates any error from `f.check`.
/// - Propagates builder errors and runtime errors from `run_lbfgs`.
///
/// # Example
/// ```no_run
/// use ndarray::{array, Array1};
/// use rust_l2ws::optimization::errors::OptResult;
/// use rust_l2ws::optimization::minimizer::{minimize, MinimizeOptions, Objective};
///
/// struct Bowl;
/// impl Objective for Bowl {
///     type Data = ();
///     fn value(&self, theta: &Array1<f64>, _: &()) -> OptResult<f64> {
///         Ok(theta.dot(theta))
///     }
///     fn check(&self, _: &Array1<f64>, _: &()) -> OptResult<()> {
///         Ok(())
///     }
/// }
///
/// let out = minimize(&Bowl, array![0.1, -0.2, 0.3], &(), &MinimizeOptions::default())?;
/// println!("θ̂ = {:?}", out.theta_hat);
/// # Ok::<(), rust_l2ws::optimization::errors::OptError>(())
/// ```
pub fn minimize<F: Objective>(
    f: &F, theta0: Theta, data: &F::Data, opts: &MinimizeOptions,
) -> OptResult<OptimOutcome> {
    f.check(&theta0, data)?;
    let problem = ArgMinAdapter::new(f, data);
    match opts.line_searcher {
        LineSearcher::MoreThuente => {
            let solver = build_optimizer_more_thuente(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
        LineSearcher::HagerZhang => {
            let solver = build_optimizer_hager_zhang(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{
        errors::OptResult,
        minimizer::types::{Cost, Grad},
    };
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // End-to-end L-BFGS runs on a small convex quadratic.

    struct ShiftedBowl;

    impl Objective for ShiftedBowl {
        type Data = Theta;

        fn value(&self, theta: &Theta, center: &Theta) -> OptResult<Cost> {
            let d = theta - center;
            Ok(d.dot(&d))
        }

        fn check(&self, _: &Theta, _: &Theta) -> OptResult<()> {
            Ok(())
        }

        fn grad(&self, theta: &Theta, center: &Theta) -> OptResult<Grad> {
            Ok(2.0 * (theta - center))
        }
    }

    #[test]
    // Purpose
    // -------
    // Both line searches reach the minimizer of a shifted bowl.
    //
    // Given
    // -----
    // `c(θ) = ‖θ − (1, −2)‖²` started from the origin.
    //
    // Expect
    // ------
    // `θ̂ ≈ (1, −2)` and `c(θ̂) ≈ 0`.
    fn minimize_finds_center_of_bowl() {
        let center = array![1.0, -2.0];
        for ls in [LineSearcher::MoreThuente, LineSearcher::HagerZhang] {
            // Arrange
            let opts = MinimizeOptions { line_searcher: ls, ..MinimizeOptions::default() };

            // Act
            let out = minimize(&ShiftedBowl, array![0.0, 0.0], &center, &opts).unwrap();

            // Assert
            assert_abs_diff_eq!(out.theta_hat[0], 1.0, epsilon = 1e-4);
            assert_abs_diff_eq!(out.theta_hat[1], -2.0, epsilon = 1e-4);
            assert!(out.value < 1e-8);
        }
    }
}
