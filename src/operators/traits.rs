//! The fixed-point step contract shared by every solver family.
//!
//! An operator is a pure function of `(k, z, instance, learned params)`.
//! Nothing is cached between calls, so the same inputs always give the same
//! next iterate. Learned operator parameters are a flat vector owned by the
//! predictor; operators without learned parameters expect an empty vector.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
    instance::ProblemInstance,
};
use crate::optimization::{errors::OptError, minimizer::finite_diff::central_gradient};
use ndarray::{Array1, ArrayView1};

/// Vector-Jacobian product of one step: cotangents for the input iterate and
/// for the learned operator parameters.
pub type Vjp = (Array1<f64>, Array1<f64>);

/// One solver family's step function, residual metric and adjoint.
///
/// Required:
/// - `family`, `iterate_dim`, `instance_dim`
/// - `step(k, z, instance, params) -> z'`
///
/// Optional:
/// - learned-parameter layout (`num_learned_params`, `init_learned_params`)
/// - `cold_start` (zeros unless the family needs a homogenizing scale)
/// - `vjp` (finite differences of `φ(z) = vᵀT(z)` unless overridden)
pub trait FixedPointStep {
    fn family(&self) -> AlgorithmFamily;

    /// Length of the iterate `z`.
    fn iterate_dim(&self) -> usize;

    /// Length of the per-instance vector `q`.
    fn instance_dim(&self) -> usize;

    fn num_learned_params(&self) -> usize {
        0
    }

    fn init_learned_params(&self) -> Array1<f64> {
        Array1::zeros(self.num_learned_params())
    }

    /// Problem-independent initial iterate.
    fn cold_start(&self) -> Array1<f64> {
        Array1::zeros(self.iterate_dim())
    }

    /// Apply the `k`-th step (0-based) to `z`.
    ///
    /// # Errors
    /// - [`OperatorError::ShapeMismatch`] when `z`, `q` or `params` have the
    ///   wrong length.
    /// - [`OperatorError::Factorization`] / [`OperatorError::MissingFactorization`]
    ///   when the family's linear system is unavailable for this instance.
    fn step(
        &self, k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>>;

    /// Fixed-point residual `‖z_next − z_prev‖₂`.
    fn residual(&self, z_prev: ArrayView1<'_, f64>, z_next: ArrayView1<'_, f64>) -> f64 {
        euclidean_distance(z_prev, z_next)
    }

    /// Distance `‖z − z*‖₂` used by supervised losses.
    fn distance_to_optimum(&self, z: ArrayView1<'_, f64>, z_star: ArrayView1<'_, f64>) -> f64 {
        euclidean_distance(z, z_star)
    }

    /// Pull the cotangent `v` of `z' = T_k(z)` back to `z` and to `params`.
    ///
    /// The default differentiates `vᵀT_k` by central differences. The step is
    /// first evaluated once at `z` so typed errors surface unchanged.
    ///
    /// # Errors
    /// - Any error from `step`.
    /// - [`OperatorError::Derivative`] if the finite-difference scheme fails.
    fn vjp(
        &self, k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>,
    ) -> OperatorResult<Vjp> {
        check_len("vjp cotangent", self.iterate_dim(), v.len())?;
        self.step(k, z, instance, params)?;

        let as_opt = |e: OperatorError| OptError::BackendError { text: e.to_string() };
        let phi_z = |zz: &Array1<f64>| -> Result<f64, OptError> {
            self.step(k, zz.view(), instance, params).map(|t| t.dot(&v)).map_err(as_opt)
        };
        let v_z = central_gradient(&z.to_owned(), &phi_z)?;

        let v_params = if params.is_empty() {
            Array1::zeros(0)
        } else {
            let phi_p = |pp: &Array1<f64>| -> Result<f64, OptError> {
                self.step(k, z, instance, pp.view()).map(|t| t.dot(&v)).map_err(as_opt)
            };
            central_gradient(&params.to_owned(), &phi_p)?
        };
        Ok((v_z, v_params))
    }
}

pub fn euclidean_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

/// Reject a length that differs from the expected one.
pub fn check_len(what: &'static str, expected: usize, found: usize) -> OperatorResult<()> {
    if expected != found {
        return Err(OperatorError::ShapeMismatch { what, expected, found });
    }
    Ok(())
}

/// Shape checks shared by every `step` implementation.
pub fn check_step_inputs<T: FixedPointStep + ?Sized>(
    op: &T, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>, params: ArrayView1<'_, f64>,
) -> OperatorResult<()> {
    check_len("iterate", op.iterate_dim(), z.len())?;
    check_len("instance vector", op.instance_dim(), instance.q.len())?;
    check_len("learned operator parameters", op.num_learned_params(), params.len())
}
