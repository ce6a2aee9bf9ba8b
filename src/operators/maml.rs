//! Meta-learned regression: one gradient step on a polynomial least-squares
//! task per iteration.
//!
//! `z ∈ ℝᵖ` holds the coefficients of a polynomial of degree `p − 1`. The
//! instance vector is `q = (x₁..x_s, y₁..y_s)` and the step is
//! `z' = z − η·(2/s)·Φᵀ(Φz − y)` with `Φᵢⱼ = xᵢʲ`.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
    instance::ProblemInstance,
    traits::{FixedPointStep, Vjp, check_len, check_step_inputs},
};
use ndarray::{Array1, Array2, ArrayView1, s};

#[derive(Debug, Clone)]
pub struct MamlOperator {
    num_coeffs: usize,
    num_points: usize,
    step: f64,
}

impl MamlOperator {
    /// # Errors
    /// [`OperatorError::InvalidSetting`] for zero coefficients, zero sample
    /// points, or a non-positive step.
    pub fn new(num_coeffs: usize, num_points: usize, step: f64) -> OperatorResult<Self> {
        if num_coeffs == 0 || num_points == 0 {
            return Err(OperatorError::InvalidSetting {
                name: "maml dimensions",
                value: num_coeffs.min(num_points) as f64,
                reason: "coefficient and sample counts must be >= 1",
            });
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(OperatorError::InvalidSetting {
                name: "step",
                value: step,
                reason: "must be finite and > 0",
            });
        }
        Ok(Self { num_coeffs, num_points, step })
    }

    /// Vandermonde features of the task inputs.
    fn features(&self, x: ArrayView1<'_, f64>) -> Array2<f64> {
        Array2::from_shape_fn((self.num_points, self.num_coeffs), |(i, j)| x[i].powi(j as i32))
    }

    fn split<'a>(&self, q: ArrayView1<'a, f64>) -> (ArrayView1<'a, f64>, ArrayView1<'a, f64>) {
        let pts = self.num_points;
        (q.slice_move(s![..pts]), q.slice_move(s![pts..]))
    }

    /// Mean squared error of coefficients `z` on the task in `instance`.
    ///
    /// # Errors
    /// Shape errors for a wrong-length `z` or instance vector.
    pub fn task_loss(&self, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>) -> OperatorResult<f64> {
        check_len("iterate", self.num_coeffs, z.len())?;
        check_len("instance vector", self.instance_dim(), instance.q.len())?;
        let (x, y) = self.split(instance.q);
        let err = self.features(x).dot(&z) - y;
        Ok(err.dot(&err) / self.num_points as f64)
    }
}

impl FixedPointStep for MamlOperator {
    fn family(&self) -> AlgorithmFamily {
        AlgorithmFamily::MamlRegression
    }

    fn iterate_dim(&self) -> usize {
        self.num_coeffs
    }

    fn instance_dim(&self) -> usize {
        2 * self.num_points
    }

    fn step(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>> {
        check_step_inputs(self, z, instance, params)?;
        let (x, y) = self.split(instance.q);
        let phi = self.features(x);
        let grad = phi.t().dot(&(phi.dot(&z) - y)) * (2.0 / self.num_points as f64);
        Ok(&z - &(self.step * grad))
    }

    fn vjp(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>,
    ) -> OperatorResult<Vjp> {
        check_step_inputs(self, z, instance, params)?;
        check_len("vjp cotangent", self.iterate_dim(), v.len())?;
        let (x, _) = self.split(instance.q);
        let phi = self.features(x);
        let scale = 2.0 * self.step / self.num_points as f64;
        let pull = phi.t().dot(&phi.dot(&v)) * scale;
        Ok((&v - &pull, Array1::zeros(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // Task loss decrease and the closed-form adjoint.

    #[test]
    // Purpose
    // -------
    // A small gradient step lowers the task loss.
    //
    // Given
    // -----
    // Linear task `y = 1 + 2x` on three points, `z = 0`, `η = 0.05`.
    //
    // Expect
    // ------
    // `loss(z') < loss(z)`.
    fn step_lowers_task_loss() {
        let op = MamlOperator::new(2, 3, 0.05).unwrap();
        let q = array![0.0, 0.5, 1.0, 1.0, 2.0, 3.0];
        let inst = ProblemInstance::new(q.view());
        let z0 = array![0.0, 0.0];
        let z1 = op.step(0, z0.view(), &inst, Array1::zeros(0).view()).unwrap();
        assert!(op.task_loss(z1.view(), &inst).unwrap() < op.task_loss(z0.view(), &inst).unwrap());
    }

    #[test]
    // Purpose
    // -------
    // The exact coefficients are a fixed point.
    //
    // Given
    // -----
    // `y = 1 + 2x`, `z = (1, 2)`.
    //
    // Expect
    // ------
    // Zero residual and zero task loss.
    fn exact_coefficients_are_fixed() {
        let op = MamlOperator::new(2, 3, 0.05).unwrap();
        let q = array![0.0, 0.5, 1.0, 1.0, 2.0, 3.0];
        let inst = ProblemInstance::new(q.view());
        let z = array![1.0, 2.0];
        let next = op.step(0, z.view(), &inst, Array1::zeros(0).view()).unwrap();
        assert_abs_diff_eq!(op.residual(z.view(), next.view()), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(op.task_loss(z.view(), &inst).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // The pullback equals `(I − (2η/s)ΦᵀΦ)v`.
    //
    // Given
    // -----
    // Points `(0, 1, 2)`, linear features, `η = 0.1`, `v = (1, 0)`.
    //
    // Expect
    // ------
    // `ΦᵀΦ = [[3, 3], [3, 5]]`, so `v_z = (1 − 0.2, −0.2)`.
    fn vjp_matches_closed_form() {
        let op = MamlOperator::new(2, 3, 0.1).unwrap();
        let q = array![0.0, 1.0, 2.0, 0.0, 0.0, 0.0];
        let inst = ProblemInstance::new(q.view());
        let (vz, vp) = op
            .vjp(0, array![0.0, 0.0].view(), &inst, Array1::zeros(0).view(), array![1.0, 0.0].view())
            .unwrap();
        assert!(vp.is_empty());
        assert_abs_diff_eq!(vz[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(vz[1], -0.2, epsilon = 1e-12);
    }
}
