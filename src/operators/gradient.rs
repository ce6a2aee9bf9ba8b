//! Plain first-order families: gradient descent on a quadratic and the
//! extragradient method on a monotone affine operator.
//!
//! - Gradient descent: `min ½zᵀPz + cᵀz`, `q = c`, `z' = z − η(Pz + c)`;
//!   default `η = 1/λ_max(P)`.
//! - Extragradient: `F(z) = Mz + q`, `z½ = z − ηF(z)`, `z' = z − ηF(z½)`;
//!   default `η = 1/(2‖M‖₂)`.
//!
//! Both are affine in `z`, so their adjoints are closed-form.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
    instance::ProblemInstance,
    linalg::largest_eigenvalue_sym,
    traits::{FixedPointStep, Vjp, check_len, check_step_inputs},
};
use ndarray::{Array1, Array2, ArrayView1};

fn resolve_step(explicit: Option<f64>, default: f64) -> OperatorResult<f64> {
    let eta = explicit.unwrap_or(default);
    if !eta.is_finite() || eta <= 0.0 {
        return Err(OperatorError::InvalidSetting {
            name: "step",
            value: eta,
            reason: "must be finite and > 0 (a zero matrix has no default step)",
        });
    }
    Ok(eta)
}

fn check_square(what: &'static str, m: &Array2<f64>) -> OperatorResult<()> {
    check_len(what, m.nrows(), m.ncols())
}

#[derive(Debug, Clone)]
pub struct GradientStepOperator {
    p: Array2<f64>,
    step: f64,
}

impl GradientStepOperator {
    /// # Errors
    /// - [`OperatorError::ShapeMismatch`] if `p` is not square.
    /// - [`OperatorError::InvalidSetting`] for an invalid step.
    pub fn new(p: Array2<f64>, step: Option<f64>) -> OperatorResult<Self> {
        check_square("gradient-descent Hessian columns", &p)?;
        let step = resolve_step(step, 1.0 / largest_eigenvalue_sym(p.view()))?;
        Ok(Self { p, step })
    }

    pub fn step_size(&self) -> f64 {
        self.step
    }
}

impl FixedPointStep for GradientStepOperator {
    fn family(&self) -> AlgorithmFamily {
        AlgorithmFamily::GradientDescent
    }

    fn iterate_dim(&self) -> usize {
        self.p.nrows()
    }

    fn instance_dim(&self) -> usize {
        self.p.nrows()
    }

    fn step(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>> {
        check_step_inputs(self, z, instance, params)?;
        let grad = self.p.dot(&z) + instance.q;
        Ok(&z - &(self.step * grad))
    }

    fn vjp(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>,
    ) -> OperatorResult<Vjp> {
        check_step_inputs(self, z, instance, params)?;
        check_len("vjp cotangent", self.iterate_dim(), v.len())?;
        Ok((&v - &(self.step * self.p.t().dot(&v)), Array1::zeros(0)))
    }
}

#[derive(Debug, Clone)]
pub struct ExtragradientOperator {
    m: Array2<f64>,
    step: f64,
}

impl ExtragradientOperator {
    /// # Errors
    /// - [`OperatorError::ShapeMismatch`] if `m` is not square.
    /// - [`OperatorError::InvalidSetting`] for an invalid step.
    pub fn new(m: Array2<f64>, step: Option<f64>) -> OperatorResult<Self> {
        check_square("extragradient operator columns", &m)?;
        let norm = largest_eigenvalue_sym(m.t().dot(&m).view()).max(0.0).sqrt();
        let step = resolve_step(step, 0.5 / norm)?;
        Ok(Self { m, step })
    }

    pub fn step_size(&self) -> f64 {
        self.step
    }
}

impl FixedPointStep for ExtragradientOperator {
    fn family(&self) -> AlgorithmFamily {
        AlgorithmFamily::Extragradient
    }

    fn iterate_dim(&self) -> usize {
        self.m.nrows()
    }

    fn instance_dim(&self) -> usize {
        self.m.nrows()
    }

    fn step(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>> {
        check_step_inputs(self, z, instance, params)?;
        let half = &z - &(self.step * (self.m.dot(&z) + instance.q));
        Ok(&z - &(self.step * (self.m.dot(&half) + instance.q)))
    }

    fn vjp(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>,
    ) -> OperatorResult<Vjp> {
        check_step_inputs(self, z, instance, params)?;
        check_len("vjp cotangent", self.iterate_dim(), v.len())?;
        let w = self.m.t().dot(&v);
        let inner = &w - &(self.step * self.m.t().dot(&w));
        Ok((&v - &(self.step * inner), Array1::zeros(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // Default step sizes, fixed points, and closed-form adjoints.

    const TOL: f64 = 1e-6;

    fn assert_vjp_matches_fd<T: FixedPointStep>(op: &T, z: Array1<f64>, q: Array1<f64>) {
        let v = Array1::from_iter((0..z.len()).map(|i| 1.0 - 0.3 * i as f64));
        let inst = ProblemInstance::new(q.view());
        let empty = Array1::zeros(0);
        let (vz, _) = op.vjp(0, z.view(), &inst, empty.view(), v.view()).unwrap();
        let h = 1e-6;
        for i in 0..z.len() {
            let (mut zp, mut zm) = (z.clone(), z.clone());
            zp[i] += h;
            zm[i] -= h;
            let fp = op.step(0, zp.view(), &inst, empty.view()).unwrap().dot(&v);
            let fm = op.step(0, zm.view(), &inst, empty.view()).unwrap().dot(&v);
            assert_abs_diff_eq!(vz[i], (fp - fm) / (2.0 * h), epsilon = TOL);
        }
    }

    #[test]
    // Purpose
    // -------
    // The minimizer `z* = −P⁻¹c` is a fixed point of gradient descent.
    //
    // Given
    // -----
    // `P = diag(2, 4)`, `c = (−2, −4)`, so `z* = (1, 1)`.
    //
    // Expect
    // ------
    // Default step `1/4` and zero residual at `z*`.
    fn gradient_descent_fixes_minimizer() {
        let op = GradientStepOperator::new(array![[2.0, 0.0], [0.0, 4.0]], None).unwrap();
        let c = array![-2.0, -4.0];
        let z_star = array![1.0, 1.0];
        let next = op
            .step(0, z_star.view(), &ProblemInstance::new(c.view()), Array1::zeros(0).view())
            .unwrap();
        assert_abs_diff_eq!(op.step_size(), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(op.residual(z_star.view(), next.view()), 0.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Extragradient contracts on a rotation field where plain gradient
    // steps would not.
    //
    // Given
    // -----
    // `M = [[0, 1], [−1, 0]]`, `q = 0`, start `(1, 0)`.
    //
    // Expect
    // ------
    // The norm of the iterate strictly decreases after one step.
    fn extragradient_contracts_on_rotation() {
        let op = ExtragradientOperator::new(array![[0.0, 1.0], [-1.0, 0.0]], None).unwrap();
        let q = array![0.0, 0.0];
        let z0 = array![1.0, 0.0];
        let z1 = op
            .step(0, z0.view(), &ProblemInstance::new(q.view()), Array1::zeros(0).view())
            .unwrap();
        assert!(z1.dot(&z1) < 1.0);
    }

    #[test]
    // Purpose
    // -------
    // Closed-form adjoints match central differences.
    //
    // Given
    // -----
    // A nonsymmetric `P` for gradient descent and a generic `M`.
    //
    // Expect
    // ------
    // Agreement to `1e-6`.
    fn closed_form_vjps_match_finite_differences() {
        let gd = GradientStepOperator::new(array![[3.0, 0.5], [0.2, 1.0]], Some(0.2)).unwrap();
        assert_vjp_matches_fd(&gd, array![0.4, -1.0], array![1.0, 2.0]);
        let eg = ExtragradientOperator::new(array![[1.0, 2.0], [-2.0, 0.5]], None).unwrap();
        assert_vjp_matches_fd(&eg, array![0.4, -1.0], array![1.0, 2.0]);
    }
}
