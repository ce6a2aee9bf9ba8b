//! SCS-style splitting on the homogeneous self-dual embedding of
//! `min cᵀx  s.t.  Ax + s = b,  s ∈ K`.
//!
//! Iterate `w ∈ ℝ^{n+m+1}` (primal, dual, homogenizing scale); instance
//! vector `q = h = (c, b)`. With the skew-symmetric
//!
//! ```text
//!     ⎡  0   Aᵀ  c ⎤
//! Q = ⎢ −A   0   b ⎥
//!     ⎣ −cᵀ −bᵀ  0 ⎦
//! ```
//!
//! one step is `ũ = (I + Q)⁻¹w`, `u = Π_C(2ũ − w)`, `w⁺ = w + α(u − ũ)`,
//! where `C = ℝⁿ × K* × ℝ₊`. The solve eliminates the last row against a
//! static factorization of `I + [[0, Aᵀ], [−A, 0]]`, so only `h` changes per
//! instance. The adjoint falls back to finite differences.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
    instance::ProblemInstance,
    linalg::{ConeSpec, LinearSolve},
    traits::{FixedPointStep, check_len, check_step_inputs},
};
use ndarray::{Array1, Array2, ArrayView1, s};

#[derive(Debug)]
pub struct ScsOperator {
    n: usize,
    m: usize,
    cone: ConeSpec,
    alpha: f64,
    factor: LinearSolve,
}

impl ScsOperator {
    /// Build the operator for constraint matrix `a` (`m×n`) and cone `cone`.
    ///
    /// # Errors
    /// - [`OperatorError::ShapeMismatch`] if the cone does not cover `m` rows.
    /// - [`OperatorError::InvalidSetting`] if `α ∉ (0, 2)`.
    /// - [`OperatorError::Factorization`] if the block system cannot be
    ///   factored (only possible for non-finite data).
    pub fn new(a: Array2<f64>, cone: ConeSpec, alpha: f64) -> OperatorResult<Self> {
        let (m, n) = a.dim();
        check_len("cone rows", m, cone.dim())?;
        if !(alpha > 0.0 && alpha < 2.0) {
            return Err(OperatorError::InvalidSetting {
                name: "alpha",
                value: alpha,
                reason: "relaxation must lie in (0, 2)",
            });
        }
        let mut system = Array2::<f64>::eye(n + m);
        system.slice_mut(s![..n, n..]).assign(&a.t());
        system.slice_mut(s![n.., ..n]).assign(&(-&a));
        let factor = LinearSolve::factor(system.view(), AlgorithmFamily::Scs)?;
        Ok(Self { n, m, cone, alpha, factor })
    }

    /// `ũ = (I + Q)⁻¹ w` by block elimination.
    fn resolvent(&self, w: ArrayView1<'_, f64>, h: ArrayView1<'_, f64>) -> OperatorResult<Array1<f64>> {
        let nm = self.n + self.m;
        let p = self.factor.solve(w.slice(s![..nm]))?;
        let qv = self.factor.solve(h)?;
        let tau = (w[nm] + h.dot(&p)) / (1.0 + h.dot(&qv));
        let mut u_tilde = Array1::zeros(nm + 1);
        u_tilde.slice_mut(s![..nm]).assign(&(&p - &(tau * &qv)));
        u_tilde[nm] = tau;
        Ok(u_tilde)
    }

    /// Projection onto `ℝⁿ × K* × ℝ₊`.
    fn project(&self, y: &Array1<f64>) -> Array1<f64> {
        let (n, nm) = (self.n, self.n + self.m);
        let mut out = y.clone();
        out.slice_mut(s![n..nm]).assign(&self.cone.project_dual(y.slice(s![n..nm])));
        out[nm] = out[nm].max(0.0);
        out
    }

    /// Recover `x = ũ_x / ũ_τ` from an iterate, `None` while `ũ_τ ≤ 0`.
    ///
    /// # Errors
    /// Shape errors for a wrong-length iterate or instance vector.
    pub fn primal_solution(
        &self, w: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
    ) -> OperatorResult<Option<Array1<f64>>> {
        check_len("iterate", self.iterate_dim(), w.len())?;
        check_len("instance vector", self.instance_dim(), instance.q.len())?;
        let u = self.resolvent(w, instance.q)?;
        let tau = u[self.n + self.m];
        if tau <= 0.0 {
            return Ok(None);
        }
        Ok(Some(u.slice(s![..self.n]).mapv(|x| x / tau)))
    }
}

impl FixedPointStep for ScsOperator {
    fn family(&self) -> AlgorithmFamily {
        AlgorithmFamily::Scs
    }

    fn iterate_dim(&self) -> usize {
        self.n + self.m + 1
    }

    fn instance_dim(&self) -> usize {
        self.n + self.m
    }

    /// `(0, 0, 1)`: unit homogenizing scale.
    fn cold_start(&self) -> Array1<f64> {
        let mut w = Array1::zeros(self.iterate_dim());
        w[self.n + self.m] = 1.0;
        w
    }

    fn step(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>> {
        check_step_inputs(self, z, instance, params)?;
        let u_tilde = self.resolvent(z, instance.q)?;
        let u = self.project(&(2.0 * &u_tilde - &z));
        Ok(&z + &(self.alpha * (u - &u_tilde)))
    }
}
