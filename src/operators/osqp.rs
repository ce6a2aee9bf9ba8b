//! OSQP-style ADMM splitting for `min ½xᵀPx + cᵀx  s.t.  l ≤ Ax ≤ u`.
//!
//! Iterate `z = (x, v)` with `x ∈ ℝⁿ`, `v ∈ ℝᵐ`; instance vector
//! `q = (c, l, u)`. One step, with `w = Π_{[l,u]}(v)`:
//!
//! ```text
//! x̃  = M⁻¹(σx − c + Aᵀdiag(ρ)(2w − v))
//! x⁺ = x + α(x̃ − x)
//! v⁺ = v + α(Ax̃ − w)
//! ```
//!
//! with `M = P + σI + Aᵀdiag(ρ)A`. The QP system is either static (shared by
//! all instances) or attached per instance; a per-instance system wins.
//! `M` is assumed symmetric, which makes the adjoint solve reuse the same
//! factorization.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
    instance::{ProblemInstance, QpSystem},
    linalg::{box_interior_mask, project_box},
    traits::{FixedPointStep, Vjp, check_len, check_step_inputs},
};
use ndarray::{Array1, ArrayView1, s};

#[derive(Debug)]
pub struct OsqpOperator {
    n: usize,
    m: usize,
    system: Option<QpSystem>,
    alpha: f64,
}

struct Blocks<'a> {
    x: ArrayView1<'a, f64>,
    v: ArrayView1<'a, f64>,
    c: ArrayView1<'a, f64>,
    l: ArrayView1<'a, f64>,
    u: ArrayView1<'a, f64>,
}

impl OsqpOperator {
    /// Build an operator for `n` variables and `m` constraints.
    ///
    /// # Errors
    /// - [`OperatorError::InvalidSetting`] if `α ∉ (0, 2)`.
    /// - [`OperatorError::ShapeMismatch`] if a static system has other sizes.
    /// - The stored factorization error of a singular static system.
    pub fn new(n: usize, m: usize, system: Option<QpSystem>, alpha: f64) -> OperatorResult<Self> {
        if !(alpha > 0.0 && alpha < 2.0) {
            return Err(OperatorError::InvalidSetting {
                name: "alpha",
                value: alpha,
                reason: "relaxation must lie in (0, 2)",
            });
        }
        if let Some(sys) = &system {
            check_len("static QP variables", n, sys.n())?;
            check_len("static QP constraints", m, sys.m())?;
            sys.factor()?;
        }
        Ok(Self { n, m, system, alpha })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    fn system<'a>(&'a self, aux: Option<&'a QpSystem>) -> OperatorResult<&'a QpSystem> {
        let sys = aux
            .or(self.system.as_ref())
            .ok_or(OperatorError::MissingFactorization { family: AlgorithmFamily::Osqp })?;
        check_len("per-instance QP variables", self.n, sys.n())?;
        check_len("per-instance QP constraints", self.m, sys.m())?;
        Ok(sys)
    }

    fn split<'a>(&self, z: ArrayView1<'a, f64>, q: ArrayView1<'a, f64>) -> Blocks<'a> {
        let (n, m) = (self.n, self.m);
        Blocks {
            x: z.slice_move(s![..n]),
            v: z.slice_move(s![n..]),
            c: q.slice_move(s![..n]),
            l: q.slice_move(s![n..n + m]),
            u: q.slice_move(s![n + m..]),
        }
    }

    /// Primal part of an iterate.
    pub fn primal<'a>(&self, z: ArrayView1<'a, f64>) -> ArrayView1<'a, f64> {
        z.slice_move(s![..self.n])
    }

    fn join(&self, x: &Array1<f64>, v: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n + self.m);
        out.slice_mut(s![..self.n]).assign(x);
        out.slice_mut(s![self.n..]).assign(v);
        out
    }

    /// Projected constraint value `w = Π(v)` and the linear solve `x̃`.
    fn inner(
        &self, sys: &QpSystem, b: &Blocks<'_>,
    ) -> OperatorResult<(Array1<f64>, Array1<f64>)> {
        let w = project_box(b.v, b.l, b.u);
        let dual = &sys.rho * &(2.0 * &w - &b.v);
        let rhs = sys.sigma * &b.x - &b.c + sys.a.t().dot(&dual);
        let x_tilde = sys.factor()?.solve(rhs.view())?;
        Ok((w, x_tilde))
    }
}

impl FixedPointStep for OsqpOperator {
    fn family(&self) -> AlgorithmFamily {
        AlgorithmFamily::Osqp
    }

    fn iterate_dim(&self) -> usize {
        self.n + self.m
    }

    fn instance_dim(&self) -> usize {
        self.n + 2 * self.m
    }

    fn step(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>> {
        check_step_inputs(self, z, instance, params)?;
        let sys = self.system(instance.aux)?;
        let b = self.split(z.view(), instance.q.view());
        let (w, x_tilde) = self.inner(sys, &b)?;
        let x_next = &b.x + &(self.alpha * (&x_tilde - &b.x));
        let v_next = &b.v + &(self.alpha * (sys.a.dot(&x_tilde) - &w));
        Ok(self.join(&x_next, &v_next))
    }

    fn vjp(
        &self, _k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>,
    ) -> OperatorResult<Vjp> {
        check_step_inputs(self, z, instance, params)?;
        check_len("vjp cotangent", self.iterate_dim(), v.len())?;
        let sys = self.system(instance.aux)?;
        let b = self.split(z.view(), instance.q.view());
        let (gx, gv) = (v.slice(s![..self.n]), v.slice(s![self.n..]));
        let mask = box_interior_mask(b.v, b.l, b.u);

        let a_x = self.alpha * (&gx + &sys.a.t().dot(&gv));
        let r = sys.factor()?.solve(a_x.view())?;
        let v_x = (1.0 - self.alpha) * &gx + sys.sigma * &r;
        let through_solve = (2.0 * &mask - 1.0) * &sys.rho * &sys.a.dot(&r);
        let v_v = &gv - &(self.alpha * &mask * &gv) + through_solve;

        Ok((self.join(&v_x, &v_v), Array1::zeros(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    // Scope
    // -----
    // Convergence on a tiny box-constrained QP, missing/singular factors, and
    // the analytic adjoint against the finite-difference default.

    const TOL: f64 = 1e-6;

    fn system() -> QpSystem {
        let p = array![[2.0, 0.0], [0.0, 1.0]];
        let a = array![[1.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        let rho = array![1.0, 1.0, 1.0];
        QpSystem::new(p, a, rho, 1.0).unwrap()
    }

    fn q() -> Array1<f64> {
        // c = (-1, -1), l = (1, 0, 0), u = (1, 0.7, 0.7)
        array![-1.0, -1.0, 1.0, 0.0, 0.0, 1.0, 0.7, 0.7]
    }

    /// Central-difference pullback through `step`, used as a reference.
    struct FdOnly<'a>(&'a OsqpOperator);

    impl FixedPointStep for FdOnly<'_> {
        fn family(&self) -> AlgorithmFamily {
            self.0.family()
        }
        fn iterate_dim(&self) -> usize {
            self.0.iterate_dim()
        }
        fn instance_dim(&self) -> usize {
            self.0.instance_dim()
        }
        fn step(
            &self, k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
            params: ArrayView1<'_, f64>,
        ) -> OperatorResult<Array1<f64>> {
            self.0.step(k, z, instance, params)
        }
    }

    #[test]
    // Purpose
    // -------
    // Iterating the step converges to the QP solution.
    //
    // Given
    // -----
    // `min x₁² + ½x₂² − x₁ − x₂` s.t. `x₁ + x₂ = 1`, `0 ≤ x ≤ 0.7`.
    //
    // Expect
    // ------
    // `x* = (1/3, 2/3)` and a vanishing fixed-point residual.
    fn iterates_converge_to_qp_solution() {
        let op = OsqpOperator::new(2, 3, Some(system()), 1.0).unwrap();
        let q = q();
        let inst = ProblemInstance::new(q.view());
        let empty = Array1::zeros(0);
        let mut z = op.cold_start();
        let mut res = f64::INFINITY;
        for k in 0..5000 {
            let next = op.step(k, z.view(), &inst, empty.view()).unwrap();
            res = op.residual(z.view(), next.view());
            z = next;
        }
        assert!(res < 1e-7);
        assert_abs_diff_eq!(z[0], 1.0 / 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(z[1], 2.0 / 3.0, epsilon = 1e-5);
    }

    #[test]
    // Purpose
    // -------
    // Without a static or per-instance system the step reports a missing
    // factorization instead of proceeding.
    //
    // Given
    // -----
    // An operator built without a static system, and an instance without aux.
    //
    // Expect
    // ------
    // `OperatorError::MissingFactorization`.
    fn missing_system_is_reported() {
        let op = OsqpOperator::new(2, 3, None, 1.0).unwrap();
        let q = q();
        let err = op
            .step(0, op.cold_start().view(), &ProblemInstance::new(q.view()), Array1::zeros(0).view())
            .unwrap_err();
        assert_eq!(err, OperatorError::MissingFactorization { family: AlgorithmFamily::Osqp });
    }

    #[test]
    // Purpose
    // -------
    // A singular per-instance system yields a per-instance factorization
    // error.
    //
    // Given
    // -----
    // `P = −σI`, `A = 0`, so `M = 0`.
    //
    // Expect
    // ------
    // `OperatorError::Factorization` flagged as per-instance.
    fn singular_instance_system_fails_per_instance() {
        let op = OsqpOperator::new(2, 3, None, 1.0).unwrap();
        let p = -Array2::<f64>::eye(2);
        let sys = QpSystem::new(p, Array2::zeros((3, 2)), Array1::ones(3), 1.0).unwrap();
        let q = q();
        let err = op
            .step(
                0,
                op.cold_start().view(),
                &ProblemInstance::with_aux(q.view(), &sys),
                Array1::zeros(0).view(),
            )
            .unwrap_err();
        assert!(err.is_per_instance());
    }

    #[test]
    // Purpose
    // -------
    // The analytic adjoint agrees with central differences.
    //
    // Given
    // -----
    // Relaxation `α = 1.6` and an iterate with some `v` inside and some
    // outside the box.
    //
    // Expect
    // ------
    // Cotangents agree to `1e-6`.
    fn analytic_vjp_matches_finite_differences() {
        let op = OsqpOperator::new(2, 3, Some(system()), 1.6).unwrap();
        let q = q();
        let inst = ProblemInstance::new(q.view());
        let z = array![0.2, -0.4, 0.9, 1.3, 0.35];
        let v = array![1.0, -0.5, 0.3, 0.7, -1.2];
        let empty = Array1::zeros(0);
        let (vz, _) = op.vjp(0, z.view(), &inst, empty.view(), v.view()).unwrap();
        let (fz, _) = FdOnly(&op).vjp(0, z.view(), &inst, empty.view(), v.view()).unwrap();
        for (a, e) in vz.iter().zip(fz.iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = TOL);
        }
    }
}
