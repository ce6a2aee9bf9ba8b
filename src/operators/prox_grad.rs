//! Proximal gradient (ISTA) on `min ½‖Az − b‖² + λ‖z‖₁` with `q = b`.
//!
//! Step `k`:
//! `y = z − d_k ⊙ Aᵀ(Az − b)`, `z' = S_{t_k}(y)` with soft threshold `S`.
//!
//! | variant                    | `d_k`           | `t_k`         | learned per step |
//! |----------------------------|-----------------|---------------|------------------|
//! | `Plain`                    | `1/‖A‖₂²`       | `λ d`         | –                |
//! | `KnownStep`                | caller's `η`    | `λ η`         | –                |
//! | `LearnedStep`              | `η_k`           | `λ η_k`       | `η_k`            |
//! | `LearnedThresholdAndStep`  | `η_k`           | `t_k`         | `η_k, t_k`       |
//! | `LearnedGradient`          | vector `d_k`    | `λ η`         | `d_k ∈ ℝⁿ`       |
//!
//! Learned blocks are stored step-major; steps past the last learned block
//! reuse that block. The adjoint is analytic.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::{AlgorithmFamily, ProxGradVariant},
    instance::ProblemInstance,
    linalg::{largest_eigenvalue_sym, soft_threshold},
    traits::{FixedPointStep, Vjp, check_len, check_step_inputs},
};
use ndarray::{Array1, Array2, ArrayView1, s};

#[derive(Debug, Clone)]
pub struct ProxGradOperator {
    variant: ProxGradVariant,
    a: Array2<f64>,
    gram: Array2<f64>,
    lambda: f64,
    step: f64,
    learned_steps: usize,
}

impl ProxGradOperator {
    /// Build the operator for design matrix `a` (`m×n`).
    ///
    /// `step` defaults to `1/‖A‖₂²`; `learned_steps` is the number of
    /// distinct learned blocks (ignored by non-learned variants, at least 1
    /// otherwise).
    ///
    /// # Errors
    /// - [`OperatorError::InvalidSetting`] for a negative or non-finite `λ`,
    ///   a non-positive step, a zero design matrix, or zero learned blocks.
    /// - [`OperatorError::IncompatibleStaticData`] for `KnownStep` without a step.
    pub fn new(
        variant: ProxGradVariant, a: Array2<f64>, lambda: f64, step: Option<f64>,
        learned_steps: usize,
    ) -> OperatorResult<Self> {
        let family = AlgorithmFamily::ProxGrad(variant);
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(OperatorError::InvalidSetting {
                name: "lambda",
                value: lambda,
                reason: "must be finite and >= 0",
            });
        }
        let gram = a.t().dot(&a);
        let step = match (variant, step) {
            (_, Some(eta)) => eta,
            (ProxGradVariant::KnownStep, None) => {
                return Err(OperatorError::IncompatibleStaticData {
                    family,
                    reason: "known-step variant needs an explicit step size",
                });
            }
            (_, None) => {
                let lipschitz = largest_eigenvalue_sym(gram.view());
                if !(lipschitz > 0.0) {
                    return Err(OperatorError::InvalidSetting {
                        name: "lipschitz constant",
                        value: lipschitz,
                        reason: "design matrix must be nonzero",
                    });
                }
                1.0 / lipschitz
            }
        };
        if !step.is_finite() || step <= 0.0 {
            return Err(OperatorError::InvalidSetting {
                name: "step",
                value: step,
                reason: "must be finite and > 0",
            });
        }
        let learned = variant.params_per_step(a.ncols()) > 0;
        if learned && learned_steps == 0 {
            return Err(OperatorError::InvalidSetting {
                name: "learned_steps",
                value: 0.0,
                reason: "learned variants need at least one block",
            });
        }
        let learned_steps = if learned { learned_steps } else { 0 };
        Ok(Self { variant, a, gram, lambda, step, learned_steps })
    }

    pub fn variant(&self) -> ProxGradVariant {
        self.variant
    }

    pub fn step_size(&self) -> f64 {
        self.step
    }

    fn block_len(&self) -> usize {
        self.variant.params_per_step(self.a.ncols())
    }

    /// Index of the learned block used at step `k`.
    fn block_index(&self, k: usize) -> usize {
        k.min(self.learned_steps.saturating_sub(1))
    }

    fn block<'p>(&self, k: usize, params: ArrayView1<'p, f64>) -> ArrayView1<'p, f64> {
        let len = self.block_len();
        let start = self.block_index(k) * len;
        params.slice_move(s![start..start + len])
    }

    /// Per-coordinate step vector and threshold vector at step `k`.
    fn step_and_threshold(&self, k: usize, params: ArrayView1<'_, f64>) -> (Array1<f64>, Array1<f64>) {
        let n = self.a.ncols();
        let block = self.block(k, params);
        match self.variant {
            ProxGradVariant::Plain | ProxGradVariant::KnownStep => (
                Array1::from_elem(n, self.step),
                Array1::from_elem(n, self.lambda * self.step),
            ),
            ProxGradVariant::LearnedStep => (
                Array1::from_elem(n, block[0]),
                Array1::from_elem(n, self.lambda * block[0]),
            ),
            ProxGradVariant::LearnedThresholdAndStep => {
                (Array1::from_elem(n, block[0]), Array1::from_elem(n, block[1]))
            }
            ProxGradVariant::LearnedGradient => {
                (block.to_owned(), Array1::from_elem(n, self.lambda * self.step))
            }
        }
    }

    fn gradient(&self, z: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
        self.gram.dot(&z) - self.a.t().dot(&b)
    }
}

impl FixedPointStep for ProxGradOperator {
    fn family(&self) -> AlgorithmFamily {
        AlgorithmFamily::ProxGrad(self.variant)
    }

    fn iterate_dim(&self) -> usize {
        self.a.ncols()
    }

    fn instance_dim(&self) -> usize {
        self.a.nrows()
    }

    fn num_learned_params(&self) -> usize {
        self.learned_steps * self.block_len()
    }

    fn init_learned_params(&self) -> Array1<f64> {
        let block: Vec<f64> = match self.variant {
            ProxGradVariant::Plain | ProxGradVariant::KnownStep => Vec::new(),
            ProxGradVariant::LearnedStep => vec![self.step],
            ProxGradVariant::LearnedThresholdAndStep => vec![self.step, self.lambda * self.step],
            ProxGradVariant::LearnedGradient => vec![self.step; self.a.ncols()],
        };
        Array1::from_iter((0..self.learned_steps).flat_map(|_| block.iter().copied()))
    }

    fn step(
        &self, k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>> {
        check_step_inputs(self, z, instance, params)?;
        let (d, t) = self.step_and_threshold(k, params);
        let y = &z - &(&d * &self.gradient(z, instance.q));
        Ok(soft_threshold(y.view(), t.view()))
    }

    fn vjp(
        &self, k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>,
    ) -> OperatorResult<Vjp> {
        check_step_inputs(self, z, instance, params)?;
        check_len("vjp cotangent", self.iterate_dim(), v.len())?;
        let (d, t) = self.step_and_threshold(k, params);
        let g = self.gradient(z, instance.q);
        let y = &z - &(&d * &g);

        // Active set of the soft threshold.
        let mask = ndarray::Zip::from(&y).and(&t).map_collect(|&yi, &ti| (yi.abs() > ti) as u8 as f64);
        let u = &v * &mask;
        let v_z = &u - &self.gram.dot(&(&d * &u));

        // ∂z'/∂t = −sign(y) on the active set.
        let dt: Array1<f64> = ndarray::Zip::from(&v)
            .and(&y)
            .and(&mask)
            .map_collect(|&vi, &yi, &mi| -vi * yi.signum() * mi);

        let mut v_params = Array1::zeros(self.num_learned_params());
        let len = self.block_len();
        if len > 0 {
            let start = self.block_index(k) * len;
            let mut block = v_params.slice_mut(s![start..start + len]);
            let dy_dd = -(&u * &g);
            match self.variant {
                ProxGradVariant::LearnedStep => {
                    block[0] = dy_dd.sum() + self.lambda * dt.sum();
                }
                ProxGradVariant::LearnedThresholdAndStep => {
                    block[0] = dy_dd.sum();
                    block[1] = dt.sum();
                }
                ProxGradVariant::LearnedGradient => block.assign(&dy_dd),
                ProxGradVariant::Plain | ProxGradVariant::KnownStep => {}
            }
        }
        Ok((v_z, v_params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // Step semantics per variant, default step size, and the analytic adjoint
    // against finite differences.

    const TOL: f64 = 1e-6;

    fn design() -> Array2<f64> {
        array![[1.0, 0.2, 0.0], [0.0, 1.0, 0.3], [0.4, 0.0, 1.0], [0.1, 0.1, 0.1]]
    }

    fn fd_vjp(
        op: &ProxGradOperator, k: usize, z: &Array1<f64>, b: &Array1<f64>, params: &Array1<f64>,
        v: &Array1<f64>,
    ) -> Vjp {
        let inst = ProblemInstance::new(b.view());
        let phi = |zz: &Array1<f64>, pp: &Array1<f64>| {
            op.step(k, zz.view(), &inst, pp.view()).unwrap().dot(v)
        };
        let h = 1e-6;
        let mut gz = Array1::zeros(z.len());
        for i in 0..z.len() {
            let (mut zp, mut zm) = (z.clone(), z.clone());
            zp[i] += h;
            zm[i] -= h;
            gz[i] = (phi(&zp, params) - phi(&zm, params)) / (2.0 * h);
        }
        let mut gp = Array1::zeros(params.len());
        for i in 0..params.len() {
            let (mut pp, mut pm) = (params.clone(), params.clone());
            pp[i] += h;
            pm[i] -= h;
            gp[i] = (phi(z, &pp) - phi(z, &pm)) / (2.0 * h);
        }
        (gz, gp)
    }

    #[test]
    // Purpose
    // -------
    // With zero regularization and the default step, a plain step is a
    // gradient step of size `1/L`.
    //
    // Given
    // -----
    // `A = I₂`, `b = (1, −1)`, `λ = 0`, `z = 0`.
    //
    // Expect
    // ------
    // `L = 1`, so one step lands exactly on `b`.
    fn plain_step_without_penalty_is_gradient_step() {
        let op =
            ProxGradOperator::new(ProxGradVariant::Plain, Array2::eye(2), 0.0, None, 0).unwrap();
        let b = array![1.0, -1.0];
        let z1 = op
            .step(0, Array1::zeros(2).view(), &ProblemInstance::new(b.view()), Array1::zeros(0).view())
            .unwrap();
        assert_abs_diff_eq!(op.step_size(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z1[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z1[1], -1.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // The soft threshold zeroes coordinates below `λη`.
    //
    // Given
    // -----
    // `A = I₂`, `b = (0.5, 3)`, `λ = 1`, known step `η = 1`.
    //
    // Expect
    // ------
    // `z' = (0, 2)`.
    fn known_step_thresholds_small_coordinates() {
        let op = ProxGradOperator::new(ProxGradVariant::KnownStep, Array2::eye(2), 1.0, Some(1.0), 0)
            .unwrap();
        let b = array![0.5, 3.0];
        let z1 = op
            .step(0, Array1::zeros(2).view(), &ProblemInstance::new(b.view()), Array1::zeros(0).view())
            .unwrap();
        assert_eq!(z1, array![0.0, 2.0]);
    }

    #[test]
    // Purpose
    // -------
    // Learned blocks are indexed by step and the last block is reused beyond
    // the learned horizon.
    //
    // Given
    // -----
    // `LearnedStep` with two blocks `(0.5, 1.0)`, `A = I₁`, `b = 2`, `λ = 0`.
    //
    // Expect
    // ------
    // Step 0 moves halfway; steps 1 and 5 both use `η = 1`.
    fn learned_blocks_reuse_last_block() {
        let op = ProxGradOperator::new(ProxGradVariant::LearnedStep, Array2::eye(1), 0.0, None, 2)
            .unwrap();
        let b = array![2.0];
        let inst = ProblemInstance::new(b.view());
        let params = array![0.5, 1.0];
        let z0 = array![0.0];
        assert_abs_diff_eq!(op.step(0, z0.view(), &inst, params.view()).unwrap()[0], 1.0);
        assert_abs_diff_eq!(op.step(1, z0.view(), &inst, params.view()).unwrap()[0], 2.0);
        assert_abs_diff_eq!(op.step(5, z0.view(), &inst, params.view()).unwrap()[0], 2.0);
        assert_eq!(op.init_learned_params().len(), 2);
    }

    #[test]
    // Purpose
    // -------
    // The analytic adjoint matches central differences for every learned
    // variant away from threshold kinks.
    //
    // Given
    // -----
    // A 4×3 design, `λ = 0.1`, a generic iterate and cotangent.
    //
    // Expect
    // ------
    // Iterate and parameter cotangents agree to `1e-6`.
    fn analytic_vjp_matches_finite_differences() {
        let z = array![0.3, -0.7, 1.1];
        let b = array![1.0, -2.0, 0.5, 0.2];
        let v = array![0.4, -1.0, 0.25];
        for variant in [
            ProxGradVariant::Plain,
            ProxGradVariant::LearnedStep,
            ProxGradVariant::LearnedThresholdAndStep,
            ProxGradVariant::LearnedGradient,
        ] {
            let op = ProxGradOperator::new(variant, design(), 0.1, None, 3).unwrap();
            let params = op.init_learned_params();
            let inst = ProblemInstance::new(b.view());
            let (vz, vp) = op.vjp(1, z.view(), &inst, params.view(), v.view()).unwrap();
            let (gz, gp) = fd_vjp(&op, 1, &z, &b, &params, &v);
            for (a, e) in vz.iter().zip(gz.iter()) {
                assert_abs_diff_eq!(*a, *e, epsilon = TOL);
            }
            for (a, e) in vp.iter().zip(gp.iter()) {
                assert_abs_diff_eq!(*a, *e, epsilon = TOL);
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // Residual is zero on identical iterates and non-negative otherwise.
    //
    // Given
    // -----
    // Any two vectors.
    //
    // Expect
    // ------
    // `r(z, z) = 0`, `r(z1, z2) = ‖z1 − z2‖`.
    fn residual_is_euclidean_distance() {
        let op = ProxGradOperator::new(ProxGradVariant::Plain, design(), 0.1, None, 0).unwrap();
        let z1 = array![1.0, 2.0, 2.0];
        let z2 = array![0.0, 0.0, 0.0];
        assert_eq!(op.residual(z1.view(), z1.view()), 0.0);
        assert_abs_diff_eq!(op.residual(z1.view(), z2.view()), 3.0, epsilon = 1e-12);
    }
}
