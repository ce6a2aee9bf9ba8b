//! Receding-horizon rollout with warm-started QP iterations.
//!
//! Purpose
//! -------
//! At every control step: linearize and discretize the dynamics, build and
//! factor a fresh QP, choose a warm start by policy, run a fixed number of
//! OSQP-style iterations through the evaluation engine, apply the first
//! control, and advance the environment.
//!
//! Key behaviors
//! -------------
//! - Predictor features are `(x0, u0, vec(ref[:, :REF_FEATURE_STEPS]))`,
//!   normalized with the frozen training statistics.
//! - Policies: learned prediction, cold start (zeros), nearest neighbor over
//!   the training features, or the environment's shifted previous solution
//!   (cold on the first step).
//! - Degradation: a singular per-step system, a non-finite iterate, or a
//!   residual above tolerance after the budget marks the step `degraded`;
//!   the best available iterate is still applied and the rollout continues.
//!   Only environment failures abort.
use crate::closed_loop::environment::{ClosedLoopEnvironment, Discretization};
use crate::evaluation::{
    engine::{EvalOptions, EvaluationEngine},
    policy::{InitPolicy, nearest_neighbor_iterates},
};
use crate::operators::{
    dispatch::{SolverOperator, StaticProblemData},
    family::AlgorithmFamily,
    instance::{ProblemBatch, QpSystem},
    traits::FixedPointStep,
};
use crate::predictor::{normalization::Normalizer, params::PredictorParameters};
use crate::workspace::errors::{L2wsError, L2wsResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use slog::{Logger, debug, warn};
use std::sync::Arc;

/// Reference columns included in the predictor features.
pub const REF_FEATURE_STEPS: usize = 3;

/// Rollout configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedLoopOptions {
    /// Control steps to simulate.
    pub steps: usize,
    /// QP iterations per control step.
    pub budget: usize,
    /// Final fixed-point residual regarded as solved.
    pub tolerance: f64,
    pub sigma: f64,
    pub alpha: f64,
}

impl ClosedLoopOptions {
    /// # Errors
    /// [`L2wsError::InvalidCount`] for zero steps or budget;
    /// [`L2wsError::InvalidOption`] for a non-positive tolerance or sigma,
    /// or `alpha ∉ (0, 2)`.
    pub fn new(steps: usize, budget: usize, tolerance: f64, sigma: f64, alpha: f64) -> L2wsResult<Self> {
        for (name, value) in [("steps", steps), ("budget", budget)] {
            if value == 0 {
                return Err(L2wsError::InvalidCount { name, value, reason: "must be >= 1" });
            }
        }
        for (name, value) in [("tolerance", tolerance), ("sigma", sigma)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(L2wsError::InvalidOption { name, value, reason: "must be finite and > 0" });
            }
        }
        if !(alpha > 0.0 && alpha < 2.0) {
            return Err(L2wsError::InvalidOption { name: "alpha", value: alpha, reason: "must lie in (0, 2)" });
        }
        Ok(Self { steps, budget, tolerance, sigma, alpha })
    }
}

impl Default for ClosedLoopOptions {
    fn default() -> Self {
        Self { steps: 50, budget: 20, tolerance: 1e-3, sigma: 1.0, alpha: 1.0 }
    }
}

/// Trained artifacts the warm-start policies draw on.
pub struct RolloutContext<'a> {
    pub params: &'a PredictorParameters,
    pub normalizer: &'a Normalizer,
    /// Normalized training features.
    pub train_theta: ArrayView2<'a, f64>,
    pub train_optimals: Option<ArrayView2<'a, f64>>,
}

/// One control step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    /// State before the control was applied.
    pub state: Array1<f64>,
    pub control: Array1<f64>,
    /// Fixed-point residual after the last iteration (NaN if none ran).
    pub final_residual: f64,
    pub degraded: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RolloutResult {
    pub policy: InitPolicy,
    pub records: Vec<StepRecord>,
    /// `(steps + 1) × state_dim` visited states.
    pub states: Array2<f64>,
}

impl RolloutResult {
    pub fn degraded_steps(&self) -> usize {
        self.records.iter().filter(|r| r.degraded).count()
    }
}

/// Predictor features `(x0, u0, vec(ref[:, :REF_FEATURE_STEPS]))`, row-major.
pub fn features(x0: ArrayView1<'_, f64>, u0: ArrayView1<'_, f64>, reference: ArrayView2<'_, f64>) -> Array1<f64> {
    let cols = reference.ncols().min(REF_FEATURE_STEPS);
    let window = reference.slice(s![.., ..cols]);
    x0.iter().chain(u0.iter()).chain(window.iter()).copied().collect()
}

/// Simulate `opts.steps` control steps from `(x_init, u_init)`.
///
/// # Errors
/// - [`L2wsError::Environment`] or other environment failures.
/// - Configuration errors (shape mismatches between QP sizes and the
///   predictor, missing optimals for nearest neighbor).
pub fn run_rollout<E: ClosedLoopEnvironment>(
    env: &mut E, x_init: Array1<f64>, u_init: Array1<f64>, policy: InitPolicy, ctx: &RolloutContext<'_>,
    opts: &ClosedLoopOptions, logger: &Logger,
) -> L2wsResult<RolloutResult> {
    if x_init.len() != env.state_dim() {
        return Err(L2wsError::ShapeMismatch { what: "initial state", expected: env.state_dim(), found: x_init.len() });
    }
    if u_init.len() != env.control_dim() {
        return Err(L2wsError::ShapeMismatch {
            what: "initial control",
            expected: env.control_dim(),
            found: u_init.len(),
        });
    }

    let eval_opts = EvalOptions { eval_unrolls: opts.budget, batch_size: 1, history_depth: 1, ..EvalOptions::default() };
    let mut states = vec![x_init.clone()];
    let mut records = Vec::with_capacity(opts.steps);
    let (mut x, mut u_prev) = (x_init, u_init);
    let mut previous: Option<Array1<f64>> = None;

    for step in 0..opts.steps {
        let reference = env.reference_window(step);
        let lin = env.linearize(x.view(), u_prev.view())?;
        let model = Discretization::euler(&lin, x.view(), u_prev.view(), env.dt());
        let qp = env.canonicalize(reference.view(), x.view(), &model, u_prev.view())?;
        let (n, m) = (qp.p.nrows(), qp.a.nrows());
        let rho = QpSystem::default_rho(qp.l.view(), qp.u.view());
        let system = QpSystem::new(qp.p.clone(), qp.a.clone(), rho, opts.sigma)?;
        let operator = SolverOperator::build(
            AlgorithmFamily::Osqp,
            StaticProblemData::Osqp { n, m, system: None, alpha: opts.alpha },
        )?;

        let theta_raw = features(x.view(), u_prev.view(), reference.view());
        let theta = ctx.normalizer.normalize_row(theta_raw.view())?;
        let z0 = warm_start(policy, &operator, ctx, theta.view(), previous.as_ref(), env)?;

        let q = qp.instance_vector();
        let batch = ProblemBatch::new(
            theta_raw.insert_axis(Axis(0)),
            theta.insert_axis(Axis(0)),
            q.insert_axis(Axis(0)),
            None,
        )?
        .with_aux(vec![Arc::new(system)])?;
        let engine = EvaluationEngine::new(&operator, &eval_opts);
        let out = engine.evaluate(z0.view().insert_axis(Axis(0)), &batch, Array1::<f64>::zeros(0).view())?;

        let final_residual = out.residuals.row(0).iter().next_back().copied().unwrap_or(f64::NAN);
        let last = out.final_iterates.row(0).to_owned();
        let (z, degraded, reason) = if let Some(f) = out.failures.first() {
            (z0, true, Some(f.reason.clone()))
        } else if last.iter().any(|v| !v.is_finite()) {
            (z0, true, Some("non-finite iterate".to_string()))
        } else if !(final_residual <= opts.tolerance) {
            (last, true, Some(format!("residual {final_residual:.3e} above tolerance after budget")))
        } else {
            (last, false, None)
        };
        if let Some(r) = &reason {
            warn!(logger, "closed-loop step degraded"; "step" => step, "policy" => policy.label(), "reason" => r.as_str());
        }

        let control = env.extract_control(z.view());
        let x_next = env.advance(x.view(), control.view())?;
        debug!(logger, "closed-loop step"; "step" => step, "residual" => final_residual);
        records.push(StepRecord { step, state: x.clone(), control: control.clone(), final_residual, degraded, reason });
        states.push(x_next.clone());
        previous = Some(z);
        x = x_next;
        u_prev = control;
    }

    let views: Vec<ArrayView1<'_, f64>> = states.iter().map(|s| s.view()).collect();
    let states = ndarray::stack(Axis(0), &views).map_err(|_| L2wsError::ShapeMismatch {
        what: "state trajectory",
        expected: env.state_dim(),
        found: 0,
    })?;
    Ok(RolloutResult { policy, records, states })
}

fn warm_start<E: ClosedLoopEnvironment>(
    policy: InitPolicy, operator: &SolverOperator, ctx: &RolloutContext<'_>, theta: ArrayView1<'_, f64>,
    previous: Option<&Array1<f64>>, env: &E,
) -> L2wsResult<Array1<f64>> {
    let dim = operator.iterate_dim();
    let z0 = match policy {
        InitPolicy::Learned => ctx.params.predict(theta.insert_axis(Axis(0)))?.row(0).to_owned(),
        InitPolicy::ColdStart => operator.cold_start(),
        InitPolicy::NearestNeighbor => {
            let optimals = ctx.train_optimals.ok_or(L2wsError::MissingOptimals { policy: policy.label() })?;
            nearest_neighbor_iterates(ctx.train_theta, optimals, theta.insert_axis(Axis(0)))?.row(0).to_owned()
        }
        InitPolicy::PreviousSolution { .. } => match previous {
            Some(z) => env.shift_solution(z.view()),
            None => operator.cold_start(),
        },
    };
    if z0.len() != dim {
        return Err(L2wsError::ShapeMismatch { what: "closed-loop warm start", expected: dim, found: z0.len() });
    }
    Ok(z0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closed_loop::environment::{CanonicalQp, Linearization};
    use ndarray::array;

    // Scope
    // -----
    // Rollouts on a scalar system: tracking with a cold start, previous-
    // solution warm starts, and graceful degradation on a singular step.

    /// `ẋ = −x + u`, one-step QP over `u ∈ [−2, 2]` tracking a constant
    /// reference; step `singular_at` produces a singular system.
    struct Scalar {
        target: f64,
        singular_at: Option<usize>,
        calls: usize,
    }

    impl ClosedLoopEnvironment for Scalar {
        fn state_dim(&self) -> usize {
            1
        }

        fn control_dim(&self) -> usize {
            1
        }

        fn dt(&self) -> f64 {
            0.5
        }

        fn linearize(&self, x0: ArrayView1<'_, f64>, u0: ArrayView1<'_, f64>) -> L2wsResult<Linearization> {
            Ok(Linearization { ac: array![[-1.0]], bc: array![[1.0]], drift: array![-x0[0] + u0[0]] })
        }

        fn reference_window(&self, _step: usize) -> Array2<f64> {
            Array2::from_elem((1, 4), self.target)
        }

        fn canonicalize(
            &self, reference: ArrayView2<'_, f64>, x0: ArrayView1<'_, f64>, model: &Discretization,
            _u_prev: ArrayView1<'_, f64>,
        ) -> L2wsResult<CanonicalQp> {
            let (a, b, c) = (model.ad[[0, 0]], model.bd[[0, 0]], model.cd[0]);
            let free = a * x0[0] + c - reference[[0, 0]];
            let singular = self.singular_at == Some(self.calls);
            let p = if singular { array![[-2.0]] } else { array![[b * b + 0.01]] };
            Ok(CanonicalQp { p, a: array![[1.0]], c: array![b * free], l: array![-2.0], u: array![2.0] })
        }

        fn extract_control(&self, z: ArrayView1<'_, f64>) -> Array1<f64> {
            array![z[0]]
        }

        fn advance(&mut self, x: ArrayView1<'_, f64>, u: ArrayView1<'_, f64>) -> L2wsResult<Array1<f64>> {
            self.calls += 1;
            Ok(array![x[0] + 0.5 * (-x[0] + u[0])])
        }

        fn shift_solution(&self, z: ArrayView1<'_, f64>) -> Array1<f64> {
            z.to_owned()
        }
    }

    fn context_parts() -> (PredictorParameters, Normalizer, Array2<f64>) {
        let layers = crate::predictor::network::init_layers(&[5, 2], 0.01, 0).unwrap();
        let params = PredictorParameters::deterministic(layers, Array1::zeros(0)).unwrap();
        (params, Normalizer::identity(5), Array2::zeros((1, 5)))
    }

    fn discard() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    // Purpose
    // -------
    // A cold-started rollout tracks the reference.
    //
    // Given
    // -----
    // Target 1, start at 0, 30 steps with 200 iterations each.
    //
    // Expect
    // ------
    // 30 records, no degraded steps, final state near 1.
    fn cold_start_rollout_tracks_reference() {
        let (params, normalizer, train) = context_parts();
        let ctx = RolloutContext { params: &params, normalizer: &normalizer, train_theta: train.view(), train_optimals: None };
        let mut env = Scalar { target: 1.0, singular_at: None, calls: 0 };
        let opts = ClosedLoopOptions::new(30, 200, 1e-4, 1.0, 1.0).unwrap();
        let out = run_rollout(&mut env, array![0.0], array![0.0], InitPolicy::ColdStart, &ctx, &opts, &discard()).unwrap();
        assert_eq!(out.records.len(), 30);
        assert_eq!(out.degraded_steps(), 0);
        assert_eq!(out.states.dim(), (31, 1));
        assert!((out.states[[30, 0]] - 1.0).abs() < 0.05);
    }

    #[test]
    // Purpose
    // -------
    // Previous-solution warm starts reach tolerance in fewer iterations
    // than cold starts once the loop settles.
    //
    // Given
    // -----
    // Budget 10, 20 steps, both policies.
    //
    // Expect
    // ------
    // Late-step residuals of previous-solution at most those of cold start.
    fn previous_solution_warm_starts_help() {
        let (params, normalizer, train) = context_parts();
        let ctx = RolloutContext { params: &params, normalizer: &normalizer, train_theta: train.view(), train_optimals: None };
        let opts = ClosedLoopOptions::new(20, 10, 1e-8, 1.0, 1.0).unwrap();
        let mut env = Scalar { target: 1.0, singular_at: None, calls: 0 };
        let cold = run_rollout(&mut env, array![0.0], array![0.0], InitPolicy::ColdStart, &ctx, &opts, &discard()).unwrap();
        let mut env = Scalar { target: 1.0, singular_at: None, calls: 0 };
        let prev = run_rollout(
            &mut env,
            array![0.0],
            array![0.0],
            InitPolicy::PreviousSolution { trajectory_len: 20 },
            &ctx,
            &opts,
            &discard(),
        )
        .unwrap();
        assert!(prev.records[19].final_residual <= cold.records[19].final_residual);
    }

    #[test]
    // Purpose
    // -------
    // A singular step degrades gracefully and the rollout continues.
    //
    // Given
    // -----
    // Step 3 builds a singular system.
    //
    // Expect
    // ------
    // Step 3 is degraded with a reason; all 6 steps are recorded.
    fn singular_step_degrades_without_aborting() {
        let (params, normalizer, train) = context_parts();
        let ctx = RolloutContext { params: &params, normalizer: &normalizer, train_theta: train.view(), train_optimals: None };
        let mut env = Scalar { target: 1.0, singular_at: Some(3), calls: 0 };
        let opts = ClosedLoopOptions::new(6, 200, 1e-4, 1.0, 1.0).unwrap();
        let out = run_rollout(&mut env, array![0.0], array![0.0], InitPolicy::ColdStart, &ctx, &opts, &discard()).unwrap();
        assert_eq!(out.records.len(), 6);
        assert!(out.records[3].degraded);
        assert!(out.records[3].reason.is_some());
        assert!(!out.records[4].degraded);
    }
}
