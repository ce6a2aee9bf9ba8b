//! Evaluation engine.
//!
//! Purpose
//! -------
//! Run `K` operator steps from given initial iterates for every instance of
//! a split and record residual curves, distances to the optimum, truncated
//! trajectories, divergence events, and timing.
//!
//! Key behaviors
//! -------------
//! - Instances are processed in sub-batches of `batch_size`; results are
//!   concatenated in instance order and only the first `history_depth`
//!   iterates of each trajectory are kept.
//! - A per-instance factorization failure fills that instance's rows with
//!   NaN and records the failure; other operator errors abort the call.
//! - A step whose residual exceeds the previous step's residual is recorded
//!   as a divergence event; evaluation continues.
//!
//! Invariants & assumptions
//! ------------------------
//! - `initial_iterates` has one row per instance and `iterate_dim` columns.
//! - Evaluation does not touch predictor parameters; callers pass a
//!   consistent snapshot.
use crate::operators::{
    errors::OperatorResult,
    instance::{ProblemBatch, ProblemInstance},
    traits::FixedPointStep,
};
use crate::evaluation::metrics::mean_curve;
use crate::training::unroll::InstanceFailure;
use crate::workspace::errors::{L2wsError, L2wsResult};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, concatenate, s};
use std::time::Instant;

/// Default solved-fraction accuracies.
pub const DEFAULT_ACCURACIES: [f64; 4] = [0.1, 0.01, 0.001, 0.0001];

/// Default percentiles of the residual distribution.
pub const DEFAULT_PERCENTILES: [f64; 6] = [30.0, 50.0, 80.0, 90.0, 95.0, 99.0];

/// Default number of stored iterates per trajectory.
pub const DEFAULT_HISTORY_DEPTH: usize = 25;

/// Default contraction-ratio grid.
pub fn default_rate_grid() -> Vec<f64> {
    let mut grid = vec![0.8, 0.85];
    grid.extend((90..=99).map(|p| p as f64 / 100.0));
    grid.extend([0.995, 1.0, 1.05, 1.10, 1.15, 1.2, 1.25, 1.3]);
    grid
}

/// Evaluation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    pub eval_unrolls: usize,
    /// Instances per sub-batch.
    pub batch_size: usize,
    pub history_depth: usize,
    /// Thresholds of the solved-fraction tables.
    pub accuracies: Vec<f64>,
    pub rate_grid: Vec<f64>,
    /// Accuracies for iterations-to-accuracy.
    pub iteration_accuracies: Vec<f64>,
    pub percentiles: Vec<f64>,
}

impl EvalOptions {
    /// Options with default tables for the given unroll count and
    /// sub-batch size.
    ///
    /// # Errors
    /// [`L2wsError::InvalidCount`] for zero `eval_unrolls` or `batch_size`.
    pub fn new(eval_unrolls: usize, batch_size: usize) -> L2wsResult<Self> {
        Self { eval_unrolls, batch_size, ..Self::default() }.validated()
    }

    /// Check every field.
    ///
    /// # Errors
    /// - [`L2wsError::InvalidCount`] for zero counts.
    /// - [`L2wsError::InvalidOption`] for non-positive accuracies or
    ///   percentiles outside `[0, 100]`.
    pub fn validated(self) -> L2wsResult<Self> {
        for (name, value) in [("eval_unrolls", self.eval_unrolls), ("batch_size", self.batch_size)] {
            if value == 0 {
                return Err(L2wsError::InvalidCount { name, value, reason: "must be >= 1" });
            }
        }
        if let Some(&a) = self.accuracies.iter().chain(&self.iteration_accuracies).find(|a| !(**a > 0.0)) {
            return Err(L2wsError::InvalidOption { name: "accuracy", value: a, reason: "must be > 0" });
        }
        if let Some(&p) = self.percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            return Err(L2wsError::InvalidOption { name: "percentile", value: p, reason: "must lie in [0, 100]" });
        }
        Ok(self)
    }
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            eval_unrolls: 100,
            batch_size: 1000,
            history_depth: DEFAULT_HISTORY_DEPTH,
            accuracies: DEFAULT_ACCURACIES.to_vec(),
            rate_grid: default_rate_grid(),
            iteration_accuracies: vec![0.1, 0.01, 0.001, 0.0001, 0.00001],
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }
}

/// Steps at which an instance's residual grew.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub instance: usize,
    /// 1-based steps `k` with `r_k > r_{k−1}`.
    pub steps: Vec<usize>,
}

/// Outcome of one evaluation call; read-only once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// `N × K` fixed-point residuals `‖z_k − z_{k−1}‖`.
    pub residuals: Array2<f64>,
    /// `N × (K + 1)` distances `‖z_k − z*‖`, when optimals were supplied.
    pub distances: Option<Array2<f64>>,
    /// Mean residual per step over completed instances.
    pub mean_curve: Array1<f64>,
    /// `N × H × d` first iterates `z_0 … z_{H−1}`, `H = min(K + 1, depth)`.
    pub trajectories: Array3<f64>,
    /// `N × d` iterates after `K` steps.
    pub final_iterates: Array2<f64>,
    /// Mean final residual over completed instances.
    pub mean_loss: f64,
    /// Wall-clock seconds per instance.
    pub time_per_instance: f64,
    pub failures: Vec<InstanceFailure>,
    pub divergences: Vec<Divergence>,
}

impl EvaluationResult {
    pub fn len(&self) -> usize {
        self.residuals.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `N × K` matrix the summary metrics are computed on. Supervised runs
    /// with known optimals use distances to the optimum after steps
    /// `1..=K`; everything else uses fixed-point residuals.
    pub fn metric_basis(&self, supervised: bool) -> Array2<f64> {
        match (&self.distances, supervised) {
            (Some(d), true) => d.slice(s![.., 1..]).to_owned(),
            _ => self.residuals.clone(),
        }
    }
}

struct InstanceRun {
    residuals: Array1<f64>,
    distances: Option<Array1<f64>>,
    history: Array2<f64>,
    last: Array1<f64>,
}

pub struct EvaluationEngine<'a> {
    operator: &'a dyn FixedPointStep,
    options: &'a EvalOptions,
}

impl<'a> EvaluationEngine<'a> {
    pub fn new(operator: &'a dyn FixedPointStep, options: &'a EvalOptions) -> Self {
        Self { operator, options }
    }

    pub fn options(&self) -> &EvalOptions {
        self.options
    }

    fn history_len(&self) -> usize {
        (self.options.eval_unrolls + 1).min(self.options.history_depth.max(1))
    }

    fn run_instance(
        &self, z0: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>, params: ArrayView1<'_, f64>,
        z_star: Option<ArrayView1<'_, f64>>,
    ) -> OperatorResult<InstanceRun> {
        let k_total = self.options.eval_unrolls;
        let h = self.history_len();
        let mut history = Array2::zeros((h, z0.len()));
        history.row_mut(0).assign(&z0);
        let mut residuals = Array1::zeros(k_total);
        let mut distances = z_star.map(|_| Array1::zeros(k_total + 1));
        if let (Some(d), Some(zs)) = (distances.as_mut(), z_star) {
            d[0] = self.operator.distance_to_optimum(z0, zs);
        }
        let mut z = z0.to_owned();
        for k in 0..k_total {
            let next = self.operator.step(k, z.view(), instance, params)?;
            residuals[k] = self.operator.residual(z.view(), next.view());
            if let (Some(d), Some(zs)) = (distances.as_mut(), z_star) {
                d[k + 1] = self.operator.distance_to_optimum(next.view(), zs);
            }
            if k + 1 < h {
                history.row_mut(k + 1).assign(&next);
            }
            z = next;
        }
        Ok(InstanceRun { residuals, distances, history, last: z })
    }

    /// Evaluate `batch` from `initial_iterates` with learned operator
    /// parameters `params`.
    ///
    /// # Errors
    /// - [`L2wsError::ShapeMismatch`] for misaligned initial iterates or
    ///   learned parameters.
    /// - Non-instance operator errors.
    pub fn evaluate(
        &self, initial_iterates: ArrayView2<'_, f64>, batch: &ProblemBatch, params: ArrayView1<'_, f64>,
    ) -> L2wsResult<EvaluationResult> {
        let dim = self.operator.iterate_dim();
        if initial_iterates.nrows() != batch.len() {
            return Err(L2wsError::ShapeMismatch {
                what: "initial iterate rows",
                expected: batch.len(),
                found: initial_iterates.nrows(),
            });
        }
        if initial_iterates.ncols() != dim {
            return Err(L2wsError::ShapeMismatch { what: "initial iterate", expected: dim, found: initial_iterates.ncols() });
        }
        if params.len() != self.operator.num_learned_params() {
            return Err(L2wsError::ShapeMismatch {
                what: "learned operator parameters",
                expected: self.operator.num_learned_params(),
                found: params.len(),
            });
        }

        let start = Instant::now();
        let n = batch.len();
        let mut parts = Vec::new();
        let mut failures = Vec::new();
        let mut divergences = Vec::new();
        for lo in (0..n).step_by(self.options.batch_size) {
            let hi = (lo + self.options.batch_size).min(n);
            let sub = batch.range(lo, hi);
            let part = self.evaluate_chunk(initial_iterates.slice(s![lo..hi, ..]), &sub, params, lo)?;
            failures.extend(part.failures.iter().cloned());
            divergences.extend(part.divergences.iter().cloned());
            parts.push(part);
        }
        let elapsed = start.elapsed().as_secs_f64();

        let residuals = stack_rows(parts.iter().map(|p| p.residuals.view()).collect(), (0, self.options.eval_unrolls))?;
        let final_iterates = stack_rows(parts.iter().map(|p| p.final_iterates.view()).collect(), (0, dim))?;
        let distances = if batch.optimals().is_some() {
            let views = parts.iter().filter_map(|p| p.distances.as_ref().map(|d| d.view())).collect();
            Some(stack_rows(views, (0, self.options.eval_unrolls + 1))?)
        } else {
            None
        };
        let h = self.history_len();
        let trajectories = if parts.is_empty() {
            Array3::zeros((0, h, dim))
        } else {
            let views: Vec<_> = parts.iter().map(|p| p.trajectories.view()).collect();
            concatenate(Axis(0), &views).map_err(|_| L2wsError::ShapeMismatch {
                what: "trajectory history",
                expected: h,
                found: 0,
            })?
        };

        let curve = mean_curve(residuals.view());
        let finals: Vec<f64> = residuals
            .rows()
            .into_iter()
            .filter_map(|r| r.iter().next_back().copied())
            .filter(|r| r.is_finite())
            .collect();
        let mean_loss = if finals.is_empty() { f64::NAN } else { finals.iter().sum::<f64>() / finals.len() as f64 };
        Ok(EvaluationResult {
            residuals,
            distances,
            mean_curve: curve,
            trajectories,
            final_iterates,
            mean_loss,
            time_per_instance: if n > 0 { elapsed / n as f64 } else { 0.0 },
            failures,
            divergences,
        })
    }

    fn evaluate_chunk(
        &self, z0: ArrayView2<'_, f64>, batch: &ProblemBatch, params: ArrayView1<'_, f64>, offset: usize,
    ) -> L2wsResult<EvaluationResult> {
        let (n, k_total, dim, h) = (batch.len(), self.options.eval_unrolls, self.operator.iterate_dim(), self.history_len());
        let mut residuals = Array2::from_elem((n, k_total), f64::NAN);
        let mut distances = batch.optimals().map(|_| Array2::from_elem((n, k_total + 1), f64::NAN));
        let mut trajectories = Array3::from_elem((n, h, dim), f64::NAN);
        let mut final_iterates = Array2::from_elem((n, dim), f64::NAN);
        let mut failures = Vec::new();
        let mut divergences = Vec::new();

        for i in 0..n {
            let z_star = batch.optimals().map(|z| z.row(i));
            match self.run_instance(z0.row(i), &batch.instance(i), params, z_star) {
                Ok(run) => {
                    let grew: Vec<usize> = (1..k_total).filter(|&k| run.residuals[k] > run.residuals[k - 1]).map(|k| k + 1).collect();
                    if !grew.is_empty() {
                        divergences.push(Divergence { instance: offset + i, steps: grew });
                    }
                    residuals.row_mut(i).assign(&run.residuals);
                    if let (Some(d), Some(rd)) = (distances.as_mut(), run.distances.as_ref()) {
                        d.row_mut(i).assign(rd);
                    }
                    trajectories.index_axis_mut(Axis(0), i).assign(&run.history);
                    final_iterates.row_mut(i).assign(&run.last);
                }
                Err(e) if e.is_per_instance() => {
                    failures.push(InstanceFailure { index: offset + i, reason: e.to_string() });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(EvaluationResult {
            residuals,
            distances,
            mean_curve: Array1::zeros(0),
            trajectories,
            final_iterates,
            mean_loss: f64::NAN,
            time_per_instance: 0.0,
            failures,
            divergences,
        })
    }
}

fn stack_rows(views: Vec<ArrayView2<'_, f64>>, empty: (usize, usize)) -> L2wsResult<Array2<f64>> {
    if views.is_empty() {
        return Ok(Array2::zeros(empty));
    }
    concatenate(Axis(0), &views).map_err(|_| L2wsError::ShapeMismatch {
        what: "sub-batch columns",
        expected: empty.1,
        found: views.first().map_or(0, |v| v.ncols()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{
        dispatch::{SolverOperator, StaticProblemData},
        family::AlgorithmFamily,
        instance::QpSystem,
    };
    use crate::evaluation::metrics::{convergence_rates, frac_solved};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::sync::Arc;

    // Scope
    // -----
    // Sub-batch concatenation order, history truncation, per-instance
    // failures, divergence records, monotone solved fractions for a
    // contractive operator, and the choice of metric basis.

    const TOL: f64 = 1e-12;

    fn gd() -> SolverOperator {
        SolverOperator::build(
            AlgorithmFamily::GradientDescent,
            StaticProblemData::GradientDescent { p: array![[2.0, 0.0], [0.0, 1.0]], step: Some(0.4) },
        )
        .unwrap()
    }

    fn batch(n: usize) -> ProblemBatch {
        let q = Array2::from_shape_fn((n, 2), |(i, j)| (i as f64 + 1.0) * if j == 0 { 1.0 } else { -0.5 });
        let z_star = Array2::from_shape_fn((n, 2), |(i, j)| {
            let c = q[[i, j]];
            if j == 0 { -c / 2.0 } else { -c }
        });
        ProblemBatch::new(q.clone(), q.clone(), q, Some(z_star)).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Sub-batching does not change results or their order.
    //
    // Given
    // -----
    // Seven instances evaluated with sub-batch sizes 3 and 100.
    //
    // Expect
    // ------
    // Identical residuals, distances, trajectories and final iterates.
    fn sub_batches_concatenate_in_order() {
        // Arrange
        let op = gd();
        let data = batch(7);
        let z0 = Array2::zeros((7, 2));
        let small = EvalOptions { batch_size: 3, eval_unrolls: 10, ..EvalOptions::default() };
        let large = EvalOptions { batch_size: 100, eval_unrolls: 10, ..EvalOptions::default() };

        // Act
        let a = EvaluationEngine::new(&op, &small).evaluate(z0.view(), &data, Array1::zeros(0).view()).unwrap();
        let b = EvaluationEngine::new(&op, &large).evaluate(z0.view(), &data, Array1::zeros(0).view()).unwrap();

        // Assert
        assert_eq!(a.residuals, b.residuals);
        assert_eq!(a.distances, b.distances);
        assert_eq!(a.trajectories, b.trajectories);
        assert_eq!(a.final_iterates, b.final_iterates);
        assert_eq!(a.trajectories.dim(), (7, 11, 2));
    }

    #[test]
    // Purpose
    // -------
    // Trajectories keep only the first `history_depth` iterates, and the
    // mean loss is the mean final residual.
    //
    // Given
    // -----
    // 30 unrolls with depth 5.
    //
    // Expect
    // ------
    // Shape `N × 5 × d`, first slice equals `z₀`.
    fn history_is_truncated() {
        let op = gd();
        let data = batch(2);
        let z0 = array![[1.0, 1.0], [2.0, -1.0]];
        let opts = EvalOptions { eval_unrolls: 30, history_depth: 5, ..EvalOptions::default() };
        let out = EvaluationEngine::new(&op, &opts).evaluate(z0.view(), &data, Array1::zeros(0).view()).unwrap();
        assert_eq!(out.trajectories.dim(), (2, 5, 2));
        assert_eq!(out.trajectories.index_axis(Axis(1), 0), z0);
        let expected = (out.residuals[[0, 29]] + out.residuals[[1, 29]]) / 2.0;
        assert_abs_diff_eq!(out.mean_loss, expected, epsilon = TOL);
    }

    #[test]
    // Purpose
    // -------
    // Solved fractions are non-decreasing in `k` and in `τ` for a
    // contractive operator.
    //
    // Given
    // -----
    // Gradient descent with contraction factor 0.6 over 20 instances.
    //
    // Expect
    // ------
    // Monotone curves for τ in {1, 0.1, 0.01}, and each looser threshold
    // dominates the tighter one.
    fn frac_solved_is_monotone_for_contractions() {
        let op = gd();
        let data = batch(20);
        let z0 = Array2::zeros((20, 2));
        let opts = EvalOptions { eval_unrolls: 40, ..EvalOptions::default() };
        let out = EvaluationEngine::new(&op, &opts).evaluate(z0.view(), &data, Array1::zeros(0).view()).unwrap();
        let curves: Vec<Array1<f64>> = [1.0, 0.1, 0.01].iter().map(|&t| frac_solved(out.residuals.view(), t)).collect();
        for c in &curves {
            assert!(c.windows(2).into_iter().all(|w| w[1] >= w[0]));
        }
        for pair in curves.windows(2) {
            assert!(pair[0].iter().zip(pair[1].iter()).all(|(loose, tight)| loose >= tight));
        }
        assert!(out.divergences.is_empty());
    }

    #[test]
    // Purpose
    // -------
    // An instance with a singular system becomes a NaN row while the rest
    // of the batch is evaluated.
    //
    // Given
    // -----
    // An OSQP operator with per-instance systems, the second one singular.
    //
    // Expect
    // ------
    // One failure at index 1, NaN residuals there, finite elsewhere.
    fn singular_instances_become_nan_rows() {
        let op = SolverOperator::build(
            AlgorithmFamily::Osqp,
            StaticProblemData::Osqp { n: 1, m: 1, system: None, alpha: 1.0 },
        )
        .unwrap();
        let good = QpSystem::new(array![[1.0]], array![[1.0]], array![1.0], 1.0).unwrap();
        let bad = QpSystem::new(array![[-1.0]], array![[0.0]], array![1.0], 1.0).unwrap();
        let q = array![[1.0, -1.0, 1.0], [1.0, -1.0, 1.0]];
        let data = ProblemBatch::new(q.clone(), q.clone(), q, None)
            .unwrap()
            .with_aux(vec![Arc::new(good), Arc::new(bad)])
            .unwrap();
        let opts = EvalOptions { eval_unrolls: 5, ..EvalOptions::default() };
        let out = EvaluationEngine::new(&op, &opts)
            .evaluate(Array2::zeros((2, 2)).view(), &data, Array1::zeros(0).view())
            .unwrap();
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].index, 1);
        assert!(out.residuals.row(1).iter().all(|r| r.is_nan()));
        assert!(out.residuals.row(0).iter().all(|r| r.is_finite()));
    }

    #[test]
    // Purpose
    // -------
    // A growing residual is recorded as a divergence without stopping.
    //
    // Given
    // -----
    // Gradient descent with step 1.2 on `P = diag(2, 1)` (unstable in the
    // first coordinate).
    //
    // Expect
    // ------
    // A divergence record for the instance.
    fn growing_residuals_are_recorded() {
        let op = SolverOperator::build(
            AlgorithmFamily::GradientDescent,
            StaticProblemData::GradientDescent { p: array![[2.0, 0.0], [0.0, 1.0]], step: Some(1.2) },
        )
        .unwrap();
        let data = batch(1);
        let opts = EvalOptions { eval_unrolls: 6, ..EvalOptions::default() };
        let out = EvaluationEngine::new(&op, &opts)
            .evaluate(Array2::zeros((1, 2)).view(), &data, Array1::zeros(0).view())
            .unwrap();
        assert_eq!(out.divergences.len(), 1);
        assert_eq!(out.divergences[0].instance, 0);
    }

    #[test]
    // Purpose
    // -------
    // Known optimals do not switch a fixed-point-residual run to distance
    // ratios; only supervised runs measure distances to the optimum.
    //
    // Given
    // -----
    // Gradient descent on 4 instances with `z*` attached, 8 unrolls, rate
    // grid {0.3, 0.5, 0.7}.
    //
    // Expect
    // ------
    // - Unsupervised basis equals the residual matrix and its rates equal the
    //   consecutive-residual rates.
    // - Supervised basis equals `distances[:, 1..]`.
    fn metric_basis_follows_supervision_not_optimals() {
        // Arrange
        let op = gd();
        let data = batch(4);
        let z0 = array![[1.0, -1.0], [0.5, 2.0], [-1.0, 0.0], [3.0, 1.0]];
        let opts = EvalOptions { eval_unrolls: 8, ..EvalOptions::default() };
        let grid = [0.3, 0.5, 0.7];

        // Act
        let out = EvaluationEngine::new(&op, &opts).evaluate(z0.view(), &data, Array1::zeros(0).view()).unwrap();
        let unsupervised = out.metric_basis(false);
        let supervised = out.metric_basis(true);

        // Assert
        let distances = out.distances.as_ref().unwrap();
        assert_eq!(unsupervised, out.residuals);
        assert_eq!(
            convergence_rates(unsupervised.view(), &grid),
            convergence_rates(out.residuals.view(), &grid)
        );
        assert_eq!(supervised, distances.slice(s![.., 1..]).to_owned());
        assert_eq!(supervised.dim(), (4, 8));
    }
}
