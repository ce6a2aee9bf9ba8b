//! Differentiable K-step unroll.
//!
//! Purpose
//! -------
//! Run `K` operator steps from the predictor's output for every instance in
//! a batch, accumulate the per-instance loss, and pull its gradient back
//! through the unroll (operator vector-Jacobian products) and through the
//! network (`Mlp::backward`).
//!
//! Key behaviors
//! -------------
//! - Unsupervised loss: `Σ_k w_k ‖z_k − z_{k−1}‖`; supervised loss:
//!   `Σ_k w_k ‖z_k − z*‖`, with weights from [`LossWeighting`].
//! - The batch loss is the mean over instances that completed.
//! - Per-instance factorization failures and non-finite losses are recorded
//!   and excluded; any other operator error aborts the batch. A batch in
//!   which every instance failed is an error.
//!
//! Invariants & assumptions
//! ------------------------
//! - Residuals are Euclidean, so `∂‖a − b‖/∂a = (a − b)/‖a − b‖`
//!   (taken as zero at `a = b`).
//! - Learned operator parameters are shared by every instance; their
//!   gradient is averaged like the loss.
use crate::operators::{
    errors::OperatorResult,
    instance::{ProblemBatch, ProblemInstance},
    traits::FixedPointStep,
};
use crate::predictor::network::{DenseLayer, Mlp};
use crate::training::options::LossWeighting;
use crate::workspace::errors::{L2wsError, L2wsResult};
use ndarray::{Array1, Array2, ArrayView1};

/// Loss definition of one unroll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnrollSpec {
    pub unrolls: usize,
    pub weighting: LossWeighting,
    pub supervised: bool,
}

/// An instance excluded from a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceFailure {
    /// Row within the batch.
    pub index: usize,
    pub reason: String,
}

/// Batch loss with gradients for the network that produced `z₀` and for the
/// learned operator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrollGradient {
    pub loss: f64,
    pub layers: Vec<DenseLayer>,
    pub operator: Array1<f64>,
    pub failures: Vec<InstanceFailure>,
}

struct InstanceGradient {
    loss: f64,
    z0: Array1<f64>,
    params: Array1<f64>,
}

fn norm_and_direction(diff: Array1<f64>) -> (f64, Array1<f64>) {
    let norm = diff.dot(&diff).sqrt();
    if norm > 0.0 { (norm, diff / norm) } else { (0.0, Array1::zeros(diff.len())) }
}

fn unroll_instance(
    op: &dyn FixedPointStep, z0: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
    params: ArrayView1<'_, f64>, z_star: Option<ArrayView1<'_, f64>>, weights: &[f64],
) -> OperatorResult<InstanceGradient> {
    let k_total = weights.len();
    let mut traj = Vec::with_capacity(k_total + 1);
    traj.push(z0.to_owned());
    for k in 0..k_total {
        let next = op.step(k, traj[k].view(), instance, params)?;
        traj.push(next);
    }

    let dim = z0.len();
    let mut direct = vec![Array1::<f64>::zeros(dim); k_total + 1];
    let mut loss = 0.0;
    for k in 1..=k_total {
        let w = weights[k - 1];
        if w == 0.0 {
            continue;
        }
        match z_star {
            Some(z_star) => {
                let (d, dir) = norm_and_direction(&traj[k] - &z_star);
                loss += w * d;
                direct[k] = &direct[k] + &(dir * w);
            }
            None => {
                let (r, dir) = norm_and_direction(&traj[k] - &traj[k - 1]);
                loss += w * r;
                direct[k] = &direct[k] + &(&dir * w);
                direct[k - 1] = &direct[k - 1] - &(dir * w);
            }
        }
    }

    let mut adj = direct[k_total].clone();
    let mut d_params = Array1::zeros(params.len());
    for k in (0..k_total).rev() {
        let (v_z, v_p) = op.vjp(k, traj[k].view(), instance, params, adj.view())?;
        d_params += &v_p;
        adj = v_z + &direct[k];
    }
    Ok(InstanceGradient { loss, z0: adj, params: d_params })
}

/// Mean unrolled loss of `batch` and its gradient.
///
/// # Errors
/// - [`L2wsError::ShapeMismatch`] when the network output or operator
///   parameters do not fit the operator.
/// - [`L2wsError::MissingOptimals`] for supervised training without `z*`.
/// - [`L2wsError::Operator`] for non-instance operator errors.
/// - [`L2wsError::AllInstancesFailed`] when no instance completed.
pub fn loss_and_gradient(
    op: &dyn FixedPointStep, layers: &[DenseLayer], operator_params: ArrayView1<'_, f64>,
    batch: &ProblemBatch, spec: &UnrollSpec,
) -> L2wsResult<UnrollGradient> {
    let dim = op.iterate_dim();
    if operator_params.len() != op.num_learned_params() {
        return Err(L2wsError::ShapeMismatch {
            what: "learned operator parameters",
            expected: op.num_learned_params(),
            found: operator_params.len(),
        });
    }
    let optimals = if spec.supervised {
        Some(batch.optimals().ok_or(L2wsError::MissingOptimals { policy: "learned" })?)
    } else {
        None
    };

    let mlp = Mlp::new(layers)?;
    let (z0, cache) = mlp.forward_cached(batch.theta().view())?;
    if z0.ncols() != dim {
        return Err(L2wsError::ShapeMismatch { what: "predictor output", expected: dim, found: z0.ncols() });
    }

    let weights = spec.weighting.weights(spec.unrolls);
    let mut grad_out = Array2::zeros(z0.dim());
    let mut d_params = Array1::zeros(operator_params.len());
    let mut failures = Vec::new();
    let mut total = 0.0;
    let mut completed = 0usize;
    for i in 0..batch.len() {
        let z_star = optimals.map(|z| z.row(i));
        match unroll_instance(op, z0.row(i), &batch.instance(i), operator_params, z_star, &weights) {
            Ok(g) if g.loss.is_finite() && g.z0.iter().all(|v| v.is_finite()) => {
                total += g.loss;
                grad_out.row_mut(i).assign(&g.z0);
                d_params += &g.params;
                completed += 1;
            }
            Ok(g) => failures.push(InstanceFailure { index: i, reason: format!("non-finite loss {}", g.loss) }),
            Err(e) if e.is_per_instance() => failures.push(InstanceFailure { index: i, reason: e.to_string() }),
            Err(e) => return Err(e.into()),
        }
    }
    if completed == 0 {
        let first = failures.first().map_or_else(|| "empty batch".to_string(), |f| f.reason.clone());
        return Err(L2wsError::AllInstancesFailed { count: batch.len(), first });
    }

    let scale = 1.0 / completed as f64;
    grad_out *= scale;
    d_params *= scale;
    let layer_grads = mlp.backward(&cache, grad_out.view())?;
    Ok(UnrollGradient { loss: total * scale, layers: layer_grads, operator: d_params, failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{
        dispatch::{SolverOperator, StaticProblemData},
        family::{AlgorithmFamily, ProxGradVariant},
    };
    use crate::predictor::{network::init_layers, params::PredictorParameters};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    // Scope
    // -----
    // The analytic unroll gradient against central differences of the batch
    // loss, in both loss modes, and failure handling.

    fn setup() -> (SolverOperator, ProblemBatch, PredictorParameters) {
        let a = array![[1.0, 0.2], [0.1, 0.8], [0.3, -0.4]];
        let op = SolverOperator::build(
            AlgorithmFamily::ProxGrad(ProxGradVariant::LearnedStep),
            StaticProblemData::ProxGrad { a, lambda: 0.1, step: None, learned_steps: 3 },
        )
        .unwrap();
        let theta = array![[0.5, -1.0, 0.2], [1.0, 0.3, -0.7], [-0.2, 0.9, 0.4]];
        let q = theta.clone();
        let optimals = Array2::from_elem((3, 2), 0.1);
        let batch = ProblemBatch::new(theta.clone(), theta, q, Some(optimals)).unwrap();
        let layers = init_layers(&[3, 4, 2], 0.5, 11).unwrap();
        let params = PredictorParameters::deterministic(layers, op.init_learned_params()).unwrap();
        (op, batch, params)
    }

    fn batch_loss(op: &SolverOperator, batch: &ProblemBatch, params: &PredictorParameters, spec: &UnrollSpec) -> f64 {
        loss_and_gradient(op, params.mean_layers(), params.operator_params().view(), batch, spec).unwrap().loss
    }

    fn check_against_fd(spec: UnrollSpec) {
        let (op, batch, params) = setup();
        let g = loss_and_gradient(&op, params.mean_layers(), params.operator_params().view(), &batch, &spec).unwrap();
        let mut analytic = Vec::new();
        crate::predictor::params::push_layers(&g.layers, &mut analytic);
        analytic.extend(g.operator.iter());

        let flat = params.to_flat();
        let h = 1e-6;
        for i in 0..flat.len() {
            let (mut up, mut dn) = (flat.clone(), flat.clone());
            up[i] += h;
            dn[i] -= h;
            let fu = batch_loss(&op, &batch, &params.with_flat(up.view()).unwrap(), &spec);
            let fd = batch_loss(&op, &batch, &params.with_flat(dn.view()).unwrap(), &spec);
            assert_abs_diff_eq!(analytic[i], (fu - fd) / (2.0 * h), epsilon = 1e-5);
        }
    }

    #[test]
    // Purpose
    // -------
    // The residual-sum gradient matches finite differences for network and
    // learned step sizes.
    //
    // Given
    // -----
    // Learned-step prox-grad, 3 unrolls, a 3-4-2 network.
    //
    // Expect
    // ------
    // Agreement to `1e-5` in every coordinate.
    fn unsupervised_gradient_matches_finite_differences() {
        check_against_fd(UnrollSpec { unrolls: 3, weighting: LossWeighting::ConstantSum, supervised: false });
    }

    #[test]
    // Purpose
    // -------
    // The supervised final-step gradient matches finite differences.
    //
    // Given
    // -----
    // Same setup, supervised, final-step weighting.
    //
    // Expect
    // ------
    // Agreement to `1e-5` in every coordinate.
    fn supervised_gradient_matches_finite_differences() {
        check_against_fd(UnrollSpec { unrolls: 3, weighting: LossWeighting::FinalStep, supervised: true });
    }

    #[test]
    // Purpose
    // -------
    // Supervised training without optimals and mismatched operator
    // parameters are batch-level errors.
    //
    // Given
    // -----
    // A batch without `z*`; an operator vector of the wrong length.
    //
    // Expect
    // ------
    // `MissingOptimals` and `ShapeMismatch`.
    fn batch_level_errors_abort() {
        let (op, batch, params) = setup();
        let bare = ProblemBatch::new(batch.theta_raw().clone(), batch.theta().clone(), batch.q().clone(), None)
            .unwrap();
        let spec = UnrollSpec { unrolls: 2, weighting: LossWeighting::FinalStep, supervised: true };
        let out = loss_and_gradient(&op, params.mean_layers(), params.operator_params().view(), &bare, &spec);
        assert!(matches!(out, Err(L2wsError::MissingOptimals { .. })));

        let spec = UnrollSpec { supervised: false, ..spec };
        let out = loss_and_gradient(&op, params.mean_layers(), array![1.0].view(), &batch, &spec);
        assert!(matches!(out, Err(L2wsError::ShapeMismatch { .. })));
    }
}
