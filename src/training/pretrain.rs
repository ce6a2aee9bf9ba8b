//! Supervised pretraining of the predictor.
//!
//! Regress the (mean) network output onto the optimal iterates of the
//! training split, minimizing `(1/N) Σ_i ½‖f(θ_i) − z*_i‖²` either with
//! full-batch L-BFGS through [`minimize`] or with Adam mini-batches.
//! Learned operator parameters are carried through unchanged.
use crate::operators::instance::ProblemBatch;
use crate::optimization::{
    adam::{AdamOptions, AdamState},
    errors::{OptError, OptResult},
    minimizer::{MinimizeOptions, Objective, minimize, types::{Cost, Grad, Theta}},
};
use crate::predictor::{
    errors::PredictorError,
    network::Mlp,
    params::{PredictorParameters, push_layers},
};
use crate::training::permutation::epoch_permutation;
use crate::workspace::errors::{L2wsError, L2wsResult};
use ndarray::{Array1, Array2, Axis};

/// Optimizer used for pretraining.
#[derive(Debug, Clone, PartialEq)]
pub enum PretrainMethod {
    Lbfgs(MinimizeOptions),
    Adam { epochs: usize, batch_size: usize },
}

/// Train and test regression losses after pretraining.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PretrainReport {
    pub train_loss: f64,
    pub test_loss: Option<f64>,
    pub iterations: usize,
}

/// Inputs, targets, and the deterministic parameter template.
#[derive(Debug, Clone)]
pub struct RegressionData {
    inputs: Array2<f64>,
    targets: Array2<f64>,
    template: PredictorParameters,
}

struct RegressionObjective;

fn predictor_to_opt(err: PredictorError) -> OptError {
    OptError::InvalidParameter { text: err.to_string() }
}

fn regression(data: &RegressionData, theta: &Theta, want_grad: bool) -> OptResult<(Cost, Option<Grad>)> {
    let params = data.template.with_flat(theta.view()).map_err(predictor_to_opt)?;
    let mlp = Mlp::new(params.mean_layers()).map_err(predictor_to_opt)?;
    let (out, cache) = mlp.forward_cached(data.inputs.view()).map_err(predictor_to_opt)?;
    let n = data.inputs.nrows().max(1) as f64;
    let diff = out - &data.targets;
    let value = 0.5 * diff.iter().map(|d| d * d).sum::<f64>() / n;
    if !want_grad {
        return Ok((value, None));
    }
    let grads = mlp.backward(&cache, (diff / n).view()).map_err(predictor_to_opt)?;
    let mut flat = Vec::with_capacity(theta.len());
    push_layers(&grads, &mut flat);
    flat.extend(std::iter::repeat(0.0).take(params.operator_params().len()));
    Ok((value, Some(Array1::from(flat))))
}

impl Objective for RegressionObjective {
    type Data = RegressionData;

    fn value(&self, theta: &Theta, data: &RegressionData) -> OptResult<Cost> {
        Ok(regression(data, theta, false)?.0)
    }

    fn check(&self, theta: &Theta, data: &RegressionData) -> OptResult<()> {
        data.template.with_flat(theta.view()).map_err(predictor_to_opt)?;
        if data.inputs.nrows() != data.targets.nrows() {
            return Err(OptError::InvalidParameter { text: "inputs and targets differ in row count".to_string() });
        }
        Ok(())
    }

    fn grad(&self, theta: &Theta, data: &RegressionData) -> OptResult<Grad> {
        regression(data, theta, true)?
            .1
            .ok_or_else(|| OptError::PotentialBug { text: "gradient not computed".to_string() })
    }
}

fn regression_data(batch: &ProblemBatch, template: &PredictorParameters) -> L2wsResult<RegressionData> {
    let targets = batch.optimals().ok_or(L2wsError::MissingOptimals { policy: "pretrain" })?;
    Ok(RegressionData { inputs: batch.theta().clone(), targets: targets.clone(), template: template.clone() })
}

/// Pretrain the (mean) network of `params` on `train`.
///
/// # Errors
/// - [`L2wsError::MissingOptimals`] without training optimals.
/// - [`L2wsError::EmptySplit`] for an empty training split.
/// - Optimizer failures.
pub fn pretrain(
    params: &PredictorParameters, train: &ProblemBatch, test: Option<&ProblemBatch>, method: &PretrainMethod,
    adam: &AdamOptions, seed: u64,
) -> L2wsResult<(PredictorParameters, PretrainReport)> {
    if train.is_empty() {
        return Err(L2wsError::EmptySplit { split: crate::evaluation::policy::Split::Train });
    }
    let template = PredictorParameters::deterministic(params.mean_layers().to_vec(), params.operator_params().clone())?;
    let data = regression_data(train, &template)?;
    let theta0 = template.to_flat();

    let (theta_hat, iterations) = match method {
        PretrainMethod::Lbfgs(opts) => {
            let out = minimize(&RegressionObjective, theta0, &data, opts)?;
            (out.theta_hat, out.iterations)
        }
        PretrainMethod::Adam { epochs, batch_size } => {
            if *batch_size == 0 {
                return Err(L2wsError::InvalidCount { name: "batch_size", value: 0, reason: "must be >= 1" });
            }
            let n = train.len();
            let size = (*batch_size).min(n);
            let mut theta = theta0;
            let mut state = AdamState::new(theta.len());
            for epoch in 0..*epochs {
                let order = epoch_permutation(seed, epoch, n);
                for chunk in order.chunks_exact(size) {
                    let sub = RegressionData {
                        inputs: data.inputs.select(Axis(0), chunk),
                        targets: data.targets.select(Axis(0), chunk),
                        template: template.clone(),
                    };
                    let grad = RegressionObjective.grad(&theta, &sub)?;
                    let (next, next_state) = state.propose(&theta, &grad, adam, adam.learning_rate)?;
                    theta = next;
                    state = next_state;
                }
            }
            (theta, state.step() as usize)
        }
    };

    let train_loss = RegressionObjective.value(&theta_hat, &data)?;
    let test_loss = match test {
        Some(batch) if !batch.is_empty() => Some(RegressionObjective.value(&theta_hat, &regression_data(batch, &template)?)?),
        _ => None,
    };
    let fitted = template.with_flat(theta_hat.view())?;
    let out = params.with_mean_layers(fitted.mean_layers().to_vec())?;
    Ok((out, PretrainReport { train_loss, test_loss, iterations }))
}
