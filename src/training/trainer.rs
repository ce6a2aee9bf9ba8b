//! Unrolled trainer.
//!
//! Purpose
//! -------
//! Drive mini-batch training of the warm-start predictor: per-epoch
//! permutations, batch unrolls, gradient assembly for deterministic or
//! stochastic parameters, optional PAC-Bayes regularization, and Adam
//! updates committed atomically to [`TrainState`].
//!
//! Key behaviors
//! -------------
//! - Epoch `e` visits `⌊N / B⌋` batches, each a consecutive slice of
//!   [`epoch_permutation`]`(seed, e, N)`; a trailing partial batch is
//!   dropped.
//! - Stochastic parameters draw one weight sample per batch from
//!   [`noise_rng`]`(seed, iteration)` and are differentiated through the
//!   reparameterization `w = μ + exp(½·logvar)·ε`.
//! - With a [`PacBayesObjective`], the objective is
//!   `loss + sqrt(Δ_McA / 2)` and its gradient includes the penalty term.
//! - Under a [`PacBayesObjective`] the prior log-width is capped at
//!   [`PriorGrid::max_log_width`](crate::pac_bayes::penalty::PriorGrid::max_log_width)
//!   after every update, so the prior stays inside the rounding grid.
//! - [`Trainer::train_block`] runs `epochs_jit` epochs back to back. Blocks
//!   are a reporting unit only: since every random draw is keyed by epoch or
//!   iteration counters, any grouping yields the same parameters.
//!
//! Invariants & assumptions
//! ------------------------
//! - The trainer is the only writer of [`TrainState`]; a failed batch leaves
//!   the state untouched.
//! - Plateau decay is applied by the caller between blocks.
use crate::operators::{instance::ProblemBatch, traits::FixedPointStep};
use crate::pac_bayes::{
    bounds::PacBayesOptions,
    penalty::{mcallester_penalty, mcallester_penalty_grad},
};
use crate::predictor::{
    network::DenseLayer,
    params::{PredictorParameters, push_layers},
};
use crate::training::{
    options::TrainOptions,
    permutation::{epoch_permutation, noise_rng},
    state::TrainState,
    unroll::{UnrollSpec, loss_and_gradient},
};
use crate::evaluation::policy::Split;
use crate::workspace::errors::{L2wsError, L2wsResult};
use ndarray::Array1;
use std::time::Instant;

/// PAC-Bayes regularization of a stochastic predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacBayesObjective {
    pub options: PacBayesOptions,
    /// Training-set size `N` in the penalty.
    pub n_train: usize,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    /// Mean unrolled loss.
    pub loss: f64,
    /// Loss plus regularizer, the quantity differentiated.
    pub objective: f64,
    /// McAllester penalty when regularized.
    pub penalty: Option<f64>,
    pub failures: usize,
}

/// Outcome of an epoch block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStats {
    pub first_epoch: usize,
    pub epochs: usize,
    pub batch_losses: Vec<f64>,
    pub moving_average: Option<f64>,
    /// Wall-clock seconds per epoch.
    pub time_per_epoch: f64,
    pub failures: usize,
}

pub struct Trainer<'a> {
    operator: &'a dyn FixedPointStep,
    train: &'a ProblemBatch,
    options: &'a TrainOptions,
    pac_bayes: Option<PacBayesObjective>,
}

impl<'a> Trainer<'a> {
    /// # Errors
    /// [`L2wsError::EmptySplit`] for an empty training split.
    pub fn new(
        operator: &'a dyn FixedPointStep, train: &'a ProblemBatch, options: &'a TrainOptions,
        pac_bayes: Option<PacBayesObjective>,
    ) -> L2wsResult<Self> {
        if train.is_empty() {
            return Err(L2wsError::EmptySplit { split: Split::Train });
        }
        Ok(Self { operator, train, options, pac_bayes })
    }

    pub fn unroll_spec(&self) -> UnrollSpec {
        UnrollSpec {
            unrolls: self.options.schedule.train_unrolls,
            weighting: self.options.weighting,
            supervised: self.options.supervised,
        }
    }

    /// One Adam update on the training rows `indices`.
    ///
    /// # Errors
    /// Batch-level failures from the unroll, the penalty, or the optimizer.
    /// The state is unchanged on error.
    pub fn train_batch(&self, state: &mut TrainState, indices: &[usize]) -> L2wsResult<BatchStats> {
        let batch = self.train.select(indices);
        let ceiling = self.pac_bayes.map(|pac| pac.options.grid.max_log_width());
        let capped = ceiling
            .filter(|&max| state.params().prior_log_width().is_some_and(|w| w > max))
            .map(|max| state.params().clone().with_prior_log_width_at_most(max));
        let params = capped.as_ref().unwrap_or(state.params());
        let operator_params = params.operator_params().view();

        let noise = if params.is_stochastic() {
            Some(params.draw_noise(&mut noise_rng(self.options.seed, state.iteration()))?)
        } else {
            None
        };
        let layers = match &noise {
            Some(eps) => params.perturbed_layers(eps)?,
            None => params.mean_layers().to_vec(),
        };
        let g = loss_and_gradient(self.operator, &layers, operator_params, &batch, &self.unroll_spec())?;

        let mut grad = match (params, &noise) {
            (PredictorParameters::Stochastic { log_var, .. }, Some(eps)) => {
                stochastic_gradient(&g.layers, log_var, eps, &g.operator)
            }
            _ => {
                let mut flat = Vec::new();
                push_layers(&g.layers, &mut flat);
                flat.extend(g.operator.iter());
                Array1::from(flat)
            }
        };

        let mut objective = g.loss;
        let mut penalty = None;
        if let (Some(pac), true) = (&self.pac_bayes, params.is_stochastic()) {
            let opts = &pac.options;
            let pen = mcallester_penalty(params, pac.n_train, opts.delta, &opts.grid)?;
            let slack = (pen.total / 2.0).sqrt();
            objective += slack;
            if slack > 0.0 {
                let d_pen = mcallester_penalty_grad(params, pac.n_train, opts.delta, &opts.grid)?;
                grad = grad + d_pen / (4.0 * slack);
            }
            penalty = Some(pen.total);
        }
        if !objective.is_finite() {
            return Err(L2wsError::NonFiniteLoss { value: objective });
        }

        let (next_flat, next_adam) =
            state.adam().propose(&params.to_flat(), &grad, &self.options.adam, state.learning_rate())?;
        let mut next = params.with_flat(next_flat.view())?;
        if let Some(max) = ceiling {
            next = next.with_prior_log_width_at_most(max);
        }
        let failures = g.failures.len();
        state.commit(next, next_adam, g.loss);
        Ok(BatchStats { loss: g.loss, objective, penalty, failures })
    }

    /// All batches of the next epoch, in permutation order.
    ///
    /// # Errors
    /// The first failing batch; earlier batches stay committed.
    pub fn train_epoch(&self, state: &mut TrainState) -> L2wsResult<Vec<BatchStats>> {
        let n = self.train.len();
        let schedule = &self.options.schedule;
        let order = epoch_permutation(self.options.seed, state.epoch(), n);
        let size = schedule.effective_batch_size(n);
        let mut stats = Vec::with_capacity(schedule.batches_per_epoch(n));
        for b in 0..schedule.batches_per_epoch(n) {
            stats.push(self.train_batch(state, &order[b * size..(b + 1) * size])?);
        }
        state.finish_epoch();
        Ok(stats)
    }

    /// Up to `epochs_jit` epochs, stopping at the configured epoch count.
    ///
    /// # Errors
    /// The first failing batch.
    pub fn train_block(&self, state: &mut TrainState) -> L2wsResult<BlockStats> {
        let first_epoch = state.epoch();
        let epochs = self
            .options
            .schedule
            .epochs_jit
            .min(self.options.schedule.epochs.saturating_sub(first_epoch));
        let start = Instant::now();
        let mut batch_losses = Vec::new();
        let mut failures = 0;
        for _ in 0..epochs {
            for s in self.train_epoch(state)? {
                batch_losses.push(s.loss);
                failures += s.failures;
            }
        }
        let time_per_epoch = if epochs > 0 { start.elapsed().as_secs_f64() / epochs as f64 } else { 0.0 };
        Ok(BlockStats {
            first_epoch,
            epochs,
            batch_losses,
            moving_average: state.moving_average(),
            time_per_epoch,
            failures,
        })
    }

    /// Whether the configured epoch count has been reached.
    pub fn is_finished(&self, state: &TrainState) -> bool {
        state.epoch() >= self.options.schedule.epochs
    }
}

/// `[∂μ, ∂logvar, 0 (prior), ∂operator]` from the gradient with respect to
/// the sampled weights.
fn stochastic_gradient(
    d_weights: &[DenseLayer], log_var: &[DenseLayer], noise: &[DenseLayer], d_operator: &Array1<f64>,
) -> Array1<f64> {
    let d_log_var: Vec<DenseLayer> = d_weights
        .iter()
        .zip(log_var)
        .zip(noise)
        .map(|((g, v), e)| DenseLayer {
            weights: &g.weights * &e.weights * &v.weights.mapv(|lv| 0.5 * (0.5 * lv).exp()),
            bias: &g.bias * &e.bias * &v.bias.mapv(|lv| 0.5 * (0.5 * lv).exp()),
        })
        .collect();
    let mut flat = Vec::new();
    push_layers(d_weights, &mut flat);
    push_layers(&d_log_var, &mut flat);
    flat.push(0.0);
    flat.extend(d_operator.iter());
    Array1::from(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{
        dispatch::{SolverOperator, StaticProblemData},
        family::{AlgorithmFamily, ProxGradVariant},
    };
    use crate::predictor::network::init_layers;
    use crate::training::options::{BatchSchedule, LossWeighting};
    use ndarray::{Array2, array};

    // Scope
    // -----
    // Loss decrease on a small problem, block-grouping invariance, and the
    // PAC-Bayes regularizer on stochastic parameters.

    fn problem() -> (SolverOperator, ProblemBatch) {
        let a = array![[1.0, 0.3], [0.2, 1.0], [0.5, -0.5]];
        let op = SolverOperator::build(
            AlgorithmFamily::ProxGrad(ProxGradVariant::Plain),
            StaticProblemData::ProxGrad { a, lambda: 0.01, step: None, learned_steps: 0 },
        )
        .unwrap();
        let theta = Array2::from_shape_fn((16, 3), |(i, j)| ((i * 3 + j) as f64 * 0.37).sin());
        let batch = ProblemBatch::new(theta.clone(), theta.clone(), theta, None).unwrap();
        (op, batch)
    }

    fn options(epochs: usize, epochs_jit: usize) -> TrainOptions {
        TrainOptions {
            schedule: BatchSchedule::new(epochs, 4, 3, epochs_jit).unwrap(),
            weighting: LossWeighting::ConstantSum,
            ..TrainOptions::default()
        }
    }

    fn initial(op: &SolverOperator) -> PredictorParameters {
        PredictorParameters::deterministic(init_layers(&[3, 8, 2], 0.1, 3).unwrap(), op.init_learned_params())
            .unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Grouping epochs into blocks does not change the trained parameters.
    //
    // Given
    // -----
    // Four epochs as one block of four, and as four blocks of one.
    //
    // Expect
    // ------
    // Identical parameters, losses and counters.
    fn epoch_blocks_match_sequential_epochs() {
        // Arrange
        let (op, train) = problem();
        let fused_opts = options(4, 4);
        let single_opts = options(4, 1);
        let mut fused = TrainState::new(initial(&op), fused_opts.adam.learning_rate);
        let mut single = TrainState::new(initial(&op), single_opts.adam.learning_rate);

        // Act
        let t = Trainer::new(&op, &train, &fused_opts, None).unwrap();
        let block = t.train_block(&mut fused).unwrap();
        let t = Trainer::new(&op, &train, &single_opts, None).unwrap();
        while !t.is_finished(&single) {
            t.train_block(&mut single).unwrap();
        }

        // Assert
        assert_eq!(block.epochs, 4);
        assert_eq!(fused, single);
        assert_eq!(fused.iteration(), 16);
    }

    #[test]
    // Purpose
    // -------
    // Training lowers the batch loss.
    //
    // Given
    // -----
    // Thirty epochs with `lr = 1e-2`.
    //
    // Expect
    // ------
    // The last moving average is below the mean of the first four losses.
    fn training_reduces_loss() {
        let (op, train) = problem();
        let mut opts = options(30, 10);
        opts.adam.learning_rate = 1e-2;
        let mut state = TrainState::new(initial(&op), opts.adam.learning_rate);
        let t = Trainer::new(&op, &train, &opts, None).unwrap();
        while !t.is_finished(&state) {
            t.train_block(&mut state).unwrap();
        }
        let first: f64 = state.batch_losses()[..4].iter().sum::<f64>() / 4.0;
        assert!(state.moving_average().unwrap() < first);
    }

    #[test]
    // Purpose
    // -------
    // Stochastic parameters train under the PAC-Bayes objective and report
    // the penalty.
    //
    // Given
    // -----
    // A posterior around the initial weights, prior log-width −2, `N = 16`.
    //
    // Expect
    // ------
    // A positive penalty, objective above loss, and a moved prior width.
    fn stochastic_batches_include_penalty() {
        let (op, train) = problem();
        let opts = options(1, 1);
        let params = initial(&op).to_stochastic(-2.0);
        let mut state = TrainState::new(params, opts.adam.learning_rate);
        let pac = PacBayesObjective { options: PacBayesOptions::default(), n_train: 16 };
        let t = Trainer::new(&op, &train, &opts, Some(pac)).unwrap();
        let stats = t.train_batch(&mut state, &[0, 1, 2, 3]).unwrap();
        assert!(stats.penalty.unwrap() > 0.0);
        assert!(stats.objective > stats.loss);
        assert_ne!(state.params().prior_log_width(), Some(-2.0));
    }

    #[test]
    // Purpose
    // -------
    // A prior pushed past the grid ceiling is capped instead of aborting
    // training.
    //
    // Given
    // -----
    // A widely initialised posterior (scale 2) whose prior log-width starts
    // above `log c`, trained for 40 epochs at `lr = 5e-2`.
    //
    // Expect
    // ------
    // Every batch succeeds and the final prior log-width is at most
    // `log c − 1/b`.
    fn prior_width_stays_inside_grid() {
        // Arrange
        let (op, train) = problem();
        let mut opts = options(40, 10);
        opts.adam.learning_rate = 5e-2;
        let grid = PacBayesOptions::default().grid;
        let wide = PredictorParameters::deterministic(
            init_layers(&[3, 16, 2], 2.0, 11).unwrap(),
            op.init_learned_params(),
        )
        .unwrap()
        .to_stochastic(grid.c.ln() + 0.05);
        let mut state = TrainState::new(wide, opts.adam.learning_rate);
        let pac = PacBayesObjective { options: PacBayesOptions::default(), n_train: 16 };
        let t = Trainer::new(&op, &train, &opts, Some(pac)).unwrap();

        // Act
        while !t.is_finished(&state) {
            t.train_block(&mut state).unwrap();
        }

        // Assert
        let width = state.params().prior_log_width().unwrap();
        assert!(width <= grid.max_log_width() + 1e-15);
        assert!(width.is_finite());
    }
}
