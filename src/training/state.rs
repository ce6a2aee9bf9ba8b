//! Mutable training state.
//!
//! [`TrainState`] owns the predictor parameters and the Adam moments. Both
//! are replaced together in [`TrainState::commit`], so after every completed
//! batch the state is consistent and resumable; readers never see
//! parameters from one step paired with moments from another.
use crate::optimization::adam::AdamState;
use crate::predictor::params::PredictorParameters;
use crate::training::options::PlateauDecay;

/// Number of recent batch losses in the moving average.
pub const MOVING_AVERAGE_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainState {
    params: PredictorParameters,
    adam: AdamState,
    epoch: usize,
    iteration: usize,
    batch_losses: Vec<f64>,
    learning_rate: f64,
    best_average: f64,
    stale_blocks: usize,
}

impl TrainState {
    /// Fresh state with zeroed optimizer moments.
    pub fn new(params: PredictorParameters, learning_rate: f64) -> Self {
        let adam = AdamState::new(params.to_flat().len());
        Self {
            params,
            adam,
            epoch: 0,
            iteration: 0,
            batch_losses: Vec::new(),
            learning_rate,
            best_average: f64::INFINITY,
            stale_blocks: 0,
        }
    }

    pub fn params(&self) -> &PredictorParameters {
        &self.params
    }

    pub fn adam(&self) -> &AdamState {
        &self.adam
    }

    /// Completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Completed batches.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn batch_losses(&self) -> &[f64] {
        &self.batch_losses
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Mean of the last [`MOVING_AVERAGE_WINDOW`] batch losses.
    pub fn moving_average(&self) -> Option<f64> {
        if self.batch_losses.is_empty() {
            return None;
        }
        let start = self.batch_losses.len().saturating_sub(MOVING_AVERAGE_WINDOW);
        let tail = &self.batch_losses[start..];
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }

    /// Install new parameters and optimizer state as one unit.
    pub(crate) fn commit(&mut self, params: PredictorParameters, adam: AdamState, loss: f64) {
        self.params = params;
        self.adam = adam;
        self.batch_losses.push(loss);
        self.iteration += 1;
    }

    pub(crate) fn finish_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Replace the parameters (e.g. after pretraining or when switching to a
    /// posterior) and restart the optimizer moments.
    pub fn reset_params(&mut self, params: PredictorParameters) {
        self.adam = AdamState::new(params.to_flat().len());
        self.params = params;
    }

    /// Feed the current moving average to the plateau policy; returns `true`
    /// when the learning rate was decayed.
    pub fn observe_plateau(&mut self, decay: &PlateauDecay) -> bool {
        let Some(avg) = self.moving_average() else {
            return false;
        };
        if avg < self.best_average {
            self.best_average = avg;
            self.stale_blocks = 0;
            return false;
        }
        self.stale_blocks += 1;
        if self.stale_blocks >= decay.patience && decay.decay_factor < 1.0 {
            self.learning_rate *= decay.decay_factor;
            self.stale_blocks = 0;
            return true;
        }
        false
    }
}
