//! Training configuration.
//!
//! Every option type is validated on construction; the trainer assumes the
//! invariants listed on each type.
use crate::optimization::adam::AdamOptions;
use crate::workspace::errors::{L2wsError, L2wsResult};

/// Epoch and batch layout of a training run.
///
/// Invariants
/// ----------
/// - `epochs`, `batch_size`, `train_unrolls`, `epochs_jit` are all `≥ 1`.
/// - `epochs_jit` only groups epochs for reporting; grouping never changes
///   the sequence of updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSchedule {
    pub epochs: usize,
    pub batch_size: usize,
    pub train_unrolls: usize,
    pub epochs_jit: usize,
}

impl BatchSchedule {
    /// # Errors
    /// [`L2wsError::InvalidCount`] for any zero count.
    pub fn new(epochs: usize, batch_size: usize, train_unrolls: usize, epochs_jit: usize) -> L2wsResult<Self> {
        for (name, value) in [
            ("epochs", epochs),
            ("batch_size", batch_size),
            ("train_unrolls", train_unrolls),
            ("epochs_jit", epochs_jit),
        ] {
            if value == 0 {
                return Err(L2wsError::InvalidCount { name, value, reason: "must be >= 1" });
            }
        }
        Ok(Self { epochs, batch_size, train_unrolls, epochs_jit })
    }

    /// Batches per epoch: `⌊n / batch_size⌋`, or one batch holding all
    /// instances when `n < batch_size`.
    pub fn batches_per_epoch(&self, n: usize) -> usize {
        if n == 0 {
            0
        } else {
            (n / self.batch_size).max(1)
        }
    }

    /// Instances per batch for a split of size `n`.
    pub fn effective_batch_size(&self, n: usize) -> usize {
        self.batch_size.min(n)
    }
}

impl Default for BatchSchedule {
    fn default() -> Self {
        Self { epochs: 10, batch_size: 100, train_unrolls: 5, epochs_jit: 1 }
    }
}

/// How per-step terms are weighted in the per-instance loss.
///
/// Step `k` runs over `1..=K`. For unsupervised training the term is the
/// fixed-point residual `‖z_k − z_{k−1}‖`; for supervised training it is
/// `‖z_k − z*‖`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LossWeighting {
    /// Only the term after the last step.
    FinalStep,
    /// Every term with weight one.
    #[default]
    ConstantSum,
    /// Term `k` weighted by `decay^(K − k)`, so later steps weigh most.
    DecreasingSum { decay: f64 },
}

impl LossWeighting {
    /// # Errors
    /// [`L2wsError::InvalidOption`] unless `0 < decay ≤ 1`.
    pub fn decreasing(decay: f64) -> L2wsResult<Self> {
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(L2wsError::InvalidOption { name: "decay", value: decay, reason: "must lie in (0, 1]" });
        }
        Ok(LossWeighting::DecreasingSum { decay })
    }

    /// Weights for steps `1..=k_total`, in order.
    pub fn weights(&self, k_total: usize) -> Vec<f64> {
        (1..=k_total)
            .map(|k| match self {
                LossWeighting::FinalStep => {
                    if k == k_total {
                        1.0
                    } else {
                        0.0
                    }
                }
                LossWeighting::ConstantSum => 1.0,
                LossWeighting::DecreasingSum { decay } => decay.powi((k_total - k) as i32),
            })
            .collect()
    }
}

/// Learning-rate decay when the moving-average loss stops improving.
///
/// The moving average is checked once per epoch block; after `patience`
/// blocks without a new minimum the learning rate is multiplied by
/// `decay_factor`. A factor of one disables decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateauDecay {
    pub decay_factor: f64,
    pub patience: usize,
}

impl PlateauDecay {
    /// # Errors
    /// [`L2wsError::InvalidOption`] unless `0 < decay_factor ≤ 1`;
    /// [`L2wsError::InvalidCount`] for zero patience.
    pub fn new(decay_factor: f64, patience: usize) -> L2wsResult<Self> {
        if !(decay_factor > 0.0 && decay_factor <= 1.0) {
            return Err(L2wsError::InvalidOption {
                name: "decay_factor",
                value: decay_factor,
                reason: "must lie in (0, 1]",
            });
        }
        if patience == 0 {
            return Err(L2wsError::InvalidCount { name: "patience", value: 0, reason: "must be >= 1" });
        }
        Ok(Self { decay_factor, patience })
    }

    pub fn disabled() -> Self {
        Self { decay_factor: 1.0, patience: usize::MAX }
    }
}

impl Default for PlateauDecay {
    fn default() -> Self {
        Self { decay_factor: 0.5, patience: 5 }
    }
}

/// TrainOptions — configuration of the unrolled trainer.
///
/// Purpose
/// -------
/// Bundle the batch schedule, loss definition, optimizer settings, decay
/// policy, and seed of a training run.
///
/// Fields
/// ------
/// - `schedule`: [`BatchSchedule`] epochs, batch size, unroll depth, and
///   epoch-block size.
/// - `weighting`: [`LossWeighting`] per-step loss weights.
/// - `supervised`: measure distance to `z*` instead of fixed-point residuals.
/// - `adam`: [`AdamOptions`] with the initial learning rate.
/// - `decay`: [`PlateauDecay`] policy on the moving-average loss.
/// - `seed`: base seed of epoch permutations and posterior noise.
/// - `eval_every_epochs`: evaluation cadence used by the workspace.
///
/// Invariants
/// ----------
/// - Components are validated by their own constructors; this type adds
///   only the `eval_every_epochs ≥ 1` check.
/// - Two runs with equal options and data produce identical parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub schedule: BatchSchedule,
    pub weighting: LossWeighting,
    pub supervised: bool,
    pub adam: AdamOptions,
    pub decay: PlateauDecay,
    pub seed: u64,
    pub eval_every_epochs: usize,
}

impl TrainOptions {
    /// # Errors
    /// [`L2wsError::InvalidCount`] for `eval_every_epochs == 0`.
    pub fn new(
        schedule: BatchSchedule, weighting: LossWeighting, supervised: bool, adam: AdamOptions,
        decay: PlateauDecay, seed: u64, eval_every_epochs: usize,
    ) -> L2wsResult<Self> {
        if eval_every_epochs == 0 {
            return Err(L2wsError::InvalidCount { name: "eval_every_epochs", value: 0, reason: "must be >= 1" });
        }
        Ok(Self { schedule, weighting, supervised, adam, decay, seed, eval_every_epochs })
    }

    /// Re-run every component constructor on options built from fields.
    ///
    /// # Errors
    /// The first violated setting.
    pub fn validated(self) -> L2wsResult<Self> {
        let BatchSchedule { epochs, batch_size, train_unrolls, epochs_jit } = self.schedule;
        let AdamOptions { learning_rate, beta1, beta2, epsilon } = self.adam;
        Self::new(
            BatchSchedule::new(epochs, batch_size, train_unrolls, epochs_jit)?,
            self.weighting,
            self.supervised,
            AdamOptions::new(learning_rate, beta1, beta2, epsilon)?,
            PlateauDecay::new(self.decay.decay_factor, self.decay.patience)?,
            self.seed,
            self.eval_every_epochs,
        )
    }
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            schedule: BatchSchedule::default(),
            weighting: LossWeighting::default(),
            supervised: false,
            adam: AdamOptions::default(),
            decay: PlateauDecay::default(),
            seed: 0,
            eval_every_epochs: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Scope
    // -----
    // Validation of schedule/decay settings, batch counting, and loss
    // weights.

    #[test]
    // Purpose
    // -------
    // Zero counts are rejected and batch counting floors.
    //
    // Given
    // -----
    // `batch_size = 0`; a valid schedule with `batch_size = 4`.
    //
    // Expect
    // ------
    // `InvalidCount`; 10 instances give 2 batches, 3 instances give 1
    // batch of 3.
    fn schedule_validates_and_counts_batches() {
        assert!(matches!(BatchSchedule::new(1, 0, 1, 1), Err(L2wsError::InvalidCount { name: "batch_size", .. })));
        let s = BatchSchedule::new(2, 4, 3, 1).unwrap();
        assert_eq!(s.batches_per_epoch(10), 2);
        assert_eq!(s.batches_per_epoch(3), 1);
        assert_eq!(s.effective_batch_size(3), 3);
    }

    #[test]
    // Purpose
    // -------
    // Each weighting produces the documented weights.
    //
    // Given
    // -----
    // `K = 3` and decay 0.5.
    //
    // Expect
    // ------
    // `[0, 0, 1]`, `[1, 1, 1]`, `[0.25, 0.5, 1]`.
    fn weightings_produce_expected_weights() {
        assert_eq!(LossWeighting::FinalStep.weights(3), vec![0.0, 0.0, 1.0]);
        assert_eq!(LossWeighting::ConstantSum.weights(3), vec![1.0, 1.0, 1.0]);
        let w = LossWeighting::decreasing(0.5).unwrap().weights(3);
        assert_abs_diff_eq!(w[0], 0.25);
        assert_abs_diff_eq!(w[2], 1.0);
        assert!(LossWeighting::decreasing(1.5).is_err());
        assert!(PlateauDecay::new(0.0, 3).is_err());
    }

    #[test]
    // Purpose
    // -------
    // Options assembled from public fields are revalidated as a whole.
    //
    // Given
    // -----
    // Struct literals with `eval_every_epochs = 0`, with a zero batch
    // size, and the defaults.
    //
    // Expect
    // ------
    // `InvalidCount` naming the offending field; the defaults pass.
    fn literal_options_are_revalidated() {
        let no_eval = TrainOptions { eval_every_epochs: 0, ..TrainOptions::default() };
        assert!(matches!(no_eval.validated(), Err(L2wsError::InvalidCount { name: "eval_every_epochs", .. })));
        let empty_batch = TrainOptions {
            schedule: BatchSchedule { batch_size: 0, ..BatchSchedule::default() },
            ..TrainOptions::default()
        };
        assert!(matches!(empty_batch.validated(), Err(L2wsError::InvalidCount { name: "batch_size", .. })));
        assert_eq!(TrainOptions::default().validated().unwrap(), TrainOptions::default());
    }
}
