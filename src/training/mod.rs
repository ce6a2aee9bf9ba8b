//! training — unrolled training of warm-start predictors.
//!
//! Purpose
//! -------
//! Fit predictor parameters so that `K` solver steps from the predicted
//! initial iterate end close to a fixed point (or to the known optimum).
//!
//! Key behaviors
//! -------------
//! - [`options`]: validated batch schedule, loss weighting, plateau decay.
//! - [`unroll`]: differentiable K-step unroll and batch gradient.
//! - [`trainer`]: epochs, batches, stochastic sampling, PAC-Bayes
//!   regularization, Adam updates.
//! - [`pretrain`]: supervised regression onto `z*` (L-BFGS or Adam).
//! - [`state`]: [`TrainState`](state::TrainState) with atomic commits, loss
//!   history, and plateau tracking.
//!
//! Invariants & assumptions
//! ------------------------
//! - All randomness is keyed by `(seed, epoch)` or `(seed, iteration)`;
//!   repeated runs and different epoch groupings give identical results.
//! - Per-instance numerical failures are skipped; batch-level failures abort
//!   without touching the state.
//!
//! Conventions
//! -----------
//! - Unroll steps are 0-based inside operators and 1-based in losses
//!   (`z_k` is the iterate after `k` steps).
//!
//! Downstream usage
//! ----------------
//! - The workspace owns the [`TrainState`](state::TrainState), calls
//!   [`Trainer::train_block`](trainer::Trainer::train_block) in a loop, and
//!   applies plateau decay and evaluation between blocks.
//!
//! Testing notes
//! -------------
//! - Unroll gradients are compared with central differences.
//! - Block grouping is checked for exact equality with single-epoch blocks.

pub mod options;
pub mod permutation;
pub mod pretrain;
pub mod state;
pub mod trainer;
pub mod unroll;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::options::{BatchSchedule, LossWeighting, PlateauDecay, TrainOptions};
pub use self::pretrain::{PretrainMethod, PretrainReport, pretrain};
pub use self::state::TrainState;
pub use self::trainer::{BatchStats, BlockStats, PacBayesObjective, Trainer};

pub mod prelude {
    pub use super::options::{BatchSchedule, LossWeighting, PlateauDecay, TrainOptions};
    pub use super::pretrain::{PretrainMethod, pretrain};
    pub use super::state::TrainState;
    pub use super::trainer::{PacBayesObjective, Trainer};
}
