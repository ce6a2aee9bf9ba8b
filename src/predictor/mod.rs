//! predictor — warm-start predictor, its parameters, and normalization.
//!
//! Purpose
//! -------
//! Map a normalized problem-parameter vector to an initial solver iterate.
//! The predictor is a ReLU MLP whose weights are either deterministic or a
//! diagonal Gaussian posterior with a learned prior width (PAC-Bayes
//! training). Learned operator parameters ride along in the same value.
//!
//! Key behaviors
//! -------------
//! - [`normalization::Normalizer`]: per-dimension mean/std, fit on the
//!   training split only and frozen afterwards.
//! - [`network`]: dense layers, batched forward pass, and backpropagation.
//! - [`params::PredictorParameters`]: the two parameter shapes, flat
//!   conversion for optimizers, posterior sampling, weight statistics.
//! - [`checkpoint::Checkpoint`]: named-array export with bit-exact JSON.
//!
//! Invariants & assumptions
//! ------------------------
//! - Mean and log-variance trees share one structure whenever both exist.
//! - Every value is finite; constructors and `with_flat` reject NaN/∞.
//!
//! Downstream usage
//! ----------------
//! - The trainer differentiates through [`network::Mlp::backward`] and
//!   updates parameters through their flat form.
//! - Evaluation, nearest-neighbour lookup and the closed loop all feed
//!   inputs through the same frozen [`normalization::Normalizer`].

pub mod checkpoint;
pub mod errors;
pub mod network;
pub mod normalization;
pub mod params;

pub use self::checkpoint::Checkpoint;
pub use self::errors::{PredictorError, PredictorResult};
pub use self::network::{DenseLayer, Mlp, init_layers};
pub use self::normalization::Normalizer;
pub use self::params::PredictorParameters;

pub mod prelude {
    pub use super::checkpoint::Checkpoint;
    pub use super::errors::{PredictorError, PredictorResult};
    pub use super::network::{DenseLayer, Mlp, init_layers};
    pub use super::normalization::Normalizer;
    pub use super::params::PredictorParameters;
}
