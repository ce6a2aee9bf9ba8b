//! optimization — optimizer state, L-BFGS minimization, and error surface.
//!
//! Purpose
//! -------
//! Provide the numerical optimization layer used by training: an Adam state
//! for mini-batch updates of the predictor, an Argmin-backed L-BFGS
//! minimizer for full-batch pretraining, and finite-difference helpers used
//! wherever an analytic derivative is unavailable.
//!
//! Key behaviors
//! -------------
//! - [`adam`]: validated hyperparameters and a side-effect-free `propose`
//!   step returning `(params, state)` to be committed together.
//! - [`minimizer`]: `Objective` trait, L-BFGS builders/runner, finite
//!   differences, validation.
//! - Normalize configuration issues, numerical failures, and backend solver
//!   errors into [`errors::OptError`] with the alias `OptResult<T>`.
//!
//! Conventions
//! -----------
//! - Parameters and gradients are flat `ndarray::Array1<f64>` vectors.
//! - This module performs no logging; the workspace reports progress.

pub mod adam;
pub mod errors;
pub mod minimizer;

pub mod prelude {
    pub use super::adam::{AdamOptions, AdamState};
    pub use super::errors::{OptError, OptResult};
    pub use super::minimizer::prelude::*;
}
