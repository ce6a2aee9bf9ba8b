//! minimizer::types — shared numeric aliases and solver wiring.
//!
//! Purpose
//! -------
//! Centralize the numeric types and L-BFGS aliases used by the minimizer so
//! the rest of the optimization code stays agnostic to `ndarray` and Argmin
//! generics.
//!
//! Conventions
//! -----------
//! - `Theta` is a flattened parameter vector (for the predictor this is the
//!   concatenation produced by `PredictorParameters::to_flat`).
//! - `Cost` is the scalar objective being **minimized**; there is no sign
//!   flip anywhere in this layer.
//! - This module defines aliases and constants only; behavior is exercised by
//!   the tests of the surrounding modules.
use argmin::solver::{
    linesearch::{HagerZhangLineSearch, MoreThuenteLineSearch},
    quasinewton::LBFGS,
};
use ndarray::Array1;
use std::collections::HashMap;

/// Flattened parameter vector `θ`.
pub type Theta = Array1<f64>;

/// Gradient `∇c(θ)`, same shape as [`Theta`].
pub type Grad = Array1<f64>;

/// Scalar objective value `c(θ)`.
pub type Cost = f64;

/// Function-evaluation counters as reported by the solver.
///
/// Maps counter names (e.g., `"cost_count"`) to counts.
pub type FnEvalMap = HashMap<String, u64>;

/// Default history size (`m`) for L-BFGS runs.
pub const DEFAULT_LBFGS_MEM: usize = 7;

/// Hager–Zhang line search specialized to this crate’s numeric types.
pub type HagerZhangLS = HagerZhangLineSearch<Theta, Grad, Cost>;

/// More–Thuente line search specialized to this crate’s numeric types.
pub type MoreThuenteLS = MoreThuenteLineSearch<Theta, Grad, Cost>;

/// L-BFGS solver wired to the Hager–Zhang line search.
pub type LbfgsHagerZhang = LBFGS<HagerZhangLS, Theta, Grad, Cost>;

/// L-BFGS solver wired to the More–Thuente line search.
pub type LbfgsMoreThuente = LBFGS<MoreThuenteLS, Theta, Grad, Cost>;
