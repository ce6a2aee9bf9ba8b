//! minimizer — argmin-powered L-BFGS minimization of flattened objectives.
//!
//! Purpose
//! -------
//! Provide a high-level, Argmin-backed layer for **minimizing** a scalar
//! objective `c(θ)` over a flattened parameter vector. Callers implement
//! [`Objective`] and invoke [`minimize`]; the predictor uses this for
//! full-batch supervised pretraining.
//!
//! Key behaviors
//! -------------
//! - Convert user objectives into Argmin cost/gradient problems via
//!   [`adapter::ArgMinAdapter`], with finite-difference fallbacks when no
//!   analytic gradient exists.
//! - Select an L-BFGS solver via [`builders`] based on [`LineSearcher`] and
//!   execute it with [`run::run_lbfgs`].
//! - Expose [`finite_diff::central_gradient`] for other layers that need a
//!   derivative of a fallible scalar function.
//!
//! Invariants & assumptions
//! ------------------------
//! - [`Objective::value`] and [`Objective::grad`] report invalid inputs as
//!   [`OptError`](crate::optimization::errors::OptError) values, not panics.
//! - Configuration types are validated on construction.
//!
//! Conventions
//! -----------
//! - Parameters live in a flat [`Theta`] (`Array1<f64>`); mapping to
//!   structured parameters happens in the caller.
//! - The objective is minimized as-is; no sign flips.
//!
//! Testing notes
//! -------------
//! - Unit tests cover gradient dispatch in [`adapter`], solver wiring in
//!   [`builders`], finite differences, validation, and full runs in [`api`].

pub mod adapter;
pub mod api;
pub mod builders;
pub mod finite_diff;
pub mod run;
pub mod traits;
pub mod types;
pub mod validation;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::api::minimize;
pub use self::traits::{LineSearcher, MinimizeOptions, Objective, OptimOutcome, Tolerances};
pub use self::types::{Cost, DEFAULT_LBFGS_MEM, FnEvalMap, Grad, Theta};

pub mod prelude {
    pub use super::api::minimize;
    pub use super::traits::{LineSearcher, MinimizeOptions, Objective, OptimOutcome, Tolerances};
    pub use super::types::{Cost, Grad, Theta};
}
