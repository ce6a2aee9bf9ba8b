//! PAC-Bayes bound calculator.
//!
//! Purpose
//! -------
//! Certify, with confidence `1 − δ`, what fraction of future problem
//! instances a trained warm-start predictor solves to a given accuracy
//! within a given iteration budget.
//!
//! Key behaviors
//! -------------
//! - [`kl`]: binary KL and its numerical inverse (argmin Brent root find),
//!   with a per-pass memo table.
//! - [`penalty`]: McAllester complexity penalty of a Gaussian posterior
//!   against an isotropic Gaussian prior, its gradient for training, and the
//!   confidence-only budgets (no learning, sample convergence).
//! - [`bounds`]: single-budget and composed certificates, Pinsker
//!   fallback, and the posterior-width sweep bound.
//!
//! Invariants & assumptions
//! ------------------------
//! - Certified values are in `[0, 1]` and never exceed the empirical
//!   fraction.
//! - An infeasible inversion yields a certified value of zero, never an
//!   error.
//! - Only network weights enter the KL; learned operator parameters are
//!   deterministic.
//!
//! Conventions
//! -----------
//! - Bounds are stated on solved fractions; internally the inversion runs on
//!   the failure rate `1 − p̂`.
//! - The prior variance is `λ = exp(prior_log_width)`.
//!
//! Downstream usage
//! ----------------
//! - Training adds `sqrt(penalty/2)` to the loss of stochastic predictors.
//! - The workspace certifies every solved-fraction and convergence-rate
//!   table row, and runs the finalization pass.
//!
//! Testing notes
//! -------------
//! - Inverse-KL edge cases (`c = 0`, large budgets, `p ≥ q`) and the
//!   penalty gradient against central differences.

pub mod bounds;
pub mod errors;
pub mod kl;
pub mod penalty;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::bounds::{CertifiedFraction, Composition, PacBayesOptions};
pub use self::errors::{BoundError, BoundResult};
pub use self::kl::{KlInverseCache, binary_kl, invert_kl};
pub use self::penalty::{McAllesterPenalty, PriorGrid};

pub mod prelude {
    pub use super::bounds::{
        CertifiedFraction, Composition, PacBayesOptions, certify, certify_all, certify_final,
    };
    pub use super::errors::{BoundError, BoundResult};
    pub use super::kl::{KlInverseCache, invert_kl};
    pub use super::penalty::{McAllesterPenalty, PriorGrid, mcallester_penalty};
}
