//! evaluation — residual trajectories, baselines, and derived tables.
//!
//! Purpose
//! -------
//! Measure how quickly the solver converges from a given set of initial
//! iterates, for learned predictions and for fixed baselines, and reduce
//! the residual trajectories to the summaries that are reported and
//! certified.
//!
//! Key behaviors
//! -------------
//! - [`policy`]: initialization policies (learned, cold start, nearest
//!   neighbor, previous solution) and the `Split` tag.
//! - [`engine`]: sub-batched, bounded-memory evaluation with per-instance
//!   failure isolation and divergence records.
//! - [`metrics`]: solved fractions, convergence-rate fractions,
//!   iterations-to-accuracy, percent reduction, percentiles.
//! - [`tables`]: append-only solved-fraction and convergence-rate tables
//!   with certified counterparts.
//!
//! Invariants & assumptions
//! ------------------------
//! - Results are concatenated in instance order regardless of sub-batch
//!   size.
//! - Failed instances are NaN rows; they count as unsolved in every
//!   fraction and are skipped in means and percentiles.
//!
//! Conventions
//! -----------
//! - Residual column `k − 1` is the residual after `k` steps; distance
//!   matrices carry an extra leading column for `z₀`.
//! - Policy labels: `learned`, `no_train`, `nearest_neighbor`, `prev_sol`.
//!
//! Testing notes
//! -------------
//! - Sub-batch invariance, NaN isolation and monotonicity of solved
//!   fractions for contractive operators are unit-tested in [`engine`].

pub mod engine;
pub mod metrics;
pub mod policy;
pub mod tables;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::engine::{Divergence, EvalOptions, EvaluationEngine, EvaluationResult};
pub use self::policy::{InitPolicy, Split, WarmStartSources};
pub use self::tables::{CertifiedCurve, ConvergenceRateTable, FracSolvedTable};

pub mod prelude {
    pub use super::engine::{EvalOptions, EvaluationEngine, EvaluationResult};
    pub use super::metrics::{convergence_rates, frac_solved, iterations_to_accuracy};
    pub use super::policy::{InitPolicy, Split, WarmStartSources};
    pub use super::tables::{ConvergenceRateTable, FracSolvedTable};
}
