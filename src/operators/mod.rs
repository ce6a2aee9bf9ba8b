//! operators — fixed-point solver operators behind one tagged interface.
//!
//! Purpose
//! -------
//! Provide the step functions that the trainer unrolls and the evaluation
//! engine iterates: proximal gradient (five variants), OSQP-style ADMM,
//! SCS-style homogeneous splitting, gradient descent, extragradient, and a
//! meta-learned regression step. Every family implements
//! [`FixedPointStep`] and is wrapped in the [`SolverOperator`] enum, built by
//! the factory [`SolverOperator::build`].
//!
//! Key behaviors
//! -------------
//! - `step(k, z, instance, params)` is deterministic and side-effect free.
//! - `residual(z, z')` is `‖z' − z‖₂`; `distance_to_optimum` is used when a
//!   ground-truth `z*` is available and the run is supervised.
//! - `vjp` pulls a cotangent back through one step to the iterate and to the
//!   learned operator parameters. Affine families and proximal gradient use
//!   closed forms, OSQP reuses its factorization, SCS uses finite
//!   differences.
//!
//! Invariants & assumptions
//! ------------------------
//! - Iterate, instance and parameter lengths are checked on every call; a
//!   mismatch is [`OperatorError::ShapeMismatch`] and never broadcast.
//! - A family that needs a factorization fails with
//!   [`OperatorError::Factorization`] or
//!   [`OperatorError::MissingFactorization`] instead of proceeding. These
//!   two are per-instance errors ([`OperatorError::is_per_instance`]).
//!
//! Conventions
//! -----------
//! - Iterate layouts: OSQP `(x, v)`, SCS `(x, y, τ)`, others the natural
//!   variable. Instance layouts: OSQP `(c, l, u)`, SCS `(c, b)`, regression
//!   `(x₁..x_s, y₁..y_s)`, others the linear term.
//! - Unroll step indices are 0-based.
//!
//! Testing notes
//! -------------
//! - Each family tests its fixed points and compares any closed-form adjoint
//!   against central differences.
//! - [`dispatch`] checks the residual contract across the whole closed set.

pub mod dispatch;
pub mod errors;
pub mod family;
pub mod gradient;
pub mod instance;
pub mod linalg;
pub mod maml;
pub mod osqp;
pub mod prox_grad;
pub mod scs;
pub mod traits;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::dispatch::{SolverOperator, StaticProblemData};
pub use self::errors::{OperatorError, OperatorResult};
pub use self::family::{AlgorithmFamily, ProxGradVariant};
pub use self::instance::{ProblemBatch, ProblemInstance, QpSystem};
pub use self::linalg::ConeSpec;
pub use self::traits::FixedPointStep;

pub mod prelude {
    pub use super::dispatch::{SolverOperator, StaticProblemData};
    pub use super::errors::{OperatorError, OperatorResult};
    pub use super::family::{AlgorithmFamily, ProxGradVariant};
    pub use super::instance::{ProblemBatch, ProblemInstance, QpSystem};
    pub use super::linalg::ConeSpec;
    pub use super::traits::FixedPointStep;
}
