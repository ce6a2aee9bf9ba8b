//! closed_loop — receding-horizon control with warm-started QP solves.
//!
//! Purpose
//! -------
//! Simulate a control loop in which each step solves a freshly linearized
//! QP under a fixed iteration budget, comparing how warm-start policies
//! (learned, cold, nearest neighbor, shifted previous solution) affect
//! solution quality and the trajectory of the true system.
//!
//! Key behaviors
//! -------------
//! - [`environment`]: the [`ClosedLoopEnvironment`] trait supplied by the
//!   caller plus forward-Euler discretization.
//! - [`rollout`]: the per-step loop, with degraded steps logged and
//!   recorded instead of aborting.
//!
//! Invariants & assumptions
//! ------------------------
//! - Per-step systems are factored once and never shared across steps.
//! - Normalization statistics are the frozen training ones.

pub mod environment;
pub mod rollout;

pub use self::environment::{CanonicalQp, ClosedLoopEnvironment, Discretization, Linearization};
pub use self::rollout::{ClosedLoopOptions, RolloutContext, RolloutResult, StepRecord, run_rollout};
