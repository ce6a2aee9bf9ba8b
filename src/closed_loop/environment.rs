//! Closed-loop environment interface and discretization.
//!
//! The environment owns the physics: it linearizes continuous dynamics
//! around the current operating point, supplies the reference window,
//! turns a discretized model into a QP `(P, A, c, l, u)`, reads the first
//! control out of a QP iterate, and advances the true system.
use crate::workspace::errors::L2wsResult;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Continuous-time linearization `ẋ ≈ Ac·x + Bc·u + drift` around
/// `(x0, u0)`, where `drift` is `ẋ` evaluated at `(x0, u0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization {
    pub ac: Array2<f64>,
    pub bc: Array2<f64>,
    pub drift: Array1<f64>,
}

/// Forward-Euler discretization `x⁺ = Ad·x + Bd·u + cd`.
#[derive(Debug, Clone, PartialEq)]
pub struct Discretization {
    pub ad: Array2<f64>,
    pub bd: Array2<f64>,
    pub cd: Array1<f64>,
}

impl Discretization {
    /// `Ad = I + Ac·dt`, `Bd = Bc·dt`, `cd = (drift − Ac·x0 − Bc·u0)·dt`.
    pub fn euler(lin: &Linearization, x0: ArrayView1<'_, f64>, u0: ArrayView1<'_, f64>, dt: f64) -> Self {
        let mut ad = &lin.ac * dt;
        ad.diag_mut().mapv_inplace(|d| d + 1.0);
        let bd = &lin.bc * dt;
        let cd = (&lin.drift - &lin.ac.dot(&x0) - &lin.bc.dot(&u0)) * dt;
        Self { ad, bd, cd }
    }
}

/// QP in OSQP form: `min ½xᵀPx + cᵀx  s.t.  l ≤ Ax ≤ u`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalQp {
    pub p: Array2<f64>,
    pub a: Array2<f64>,
    pub c: Array1<f64>,
    pub l: Array1<f64>,
    pub u: Array1<f64>,
}

impl CanonicalQp {
    /// Instance vector `(c, l, u)`.
    pub fn instance_vector(&self) -> Array1<f64> {
        self.c.iter().chain(self.l.iter()).chain(self.u.iter()).copied().collect()
    }
}

/// Collaborator supplying dynamics, references and QP construction.
pub trait ClosedLoopEnvironment {
    fn state_dim(&self) -> usize;

    fn control_dim(&self) -> usize;

    /// Control period.
    fn dt(&self) -> f64;

    /// # Errors
    /// Environment-specific failures.
    fn linearize(&self, x0: ArrayView1<'_, f64>, u0: ArrayView1<'_, f64>) -> L2wsResult<Linearization>;

    /// Reference trajectory window starting at control step `step`, one
    /// row per reference channel and one column per future step.
    fn reference_window(&self, step: usize) -> Array2<f64>;

    /// # Errors
    /// Environment-specific failures.
    fn canonicalize(
        &self, reference: ArrayView2<'_, f64>, x0: ArrayView1<'_, f64>, model: &Discretization,
        u_prev: ArrayView1<'_, f64>,
    ) -> L2wsResult<CanonicalQp>;

    /// First-step control action encoded in a QP iterate.
    fn extract_control(&self, z: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Apply `u` for one period and return the next state.
    ///
    /// # Errors
    /// Environment-specific failures.
    fn advance(&mut self, x: ArrayView1<'_, f64>, u: ArrayView1<'_, f64>) -> L2wsResult<Array1<f64>>;

    /// Shift a previous-step iterate forward one step to warm start the
    /// next QP.
    fn shift_solution(&self, z: ArrayView1<'_, f64>) -> Array1<f64>;
}
