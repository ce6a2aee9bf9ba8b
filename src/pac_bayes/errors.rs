//! Errors for PAC-Bayes penalties and bound inversion.
//!
//! [`BoundError::Infeasible`] is not fatal: callers report a certified
//! fraction of zero for that entry and keep going.

/// Result alias for bound computations.
pub type BoundResult<T> = Result<T, BoundError>;

#[derive(Debug, Clone, PartialEq)]
pub enum BoundError {
    // ---- Inversion ----
    /// No `p` satisfies the KL budget (negative/NaN budget, `q ∉ [0, 1]`).
    Infeasible { q: f64, budget: f64, reason: &'static str },

    /// The root finder failed to converge or rejected its bracket.
    RootFind { text: String },

    // ---- Configuration ----
    /// Confidence level must lie in `(0, 1)`.
    InvalidDelta { name: &'static str, value: f64 },

    /// Sample or training-set counts must be positive.
    InvalidCount { name: &'static str, value: usize },

    /// Prior rounding constants must satisfy `c > 0`, `b > 0`.
    InvalidPriorGrid { c: f64, b: f64 },

    /// Prior variance must lie strictly below the grid ceiling `c`.
    PriorOutOfRange { prior: f64, c: f64 },

    // ---- Inputs ----
    /// Empirical fractions must be in `[0, 1]`.
    InvalidFraction { value: f64 },

    /// The complexity penalty evaluated to NaN or ∞.
    NonFinitePenalty { value: f64 },

    /// The penalty needs a stochastic predictor.
    DeterministicParameters,
}

impl std::error::Error for BoundError {}

impl std::fmt::Display for BoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Inversion ----
            BoundError::Infeasible { q, budget, reason } => {
                write!(f, "Inverse KL infeasible for q = {q}, budget = {budget}: {reason}")
            }
            BoundError::RootFind { text } => write!(f, "Inverse KL root find failed: {text}"),

            // ---- Configuration ----
            BoundError::InvalidDelta { name, value } => {
                write!(f, "Invalid confidence {name} = {value}: must lie in (0, 1)")
            }
            BoundError::InvalidCount { name, value } => {
                write!(f, "Invalid {name} = {value}: must be >= 1")
            }
            BoundError::InvalidPriorGrid { c, b } => {
                write!(f, "Invalid prior grid constants c = {c}, b = {b}: both must be > 0")
            }
            BoundError::PriorOutOfRange { prior, c } => {
                write!(f, "Prior variance {prior} must lie in (0, {c})")
            }

            // ---- Inputs ----
            BoundError::InvalidFraction { value } => {
                write!(f, "Empirical fraction {value} must lie in [0, 1]")
            }
            BoundError::NonFinitePenalty { value } => {
                write!(f, "Complexity penalty is not finite: {value}")
            }
            BoundError::DeterministicParameters => {
                write!(f, "McAllester penalty requires stochastic predictor parameters")
            }
        }
    }
}

#[cfg(feature = "python-bindings")]
impl From<BoundError> for pyo3::PyErr {
    fn from(err: BoundError) -> pyo3::PyErr {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
