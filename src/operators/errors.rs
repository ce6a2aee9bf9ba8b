//! Errors raised by fixed-point operators and their factory.
//!
//! [`OperatorError::Factorization`] is per-instance: callers evaluating a
//! batch record it against the instance and keep going. Shape and
//! configuration errors are fatal for the batch.
use crate::operators::family::AlgorithmFamily;
use crate::optimization::errors::OptError;

/// Result alias for operator construction and stepping.
pub type OperatorResult<T> = Result<T, OperatorError>;

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorError {
    // ---- Numerical (per instance) ----
    /// A required linear-system factorization is singular or ill-conditioned.
    Factorization { family: AlgorithmFamily, reason: &'static str },

    /// The family needs a factorization that was not supplied.
    MissingFactorization { family: AlgorithmFamily },

    // ---- Shapes (fatal) ----
    /// Iterate, instance vector, learned parameters or matrices disagree.
    ShapeMismatch { what: &'static str, expected: usize, found: usize },

    // ---- Configuration (fatal) ----
    /// A scalar setting (step size, penalty, relaxation) is invalid.
    InvalidSetting { name: &'static str, value: f64, reason: &'static str },

    /// Static data supplied to the factory does not belong to the family.
    IncompatibleStaticData { family: AlgorithmFamily, reason: &'static str },

    /// Unrecognized family tag.
    UnknownFamily { name: String },

    // ---- Derivatives ----
    /// Finite-difference adjoint failed.
    Derivative { text: String },
}

impl std::error::Error for OperatorError {}

impl std::fmt::Display for OperatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Numerical ----
            OperatorError::Factorization { family, reason } => {
                write!(f, "Factorization failed for family '{family}': {reason}")
            }
            OperatorError::MissingFactorization { family } => {
                write!(f, "Family '{family}' requires a factorization but none was supplied")
            }

            // ---- Shapes ----
            OperatorError::ShapeMismatch { what, expected, found } => {
                write!(f, "Shape mismatch for {what}: expected {expected}, found {found}")
            }

            // ---- Configuration ----
            OperatorError::InvalidSetting { name, value, reason } => {
                write!(f, "Invalid operator setting {name} = {value}: {reason}")
            }
            OperatorError::IncompatibleStaticData { family, reason } => {
                write!(f, "Static data incompatible with family '{family}': {reason}")
            }
            OperatorError::UnknownFamily { name } => {
                write!(f, "Unknown algorithm family '{name}'")
            }

            // ---- Derivatives ----
            OperatorError::Derivative { text } => {
                write!(f, "Finite-difference adjoint failed: {text}")
            }
        }
    }
}

impl OperatorError {
    /// True for failures that only invalidate the current instance.
    pub fn is_per_instance(&self) -> bool {
        matches!(
            self,
            OperatorError::Factorization { .. } | OperatorError::MissingFactorization { .. }
        )
    }
}

impl From<OptError> for OperatorError {
    fn from(err: OptError) -> Self {
        OperatorError::Derivative { text: err.to_string() }
    }
}

#[cfg(feature = "python-bindings")]
impl From<OperatorError> for pyo3::PyErr {
    fn from(err: OperatorError) -> pyo3::PyErr {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
