//! Engine-level error type.
//!
//! Errors from the operator, predictor, optimizer and bound layers convert
//! into [`L2wsError`] with `?`. Fatal errors raised while a specific
//! `(family, split, policy)` combination is active are wrapped once in
//! [`L2wsError::Context`] so the message names all three.
use crate::evaluation::policy::Split;
use crate::operators::{errors::OperatorError, family::AlgorithmFamily};
use crate::optimization::errors::OptError;
use crate::pac_bayes::errors::BoundError;
use crate::predictor::errors::PredictorError;

/// Result alias for engine-level operations.
pub type L2wsResult<T> = Result<T, L2wsError>;

#[derive(Debug, Clone, PartialEq)]
pub enum L2wsError {
    // ---- Layers ----
    Operator(OperatorError),
    Predictor(PredictorError),
    Optimizer(OptError),
    Bound(BoundError),

    // ---- Configuration ----
    /// A floating-point setting is out of range.
    InvalidOption { name: &'static str, value: f64, reason: &'static str },

    /// A count or size setting is out of range.
    InvalidCount { name: &'static str, value: usize, reason: &'static str },

    // ---- Data ----
    /// Array dimensions disagree; never broadcast or truncated.
    ShapeMismatch { what: &'static str, expected: usize, found: usize },

    /// A split has no instances.
    EmptySplit { split: Split },

    /// The policy or loss needs optimal iterates that were not supplied.
    MissingOptimals { policy: &'static str },

    /// Every instance of a batch failed; the first failure is kept.
    AllInstancesFailed { count: usize, first: String },

    /// The batch objective evaluated to NaN or ∞.
    NonFiniteLoss { value: f64 },

    // ---- Closed loop ----
    /// The environment collaborator failed at a control step.
    Environment { step: usize, reason: String },

    // ---- Context ----
    Context { family: AlgorithmFamily, split: Split, policy: &'static str, source: Box<L2wsError> },
}

impl L2wsError {
    /// Attach the active family, split and policy. An error that already
    /// carries context is returned unchanged.
    pub fn with_context(self, family: AlgorithmFamily, split: Split, policy: &'static str) -> Self {
        match self {
            L2wsError::Context { .. } => self,
            other => L2wsError::Context { family, split, policy, source: Box::new(other) },
        }
    }
}

impl std::error::Error for L2wsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            L2wsError::Operator(e) => Some(e),
            L2wsError::Predictor(e) => Some(e),
            L2wsError::Optimizer(e) => Some(e),
            L2wsError::Bound(e) => Some(e),
            L2wsError::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl std::fmt::Display for L2wsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Layers ----
            L2wsError::Operator(e) => write!(f, "{e}"),
            L2wsError::Predictor(e) => write!(f, "{e}"),
            L2wsError::Optimizer(e) => write!(f, "{e}"),
            L2wsError::Bound(e) => write!(f, "{e}"),

            // ---- Configuration ----
            L2wsError::InvalidOption { name, value, reason } => {
                write!(f, "Invalid option {name} = {value}: {reason}")
            }
            L2wsError::InvalidCount { name, value, reason } => {
                write!(f, "Invalid option {name} = {value}: {reason}")
            }

            // ---- Data ----
            L2wsError::ShapeMismatch { what, expected, found } => {
                write!(f, "Shape mismatch for {what}: expected {expected}, found {found}")
            }
            L2wsError::EmptySplit { split } => write!(f, "The {split} split has no instances"),
            L2wsError::MissingOptimals { policy } => {
                write!(f, "'{policy}' requires optimal iterates, but none were supplied")
            }
            L2wsError::AllInstancesFailed { count, first } => {
                write!(f, "All {count} instances of the batch failed; first failure: {first}")
            }
            L2wsError::NonFiniteLoss { value } => write!(f, "Batch loss is not finite: {value}"),

            // ---- Closed loop ----
            L2wsError::Environment { step, reason } => {
                write!(f, "Environment failed at control step {step}: {reason}")
            }

            // ---- Context ----
            L2wsError::Context { family, split, policy, source } => {
                write!(f, "[family = {family}, split = {split}, policy = {policy}] {source}")
            }
        }
    }
}

impl From<OperatorError> for L2wsError {
    fn from(err: OperatorError) -> Self {
        L2wsError::Operator(err)
    }
}

impl From<PredictorError> for L2wsError {
    fn from(err: PredictorError) -> Self {
        match err {
            PredictorError::Operator(e) => L2wsError::Operator(e),
            other => L2wsError::Predictor(other),
        }
    }
}

impl From<OptError> for L2wsError {
    fn from(err: OptError) -> Self {
        L2wsError::Optimizer(err)
    }
}

impl From<BoundError> for L2wsError {
    fn from(err: BoundError) -> Self {
        L2wsError::Bound(err)
    }
}

#[cfg(feature = "python-bindings")]
impl From<L2wsError> for pyo3::PyErr {
    fn from(err: L2wsError) -> pyo3::PyErr {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
