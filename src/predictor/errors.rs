//! Errors for predictor parameters, normalization and checkpoints.
use crate::operators::errors::OperatorError;

/// Result alias for predictor operations.
pub type PredictorResult<T> = Result<T, PredictorError>;

#[derive(Debug, Clone, PartialEq)]
pub enum PredictorError {
    // ---- Shapes ----
    /// Inputs, outputs or parameter arrays disagree in size.
    ShapeMismatch { what: &'static str, expected: usize, found: usize },

    /// Mean and log-variance trees are not structurally identical.
    StructureMismatch { layer: usize, reason: &'static str },

    /// Layer sizes must have an input and an output width, all positive.
    InvalidArchitecture { reason: &'static str },

    // ---- Values ----
    /// A parameter (weight, bias, variance, prior) is NaN or infinite.
    NonFiniteWeight { name: String, index: usize },

    /// Initialization scale must be finite and > 0.
    InvalidScale { value: f64 },

    /// Normalization statistics cannot be fit on an empty split.
    EmptyTrainingSplit,

    // ---- Checkpoint ----
    /// A named array is missing from the checkpoint.
    MissingArray { name: String },

    /// Declared shape does not match the stored data length.
    CorruptArray { name: String, expected: usize, found: usize },

    /// Encoding or decoding failed.
    Checkpoint { reason: String },

    // ---- Operator ----
    /// Learned operator parameters do not fit the operator.
    Operator(OperatorError),
}

impl std::error::Error for PredictorError {}

impl std::fmt::Display for PredictorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Shapes ----
            PredictorError::ShapeMismatch { what, expected, found } => {
                write!(f, "Shape mismatch for {what}: expected {expected}, found {found}")
            }
            PredictorError::StructureMismatch { layer, reason } => {
                write!(f, "Posterior mean/variance mismatch at layer {layer}: {reason}")
            }
            PredictorError::InvalidArchitecture { reason } => {
                write!(f, "Invalid predictor architecture: {reason}")
            }

            // ---- Values ----
            PredictorError::NonFiniteWeight { name, index } => {
                write!(f, "Non-finite value in '{name}' at flat index {index}")
            }
            PredictorError::InvalidScale { value } => {
                write!(f, "Invalid initialization scale {value}: must be finite and > 0")
            }
            PredictorError::EmptyTrainingSplit => {
                write!(f, "Normalization statistics require a non-empty training split")
            }

            // ---- Checkpoint ----
            PredictorError::MissingArray { name } => {
                write!(f, "Checkpoint is missing array '{name}'")
            }
            PredictorError::CorruptArray { name, expected, found } => {
                write!(f, "Checkpoint array '{name}' declares {expected} values but holds {found}")
            }
            PredictorError::Checkpoint { reason } => write!(f, "Checkpoint error: {reason}"),

            // ---- Operator ----
            PredictorError::Operator(err) => write!(f, "{err}"),
        }
    }
}

impl From<OperatorError> for PredictorError {
    fn from(err: OperatorError) -> Self {
        PredictorError::Operator(err)
    }
}

impl From<serde_json::Error> for PredictorError {
    fn from(err: serde_json::Error) -> Self {
        PredictorError::Checkpoint { reason: err.to_string() }
    }
}

#[cfg(feature = "python-bindings")]
impl From<PredictorError> for pyo3::PyErr {
    fn from(err: PredictorError) -> pyo3::PyErr {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
