//! Algorithm-family tags for the closed set of fixed-point operators.
//!
//! The tag travels with every operator and every fatal error so that
//! messages can name the family that was active.
use crate::operators::errors::OperatorError;
use std::{fmt, str::FromStr};

/// Proximal-gradient flavours, distinguished by what is learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxGradVariant {
    /// Step `1/L` from the spectral norm of `A`.
    Plain,
    /// Step supplied by the caller.
    KnownStep,
    /// One learned step size per unroll step.
    LearnedStep,
    /// Learned step size and learned soft threshold per unroll step.
    LearnedThresholdAndStep,
    /// Learned per-coordinate step vector per unroll step.
    LearnedGradient,
}

impl ProxGradVariant {
    /// Number of learned scalars attached to one unroll step, given the
    /// iterate dimension `n`.
    pub fn params_per_step(self, n: usize) -> usize {
        match self {
            ProxGradVariant::Plain | ProxGradVariant::KnownStep => 0,
            ProxGradVariant::LearnedStep => 1,
            ProxGradVariant::LearnedThresholdAndStep => 2,
            ProxGradVariant::LearnedGradient => n,
        }
    }
}

/// Closed set of solver families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmFamily {
    ProxGrad(ProxGradVariant),
    Osqp,
    Scs,
    GradientDescent,
    Extragradient,
    MamlRegression,
}

impl AlgorithmFamily {
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmFamily::ProxGrad(ProxGradVariant::Plain) => "prox_grad",
            AlgorithmFamily::ProxGrad(ProxGradVariant::KnownStep) => "prox_grad_known_step",
            AlgorithmFamily::ProxGrad(ProxGradVariant::LearnedStep) => "prox_grad_learned_step",
            AlgorithmFamily::ProxGrad(ProxGradVariant::LearnedThresholdAndStep) => {
                "prox_grad_learned_threshold_step"
            }
            AlgorithmFamily::ProxGrad(ProxGradVariant::LearnedGradient) => {
                "prox_grad_learned_gradient"
            }
            AlgorithmFamily::Osqp => "osqp",
            AlgorithmFamily::Scs => "scs",
            AlgorithmFamily::GradientDescent => "gd",
            AlgorithmFamily::Extragradient => "extragradient",
            AlgorithmFamily::MamlRegression => "maml",
        }
    }
}

impl fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmFamily {
    type Err = OperatorError;

    /// Parse a family tag (case-insensitive, `-` and `_` interchangeable).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace('-', "_");
        let family = match key.as_str() {
            "prox_grad" | "ista" => AlgorithmFamily::ProxGrad(ProxGradVariant::Plain),
            "prox_grad_known_step" => AlgorithmFamily::ProxGrad(ProxGradVariant::KnownStep),
            "prox_grad_learned_step" => AlgorithmFamily::ProxGrad(ProxGradVariant::LearnedStep),
            "prox_grad_learned_threshold_step" => {
                AlgorithmFamily::ProxGrad(ProxGradVariant::LearnedThresholdAndStep)
            }
            "prox_grad_learned_gradient" => {
                AlgorithmFamily::ProxGrad(ProxGradVariant::LearnedGradient)
            }
            "osqp" => AlgorithmFamily::Osqp,
            "scs" => AlgorithmFamily::Scs,
            "gd" | "gradient_descent" => AlgorithmFamily::GradientDescent,
            "extragradient" => AlgorithmFamily::Extragradient,
            "maml" | "maml_regression" => AlgorithmFamily::MamlRegression,
            _ => return Err(OperatorError::UnknownFamily { name: s.to_string() }),
        };
        Ok(family)
    }
}
