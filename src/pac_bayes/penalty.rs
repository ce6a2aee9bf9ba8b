//! Complexity and confidence penalties.
//!
//! Purpose
//! -------
//! Compute the budget `Δ` fed to the inverse KL:
//!
//! - McAllester: `Δ = (KL(Q ‖ P) + 2·log(b·log(c/λ)) + log(π²N/(6δ))) / N`
//!   for posterior `Q = N(μ, diag σ²)`, prior `P = N(0, λI)`,
//!   `λ = exp(prior_log_width)`, training-set size `N`. The middle union
//!   term pays for choosing `λ` from the grid `c·exp(−j/b)` and is clipped
//!   at zero.
//! - No learning: `log(2/δ)/N` for predictors that were never trained.
//! - Sample convergence: `log(2/δ₂)/H` for `H` sampled predictors.
//!
//! Only network weights enter the KL; learned operator parameters are
//! treated as deterministic.
use crate::pac_bayes::errors::{BoundError, BoundResult};
use crate::predictor::params::PredictorParameters;
use ndarray::Array1;
use std::f64::consts::PI;

/// Prior rounding grid `λ_j = c·exp(−j/b)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorGrid {
    pub c: f64,
    pub b: f64,
}

impl PriorGrid {
    /// # Errors
    /// [`BoundError::InvalidPriorGrid`] unless `c > 0` and `b > 0`, both finite.
    pub fn new(c: f64, b: f64) -> BoundResult<Self> {
        if !(c.is_finite() && b.is_finite() && c > 0.0 && b > 0.0) {
            return Err(BoundError::InvalidPriorGrid { c, b });
        }
        Ok(Self { c, b })
    }

    fn check_prior(&self, prior: f64) -> BoundResult<()> {
        if !(prior > 0.0 && prior < self.c) {
            return Err(BoundError::PriorOutOfRange { prior, c: self.c });
        }
        Ok(())
    }

    /// Round `λ` up to the nearest grid value `c·exp(−j/b)`, `j ≥ 1`.
    /// `c` itself lies outside the range, so priors above `c·exp(−1/b)`
    /// land on that first grid value.
    ///
    /// # Errors
    /// [`BoundError::PriorOutOfRange`] for `λ ∉ (0, c)`.
    pub fn round(&self, prior: f64) -> BoundResult<f64> {
        self.check_prior(prior)?;
        let j = (self.b * (self.c / prior).ln()).floor().max(1.0);
        Ok(self.c * (-j / self.b).exp())
    }

    /// `max(0, 2·log(b·log(c/λ)))`.
    ///
    /// # Errors
    /// [`BoundError::PriorOutOfRange`] for `λ ∉ (0, c)`.
    pub fn union_term(&self, prior: f64) -> BoundResult<f64> {
        self.check_prior(prior)?;
        Ok((2.0 * (self.b * (self.c / prior).ln()).ln()).max(0.0))
    }

    /// Largest prior log-width whose union term is still zero,
    /// `log c − 1/b`. Training keeps the prior at or below it.
    pub fn max_log_width(&self) -> f64 {
        self.c.ln() - 1.0 / self.b
    }
}

impl Default for PriorGrid {
    fn default() -> Self {
        Self { c: 2.0, b: 100.0 }
    }
}

/// The pieces of a McAllester penalty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McAllesterPenalty {
    pub kl: f64,
    pub union: f64,
    pub confidence: f64,
    pub n: usize,
    /// `(kl + union + confidence) / n`.
    pub total: f64,
}

fn check_delta(name: &'static str, value: f64) -> BoundResult<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(BoundError::InvalidDelta { name, value });
    }
    Ok(())
}

fn check_count(name: &'static str, value: usize) -> BoundResult<()> {
    if value == 0 {
        return Err(BoundError::InvalidCount { name, value });
    }
    Ok(())
}

/// `KL(N(μ, diag σ²) ‖ N(0, λI))` over the network weights.
///
/// # Errors
/// [`BoundError::DeterministicParameters`] without a posterior.
pub fn gaussian_kl(params: &PredictorParameters) -> BoundResult<f64> {
    let PredictorParameters::Stochastic { mean, log_var, prior_log_width, .. } = params else {
        return Err(BoundError::DeterministicParameters);
    };
    let prior = prior_log_width.exp();
    let mut kl = 0.0;
    for (m, v) in mean.iter().zip(log_var) {
        let pairs = m.weights.iter().zip(v.weights.iter()).chain(m.bias.iter().zip(v.bias.iter()));
        for (&mu, &lv) in pairs {
            kl += 0.5 * (lv.exp() / prior + mu * mu / prior - 1.0 + prior_log_width - lv);
        }
    }
    Ok(kl)
}

/// KL of a posterior and prior sharing the isotropic standard deviation
/// `sigma` and differing only in the mean: `Σ μ² / (2σ²)`.
pub fn shared_sigma_kl(params: &PredictorParameters, sigma: f64) -> f64 {
    let sq: f64 = params
        .mean_layers()
        .iter()
        .flat_map(|l| l.weights.iter().chain(l.bias.iter()))
        .map(|w| w * w)
        .sum();
    sq / (2.0 * sigma * sigma)
}

/// McAllester penalty of a stochastic predictor.
///
/// # Errors
/// - Invalid `delta`, `n_train`, or a prior outside the grid range.
/// - [`BoundError::DeterministicParameters`] without a posterior.
/// - [`BoundError::NonFinitePenalty`] if the total is not finite.
pub fn mcallester_penalty(
    params: &PredictorParameters, n_train: usize, delta: f64, grid: &PriorGrid,
) -> BoundResult<McAllesterPenalty> {
    check_delta("delta", delta)?;
    check_count("n_train", n_train)?;
    let prior = params.prior_log_width().ok_or(BoundError::DeterministicParameters)?.exp();
    let kl = gaussian_kl(params)?;
    let union = grid.union_term(prior)?;
    let n = n_train as f64;
    let confidence = (PI * PI * n / (6.0 * delta)).ln();
    let total = (kl + union + confidence) / n;
    if !total.is_finite() {
        return Err(BoundError::NonFinitePenalty { value: total });
    }
    Ok(McAllesterPenalty { kl, union, confidence, n: n_train, total })
}

/// McAllester budget that turns a prior outside the grid range into an
/// infinite budget (a vacuous bound) instead of an error.
///
/// # Errors
/// Same as [`mcallester_penalty`] except [`BoundError::PriorOutOfRange`].
pub fn mcallester_budget(
    params: &PredictorParameters, n_train: usize, delta: f64, grid: &PriorGrid,
) -> BoundResult<McAllesterPenalty> {
    match mcallester_penalty(params, n_train, delta, grid) {
        Err(BoundError::PriorOutOfRange { .. }) => {
            let kl = gaussian_kl(params)?;
            let confidence = (PI * PI * n_train as f64 / (6.0 * delta)).ln();
            Ok(McAllesterPenalty {
                kl,
                union: f64::INFINITY,
                confidence,
                n: n_train,
                total: f64::INFINITY,
            })
        }
        other => other,
    }
}

/// Gradient of [`McAllesterPenalty::total`] with respect to the flat
/// parameter vector (see [`PredictorParameters::to_flat`]). Operator entries
/// get zero.
///
/// # Errors
/// Same as [`mcallester_penalty`].
pub fn mcallester_penalty_grad(
    params: &PredictorParameters, n_train: usize, delta: f64, grid: &PriorGrid,
) -> BoundResult<Array1<f64>> {
    let penalty = mcallester_penalty(params, n_train, delta, grid)?;
    let PredictorParameters::Stochastic { mean, log_var, prior_log_width, .. } = params else {
        return Err(BoundError::DeterministicParameters);
    };
    let prior = prior_log_width.exp();
    let n = n_train as f64;

    let mut d_mean = Vec::new();
    let mut d_log_var = Vec::new();
    let mut d_prior = 0.0;
    for (m, v) in mean.iter().zip(log_var) {
        let pairs = m.weights.iter().zip(v.weights.iter()).chain(m.bias.iter().zip(v.bias.iter()));
        for (&mu, &lv) in pairs {
            let var = lv.exp();
            d_mean.push(mu / prior / n);
            d_log_var.push(0.5 * (var / prior - 1.0) / n);
            d_prior += 0.5 * (1.0 - (var + mu * mu) / prior);
        }
    }
    if penalty.union > 0.0 {
        d_prior += -2.0 / (grid.c.ln() - prior_log_width);
    }

    let mut flat = d_mean;
    flat.extend(d_log_var);
    flat.push(d_prior / n);
    flat.extend(std::iter::repeat(0.0).take(params.operator_params().len()));
    Ok(Array1::from(flat))
}

/// `log(2/δ)/N`, the budget for an untrained predictor.
///
/// # Errors
/// Invalid `delta` or `n_train`.
pub fn no_learning_penalty(n_train: usize, delta: f64) -> BoundResult<f64> {
    check_delta("delta", delta)?;
    check_count("n_train", n_train)?;
    Ok((2.0 / delta).ln() / n_train as f64)
}

/// `log(2/δ₂)/H`, the budget for estimating an expectation over the
/// posterior with `H` sampled predictors.
///
/// # Errors
/// Invalid `delta2` or `num_samples`.
pub fn sample_convergence_penalty(num_samples: usize, delta2: f64) -> BoundResult<f64> {
    check_delta("delta2", delta2)?;
    check_count("num_samples", num_samples)?;
    Ok((2.0 / delta2).ln() / num_samples as f64)
}
