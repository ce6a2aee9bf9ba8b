//! Certified lower bounds on solved fractions.
//!
//! Purpose
//! -------
//! Turn an empirical solved fraction `p̂` and a budget `Δ` into a
//! high-probability lower bound on the population solved fraction:
//!
//! - KL inverse: `max(0, 1 − kl⁻¹(1 − p̂, Δ))`, applied to the failure rate.
//! - Pinsker: `max(0, p̂ − sqrt(Δ/2))`, always reported for comparison.
//!
//! Key behaviors
//! -------------
//! - [`BoundError::Infeasible`] from the inversion is reported as a bound of
//!   zero; every other error propagates.
//! - [`certify_final`] composes the sample-convergence and McAllester
//!   budgets. [`Composition::SampleThenMcAllester`] first bounds the
//!   posterior-averaged failure rate from `H` sampled predictors and then
//!   folds in the complexity penalty; [`Composition::McAllesterOnly`] applies
//!   the complexity penalty directly.
//! - [`sweep_bound`] is the Pinsker-style bound used when scanning a grid of
//!   posterior widths.
//!
//! Conventions
//! -----------
//! - All functions take a [`KlInverseCache`] so thresholds that share a step
//!   (and therefore `p̂`) reuse one root find.
use crate::pac_bayes::{
    errors::{BoundError, BoundResult},
    kl::KlInverseCache,
    penalty::PriorGrid,
};
use std::f64::consts::PI;

/// Confidence levels, sample counts, and prior grid of the bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacBayesOptions {
    /// Confidence of the training-sample (McAllester) bound.
    pub delta: f64,
    /// Confidence of the sample-convergence bound.
    pub delta2: f64,
    /// Number of predictors drawn from the posterior at finalization.
    pub num_samples: usize,
    pub grid: PriorGrid,
    /// KL inverse when `true`, Pinsker otherwise.
    pub use_kl_inverse: bool,
}

impl PacBayesOptions {
    /// # Errors
    /// [`BoundError::InvalidDelta`], [`BoundError::InvalidCount`], or
    /// [`BoundError::InvalidPriorGrid`].
    pub fn new(
        delta: f64, delta2: f64, num_samples: usize, c: f64, b: f64, use_kl_inverse: bool,
    ) -> BoundResult<Self> {
        for (name, value) in [("delta", delta), ("delta2", delta2)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(BoundError::InvalidDelta { name, value });
            }
        }
        if num_samples == 0 {
            return Err(BoundError::InvalidCount { name: "num_samples", value: num_samples });
        }
        let grid = PriorGrid::new(c, b)?;
        Ok(Self { delta, delta2, num_samples, grid, use_kl_inverse })
    }

    /// Re-run [`PacBayesOptions::new`] on options built from fields.
    ///
    /// # Errors
    /// Same as [`PacBayesOptions::new`].
    pub fn validated(self) -> BoundResult<Self> {
        Self::new(self.delta, self.delta2, self.num_samples, self.grid.c, self.grid.b, self.use_kl_inverse)
    }
}

impl Default for PacBayesOptions {
    fn default() -> Self {
        Self { delta: 0.01, delta2: 0.01, num_samples: 20, grid: PriorGrid::default(), use_kl_inverse: true }
    }
}

/// Empirical fraction with its certified counterparts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CertifiedFraction {
    pub empirical: f64,
    /// The reported bound (KL inverse or Pinsker per the options).
    pub certified: f64,
    pub pinsker: f64,
}

/// How the finalization budgets combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    SampleThenMcAllester,
    McAllesterOnly,
}

fn check_fraction(value: f64) -> BoundResult<f64> {
    if !(0.0..=1.0).contains(&value) {
        return Err(BoundError::InvalidFraction { value });
    }
    Ok(value)
}

/// Accepts `+∞` (a vacuous budget); rejects NaN and `−∞`.
fn check_budget(value: f64) -> BoundResult<f64> {
    if value.is_nan() || value == f64::NEG_INFINITY {
        return Err(BoundError::NonFinitePenalty { value });
    }
    Ok(value)
}

/// `kl⁻¹(risk, budget)` with infeasibility mapped to a risk of one.
fn risk_bound(risk: f64, budget: f64, cache: &mut KlInverseCache) -> BoundResult<f64> {
    if budget == f64::INFINITY {
        return Ok(1.0);
    }
    match cache.invert(risk, budget) {
        Ok(r) => Ok(r),
        Err(BoundError::Infeasible { .. }) => Ok(1.0),
        Err(e) => Err(e),
    }
}

/// `max(0, p̂ − sqrt(Δ/2))`; zero for a negative or infinite budget,
/// matching the KL inverse.
///
/// # Errors
/// [`BoundError::InvalidFraction`] or [`BoundError::NonFinitePenalty`].
pub fn pinsker_bound(p_hat: f64, penalty: f64) -> BoundResult<f64> {
    let p_hat = check_fraction(p_hat)?;
    let penalty = check_budget(penalty)?;
    if penalty < 0.0 || penalty.is_infinite() {
        return Ok(0.0);
    }
    Ok((p_hat - (penalty / 2.0).sqrt()).max(0.0))
}

/// `max(0, 1 − kl⁻¹(1 − p̂, Δ))`; zero when the inversion is infeasible.
///
/// # Errors
/// Invalid inputs or a root-find failure.
pub fn kl_lower_bound(p_hat: f64, penalty: f64, cache: &mut KlInverseCache) -> BoundResult<f64> {
    let p_hat = check_fraction(p_hat)?;
    let penalty = check_budget(penalty)?;
    Ok((1.0 - risk_bound(1.0 - p_hat, penalty, cache)?).max(0.0))
}

/// Certify one empirical fraction under a single budget.
///
/// # Errors
/// Same as [`kl_lower_bound`].
pub fn certify(
    p_hat: f64, penalty: f64, use_kl_inverse: bool, cache: &mut KlInverseCache,
) -> BoundResult<CertifiedFraction> {
    let pinsker = pinsker_bound(p_hat, penalty)?;
    let certified = if use_kl_inverse { kl_lower_bound(p_hat, penalty, cache)? } else { pinsker };
    Ok(CertifiedFraction { empirical: p_hat, certified, pinsker })
}

/// Certify every entry of a solved-fraction curve under one budget.
///
/// # Errors
/// The first failing entry.
pub fn certify_all(
    p_hats: &[f64], penalty: f64, use_kl_inverse: bool, cache: &mut KlInverseCache,
) -> BoundResult<Vec<CertifiedFraction>> {
    p_hats.iter().map(|&p| certify(p, penalty, use_kl_inverse, cache)).collect()
}

/// Finalization bound combining sample-convergence and McAllester budgets.
///
/// The Pinsker column is `max(0, p̂ − sqrt(Δ_McA/2))` under either
/// composition.
///
/// # Errors
/// Invalid inputs or a root-find failure.
pub fn certify_final(
    p_hat: f64, sample_penalty: f64, mcallester_penalty: f64, composition: Composition,
    use_kl_inverse: bool, cache: &mut KlInverseCache,
) -> BoundResult<CertifiedFraction> {
    let p_hat = check_fraction(p_hat)?;
    let sample_penalty = check_budget(sample_penalty)?;
    let mcallester_penalty = check_budget(mcallester_penalty)?;
    let kl_risk = match composition {
        Composition::SampleThenMcAllester => {
            let averaged = risk_bound(1.0 - p_hat, sample_penalty, cache)?;
            risk_bound(averaged, mcallester_penalty, cache)?
        }
        Composition::McAllesterOnly => risk_bound(1.0 - p_hat, mcallester_penalty, cache)?,
    };
    // The Pinsker column only pays the complexity budget.
    let pinsker = pinsker_bound(p_hat, mcallester_penalty)?;
    let certified = if use_kl_inverse { (1.0 - kl_risk).max(0.0) } else { pinsker };
    Ok(CertifiedFraction { empirical: p_hat, certified, pinsker })
}

/// `mean_fs − sqrt((KL + log(Nπ²/(6δ)))/(2N))` for a posterior width scan.
///
/// # Errors
/// Invalid `delta`, `n_train`, or a non-finite `kl`.
pub fn sweep_bound(mean_frac_solved: f64, kl: f64, n_train: usize, delta: f64) -> BoundResult<f64> {
    let mean_frac_solved = check_fraction(mean_frac_solved)?;
    if !(delta > 0.0 && delta < 1.0) {
        return Err(BoundError::InvalidDelta { name: "delta", value: delta });
    }
    if n_train == 0 {
        return Err(BoundError::InvalidCount { name: "n_train", value: n_train });
    }
    if !kl.is_finite() {
        return Err(BoundError::NonFinitePenalty { value: kl });
    }
    let n = n_train as f64;
    Ok(mean_frac_solved - ((kl + (n * PI * PI / (6.0 * delta)).ln()) / (2.0 * n)).sqrt())
}
