//! Binary KL divergence and its numerical inverse.
//!
//! Purpose
//! -------
//! `invert_kl(q, c)` returns the largest `p ∈ [q, 1]` with
//! `KL(q ‖ p) ≤ c`. There is no closed form; `p ↦ KL(q ‖ p)` is increasing
//! on `[q, 1)`, so the answer is the root of `KL(q ‖ p) − c` found with
//! Brent's method (argmin) on the bracket `[q, 1 − ε]`.
//!
//! Key behaviors
//! -------------
//! - `c = 0` returns `q` exactly; `q ≥ 1` returns 1.
//! - If the budget reaches past `1 − ε`, the answer is `1`.
//! - Negative or NaN budgets and `q ∉ [0, 1]` are
//!   [`BoundError::Infeasible`].
//! - [`KlInverseCache`] memoizes results keyed by the exact bit patterns of
//!   `(q, c)` so repeated thresholds within one evaluation pass reuse work.
use crate::pac_bayes::errors::{BoundError, BoundResult};
use argmin::core::{CostFunction, Error, Executor, State};
use argmin::solver::brent::BrentRoot;
use std::collections::HashMap;

/// Distance from 1 of the right end of the root bracket.
pub const UPPER_MARGIN: f64 = 1e-12;

/// Absolute tolerance of the Brent root find.
pub const ROOT_TOL: f64 = 1e-12;

/// Iteration cap for the root find.
pub const ROOT_MAX_ITERS: u64 = 200;

/// `KL(Bernoulli(q) ‖ Bernoulli(p))` with `0·log 0 = 0`.
pub fn binary_kl(q: f64, p: f64) -> f64 {
    let term = |a: f64, b: f64| if a == 0.0 { 0.0 } else { a * (a / b).ln() };
    term(q, p) + term(1.0 - q, 1.0 - p)
}

struct KlGap {
    q: f64,
    budget: f64,
}

impl CostFunction for KlGap {
    type Param = f64;
    type Output = f64;

    fn cost(&self, p: &f64) -> Result<f64, Error> {
        Ok(binary_kl(self.q, *p) - self.budget)
    }
}

/// Largest `p ∈ [q, 1]` with `KL(q ‖ p) ≤ c`.
///
/// # Errors
/// - [`BoundError::Infeasible`] for `q ∉ [0, 1]` or a negative/NaN `c`.
/// - [`BoundError::RootFind`] if Brent's method fails.
pub fn invert_kl(q: f64, c: f64) -> BoundResult<f64> {
    if !(0.0..=1.0).contains(&q) {
        return Err(BoundError::Infeasible { q, budget: c, reason: "q must lie in [0, 1]" });
    }
    if c.is_nan() || c < 0.0 {
        return Err(BoundError::Infeasible { q, budget: c, reason: "budget must be >= 0" });
    }
    if c == 0.0 {
        return Ok(q);
    }
    let upper = 1.0 - UPPER_MARGIN;
    if q >= upper {
        return Ok(1.0);
    }
    let gap = KlGap { q, budget: c };
    if gap.cost(&upper).map_err(|e| BoundError::RootFind { text: e.to_string() })? <= 0.0 {
        return Ok(1.0);
    }
    let solver = BrentRoot::new(q, upper, ROOT_TOL);
    let result = Executor::new(gap, solver)
        .configure(|state| state.max_iters(ROOT_MAX_ITERS))
        .run()
        .map_err(|e| BoundError::RootFind { text: e.to_string() })?;
    let p = result
        .state()
        .get_param()
        .copied()
        .ok_or_else(|| BoundError::RootFind { text: "no parameter in final state".to_string() })?;
    Ok(p.clamp(q, 1.0))
}

/// Memo table for [`invert_kl`] keyed by the exact inputs.
#[derive(Debug, Clone, Default)]
pub struct KlInverseCache {
    table: HashMap<(u64, u64), f64>,
    hits: usize,
}

impl KlInverseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached [`invert_kl`]; errors are not cached.
    ///
    /// # Errors
    /// Same as [`invert_kl`].
    pub fn invert(&mut self, q: f64, c: f64) -> BoundResult<f64> {
        let key = (q.to_bits(), c.to_bits());
        if let Some(&p) = self.table.get(&key) {
            self.hits += 1;
            return Ok(p);
        }
        let p = invert_kl(q, c)?;
        self.table.insert(key, p);
        Ok(p)
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Scope
    // -----
    // Binary KL values, inverse-KL edge cases and monotonicity, and cache
    // reuse.

    #[test]
    // Purpose
    // -------
    // A zero budget returns `q` itself.
    //
    // Given
    // -----
    // `q = 0.5`, `c = 0`.
    //
    // Expect
    // ------
    // Exactly `0.5`.
    fn zero_budget_returns_q() {
        assert_eq!(invert_kl(0.5, 0.0).unwrap(), 0.5);
    }

    #[test]
    // Purpose
    // -------
    // Large budgets push the bound to 1.
    //
    // Given
    // -----
    // `q = 0.5` with budgets 10 and 1e6.
    //
    // Expect
    // ------
    // Values within `1e-4` of 1.
    fn large_budget_approaches_one() {
        assert_abs_diff_eq!(invert_kl(0.5, 10.0).unwrap(), 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(invert_kl(0.5, 1e6).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // The inverse sits on the budget boundary, never below `q`, and grows
    // with the budget.
    //
    // Given
    // -----
    // A grid of `q` values and budgets.
    //
    // Expect
    // ------
    // `p ≥ q`, `KL(q‖p) ≈ c` away from 1, and `p` non-decreasing in `c`.
    fn inverse_is_tight_and_monotone() {
        for &q in &[0.0, 0.05, 0.3, 0.5, 0.9, 0.99] {
            let mut prev = q;
            for &c in &[1e-4, 1e-3, 0.01, 0.1, 0.5, 2.0] {
                let p = invert_kl(q, c).unwrap();
                assert!(p >= q);
                assert!(p + 1e-12 >= prev);
                if p < 1.0 - 1e-4 {
                    assert_abs_diff_eq!(binary_kl(q, p), c, epsilon = 1e-7);
                }
                prev = p;
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // Infeasible inputs are reported rather than panicking.
    //
    // Given
    // -----
    // A negative budget, a NaN budget, and `q = 1.5`.
    //
    // Expect
    // ------
    // `BoundError::Infeasible` each time.
    fn infeasible_inputs_are_errors() {
        for (q, c) in [(0.5, -1.0), (0.5, f64::NAN), (1.5, 0.1)] {
            assert!(matches!(invert_kl(q, c), Err(BoundError::Infeasible { .. })));
        }
    }

    #[test]
    // Purpose
    // -------
    // Identical `(q, c)` pairs hit the cache.
    //
    // Given
    // -----
    // Three calls, two identical.
    //
    // Expect
    // ------
    // Two entries, one hit, equal values.
    fn cache_reuses_identical_inputs() {
        let mut cache = KlInverseCache::new();
        let a = cache.invert(0.2, 0.05).unwrap();
        let b = cache.invert(0.2, 0.05).unwrap();
        cache.invert(0.3, 0.05).unwrap();
        assert_eq!(a, b);
        assert_eq!((cache.len(), cache.hits()), (2, 1));
    }
}
