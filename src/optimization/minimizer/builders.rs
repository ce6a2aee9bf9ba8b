//! minimizer::builders — L-BFGS solver construction helpers.
//!
//! Builders apply the optional gradient / cost-change tolerances and the
//! L-BFGS memory from [`MinimizeOptions`]; the initial parameter vector and
//! the iteration cap are runtime concerns handled by
//! [`run_lbfgs`](super::run::run_lbfgs).
use argmin::solver::quasinewton::LBFGS;

use crate::optimization::{
    errors::OptResult,
    minimizer::{
        traits::MinimizeOptions,
        types::{
            Cost, DEFAULT_LBFGS_MEM, Grad, HagerZhangLS, LbfgsHagerZhang, LbfgsMoreThuente,
            MoreThuenteLS, Theta,
        },
    },
};

/// Construct L-BFGS with Hager–Zhang line search.
///
/// # Errors
/// Returns an `OptError` when Argmin rejects one of the tolerances.
pub fn build_optimizer_hager_zhang(opts: &MinimizeOptions) -> OptResult<LbfgsHagerZhang> {
    let mem = opts.lbfgs_mem.unwrap_or(DEFAULT_LBFGS_MEM);
    configure_lbfgs(LbfgsHagerZhang::new(HagerZhangLS::new(), mem), opts)
}

/// Construct L-BFGS with More–Thuente line search.
///
/// # Errors
/// Returns an `OptError` when Argmin rejects one of the tolerances.
pub fn build_optimizer_more_thuente(opts: &MinimizeOptions) -> OptResult<LbfgsMoreThuente> {
    let mem = opts.lbfgs_mem.unwrap_or(DEFAULT_LBFGS_MEM);
    configure_lbfgs(LbfgsMoreThuente::new(MoreThuenteLS::new(), mem), opts)
}

/// Apply optional tolerances to an L-BFGS solver, generic over the line search.
///
/// # Errors
/// Propagates Argmin errors from `with_tolerance_grad` / `with_tolerance_cost`.
pub fn configure_lbfgs<L>(
    mut lbfgs: LBFGS<L, Theta, Grad, Cost>, opts: &MinimizeOptions,
) -> OptResult<LBFGS<L, Theta, Grad, Cost>> {
    if let Some(tol_grad) = opts.tols.tol_grad {
        lbfgs = lbfgs.with_tolerance_grad(tol_grad)?;
    }
    if let Some(tol_cost) = opts.tols.tol_cost {
        lbfgs = lbfgs.with_tolerance_cost(tol_cost)?;
    }
    Ok(lbfgs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::minimizer::traits::{LineSearcher, Tolerances};

    // Scope
    // -----
    // Builders accept validated options for both line searches.

    #[test]
    // Purpose
    // -------
    // Both builders succeed with explicit tolerances and memory.
    //
    // Given
    // -----
    // `tol_grad = 1e-8`, `tol_cost = 1e-10`, `lbfgs_mem = Some(4)`.
    //
    // Expect
    // ------
    // `Ok` solvers from both builders.
    fn builders_accept_valid_options() {
        // Arrange
        let tols = Tolerances::new(Some(1e-8), Some(1e-10), Some(50)).unwrap();
        let opts = MinimizeOptions::new(tols, LineSearcher::HagerZhang, false, Some(4)).unwrap();

        // Act / Assert
        assert!(build_optimizer_hager_zhang(&opts).is_ok());
        assert!(build_optimizer_more_thuente(&opts).is_ok());
    }
}
