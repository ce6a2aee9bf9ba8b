//! Problem instances and batches handed to fixed-point operators.
//!
//! Purpose
//! -------
//! Hold the per-instance data an operator consumes: the instance vector `q`
//! (right-hand side, cost vector, bounds, regression samples, depending on
//! the family), the raw and normalized parameter vectors θ used by the
//! predictor, optional optimal iterates `z*`, and optional per-instance QP
//! systems with their factorizations.
//!
//! Invariants & assumptions
//! ------------------------
//! - All row-aligned arrays in a [`ProblemBatch`] have the same number of
//!   rows; this is checked once at construction.
//! - A [`QpSystem`] whose factorization failed is still a valid value; the
//!   failure is reported when an operator asks for the factor, so one bad
//!   instance never prevents a batch from being assembled.
//!
//! Conventions
//! -----------
//! - Row `i` of every array describes instance `i`.
//! - Sub-batches ([`ProblemBatch::select`]) preserve the order of the indices
//!   they are built from.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
    linalg::{LinearSolve, weighted_gram},
};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::sync::Arc;

/// Row weight used on equality constraints (`l == u`).
pub const RHO_EQUALITY: f64 = 1e3;

/// Quadratic program matrices `(P, A)` with ADMM penalties and the factored
/// system `M = P + σI + Aᵀdiag(ρ)A`.
pub struct QpSystem {
    pub p: Array2<f64>,
    pub a: Array2<f64>,
    pub rho: Array1<f64>,
    pub sigma: f64,
    factor: Result<LinearSolve, OperatorError>,
}

impl std::fmt::Debug for QpSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QpSystem")
            .field("n", &self.n())
            .field("m", &self.m())
            .field("sigma", &self.sigma)
            .field("factored", &self.factor.is_ok())
            .finish()
    }
}

impl QpSystem {
    /// Assemble and factor `M = P + σI + Aᵀdiag(ρ)A`.
    ///
    /// # Errors
    /// - [`OperatorError::ShapeMismatch`] if `P` is not `n×n` or `ρ` is not
    ///   length `m`.
    /// - [`OperatorError::InvalidSetting`] for non-positive or non-finite `σ`.
    ///
    /// A singular `M` does not fail here; [`QpSystem::factor`] reports it.
    pub fn new(p: Array2<f64>, a: Array2<f64>, rho: Array1<f64>, sigma: f64) -> OperatorResult<Self> {
        let (m, n) = a.dim();
        if p.nrows() != n || p.ncols() != n {
            return Err(OperatorError::ShapeMismatch {
                what: "QP cost matrix P",
                expected: n,
                found: if p.nrows() != n { p.nrows() } else { p.ncols() },
            });
        }
        if rho.len() != m {
            return Err(OperatorError::ShapeMismatch {
                what: "ADMM penalty vector rho",
                expected: m,
                found: rho.len(),
            });
        }
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(OperatorError::InvalidSetting {
                name: "sigma",
                value: sigma,
                reason: "must be finite and > 0",
            });
        }
        let mut system = &p + &weighted_gram(a.view(), rho.view());
        system.diag_mut().mapv_inplace(|d| d + sigma);
        let factor = LinearSolve::factor(system.view(), AlgorithmFamily::Osqp);
        Ok(Self { p, a, rho, sigma, factor })
    }

    /// Penalties of one per row, [`RHO_EQUALITY`] where `l == u`.
    pub fn default_rho(l: ArrayView1<'_, f64>, u: ArrayView1<'_, f64>) -> Array1<f64> {
        ndarray::Zip::from(l).and(u).map_collect(|&li, &ui| if li == ui { RHO_EQUALITY } else { 1.0 })
    }

    pub fn n(&self) -> usize {
        self.a.ncols()
    }

    pub fn m(&self) -> usize {
        self.a.nrows()
    }

    /// The factored system matrix.
    ///
    /// # Errors
    /// The stored [`OperatorError::Factorization`] if `M` was singular.
    pub fn factor(&self) -> OperatorResult<&LinearSolve> {
        self.factor.as_ref().map_err(Clone::clone)
    }
}

/// Borrowed view of one instance, as consumed by [`FixedPointStep::step`].
///
/// [`FixedPointStep::step`]: crate::operators::traits::FixedPointStep::step
#[derive(Debug, Clone, Copy)]
pub struct ProblemInstance<'a> {
    pub q: ArrayView1<'a, f64>,
    pub aux: Option<&'a QpSystem>,
}

impl<'a> ProblemInstance<'a> {
    pub fn new(q: ArrayView1<'a, f64>) -> Self {
        Self { q, aux: None }
    }

    pub fn with_aux(q: ArrayView1<'a, f64>, aux: &'a QpSystem) -> Self {
        Self { q, aux: Some(aux) }
    }
}

/// Row-aligned instance data for one split.
#[derive(Debug, Clone)]
pub struct ProblemBatch {
    theta_raw: Array2<f64>,
    theta: Array2<f64>,
    q: Array2<f64>,
    optimals: Option<Array2<f64>>,
    aux: Option<Vec<Arc<QpSystem>>>,
}

impl ProblemBatch {
    /// Build a batch from raw parameters, their normalized form, instance
    /// vectors and optional optimal iterates.
    ///
    /// # Errors
    /// [`OperatorError::ShapeMismatch`] when the row counts disagree or the
    /// raw and normalized parameter matrices differ in width.
    pub fn new(
        theta_raw: Array2<f64>, theta: Array2<f64>, q: Array2<f64>, optimals: Option<Array2<f64>>,
    ) -> OperatorResult<Self> {
        let n = theta_raw.nrows();
        check_rows("normalized parameters", n, theta.nrows())?;
        check_rows("instance vectors", n, q.nrows())?;
        if let Some(z) = &optimals {
            check_rows("optimal iterates", n, z.nrows())?;
        }
        if theta.ncols() != theta_raw.ncols() {
            return Err(OperatorError::ShapeMismatch {
                what: "normalized parameter width",
                expected: theta_raw.ncols(),
                found: theta.ncols(),
            });
        }
        Ok(Self { theta_raw, theta, q, optimals, aux: None })
    }

    /// Attach one QP system per instance.
    ///
    /// # Errors
    /// [`OperatorError::ShapeMismatch`] if `aux.len()` differs from the batch size.
    pub fn with_aux(mut self, aux: Vec<Arc<QpSystem>>) -> OperatorResult<Self> {
        check_rows("per-instance QP systems", self.len(), aux.len())?;
        self.aux = Some(aux);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.q.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn theta_raw(&self) -> &Array2<f64> {
        &self.theta_raw
    }

    /// Normalized parameters (predictor inputs).
    pub fn theta(&self) -> &Array2<f64> {
        &self.theta
    }

    pub fn q(&self) -> &Array2<f64> {
        &self.q
    }

    pub fn optimals(&self) -> Option<&Array2<f64>> {
        self.optimals.as_ref()
    }

    pub fn instance(&self, i: usize) -> ProblemInstance<'_> {
        ProblemInstance {
            q: self.q.row(i),
            aux: self.aux.as_ref().map(|aux| aux[i].as_ref()),
        }
    }

    /// Sub-batch with rows taken in the order of `indices`.
    pub fn select(&self, indices: &[usize]) -> ProblemBatch {
        ProblemBatch {
            theta_raw: self.theta_raw.select(Axis(0), indices),
            theta: self.theta.select(Axis(0), indices),
            q: self.q.select(Axis(0), indices),
            optimals: self.optimals.as_ref().map(|z| z.select(Axis(0), indices)),
            aux: self.aux.as_ref().map(|aux| indices.iter().map(|&i| Arc::clone(&aux[i])).collect()),
        }
    }

    /// Contiguous sub-batch `[start, end)`.
    pub fn range(&self, start: usize, end: usize) -> ProblemBatch {
        let indices: Vec<usize> = (start..end.min(self.len())).collect();
        self.select(&indices)
    }
}

fn check_rows(what: &'static str, expected: usize, found: usize) -> OperatorResult<()> {
    if expected != found {
        return Err(OperatorError::ShapeMismatch { what, expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // Scope
    // -----
    // Batch construction checks, row selection order, and QP factor errors.

    fn small_batch() -> ProblemBatch {
        let theta = array![[0.0], [1.0], [2.0]];
        let q = array![[10.0, 11.0], [20.0, 21.0], [30.0, 31.0]];
        let z = array![[1.0], [2.0], [3.0]];
        ProblemBatch::new(theta.clone(), theta, q, Some(z)).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Misaligned row counts are rejected rather than broadcast.
    //
    // Given
    // -----
    // Three parameter rows and two instance rows.
    //
    // Expect
    // ------
    // `ShapeMismatch` naming the instance vectors.
    fn misaligned_rows_are_rejected() {
        let theta = array![[0.0], [1.0], [2.0]];
        let q = array![[1.0], [2.0]];
        let err = ProblemBatch::new(theta.clone(), theta, q, None).unwrap_err();
        assert_eq!(
            err,
            OperatorError::ShapeMismatch { what: "instance vectors", expected: 3, found: 2 }
        );
    }

    #[test]
    // Purpose
    // -------
    // `select` keeps the requested order across every row-aligned array.
    //
    // Given
    // -----
    // Indices `[2, 0]`.
    //
    // Expect
    // ------
    // Rows of `q` and `z*` come back as instance 2 then instance 0.
    fn select_preserves_index_order() {
        let batch = small_batch();
        let sub = batch.select(&[2, 0]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.q().row(0), array![30.0, 31.0]);
        assert_eq!(sub.optimals().unwrap().column(0), array![3.0, 1.0]);
        assert_eq!(batch.range(1, 10).len(), 2);
    }

    #[test]
    // Purpose
    // -------
    // A singular QP system is constructible but its factor reports a
    // factorization error.
    //
    // Given
    // -----
    // `P = 0`, `A = [1, 0]`; first σ = 0, then σ = 1 with an equality row.
    //
    // Expect
    // ------
    // σ = 0 fails eagerly; the equality row gets the large penalty and the
    // resulting system factors.
    fn qp_system_validates_sigma_and_rho() {
        let p = Array2::zeros((2, 2));
        let a = array![[1.0, 0.0]];
        let err = QpSystem::new(p.clone(), a.clone(), array![1.0], 0.0).unwrap_err();
        assert!(matches!(err, OperatorError::InvalidSetting { name: "sigma", .. }));

        let rho = QpSystem::default_rho(array![0.0].view(), array![0.0].view());
        assert_eq!(rho, array![RHO_EQUALITY]);
        let system = QpSystem::new(p, a, rho, 1.0).unwrap();
        assert!(system.factor().is_ok());
        assert_eq!((system.n(), system.m()), (2, 1));
    }
}
