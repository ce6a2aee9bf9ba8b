//! Dense linear algebra and projection kernels shared by the operators.
//!
//! Factorizations go through `nalgebra`'s LU; everything else stays in
//! `ndarray`. The bridge copies column by column into `DMatrix`
//! (column-major storage).
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
};
use nalgebra::{DMatrix, DVector, Dyn, linalg::LU};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Ratio between the smallest and largest pivot below which a factorization
/// is reported as ill-conditioned.
pub const PIVOT_RATIO_FLOOR: f64 = 1e-13;

/// LU factorization of a square system matrix, ready for repeated solves.
pub struct LinearSolve {
    lu: LU<f64, Dyn, Dyn>,
    dim: usize,
    family: AlgorithmFamily,
}

impl std::fmt::Debug for LinearSolve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearSolve").field("dim", &self.dim).field("family", &self.family).finish()
    }
}

impl LinearSolve {
    /// Factor `m` (square) by partial-pivoting LU.
    ///
    /// # Errors
    /// - [`OperatorError::ShapeMismatch`] if `m` is not square.
    /// - [`OperatorError::Factorization`] if `m` is singular, contains
    ///   non-finite entries, or its pivots span more than `1 / PIVOT_RATIO_FLOOR`.
    pub fn factor(m: ArrayView2<'_, f64>, family: AlgorithmFamily) -> OperatorResult<Self> {
        let (rows, cols) = m.dim();
        if rows != cols {
            return Err(OperatorError::ShapeMismatch {
                what: "factorized matrix columns",
                expected: rows,
                found: cols,
            });
        }
        if m.iter().any(|v| !v.is_finite()) {
            return Err(OperatorError::Factorization {
                family,
                reason: "matrix contains non-finite entries",
            });
        }
        let lu = to_dmatrix(m).lu();
        if !lu.is_invertible() {
            return Err(OperatorError::Factorization { family, reason: "matrix is singular" });
        }
        let pivots = lu.u().diagonal().map(f64::abs);
        let (min, max) = (pivots.min(), pivots.max());
        if max == 0.0 || min / max < PIVOT_RATIO_FLOOR {
            return Err(OperatorError::Factorization {
                family,
                reason: "matrix is numerically singular (pivot ratio below floor)",
            });
        }
        Ok(Self { lu, dim: rows, family })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Solve `M x = rhs`.
    ///
    /// # Errors
    /// - [`OperatorError::ShapeMismatch`] for a wrong-length right-hand side.
    /// - [`OperatorError::Factorization`] if the back-substitution fails.
    pub fn solve(&self, rhs: ArrayView1<'_, f64>) -> OperatorResult<Array1<f64>> {
        if rhs.len() != self.dim {
            return Err(OperatorError::ShapeMismatch {
                what: "linear system right-hand side",
                expected: self.dim,
                found: rhs.len(),
            });
        }
        let b = DVector::from_iterator(self.dim, rhs.iter().copied());
        let x = self.lu.solve(&b).ok_or(OperatorError::Factorization {
            family: self.family,
            reason: "back-substitution failed",
        })?;
        Ok(Array1::from_iter(x.iter().copied()))
    }
}

/// Copy an `ndarray` matrix into a column-major `DMatrix`.
pub fn to_dmatrix(m: ArrayView2<'_, f64>) -> DMatrix<f64> {
    let (rows, cols) = m.dim();
    let mut out = DMatrix::<f64>::zeros(rows, cols);
    for j in 0..cols {
        for i in 0..rows {
            out[(i, j)] = m[[i, j]];
        }
    }
    out
}

/// Largest eigenvalue of a symmetric matrix.
pub fn largest_eigenvalue_sym(m: ArrayView2<'_, f64>) -> f64 {
    to_dmatrix(m).symmetric_eigen().eigenvalues.max()
}

/// Elementwise soft threshold `sign(x)·max(|x| − t, 0)`.
pub fn soft_threshold(x: ArrayView1<'_, f64>, threshold: ArrayView1<'_, f64>) -> Array1<f64> {
    ndarray::Zip::from(x)
        .and(threshold)
        .map_collect(|&xi, &ti| xi.signum() * (xi.abs() - ti).max(0.0))
}

/// Projection onto the box `[l, u]`.
pub fn project_box(
    v: ArrayView1<'_, f64>, l: ArrayView1<'_, f64>, u: ArrayView1<'_, f64>,
) -> Array1<f64> {
    ndarray::Zip::from(v).and(l).and(u).map_collect(|&vi, &li, &ui| vi.max(li).min(ui))
}

/// Indicator of the coordinates where [`project_box`] is the identity.
pub fn box_interior_mask(
    v: ArrayView1<'_, f64>, l: ArrayView1<'_, f64>, u: ArrayView1<'_, f64>,
) -> Array1<f64> {
    ndarray::Zip::from(v)
        .and(l)
        .and(u)
        .map_collect(|&vi, &li, &ui| if li < vi && vi < ui { 1.0 } else { 0.0 })
}

/// Product cone `{0}^zero × ℝ₊^nonneg × SOC(soc[0]) × …` in the row order
/// of the constraint matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConeSpec {
    pub zero: usize,
    pub nonneg: usize,
    pub soc: Vec<usize>,
}

impl ConeSpec {
    /// Total number of rows covered by the cone.
    pub fn dim(&self) -> usize {
        self.zero + self.nonneg + self.soc.iter().sum::<usize>()
    }

    /// Project `y` onto the dual cone `ℝ^zero × ℝ₊^nonneg × SOC…`.
    ///
    /// The zero cone is dual to the free cone; the other pieces are
    /// self-dual.
    pub fn project_dual(&self, y: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut out = y.to_owned();
        let mut start = self.zero;
        for v in out.slice_mut(ndarray::s![start..start + self.nonneg]).iter_mut() {
            *v = v.max(0.0);
        }
        start += self.nonneg;
        for &size in &self.soc {
            let block = project_soc(out.slice(ndarray::s![start..start + size]));
            out.slice_mut(ndarray::s![start..start + size]).assign(&block);
            start += size;
        }
        out
    }
}

/// Projection onto the second-order cone `{(t, x) : ‖x‖ ≤ t}`.
pub fn project_soc(block: ArrayView1<'_, f64>) -> Array1<f64> {
    if block.is_empty() {
        return Array1::zeros(0);
    }
    let t = block[0];
    let x = block.slice(ndarray::s![1..]);
    let nx = x.dot(&x).sqrt();
    if nx <= t {
        return block.to_owned();
    }
    if nx <= -t {
        return Array1::zeros(block.len());
    }
    let scale = 0.5 * (nx + t);
    let mut out = Array1::zeros(block.len());
    out[0] = scale;
    out.slice_mut(ndarray::s![1..]).assign(&(&x * (scale / nx)));
    out
}

/// `Aᵀ diag(w) A` for a dense `A`.
pub fn weighted_gram(a: ArrayView2<'_, f64>, w: ArrayView1<'_, f64>) -> Array2<f64> {
    let scaled = &a * &w.insert_axis(ndarray::Axis(1));
    a.t().dot(&scaled)
}
