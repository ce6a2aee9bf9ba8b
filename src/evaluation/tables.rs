//! Append-only solved-fraction and convergence-rate tables.
//!
//! One row is appended per evaluation call, labelled by policy (and, for
//! learned policies, by training progress). Rows are never removed or
//! edited; the latest row for a label is what reporting reads.
use crate::evaluation::metrics::{convergence_rates, frac_solved};
use crate::pac_bayes::{
    bounds::{CertifiedFraction, certify_all},
    errors::BoundResult,
    kl::KlInverseCache,
};
use ndarray::{Array1, ArrayView2};

/// Empirical values with certified and Pinsker counterparts.
#[derive(Debug, Clone, PartialEq)]
pub struct CertifiedCurve {
    pub empirical: Array1<f64>,
    pub certified: Array1<f64>,
    pub pinsker: Array1<f64>,
}

impl CertifiedCurve {
    /// Certify each entry of `empirical` under one budget.
    ///
    /// # Errors
    /// Bound errors other than infeasibility.
    pub fn certify(
        empirical: Array1<f64>, penalty: f64, use_kl_inverse: bool, cache: &mut KlInverseCache,
    ) -> BoundResult<Self> {
        let values = empirical.to_vec();
        let certs = certify_all(&values, penalty, use_kl_inverse, cache)?;
        Ok(Self::from_certified(&certs))
    }

    pub fn from_certified(certs: &[CertifiedFraction]) -> Self {
        Self {
            empirical: certs.iter().map(|c| c.empirical).collect(),
            certified: certs.iter().map(|c| c.certified).collect(),
            pinsker: certs.iter().map(|c| c.pinsker).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FracSolvedRow {
    pub label: String,
    /// One curve over steps per accuracy, in table order.
    pub per_accuracy: Vec<CertifiedCurve>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FracSolvedTable {
    accuracies: Vec<f64>,
    rows: Vec<FracSolvedRow>,
}

impl FracSolvedTable {
    pub fn new(accuracies: Vec<f64>) -> Self {
        Self { accuracies, rows: Vec::new() }
    }

    pub fn accuracies(&self) -> &[f64] {
        &self.accuracies
    }

    pub fn rows(&self) -> &[FracSolvedRow] {
        &self.rows
    }

    /// Latest row appended under `label`.
    pub fn latest(&self, label: &str) -> Option<&FracSolvedRow> {
        self.rows.iter().rev().find(|r| r.label == label)
    }

    /// Compute, certify, and append the row for a residual matrix.
    ///
    /// # Errors
    /// Bound errors other than infeasibility.
    pub fn append(
        &mut self, label: impl Into<String>, residuals: ArrayView2<'_, f64>, penalty: f64, use_kl_inverse: bool,
        cache: &mut KlInverseCache,
    ) -> BoundResult<&FracSolvedRow> {
        let per_accuracy = self
            .accuracies
            .iter()
            .map(|&tau| CertifiedCurve::certify(frac_solved(residuals, tau), penalty, use_kl_inverse, cache))
            .collect::<BoundResult<Vec<_>>>()?;
        Ok(self.push(FracSolvedRow { label: label.into(), per_accuracy }))
    }

    /// Append a precomputed row (e.g. from the finalization pass).
    pub fn push(&mut self, row: FracSolvedRow) -> &FracSolvedRow {
        self.rows.push(row);
        &self.rows[self.rows.len() - 1]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceRateRow {
    pub label: String,
    /// One entry per grid rate.
    pub rates: CertifiedCurve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceRateTable {
    grid: Vec<f64>,
    rows: Vec<ConvergenceRateRow>,
}

impl ConvergenceRateTable {
    pub fn new(grid: Vec<f64>) -> Self {
        Self { grid, rows: Vec::new() }
    }

    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    pub fn rows(&self) -> &[ConvergenceRateRow] {
        &self.rows
    }

    pub fn latest(&self, label: &str) -> Option<&ConvergenceRateRow> {
        self.rows.iter().rev().find(|r| r.label == label)
    }

    /// Compute, certify, and append the row for a residual (or distance)
    /// matrix.
    ///
    /// # Errors
    /// Bound errors other than infeasibility.
    pub fn append(
        &mut self, label: impl Into<String>, basis: ArrayView2<'_, f64>, penalty: f64, use_kl_inverse: bool,
        cache: &mut KlInverseCache,
    ) -> BoundResult<&ConvergenceRateRow> {
        let rates = CertifiedCurve::certify(convergence_rates(basis, &self.grid), penalty, use_kl_inverse, cache)?;
        self.rows.push(ConvergenceRateRow { label: label.into(), rates });
        Ok(&self.rows[self.rows.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // Scope
    // -----
    // Append-only behavior and certified values never exceeding empirical
    // ones.

    #[test]
    // Purpose
    // -------
    // Appending twice under one label keeps both rows and `latest` returns
    // the second.
    //
    // Given
    // -----
    // Two residual matrices appended as "learned".
    //
    // Expect
    // ------
    // Two rows; latest reflects the second matrix; certified ≤ empirical.
    fn rows_are_appended_not_replaced() {
        let mut table = FracSolvedTable::new(vec![0.1, 0.01]);
        let mut cache = KlInverseCache::new();
        table.append("learned", array![[1.0, 0.5]].view(), 0.05, true, &mut cache).unwrap();
        table.append("learned", array![[0.05, 0.005]].view(), 0.05, true, &mut cache).unwrap();
        assert_eq!(table.rows().len(), 2);
        let latest = table.latest("learned").unwrap();
        assert_eq!(latest.per_accuracy[1].empirical, array![0.0, 1.0]);
        for curve in &latest.per_accuracy {
            assert!(curve.certified.iter().zip(curve.empirical.iter()).all(|(c, e)| c <= e));
            assert!(curve.pinsker.iter().zip(curve.certified.iter()).all(|(p, c)| p <= c));
        }
    }

    #[test]
    // Purpose
    // -------
    // Convergence-rate rows have one entry per grid value.
    //
    // Given
    // -----
    // A halving residual sequence and a three-value grid.
    //
    // Expect
    // ------
    // Empirical `[0, 1, 1]` for grid `[0.4, 0.6, 1.0]`.
    fn convergence_rows_follow_grid() {
        let mut table = ConvergenceRateTable::new(vec![0.4, 0.6, 1.0]);
        let mut cache = KlInverseCache::new();
        let row = table.append("no_train", array![[1.0, 0.5, 0.25]].view(), 0.01, false, &mut cache).unwrap();
        assert_eq!(row.rates.empirical, array![0.0, 1.0, 1.0]);
    }
}
