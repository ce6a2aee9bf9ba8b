//! Summary metrics over residual matrices.
//!
//! All functions take an `N × K` matrix whose row `i`, column `k − 1` holds
//! the residual (or distance) of instance `i` after `k` steps. Rows of a
//! failed instance are NaN and count as unsolved everywhere.
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// `frac_solved(k, τ) = mean_i [r(i, k) < τ]` for every step.
pub fn frac_solved(residuals: ArrayView2<'_, f64>, tau: f64) -> Array1<f64> {
    let n = residuals.nrows().max(1) as f64;
    residuals.map_axis(Axis(0), |col| col.iter().filter(|&&r| r < tau).count() as f64 / n)
}

/// Mean over finite entries of each column; NaN if a column has none.
pub fn mean_curve(residuals: ArrayView2<'_, f64>) -> Array1<f64> {
    residuals.map_axis(Axis(0), |col| {
        let finite: Vec<f64> = col.iter().copied().filter(|r| r.is_finite()).collect();
        if finite.is_empty() { f64::NAN } else { finite.iter().sum::<f64>() / finite.len() as f64 }
    })
}

/// Fraction of consecutive-step ratios `r(i, k+1) / r(i, k)` below each
/// grid rate, pooled over instances and steps.
pub fn convergence_rates(residuals: ArrayView2<'_, f64>, grid: &[f64]) -> Array1<f64> {
    let k = residuals.ncols();
    let mut ratios = Vec::with_capacity(residuals.nrows() * k.saturating_sub(1));
    for row in residuals.rows() {
        for j in 1..k {
            ratios.push(row[j] / row[j - 1]);
        }
    }
    let total = ratios.len().max(1) as f64;
    grid.iter().map(|&rate| ratios.iter().filter(|&&q| q < rate).count() as f64 / total).collect()
}

/// First 0-based step whose mean residual is below each accuracy; the curve
/// length when never reached.
pub fn iterations_to_accuracy(curve: ArrayView1<'_, f64>, accuracies: &[f64]) -> Vec<usize> {
    accuracies.iter().map(|&acc| curve.iter().position(|&r| r < acc).unwrap_or(curve.len())).collect()
}

/// `1 − iters / baseline_iters` per accuracy; zero when the baseline is
/// zero.
pub fn percent_reduction(iters: &[usize], baseline: &[usize]) -> Vec<f64> {
    iters
        .iter()
        .zip(baseline)
        .map(|(&it, &base)| if base == 0 { 0.0 } else { 1.0 - it as f64 / base as f64 })
        .collect()
}

/// Percentile `p ∈ [0, 100]` of each column with linear interpolation
/// between order statistics; NaN entries are ignored.
pub fn percentile_curve(residuals: ArrayView2<'_, f64>, p: f64) -> Array1<f64> {
    residuals.map_axis(Axis(0), |col| {
        let mut sorted: Vec<f64> = col.iter().copied().filter(|r| !r.is_nan()).collect();
        if sorted.is_empty() {
            return f64::NAN;
        }
        sorted.sort_by(f64::total_cmp);
        let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    // Scope
    // -----
    // Solved fractions (with failed rows), pooled convergence-rate
    // fractions, iteration counts, and interpolated percentiles.

    const TOL: f64 = 1e-12;

    #[test]
    // Purpose
    // -------
    // Failed rows count as unsolved and are skipped by the mean curve.
    //
    // Given
    // -----
    // Two finite rows and one NaN row.
    //
    // Expect
    // ------
    // Fractions over three rows; means over two.
    fn failed_rows_are_unsolved() {
        let r = array![[0.5, 0.05], [0.2, 0.001], [f64::NAN, f64::NAN]];
        assert_eq!(frac_solved(r.view(), 0.1), array![0.0, 2.0 / 3.0]);
        let m = mean_curve(r.view());
        assert_abs_diff_eq!(m[0], 0.35, epsilon = TOL);
    }

    #[test]
    // Purpose
    // -------
    // Ratios are pooled over instances and steps.
    //
    // Given
    // -----
    // Ratios 0.5, 0.5 (row 0) and 0.9, 1.1 (row 1).
    //
    // Expect
    // ------
    // Below 0.8: 0.5; below 1.0: 0.75; below 1.2: 1.
    fn convergence_rates_pool_ratios() {
        let r = array![[1.0, 0.5, 0.25], [1.0, 0.9, 0.99]];
        let got = convergence_rates(r.view(), &[0.8, 1.0, 1.2]);
        assert_abs_diff_eq!(got[0], 0.5, epsilon = TOL);
        assert_abs_diff_eq!(got[1], 0.75, epsilon = TOL);
        assert_abs_diff_eq!(got[2], 1.0, epsilon = TOL);
    }

    #[test]
    // Purpose
    // -------
    // Iteration counts and reductions follow the first crossing.
    //
    // Given
    // -----
    // Curve `[1, 0.1, 0.01, 0.001]`, baseline counts `[4, 4]`.
    //
    // Expect
    // ------
    // `[2, 4]` for accuracies `[0.05, 1e-4]` and reductions `[0.5, 0]`.
    fn iterations_to_accuracy_and_reduction() {
        let curve = array![1.0, 0.1, 0.01, 0.001];
        let its = iterations_to_accuracy(curve.view(), &[0.05, 1e-4]);
        assert_eq!(its, vec![2, 4]);
        assert_eq!(percent_reduction(&its, &[4, 4]), vec![0.5, 0.0]);
    }

    #[test]
    // Purpose
    // -------
    // Percentiles interpolate linearly between order statistics.
    //
    // Given
    // -----
    // Column values 1, 2, 3, 4.
    //
    // Expect
    // ------
    // p50 = 2.5, p0 = 1, p100 = 4, p30 = 1.9.
    fn percentiles_interpolate_linearly() {
        let r = array![[4.0], [1.0], [3.0], [2.0]];
        assert_abs_diff_eq!(percentile_curve(r.view(), 50.0)[0], 2.5, epsilon = TOL);
        assert_abs_diff_eq!(percentile_curve(r.view(), 0.0)[0], 1.0, epsilon = TOL);
        assert_abs_diff_eq!(percentile_curve(r.view(), 100.0)[0], 4.0, epsilon = TOL);
        assert_abs_diff_eq!(percentile_curve(r.view(), 30.0)[0], 1.9, epsilon = TOL);
    }
}
