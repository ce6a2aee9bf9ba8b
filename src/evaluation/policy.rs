//! Initialization policies and the warm starts they produce.
//!
//! Purpose
//! -------
//! Build the `N × d_z` matrix of initial iterates for an evaluation batch
//! under one of four policies:
//!
//! - `Learned`: the predictor applied to the normalized parameters.
//! - `ColdStart`: the operator's problem-independent start.
//! - `NearestNeighbor`: the optimal iterate of the training instance closest
//!   (Euclidean, normalized parameters) to each query.
//! - `PreviousSolution`: the optimal iterate of the preceding instance in the
//!   same trajectory, cold start for the first instance of each trajectory.
//!
//! Invariants & assumptions
//! ------------------------
//! - Nearest-neighbor ties resolve to the lowest training index.
//! - Trajectories are contiguous blocks of `trajectory_len` rows starting at
//!   row 0 of the batch.
use crate::operators::{instance::ProblemBatch, traits::FixedPointStep};
use crate::predictor::params::PredictorParameters;
use crate::workspace::errors::{L2wsError, L2wsResult};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use std::fmt;

/// Train or test split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn label(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Source of the initial iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitPolicy {
    Learned,
    ColdStart,
    NearestNeighbor,
    PreviousSolution { trajectory_len: usize },
}

impl InitPolicy {
    /// Label used in tables, reports and error context.
    pub fn label(&self) -> &'static str {
        match self {
            InitPolicy::Learned => "learned",
            InitPolicy::ColdStart => "no_train",
            InitPolicy::NearestNeighbor => "nearest_neighbor",
            InitPolicy::PreviousSolution { .. } => "prev_sol",
        }
    }

    /// Whether the policy uses trained predictor parameters.
    pub fn is_learned(&self) -> bool {
        matches!(self, InitPolicy::Learned)
    }

    /// Initial iterates for every row of `batch`.
    ///
    /// # Errors
    /// - [`L2wsError::MissingOptimals`] when nearest neighbor lacks training
    ///   optimals or previous solution lacks batch optimals.
    /// - [`L2wsError::ShapeMismatch`] when the predictor output or optimal
    ///   iterates do not match the operator's iterate dimension.
    /// - [`L2wsError::InvalidCount`] for a zero trajectory length.
    pub fn initial_iterates(&self, sources: &WarmStartSources<'_>, batch: &ProblemBatch) -> L2wsResult<Array2<f64>> {
        let dim = sources.operator.iterate_dim();
        let cold = sources.operator.cold_start();
        let z0 = match self {
            InitPolicy::Learned => sources.params.predict(batch.theta().view())?,
            InitPolicy::ColdStart => cold_start_iterates(cold.view(), batch.len()),
            InitPolicy::NearestNeighbor => {
                let optimals = sources.train_optimals.ok_or(L2wsError::MissingOptimals { policy: self.label() })?;
                nearest_neighbor_iterates(sources.train_theta, optimals, batch.theta().view())?
            }
            InitPolicy::PreviousSolution { trajectory_len } => {
                let optimals = batch.optimals().ok_or(L2wsError::MissingOptimals { policy: self.label() })?;
                previous_solution_iterates(optimals.view(), cold.view(), *trajectory_len)?
            }
        };
        if z0.ncols() != dim {
            return Err(L2wsError::ShapeMismatch { what: "initial iterate", expected: dim, found: z0.ncols() });
        }
        Ok(z0)
    }
}

impl fmt::Display for InitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything a policy may draw its warm starts from.
pub struct WarmStartSources<'a> {
    pub operator: &'a dyn FixedPointStep,
    pub params: &'a PredictorParameters,
    /// Normalized training parameters.
    pub train_theta: ArrayView2<'a, f64>,
    pub train_optimals: Option<ArrayView2<'a, f64>>,
}

/// `n` copies of the cold start.
pub fn cold_start_iterates(cold: ArrayView1<'_, f64>, n: usize) -> Array2<f64> {
    let mut out = Array2::zeros((n, cold.len()));
    for mut row in out.rows_mut() {
        row.assign(&cold);
    }
    out
}

/// For each query row, the training optimal of its nearest training row.
///
/// # Errors
/// [`L2wsError::ShapeMismatch`] for misaligned inputs;
/// [`L2wsError::EmptySplit`] without training rows.
pub fn nearest_neighbor_iterates(
    train_theta: ArrayView2<'_, f64>, train_optimals: ArrayView2<'_, f64>, query_theta: ArrayView2<'_, f64>,
) -> L2wsResult<Array2<f64>> {
    if train_theta.nrows() != train_optimals.nrows() {
        return Err(L2wsError::ShapeMismatch {
            what: "training optimals",
            expected: train_theta.nrows(),
            found: train_optimals.nrows(),
        });
    }
    if train_theta.ncols() != query_theta.ncols() {
        return Err(L2wsError::ShapeMismatch {
            what: "query parameters",
            expected: train_theta.ncols(),
            found: query_theta.ncols(),
        });
    }
    if train_theta.nrows() == 0 {
        return Err(L2wsError::EmptySplit { split: Split::Train });
    }
    let mut out = Array2::zeros((query_theta.nrows(), train_optimals.ncols()));
    for (query, mut row) in query_theta.rows().into_iter().zip(out.rows_mut()) {
        let mut best = (0, f64::INFINITY);
        for (j, train) in train_theta.rows().into_iter().enumerate() {
            let d: f64 = train.iter().zip(query.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
            if d < best.1 {
                best = (j, d);
            }
        }
        row.assign(&train_optimals.index_axis(Axis(0), best.0));
    }
    Ok(out)
}

/// Row `i` gets `optimals[i − 1]`, except at trajectory starts
/// (`i % trajectory_len == 0`) which get the cold start.
///
/// # Errors
/// [`L2wsError::InvalidCount`] for `trajectory_len == 0`;
/// [`L2wsError::ShapeMismatch`] if `cold` and `optimals` disagree.
pub fn previous_solution_iterates(
    optimals: ArrayView2<'_, f64>, cold: ArrayView1<'_, f64>, trajectory_len: usize,
) -> L2wsResult<Array2<f64>> {
    if trajectory_len == 0 {
        return Err(L2wsError::InvalidCount {
            name: "trajectory_len",
            value: 0,
            reason: "trajectories need at least one instance",
        });
    }
    if optimals.ncols() != cold.len() {
        return Err(L2wsError::ShapeMismatch { what: "optimal iterate", expected: cold.len(), found: optimals.ncols() });
    }
    let mut out = Array2::zeros(optimals.dim());
    for (i, mut row) in out.rows_mut().into_iter().enumerate() {
        if i % trajectory_len == 0 {
            row.assign(&cold);
        } else {
            row.assign(&optimals.index_axis(Axis(0), i - 1));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // Scope
    // -----
    // Nearest-neighbor lookup (including ties) and previous-solution
    // shifting across trajectory boundaries.

    #[test]
    // Purpose
    // -------
    // The nearest training point supplies the warm start.
    //
    // Given
    // -----
    // Training points at 0, 1, 10 with optimals a, b, c and a query at 0.4.
    //
    // Expect
    // ------
    // The warm start equals `a`.
    fn nearest_neighbor_picks_closest_training_point() {
        // Arrange
        let train = array![[0.0], [1.0], [10.0]];
        let optimals = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let query = array![[0.4]];

        // Act
        let z0 = nearest_neighbor_iterates(train.view(), optimals.view(), query.view()).unwrap();

        // Assert
        assert_eq!(z0, array![[1.0, 1.0]]);
    }

    #[test]
    // Purpose
    // -------
    // Equidistant training points resolve to the lowest index.
    //
    // Given
    // -----
    // Training points at 0 and 1, query at 0.5.
    //
    // Expect
    // ------
    // The first optimal.
    fn nearest_neighbor_ties_pick_first() {
        let train = array![[0.0], [1.0]];
        let optimals = array![[7.0], [9.0]];
        let z0 = nearest_neighbor_iterates(train.view(), optimals.view(), array![[0.5]].view()).unwrap();
        assert_eq!(z0, array![[7.0]]);
    }

    #[test]
    // Purpose
    // -------
    // Previous solution restarts cold at every trajectory boundary.
    //
    // Given
    // -----
    // Two trajectories of length 4 with optimals `i` in row `i`.
    //
    // Expect
    // ------
    // Rows 0 and 4 are cold (−1); every other row `i` equals `i − 1`.
    fn previous_solution_shifts_within_trajectory() {
        // Arrange
        let optimals = Array2::from_shape_fn((8, 1), |(i, _)| i as f64);
        let cold = array![-1.0];

        // Act
        let z0 = previous_solution_iterates(optimals.view(), cold.view(), 4).unwrap();

        // Assert
        let expected = array![[-1.0], [0.0], [1.0], [2.0], [-1.0], [4.0], [5.0], [6.0]];
        assert_eq!(z0, expected);
        assert!(matches!(
            previous_solution_iterates(optimals.view(), cold.view(), 0),
            Err(L2wsError::InvalidCount { .. })
        ));
    }
}
