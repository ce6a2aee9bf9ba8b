//! Reporting collaborator interface.
//!
//! The workspace hands one [`EvalReport`] per evaluation call and one row per
//! training block or test-loss write to a [`Reporter`]. What the reporter
//! does with them (CSV, plots, nothing) is its own business; the engine
//! never reads anything back.
use crate::evaluation::{
    policy::Split,
    tables::{ConvergenceRateRow, FracSolvedRow},
};
use ndarray::Array1;

/// Fixed-schema summary of one `(split, policy)` evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub split: Split,
    /// Row label (policy label, optionally suffixed by the epoch).
    pub label: String,
    pub epoch: usize,
    pub mean_curve: Array1<f64>,
    /// Solved fractions with certified and Pinsker bounds per accuracy.
    pub frac_solved: FracSolvedRow,
    pub convergence_rates: ConvergenceRateRow,
    /// Penalty used for certification.
    pub penalty: f64,
    /// First step at which the mean curve drops below each accuracy.
    pub iterations_to_accuracy: Vec<usize>,
    /// Relative to the cold-start run, when one exists.
    pub percent_reduction: Option<Vec<f64>>,
    /// `(percentile, curve)` pairs.
    pub percentiles: Vec<(f64, Array1<f64>)>,
    pub mean_loss: f64,
    pub time_per_instance: f64,
    pub failures: usize,
    pub divergences: usize,
}

/// One training block.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub first_epoch: usize,
    pub epochs: usize,
    pub batch_losses: Vec<f64>,
    pub moving_average: Option<f64>,
    pub time_per_epoch: f64,
    pub learning_rate: f64,
}

/// One test-loss write.
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub iteration: usize,
    pub epoch: usize,
    pub train_moving_average: Option<f64>,
    pub test_loss: f64,
    pub penalty: Option<f64>,
    /// Mean and standard deviation of the posterior variances.
    pub posterior_variance: Option<(f64, f64)>,
    pub prior: Option<f64>,
    pub mean_squared_weight: f64,
}

/// Sink for run summaries.
pub trait Reporter {
    fn report_eval(&mut self, report: &EvalReport);

    fn report_train(&mut self, report: &TrainReport);

    fn report_test(&mut self, report: &TestReport);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report_eval(&mut self, _report: &EvalReport) {}

    fn report_train(&mut self, _report: &TrainReport) {}

    fn report_test(&mut self, _report: &TestReport) {}
}

/// Keeps every report in memory, in arrival order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordingReporter {
    pub evals: Vec<EvalReport>,
    pub trains: Vec<TrainReport>,
    pub tests: Vec<TestReport>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest evaluation report for `(split, label)`.
    pub fn latest_eval(&self, split: Split, label: &str) -> Option<&EvalReport> {
        self.evals.iter().rev().find(|r| r.split == split && r.label == label)
    }
}

impl Reporter for RecordingReporter {
    fn report_eval(&mut self, report: &EvalReport) {
        self.evals.push(report.clone());
    }

    fn report_train(&mut self, report: &TrainReport) {
        self.trains.push(report.clone());
    }

    fn report_test(&mut self, report: &TestReport) {
        self.tests.push(report.clone());
    }
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn report_eval(&mut self, report: &EvalReport) {
        (**self).report_eval(report);
    }

    fn report_train(&mut self, report: &TrainReport) {
        (**self).report_train(report);
    }

    fn report_test(&mut self, report: &TestReport) {
        (**self).report_test(report);
    }
}
