//! workspace — owned run state and the training/evaluation lifecycle.
//!
//! Purpose
//! -------
//! Hold everything one run mutates (operator, normalized splits, training
//! state, append-only tables, logger, reporting collaborator) in a single
//! context and drive the run: baseline evaluations, optional pretraining,
//! block-wise training with plateau decay and evaluation cadence, PAC-Bayes
//! finalization, and the posterior-width sweep.
//!
//! Key behaviors
//! -------------
//! - [`Workspace::new`] splits the problem data at `n_train`, fits the
//!   normalizer on the training rows only, and validates that predictor,
//!   operator and data agree in shape.
//! - [`Workspace::evaluate`] runs one `(split, policy)` evaluation, appends
//!   certified rows to that split's tables, and hands an [`EvalReport`] to
//!   the reporter.
//! - [`Workspace::train`] runs epoch blocks until the configured epoch
//!   count, writing a [`TrainReport`] and a [`TestReport`] per block and
//!   evaluating the learned policy whenever an `eval_every_epochs` boundary
//!   is crossed.
//! - [`Workspace::finalize`] certifies `num_samples` posterior draws with
//!   the composed sample-convergence and McAllester budgets.
//!
//! Invariants & assumptions
//! ------------------------
//! - Normalization statistics are frozen at construction.
//! - Evaluations read `TrainState` only between blocks, so they always see
//!   a fully committed parameter set.
//! - Fatal errors leaving this module carry the active family, split and
//!   policy (see [`L2wsError::Context`]).
//!
//! Conventions
//! -----------
//! - Learned rows are labelled `learned_epoch_{epoch}`; baselines use their
//!   policy label; finalization rows use `pac_bayes`.
//! - Baselines are certified with the no-learning budget `log(2/δ)/N_train`;
//!   the learned predictor with the McAllester penalty when stochastic and
//!   with the no-learning budget otherwise.
//!
//! Downstream usage
//! ----------------
//! - Build a [`SolverOperator`], a [`ProblemData`] and initial
//!   [`PredictorParameters`]; call [`Workspace::run`] or the individual
//!   phases; collect results from the reporter via
//!   [`Workspace::finish`].
//!
//! Testing notes
//! -------------
//! - Unit tests cover construction checks, table/report bookkeeping, the
//!   evaluation cadence, finalization and error context. End-to-end
//!   improvement over cold start is covered in `tests/`.

pub mod errors;
pub mod logging;
pub mod reporting;

use crate::evaluation::{
    engine::{EvalOptions, EvaluationEngine, EvaluationResult},
    metrics::{frac_solved, iterations_to_accuracy, mean_curve, percent_reduction, percentile_curve},
    policy::{InitPolicy, Split, WarmStartSources},
    tables::{CertifiedCurve, ConvergenceRateTable, FracSolvedRow, FracSolvedTable},
};
use crate::operators::{
    dispatch::SolverOperator,
    family::AlgorithmFamily,
    instance::{ProblemBatch, QpSystem},
    traits::FixedPointStep,
};
use crate::pac_bayes::{
    bounds::{Composition, PacBayesOptions, certify_final, sweep_bound},
    errors::{BoundError, BoundResult},
    kl::KlInverseCache,
    penalty::{
        McAllesterPenalty, mcallester_budget, no_learning_penalty, sample_convergence_penalty, shared_sigma_kl,
    },
};
use crate::predictor::{
    checkpoint::Checkpoint,
    network::DenseLayer,
    normalization::Normalizer,
    params::PredictorParameters,
};
use crate::training::{
    options::TrainOptions,
    permutation::sample_rng,
    pretrain::{PretrainMethod, PretrainReport, pretrain},
    state::TrainState,
    trainer::{PacBayesObjective, Trainer},
    unroll::{UnrollSpec, loss_and_gradient},
};
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use slog::{Logger, debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

pub use self::errors::{L2wsError, L2wsResult};
pub use self::logging::{discard_logger, terminal_logger};
pub use self::reporting::{EvalReport, NullReporter, RecordingReporter, Reporter, TestReport, TrainReport};

/// Row label of finalization results.
pub const FINAL_LABEL: &str = "pac_bayes";

/// Problem data supplied at construction: raw parameters, instance vectors,
/// optional optimal iterates and per-instance QP systems, and the split
/// point. Rows `0..n_train` are the training split.
#[derive(Debug, Clone)]
pub struct ProblemData {
    pub theta: Array2<f64>,
    pub q: Array2<f64>,
    pub optimals: Option<Array2<f64>>,
    pub aux: Option<Vec<Arc<QpSystem>>>,
    pub n_train: usize,
}

impl ProblemData {
    /// # Errors
    /// - [`L2wsError::ShapeMismatch`] for misaligned rows.
    /// - [`L2wsError::EmptySplit`] unless `0 < n_train < N`.
    pub fn new(
        theta: Array2<f64>, q: Array2<f64>, optimals: Option<Array2<f64>>, n_train: usize,
    ) -> L2wsResult<Self> {
        let n = theta.nrows();
        if q.nrows() != n {
            return Err(L2wsError::ShapeMismatch { what: "instance vector rows", expected: n, found: q.nrows() });
        }
        if let Some(z) = &optimals {
            if z.nrows() != n {
                return Err(L2wsError::ShapeMismatch { what: "optimal iterate rows", expected: n, found: z.nrows() });
            }
        }
        if n_train == 0 {
            return Err(L2wsError::EmptySplit { split: Split::Train });
        }
        if n_train >= n {
            return Err(L2wsError::EmptySplit { split: Split::Test });
        }
        Ok(Self { theta, q, optimals, aux: None, n_train })
    }

    /// Attach one QP system per row.
    ///
    /// # Errors
    /// [`L2wsError::ShapeMismatch`] if the count differs from the row count.
    pub fn with_aux(mut self, aux: Vec<Arc<QpSystem>>) -> L2wsResult<Self> {
        if aux.len() != self.theta.nrows() {
            return Err(L2wsError::ShapeMismatch {
                what: "per-instance systems",
                expected: self.theta.nrows(),
                found: aux.len(),
            });
        }
        self.aux = Some(aux);
        Ok(self)
    }
}

/// Run configuration.
///
/// Fields
/// ------
/// - `train`: schedule, loss, optimizer, decay and seed.
/// - `eval`: evaluation lengths, batch size and table grids.
/// - `pac_bayes`: confidence levels, sample count and prior grid.
/// - `pretrain`: optional regression of the predictor onto the training
///   optimals before unrolled training.
/// - `baselines`: fixed policies evaluated at startup.
/// - `eval_train`: also evaluate the training split.
/// - `regularize`: add the McAllester regularizer when the predictor is
///   stochastic.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceConfig {
    pub train: TrainOptions,
    pub eval: EvalOptions,
    pub pac_bayes: PacBayesOptions,
    pub pretrain: Option<PretrainMethod>,
    pub baselines: Vec<InitPolicy>,
    pub eval_train: bool,
    pub regularize: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            train: TrainOptions::default(),
            eval: EvalOptions::default(),
            pac_bayes: PacBayesOptions::default(),
            pretrain: None,
            baselines: vec![InitPolicy::ColdStart],
            eval_train: false,
            regularize: true,
        }
    }
}

/// Append-only tables of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitTables {
    pub frac_solved: FracSolvedTable,
    pub convergence_rates: ConvergenceRateTable,
}

impl SplitTables {
    fn new(eval: &EvalOptions) -> Self {
        Self {
            frac_solved: FracSolvedTable::new(eval.accuracies.clone()),
            convergence_rates: ConvergenceRateTable::new(eval.rate_grid.clone()),
        }
    }
}

/// Result of a finalization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalCertificate {
    pub split: Split,
    pub row: FracSolvedRow,
    pub sample_penalty: f64,
    pub mcallester: McAllesterPenalty,
    /// Prior width after rounding to the grid.
    pub rounded_prior: f64,
}

/// One width of the posterior sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    pub sigma: f64,
    pub kl: f64,
    /// Solved fraction per step, averaged over posterior samples.
    pub mean_frac_solved: Array1<f64>,
    /// Per-step lower bound (may be negative).
    pub bound: Array1<f64>,
}

pub struct Workspace<R: Reporter = NullReporter> {
    operator: SolverOperator,
    train: ProblemBatch,
    test: ProblemBatch,
    normalizer: Normalizer,
    state: TrainState,
    config: WorkspaceConfig,
    train_tables: SplitTables,
    test_tables: SplitTables,
    cold_iterations: HashMap<Split, Vec<usize>>,
    pretrain_report: Option<PretrainReport>,
    logger: Logger,
    reporter: R,
}

impl<R: Reporter> Workspace<R> {
    /// Open a run.
    ///
    /// # Errors
    /// Option validation, normalization, or shape disagreements between the
    /// operator, the predictor and the data; wrapped with `setup` context.
    pub fn new(
        operator: SolverOperator, data: ProblemData, params: PredictorParameters, config: WorkspaceConfig,
        reporter: R,
    ) -> L2wsResult<Self> {
        let family = operator.family();
        Self::open(operator, data, params, config, reporter).map_err(|e| e.with_context(family, Split::Train, "setup"))
    }

    fn open(
        operator: SolverOperator, data: ProblemData, params: PredictorParameters, mut config: WorkspaceConfig,
        reporter: R,
    ) -> L2wsResult<Self> {
        config.eval = config.eval.validated()?;
        config.train = config.train.validated()?;
        config.pac_bayes = config.pac_bayes.validated()?;
        let ProblemData { theta, q, optimals, aux, n_train } = data;
        if q.ncols() != operator.instance_dim() {
            return Err(L2wsError::ShapeMismatch {
                what: "instance vector",
                expected: operator.instance_dim(),
                found: q.ncols(),
            });
        }
        if let Some(z) = &optimals {
            if z.ncols() != operator.iterate_dim() {
                return Err(L2wsError::ShapeMismatch {
                    what: "optimal iterate",
                    expected: operator.iterate_dim(),
                    found: z.ncols(),
                });
            }
        }
        if params.input_dim() != theta.ncols() {
            return Err(L2wsError::ShapeMismatch {
                what: "predictor input",
                expected: theta.ncols(),
                found: params.input_dim(),
            });
        }
        if params.output_dim() != operator.iterate_dim() {
            return Err(L2wsError::ShapeMismatch {
                what: "predictor output",
                expected: operator.iterate_dim(),
                found: params.output_dim(),
            });
        }
        if params.operator_params().len() != operator.num_learned_params() {
            return Err(L2wsError::ShapeMismatch {
                what: "learned operator parameters",
                expected: operator.num_learned_params(),
                found: params.operator_params().len(),
            });
        }

        let normalizer = Normalizer::fit(theta.slice(s![..n_train, ..]))?;
        let split = |lo: usize, hi: usize| -> L2wsResult<ProblemBatch> {
            let raw = theta.slice(s![lo..hi, ..]).to_owned();
            let norm = normalizer.normalize(raw.view())?;
            let opt = optimals.as_ref().map(|z| z.slice(s![lo..hi, ..]).to_owned());
            let mut batch = ProblemBatch::new(raw, norm, q.slice(s![lo..hi, ..]).to_owned(), opt)?;
            if let Some(systems) = &aux {
                batch = batch.with_aux(systems[lo..hi].to_vec())?;
            }
            Ok(batch)
        };
        let train = split(0, n_train)?;
        let test = split(n_train, theta.nrows())?;

        let state = TrainState::new(params, config.train.adam.learning_rate);
        let train_tables = SplitTables::new(&config.eval);
        let test_tables = SplitTables::new(&config.eval);
        Ok(Self {
            operator,
            train,
            test,
            normalizer,
            state,
            config,
            train_tables,
            test_tables,
            cold_iterations: HashMap::new(),
            pretrain_report: None,
            logger: logging::discard_logger(),
            reporter,
        })
    }

    /// Replace the (discarding) default logger.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn family(&self) -> AlgorithmFamily {
        self.operator.family()
    }

    pub fn operator(&self) -> &SolverOperator {
        &self.operator
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn batch(&self, split: Split) -> &ProblemBatch {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    pub fn state(&self) -> &TrainState {
        &self.state
    }

    pub fn params(&self) -> &PredictorParameters {
        self.state.params()
    }

    pub fn tables(&self, split: Split) -> &SplitTables {
        match split {
            Split::Train => &self.train_tables,
            Split::Test => &self.test_tables,
        }
    }

    pub fn pretrain_report(&self) -> Option<&PretrainReport> {
        self.pretrain_report.as_ref()
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Snapshot of the current parameters as named arrays.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::from_params(self.state.params())
    }

    /// Restore parameters from a checkpoint; optimizer moments restart.
    ///
    /// # Errors
    /// Malformed checkpoints or a structure differing from the current
    /// parameters.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> L2wsResult<()> {
        let params = checkpoint.to_params()?;
        let current = self.state.params();
        if params.to_flat().len() != current.to_flat().len()
            || params.is_stochastic() != current.is_stochastic()
        {
            return Err(L2wsError::ShapeMismatch {
                what: "checkpoint parameters",
                expected: current.to_flat().len(),
                found: params.to_flat().len(),
            });
        }
        self.state.reset_params(params);
        info!(self.logger, "restored checkpoint"; "epoch" => self.state.epoch());
        Ok(())
    }

    /// Certification budget for `policy`.
    ///
    /// A prior outside the grid range gives an infinite budget, which
    /// certifies zero.
    ///
    /// # Errors
    /// Invalid confidence settings.
    pub fn penalty(&self, policy: InitPolicy) -> L2wsResult<f64> {
        let pb = &self.config.pac_bayes;
        let params = self.state.params();
        if policy.is_learned() && params.is_stochastic() {
            let budget = mcallester_budget(params, self.train.len(), pb.delta, &pb.grid)?;
            if budget.total.is_infinite() {
                warn!(self.logger, "prior outside grid range, bound is vacuous";
                    "prior" => params.prior_log_width().map(f64::exp),
                    "c" => pb.grid.c,
                );
            }
            Ok(budget.total)
        } else {
            Ok(no_learning_penalty(self.train.len(), pb.delta)?)
        }
    }

    /// Evaluate `policy` on `split`, append table rows, and report.
    ///
    /// # Errors
    /// Any fatal evaluation or certification error, with context.
    pub fn evaluate(&mut self, split: Split, policy: InitPolicy) -> L2wsResult<EvaluationResult> {
        let family = self.operator.family();
        self.evaluate_inner(split, policy).map_err(|e| e.with_context(family, split, policy.label()))
    }

    fn evaluate_inner(&mut self, split: Split, policy: InitPolicy) -> L2wsResult<EvaluationResult> {
        let epoch = self.state.epoch();
        let label = match policy {
            InitPolicy::Learned => format!("learned_epoch_{epoch}"),
            other => other.label().to_string(),
        };
        let result = {
            let batch = match split {
                Split::Train => &self.train,
                Split::Test => &self.test,
            };
            let params = self.state.params();
            let sources = WarmStartSources {
                operator: &self.operator,
                params,
                train_theta: self.train.theta().view(),
                train_optimals: self.train.optimals().map(|z| z.view()),
            };
            let z0 = policy.initial_iterates(&sources, batch)?;
            EvaluationEngine::new(&self.operator, &self.config.eval).evaluate(
                z0.view(),
                batch,
                params.operator_params().view(),
            )?
        };
        let penalty = self.penalty(policy)?;
        self.record(split, policy, label, penalty, &result)?;
        Ok(result)
    }

    fn record(
        &mut self, split: Split, policy: InitPolicy, label: String, penalty: f64, result: &EvaluationResult,
    ) -> L2wsResult<()> {
        let use_kl = self.config.pac_bayes.use_kl_inverse;
        let mut cache = KlInverseCache::new();
        let basis = result.metric_basis(self.config.train.supervised);
        let curve = mean_curve(basis.view());
        let mean_loss = curve.iter().next_back().copied().unwrap_or(f64::NAN);
        let tables = match split {
            Split::Train => &mut self.train_tables,
            Split::Test => &mut self.test_tables,
        };
        let frac_row = tables.frac_solved.append(label.clone(), basis.view(), penalty, use_kl, &mut cache)?.clone();
        let rate_row =
            tables.convergence_rates.append(label.clone(), basis.view(), penalty, use_kl, &mut cache)?.clone();

        let eval = &self.config.eval;
        let iters = iterations_to_accuracy(curve.view(), &eval.iteration_accuracies);
        if policy == InitPolicy::ColdStart {
            self.cold_iterations.insert(split, iters.clone());
        }
        let reduction = self.cold_iterations.get(&split).map(|base| percent_reduction(&iters, base));
        let percentiles = eval.percentiles.iter().map(|&p| (p, percentile_curve(basis.view(), p))).collect();

        info!(self.logger, "evaluation";
            "split" => split.label(),
            "label" => label.as_str(),
            "final_mean" => mean_loss,
            "penalty" => penalty,
            "time_per_instance" => result.time_per_instance,
            "kl_cache_hits" => cache.hits(),
        );
        if !result.failures.is_empty() {
            warn!(self.logger, "instances failed during evaluation";
                "split" => split.label(), "label" => label.as_str(), "count" => result.failures.len());
        }
        if !result.divergences.is_empty() {
            debug!(self.logger, "divergent instances"; "label" => label.as_str(), "count" => result.divergences.len());
        }

        let report = EvalReport {
            split,
            label,
            epoch: self.state.epoch(),
            mean_curve: curve,
            frac_solved: frac_row,
            convergence_rates: rate_row,
            penalty,
            iterations_to_accuracy: iters,
            percent_reduction: reduction,
            percentiles,
            mean_loss,
            time_per_instance: result.time_per_instance,
            failures: result.failures.len(),
            divergences: result.divergences.len(),
        };
        self.reporter.report_eval(&report);
        Ok(())
    }

    /// Regress the predictor onto the training optimals; stochastic
    /// parameters keep their posterior widths and only move their mean.
    ///
    /// # Errors
    /// Missing optimals or optimizer failures, with `pretrain` context.
    pub fn pretrain(&mut self, method: &PretrainMethod) -> L2wsResult<PretrainReport> {
        let family = self.operator.family();
        let run = || -> L2wsResult<(PredictorParameters, PretrainReport)> {
            let test = self.test.optimals().map(|_| &self.test);
            let (fitted, report) = pretrain(
                self.state.params(),
                &self.train,
                test,
                method,
                &self.config.train.adam,
                self.config.train.seed,
            )?;
            let params = self.state.params().with_mean_layers(fitted.mean_layers().to_vec())?;
            Ok((params, report))
        };
        let (params, report) = run().map_err(|e| e.with_context(family, Split::Train, "pretrain"))?;
        self.state.reset_params(params);
        info!(self.logger, "pretraining finished";
            "train_loss" => report.train_loss,
            "test_loss" => report.test_loss,
            "iterations" => report.iterations,
        );
        self.pretrain_report = Some(report);
        Ok(report)
    }

    /// Baseline evaluations, optional pretraining, and the epoch-0 learned
    /// evaluation.
    ///
    /// # Errors
    /// The first failing phase.
    pub fn run_startup(&mut self) -> L2wsResult<()> {
        for policy in self.config.baselines.clone() {
            self.evaluate_splits(policy)?;
        }
        if let Some(method) = self.config.pretrain.clone() {
            self.pretrain(&method)?;
        }
        self.evaluate_splits(InitPolicy::Learned)
    }

    fn evaluate_splits(&mut self, policy: InitPolicy) -> L2wsResult<()> {
        if self.config.eval_train {
            self.evaluate(Split::Train, policy)?;
        }
        self.evaluate(Split::Test, policy)?;
        Ok(())
    }

    /// Train until the configured epoch count.
    ///
    /// # Errors
    /// The first batch-level failure (state stays at the last committed
    /// batch) or evaluation failure.
    pub fn train(&mut self) -> L2wsResult<()> {
        let family = self.operator.family();
        let epochs = self.config.train.schedule.epochs;
        let every = self.config.train.eval_every_epochs;
        while self.state.epoch() < epochs {
            let pac = self.objective();
            let block = {
                let trainer = Trainer::new(&self.operator, &self.train, &self.config.train, pac)?;
                trainer.train_block(&mut self.state)
            }
            .map_err(|e| e.with_context(family, Split::Train, "learned"))?;
            if block.epochs == 0 {
                break;
            }
            let decayed = self.state.observe_plateau(&self.config.train.decay);
            info!(self.logger, "epoch block";
                "first_epoch" => block.first_epoch,
                "epochs" => block.epochs,
                "mean_loss" => mean(&block.batch_losses),
                "moving_average" => block.moving_average,
                "time_per_epoch" => block.time_per_epoch,
            );
            if decayed {
                info!(self.logger, "learning rate decayed"; "learning_rate" => self.state.learning_rate());
            }
            if block.failures > 0 {
                warn!(self.logger, "instances failed during training"; "count" => block.failures);
            }
            self.reporter.report_train(&TrainReport {
                first_epoch: block.first_epoch,
                epochs: block.epochs,
                batch_losses: block.batch_losses,
                moving_average: block.moving_average,
                time_per_epoch: block.time_per_epoch,
                learning_rate: self.state.learning_rate(),
            });
            self.write_test_loss()?;

            let epoch = self.state.epoch();
            if block.first_epoch / every != epoch / every || epoch >= epochs {
                self.evaluate_splits(InitPolicy::Learned)?;
            }
        }
        Ok(())
    }

    fn objective(&self) -> Option<PacBayesObjective> {
        (self.config.regularize && self.state.params().is_stochastic())
            .then(|| PacBayesObjective { options: self.config.pac_bayes, n_train: self.train.len() })
    }

    /// Unrolled training loss of the mean predictor on the test split.
    fn write_test_loss(&mut self) -> L2wsResult<f64> {
        let family = self.operator.family();
        let params = self.state.params();
        let train_opts = &self.config.train;
        let spec = UnrollSpec {
            unrolls: train_opts.schedule.train_unrolls,
            weighting: train_opts.weighting,
            supervised: train_opts.supervised,
        };
        let out = loss_and_gradient(
            &self.operator,
            params.mean_layers(),
            params.operator_params().view(),
            &self.test,
            &spec,
        )
        .map_err(|e| e.with_context(family, Split::Test, "learned"))?;
        let pb = &self.config.pac_bayes;
        let penalty = match self.objective() {
            Some(_) => Some(
                mcallester_budget(params, self.train.len(), pb.delta, &pb.grid)
                    .map_err(|e| L2wsError::from(e).with_context(family, Split::Test, "learned"))?
                    .total,
            ),
            None => None,
        };
        let report = TestReport {
            iteration: self.state.iteration(),
            epoch: self.state.epoch(),
            train_moving_average: self.state.moving_average(),
            test_loss: out.loss,
            penalty,
            posterior_variance: params.posterior_variance_stats(),
            prior: params.prior_log_width().map(f64::exp),
            mean_squared_weight: params.mean_squared_weight(),
        };
        debug!(self.logger, "test loss"; "iteration" => report.iteration, "test_loss" => out.loss, "penalty" => penalty);
        self.reporter.report_test(&report);
        Ok(out.loss)
    }

    /// Certify `split` by sampling `num_samples` predictors from the
    /// posterior (prior rounded to the grid). Train uses the composed
    /// sample-then-McAllester budget, test the McAllester budget alone.
    ///
    /// # Errors
    /// [`BoundError::DeterministicParameters`] without a posterior, plus
    /// evaluation failures; with context.
    pub fn finalize(&mut self, split: Split) -> L2wsResult<FinalCertificate> {
        let family = self.operator.family();
        let cert = self.finalize_inner(split).map_err(|e| e.with_context(family, split, FINAL_LABEL))?;
        self.tables_mut(split).frac_solved.push(cert.row.clone());
        Ok(cert)
    }

    fn tables_mut(&mut self, split: Split) -> &mut SplitTables {
        match split {
            Split::Train => &mut self.train_tables,
            Split::Test => &mut self.test_tables,
        }
    }

    fn finalize_inner(&self, split: Split) -> L2wsResult<FinalCertificate> {
        let pb = &self.config.pac_bayes;
        let PredictorParameters::Stochastic { mean, log_var, prior_log_width, operator } = self.state.params() else {
            return Err(BoundError::DeterministicParameters.into());
        };
        let rounded_prior = match pb.grid.round(prior_log_width.exp()) {
            Ok(rounded) => rounded,
            Err(BoundError::PriorOutOfRange { prior, .. }) => {
                warn!(self.logger, "prior outside grid range, bound is vacuous"; "prior" => prior, "c" => pb.grid.c);
                prior
            }
            Err(e) => return Err(e.into()),
        };
        let params =
            PredictorParameters::stochastic(mean.clone(), log_var.clone(), rounded_prior.ln(), operator.clone())?;
        let mcallester = mcallester_budget(&params, self.train.len(), pb.delta, &pb.grid)?;
        let sample_penalty = sample_convergence_penalty(pb.num_samples, pb.delta2)?;

        let batch = self.batch(split);
        let engine = EvaluationEngine::new(&self.operator, &self.config.eval);
        let mut draws = Vec::with_capacity(pb.num_samples);
        for i in 0..pb.num_samples {
            let sampled = params.sample(&mut sample_rng(self.config.train.seed, i))?;
            let z0 = sampled.predict(batch.theta().view())?;
            let out = engine.evaluate(z0.view(), batch, sampled.operator_params().view())?;
            draws.push(out.metric_basis(self.config.train.supervised));
        }
        let residuals = stack_draws(&draws, self.config.eval.eval_unrolls)?;

        let composition = match split {
            Split::Train => Composition::SampleThenMcAllester,
            Split::Test => Composition::McAllesterOnly,
        };
        let mut cache = KlInverseCache::new();
        let per_accuracy = self
            .config
            .eval
            .accuracies
            .iter()
            .map(|&tau| -> BoundResult<CertifiedCurve> {
                let certs = frac_solved(residuals.view(), tau)
                    .iter()
                    .map(|&p| certify_final(p, sample_penalty, mcallester.total, composition, pb.use_kl_inverse, &mut cache))
                    .collect::<BoundResult<Vec<_>>>()?;
                Ok(CertifiedCurve::from_certified(&certs))
            })
            .collect::<BoundResult<Vec<_>>>()?;

        info!(self.logger, "finalization penalties";
            "split" => split.label(),
            "kl" => mcallester.kl,
            "union" => mcallester.union,
            "confidence" => mcallester.confidence,
            "mcallester" => mcallester.total,
            "sample_convergence" => sample_penalty,
            "rounded_prior" => rounded_prior,
        );
        Ok(FinalCertificate {
            split,
            row: FracSolvedRow { label: FINAL_LABEL.to_string(), per_accuracy },
            sample_penalty,
            mcallester,
            rounded_prior,
        })
    }

    /// Scan isotropic posterior widths around the current mean on the
    /// training split. Each width samples `num_samples` predictors
    /// `μ + σ·ε`, averages their solved fraction at `accuracy`, and bounds
    /// it with [`sweep_bound`].
    ///
    /// # Errors
    /// Non-positive widths or accuracy, evaluation or bound failures.
    pub fn sweep_posterior_width(&self, sigmas: &[f64], accuracy: f64) -> L2wsResult<Vec<SweepPoint>> {
        let family = self.operator.family();
        self.sweep_inner(sigmas, accuracy).map_err(|e| e.with_context(family, Split::Train, "sweep"))
    }

    fn sweep_inner(&self, sigmas: &[f64], accuracy: f64) -> L2wsResult<Vec<SweepPoint>> {
        if !(accuracy > 0.0) {
            return Err(L2wsError::InvalidOption { name: "accuracy", value: accuracy, reason: "must be > 0" });
        }
        let pb = &self.config.pac_bayes;
        let params = self.state.params();
        let engine = EvaluationEngine::new(&self.operator, &self.config.eval);
        let mut points = Vec::with_capacity(sigmas.len());
        for (w, &sigma) in sigmas.iter().enumerate() {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(L2wsError::InvalidOption { name: "sigma", value: sigma, reason: "must be finite and > 0" });
            }
            let kl = shared_sigma_kl(params, sigma);
            let mut total = Array1::<f64>::zeros(self.config.eval.eval_unrolls);
            for i in 0..pb.num_samples {
                let noise = params.draw_noise(&mut sample_rng(self.config.train.seed, w * pb.num_samples + i))?;
                let layers: Vec<DenseLayer> = params
                    .mean_layers()
                    .iter()
                    .zip(&noise)
                    .map(|(m, e)| DenseLayer { weights: &m.weights + &(&e.weights * sigma), bias: &m.bias + &(&e.bias * sigma) })
                    .collect();
                let sampled = PredictorParameters::deterministic(layers, params.operator_params().clone())?;
                let z0 = sampled.predict(self.train.theta().view())?;
                let out = engine.evaluate(z0.view(), &self.train, sampled.operator_params().view())?;
                total += &frac_solved(out.metric_basis(self.config.train.supervised).view(), accuracy);
            }
            let mean_frac_solved = total / pb.num_samples as f64;
            let bound = mean_frac_solved
                .iter()
                .map(|&fs| sweep_bound(fs, kl, self.train.len(), pb.delta))
                .collect::<BoundResult<Array1<f64>>>()?;
            info!(self.logger, "posterior width";
                "sigma" => sigma,
                "kl" => kl,
                "final_bound" => bound.iter().next_back().copied().unwrap_or(f64::NAN),
            );
            points.push(SweepPoint { sigma, kl, mean_frac_solved, bound });
        }
        Ok(points)
    }

    /// Startup, training, and (for stochastic predictors) finalization of
    /// both splits.
    ///
    /// # Errors
    /// The first failing phase.
    pub fn run(&mut self) -> L2wsResult<()> {
        info!(self.logger, "run started";
            "family" => self.operator.family().to_string(),
            "n_train" => self.train.len(),
            "n_test" => self.test.len(),
        );
        self.run_startup()?;
        self.train()?;
        if self.state.params().is_stochastic() {
            self.finalize(Split::Train)?;
            self.finalize(Split::Test)?;
        }
        Ok(())
    }

    /// Close the run and hand back the reporter.
    pub fn finish(self) -> R {
        info!(self.logger, "run finished"; "epochs" => self.state.epoch(), "iterations" => self.state.iteration());
        self.reporter
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stack_draws(draws: &[Array2<f64>], k_total: usize) -> L2wsResult<Array2<f64>> {
    let views: Vec<ArrayView2<'_, f64>> = draws.iter().map(|d| d.view()).collect();
    ndarray::concatenate(Axis(0), &views).map_err(|_| L2wsError::ShapeMismatch {
        what: "sampled residual columns",
        expected: k_total,
        found: draws.iter().map(|d| d.ncols()).find(|&c| c != k_total).unwrap_or(0),
    })
}
