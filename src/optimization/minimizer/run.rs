//! Runs an `argmin` L-BFGS solver on an [`Objective`] and collects the
//! final state into an [`OptimOutcome`].
use crate::optimization::{
    errors::OptResult,
    minimizer::{
        adapter::ArgMinAdapter,
        traits::{MinimizeOptions, Objective, OptimOutcome},
        types::{Grad, Theta},
    },
};
#[cfg(feature = "obs_slog")]
use argmin::core::{CostFunction, Gradient};
use argmin::core::{Executor, State};
#[cfg(feature = "obs_slog")]
use argmin_math::ArgminL2Norm;
#[cfg(feature = "obs_slog")]
use slog::info;

/// Minimize from `theta0` with a configured L-BFGS solver.
///
/// With `obs_slog` and `opts.verbose`, the starting cost and gradient norm
/// go to the terminal logger and a slog observer follows every iteration.
///
/// # Errors
/// - Any `argmin` runtime error, converted through `From<argmin::core::Error>`.
/// - Validation errors while constructing the outcome.
pub fn run_lbfgs<'a, F, S>(
    theta0: Theta, opts: &MinimizeOptions, problem: ArgMinAdapter<'a, F>, solver: S,
) -> OptResult<OptimOutcome>
where
    F: Objective,
    S: argmin::core::Solver<
            ArgMinAdapter<'a, F>,
            argmin::core::IterState<Theta, Grad, (), (), (), f64>,
        > + Send
        + 'static,
{
    #[cfg(feature = "obs_slog")]
    if opts.verbose {
        log_initial_state(&theta0, &problem)?;
    }
    let mut optimizer = Executor::new(problem, solver).configure(|state| state.param(theta0));
    #[cfg(feature = "obs_slog")]
    if opts.verbose {
        let observer = argmin_observer_slog::SlogLogger::term_noblock();
        optimizer = optimizer.add_observer(observer, argmin::core::observers::ObserverMode::Always);
    }
    if let Some(max_iter) = opts.tols.max_iter {
        optimizer = optimizer.configure(|state| state.max_iters(max_iter as u64));
    }

    let mut state = optimizer.run()?.state().clone();
    let (iterations, cost) = (state.get_iter(), state.get_best_cost());
    let counts = state.get_func_counts().clone();
    let status = state.get_termination_status().clone();
    let grad = state.take_gradient();
    OptimOutcome::new(state.take_best_param(), cost, status, iterations, counts, grad)
}

// ---- Helper Methods ----

#[cfg(feature = "obs_slog")]
fn log_initial_state<F>(theta0: &Theta, problem: &ArgMinAdapter<'_, F>) -> OptResult<()>
where
    F: Objective,
{
    let cost = problem.cost(theta0)?;
    let grad_norm = problem.gradient(theta0).ok().map(|g| g.l2_norm());
    let logger = crate::workspace::logging::terminal_logger();
    info!(logger, "pretraining start"; "cost" => cost, "grad_norm" => grad_norm);
    Ok(())
}
