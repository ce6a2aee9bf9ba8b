//! rust_l2ws — learned warm starts for fixed-point solvers.
//!
//! Purpose
//! -------
//! Serve as the crate root for Rust callers and as the PyO3 bridge that exposes
//! the certification and normalization routines to Python via the `_rust_l2ws`
//! extension module. The crate trains a predictor that maps a parametric
//! problem instance to an initial iterate, unrolls solver steps to train and
//! evaluate it against baselines, and certifies solved fractions with
//! PAC-Bayes bounds.
//!
//! Key behaviors
//! -------------
//! - Re-export the core modules: `operators` (fixed-point steps), `predictor`
//!   (network, normalization, checkpoints), `training` (unrolled trainer),
//!   `evaluation` (engine, baselines, tables), `pac_bayes` (bounds),
//!   `closed_loop` (receding-horizon rollouts) and `workspace` (run
//!   orchestration).
//! - With `python-bindings`, define the `PacBayesCalculator` and
//!   `Normalization` classes and the `#[pymodule]` initializer.
//!
//! Invariants & assumptions
//! ------------------------
//! - All numerical work lives in the inner modules; this file performs only
//!   FFI glue, input validation, and error mapping.
//! - Every crate error converts to a Python `ValueError` at the boundary.
//!
//! Conventions
//! -----------
//! - Python-exposed classes live under `_rust_l2ws.pac_bayes` and
//!   `_rust_l2ws.predictor`.
//! - Arrays cross the boundary as float64 NumPy arrays; parameter matrices
//!   are `N × d`, one instance per row.
//!
//! Downstream usage
//! ----------------
//! - Native Rust code builds a [`workspace::Workspace`] from a
//!   [`operators::SolverOperator`], problem data and initial predictor
//!   parameters, then calls `run` or the individual phases.
//! - Python callers use the extension for certificates and normalization of
//!   data produced elsewhere.
//!
//! Testing notes
//! -------------
//! - Numerical behavior is unit-tested inside each module; `tests/` holds
//!   end-to-end training, baseline and certification pipelines.

pub mod closed_loop;
pub mod evaluation;
pub mod operators;
pub mod optimization;
pub mod pac_bayes;
pub mod predictor;
pub mod training;
pub mod utils;
pub mod workspace;

#[cfg(feature = "python-bindings")]
use numpy::{IntoPyArray, PyArray2};

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use crate::{
    pac_bayes::{
        bounds::{Composition, PacBayesOptions, certify, certify_final},
        kl::{KlInverseCache, invert_kl},
        penalty::{no_learning_penalty, sample_convergence_penalty},
    },
    predictor::normalization::Normalizer,
    utils::{extract_f64_array, extract_f64_matrix},
};

/// PacBayesCalculator — Python-facing certificate calculator.
///
/// Purpose
/// -------
/// Turn empirical solved fractions into certified lower bounds from Python,
/// with a per-instance inverse-KL cache shared across calls.
///
/// Parameters
/// ----------
/// Constructed from Python via
/// `PacBayesCalculator(delta=0.01, delta2=0.01, num_samples=20, c=2.0, b=100.0, use_kl_inverse=True)`:
/// - `delta`, `delta2`: `f64`
///   Confidence levels in `(0, 1)` of the McAllester and sample-convergence
///   bounds.
/// - `num_samples`: `usize`
///   Posterior samples drawn during finalization (≥ 1).
/// - `c`, `b`: `f64`
///   Prior grid constants.
/// - `use_kl_inverse`: `bool`
///   Report the KL-inverse bound (else the Pinsker bound).
///
/// Fields
/// ------
/// - `options`: [`PacBayesOptions`]
/// - `cache`: [`KlInverseCache`] reused across calls.
///
/// Notes
/// -----
/// - Infeasible budgets certify 0 rather than raising.
#[cfg(feature = "python-bindings")]
#[pyclass(module = "rust_l2ws.pac_bayes")]
pub struct PacBayesCalculator {
    options: PacBayesOptions,
    cache: KlInverseCache,
}

#[cfg(feature = "python-bindings")]
#[pymethods]
impl PacBayesCalculator {
    #[new]
    #[pyo3(signature = (delta = 0.01, delta2 = 0.01, num_samples = 20, c = 2.0, b = 100.0, use_kl_inverse = true))]
    pub fn new(
        delta: f64, delta2: f64, num_samples: usize, c: f64, b: f64, use_kl_inverse: bool,
    ) -> PyResult<PacBayesCalculator> {
        let options = PacBayesOptions::new(delta, delta2, num_samples, c, b, use_kl_inverse)?;
        Ok(PacBayesCalculator { options, cache: KlInverseCache::new() })
    }

    /// Largest `p ≥ q` with `KL(q‖p) ≤ c`.
    #[staticmethod]
    pub fn invert_kl(q: f64, c: f64) -> PyResult<f64> {
        Ok(invert_kl(q, c)?)
    }

    /// `log(2/δ)/n_train`.
    pub fn no_learning_penalty(&self, n_train: usize) -> PyResult<f64> {
        Ok(no_learning_penalty(n_train, self.options.delta)?)
    }

    /// `log(2/δ₂)/num_samples`.
    pub fn sample_convergence_penalty(&self) -> PyResult<f64> {
        Ok(sample_convergence_penalty(self.options.num_samples, self.options.delta2)?)
    }

    /// `(certified, pinsker)` per empirical fraction for one penalty.
    #[pyo3(signature = (frac_solved, penalty))]
    pub fn certify<'py>(
        &mut self, py: Python<'py>, frac_solved: &Bound<'py, PyAny>, penalty: f64,
    ) -> PyResult<(Vec<f64>, Vec<f64>)> {
        let arr = extract_f64_array(py, frac_solved)?;
        let values = arr.as_slice().map_err(|_| PyValueError::new_err("frac_solved must be contiguous"))?;
        let mut certified = Vec::with_capacity(values.len());
        let mut pinsker = Vec::with_capacity(values.len());
        for &p in values {
            let cert = certify(p, penalty, self.options.use_kl_inverse, &mut self.cache)?;
            certified.push(cert.certified);
            pinsker.push(cert.pinsker);
        }
        Ok((certified, pinsker))
    }

    /// Finalization bound: train composes the sample-convergence and
    /// McAllester budgets, test uses the McAllester budget alone.
    #[pyo3(signature = (frac_solved, mcallester_penalty, train = true))]
    pub fn certify_final<'py>(
        &mut self, py: Python<'py>, frac_solved: &Bound<'py, PyAny>, mcallester_penalty: f64, train: bool,
    ) -> PyResult<(Vec<f64>, Vec<f64>)> {
        let arr = extract_f64_array(py, frac_solved)?;
        let values = arr.as_slice().map_err(|_| PyValueError::new_err("frac_solved must be contiguous"))?;
        let sample = sample_convergence_penalty(self.options.num_samples, self.options.delta2)?;
        let composition = if train { Composition::SampleThenMcAllester } else { Composition::McAllesterOnly };
        let mut certified = Vec::with_capacity(values.len());
        let mut pinsker = Vec::with_capacity(values.len());
        for &p in values {
            let cert = certify_final(p, sample, mcallester_penalty, composition, self.options.use_kl_inverse, &mut self.cache)?;
            certified.push(cert.certified);
            pinsker.push(cert.pinsker);
        }
        Ok((certified, pinsker))
    }

    /// Cached inverse-KL evaluations that were reused.
    #[getter]
    pub fn cache_hits(&self) -> usize {
        self.cache.hits()
    }
}

/// Normalization — frozen per-column standardization from Python.
///
/// Fit once on training rows via `Normalization(train)`, then apply the same
/// statistics to any split.
#[cfg(feature = "python-bindings")]
#[pyclass(module = "rust_l2ws.predictor")]
pub struct Normalization {
    inner: Normalizer,
}

#[cfg(feature = "python-bindings")]
#[pymethods]
impl Normalization {
    #[new]
    pub fn fit<'py>(train: &Bound<'py, PyAny>) -> PyResult<Normalization> {
        let arr = extract_f64_matrix(train)?;
        Ok(Normalization { inner: Normalizer::fit(arr.as_array())? })
    }

    pub fn normalize<'py>(&self, py: Python<'py>, x: &Bound<'py, PyAny>) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let arr = extract_f64_matrix(x)?;
        Ok(self.inner.normalize(arr.as_array())?.into_pyarray_bound(py))
    }

    pub fn denormalize<'py>(&self, py: Python<'py>, x: &Bound<'py, PyAny>) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let arr = extract_f64_matrix(x)?;
        Ok(self.inner.denormalize(arr.as_array())?.into_pyarray_bound(py))
    }

    #[getter]
    pub fn mean(&self) -> Vec<f64> {
        self.inner.mean().to_vec()
    }

    #[getter]
    pub fn std(&self) -> Vec<f64> {
        self.inner.std().to_vec()
    }
}

/// _rust_l2ws — PyO3 module initializer.
///
/// Creates the `pac_bayes` and `predictor` submodules, attaches them to the
/// parent module, and registers them in `sys.modules` so dotted imports
/// work.
#[cfg(feature = "python-bindings")]
#[pymodule]
fn _rust_l2ws<'py>(_py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    let pac_bayes_mod = PyModule::new_bound(_py, "pac_bayes")?;
    let predictor_mod = PyModule::new_bound(_py, "predictor")?;
    pac_bayes_mod.add_class::<PacBayesCalculator>()?;
    predictor_mod.add_class::<Normalization>()?;
    m.add_submodule(&pac_bayes_mod)?;
    m.add_submodule(&predictor_mod)?;

    // Manually add submodules into sys.modules to allow for dot notation.
    let modules = _py.import_bound("sys")?.getattr("modules")?;
    modules.set_item("rust_l2ws.pac_bayes", pac_bayes_mod)?;
    modules.set_item("rust_l2ws.predictor", predictor_mod)?;
    Ok(())
}
