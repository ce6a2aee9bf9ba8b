//! Tagged dispatch over the closed set of operator families.
//!
//! [`SolverOperator::build`] is the operator factory: it takes a family tag
//! and the static problem data for that family and returns one enum value
//! that implements [`FixedPointStep`] by delegation. Training, evaluation and
//! the closed loop only ever see `SolverOperator`.
use crate::operators::{
    errors::{OperatorError, OperatorResult},
    family::AlgorithmFamily,
    gradient::{ExtragradientOperator, GradientStepOperator},
    instance::{ProblemInstance, QpSystem},
    linalg::ConeSpec,
    maml::MamlOperator,
    osqp::OsqpOperator,
    prox_grad::ProxGradOperator,
    scs::ScsOperator,
    traits::{FixedPointStep, Vjp},
};
use ndarray::{Array1, Array2, ArrayView1};

/// Static (instance-independent) data for each family.
#[derive(Debug)]
pub enum StaticProblemData {
    /// Design matrix `A`, ℓ₁ weight `λ`, optional fixed step, and the number
    /// of learned per-step blocks (training unroll length).
    ProxGrad { a: Array2<f64>, lambda: f64, step: Option<f64>, learned_steps: usize },
    /// Problem sizes, optional shared QP system, relaxation `α`.
    Osqp { n: usize, m: usize, system: Option<QpSystem>, alpha: f64 },
    /// Constraint matrix, cone, relaxation `α`.
    Scs { a: Array2<f64>, cone: ConeSpec, alpha: f64 },
    GradientDescent { p: Array2<f64>, step: Option<f64> },
    Extragradient { m: Array2<f64>, step: Option<f64> },
    /// Number of polynomial coefficients, task sample count, inner step.
    MamlRegression { num_coeffs: usize, num_points: usize, step: f64 },
}

impl StaticProblemData {
    fn kind(&self) -> &'static str {
        match self {
            StaticProblemData::ProxGrad { .. } => "proximal-gradient data",
            StaticProblemData::Osqp { .. } => "OSQP data",
            StaticProblemData::Scs { .. } => "SCS data",
            StaticProblemData::GradientDescent { .. } => "gradient-descent data",
            StaticProblemData::Extragradient { .. } => "extragradient data",
            StaticProblemData::MamlRegression { .. } => "regression-task data",
        }
    }
}

#[derive(Debug)]
pub enum SolverOperator {
    ProxGrad(ProxGradOperator),
    Osqp(OsqpOperator),
    Scs(ScsOperator),
    GradientDescent(GradientStepOperator),
    Extragradient(ExtragradientOperator),
    MamlRegression(MamlOperator),
}

impl SolverOperator {
    /// Build the operator for `family` from its static data.
    ///
    /// # Errors
    /// - [`OperatorError::IncompatibleStaticData`] when `data` belongs to
    ///   another family.
    /// - Any construction error of the chosen family.
    pub fn build(family: AlgorithmFamily, data: StaticProblemData) -> OperatorResult<Self> {
        let op = match (family, data) {
            (
                AlgorithmFamily::ProxGrad(variant),
                StaticProblemData::ProxGrad { a, lambda, step, learned_steps },
            ) => SolverOperator::ProxGrad(ProxGradOperator::new(
                variant,
                a,
                lambda,
                step,
                learned_steps,
            )?),
            (AlgorithmFamily::Osqp, StaticProblemData::Osqp { n, m, system, alpha }) => {
                SolverOperator::Osqp(OsqpOperator::new(n, m, system, alpha)?)
            }
            (AlgorithmFamily::Scs, StaticProblemData::Scs { a, cone, alpha }) => {
                SolverOperator::Scs(ScsOperator::new(a, cone, alpha)?)
            }
            (AlgorithmFamily::GradientDescent, StaticProblemData::GradientDescent { p, step }) => {
                SolverOperator::GradientDescent(GradientStepOperator::new(p, step)?)
            }
            (AlgorithmFamily::Extragradient, StaticProblemData::Extragradient { m, step }) => {
                SolverOperator::Extragradient(ExtragradientOperator::new(m, step)?)
            }
            (
                AlgorithmFamily::MamlRegression,
                StaticProblemData::MamlRegression { num_coeffs, num_points, step },
            ) => SolverOperator::MamlRegression(MamlOperator::new(num_coeffs, num_points, step)?),
            (family, other) => {
                return Err(OperatorError::IncompatibleStaticData { family, reason: other.kind() });
            }
        };
        Ok(op)
    }

    fn inner(&self) -> &dyn FixedPointStep {
        match self {
            SolverOperator::ProxGrad(op) => op,
            SolverOperator::Osqp(op) => op,
            SolverOperator::Scs(op) => op,
            SolverOperator::GradientDescent(op) => op,
            SolverOperator::Extragradient(op) => op,
            SolverOperator::MamlRegression(op) => op,
        }
    }
}

impl FixedPointStep for SolverOperator {
    fn family(&self) -> AlgorithmFamily {
        self.inner().family()
    }

    fn iterate_dim(&self) -> usize {
        self.inner().iterate_dim()
    }

    fn instance_dim(&self) -> usize {
        self.inner().instance_dim()
    }

    fn num_learned_params(&self) -> usize {
        self.inner().num_learned_params()
    }

    fn init_learned_params(&self) -> Array1<f64> {
        self.inner().init_learned_params()
    }

    fn cold_start(&self) -> Array1<f64> {
        self.inner().cold_start()
    }

    fn step(
        &self, k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>,
    ) -> OperatorResult<Array1<f64>> {
        self.inner().step(k, z, instance, params)
    }

    fn residual(&self, z_prev: ArrayView1<'_, f64>, z_next: ArrayView1<'_, f64>) -> f64 {
        self.inner().residual(z_prev, z_next)
    }

    fn distance_to_optimum(&self, z: ArrayView1<'_, f64>, z_star: ArrayView1<'_, f64>) -> f64 {
        self.inner().distance_to_optimum(z, z_star)
    }

    fn vjp(
        &self, k: usize, z: ArrayView1<'_, f64>, instance: &ProblemInstance<'_>,
        params: ArrayView1<'_, f64>, v: ArrayView1<'_, f64>,
    ) -> OperatorResult<Vjp> {
        self.inner().vjp(k, z, instance, params, v)
    }
}
