//! Predictor parameters: deterministic weights or a Gaussian posterior.
//!
//! Purpose
//! -------
//! Represent everything the trainer updates as one value: the network
//! weights (or their posterior mean and log-variance plus a learned prior
//! width) and the learned operator parameters (step sizes, thresholds).
//!
//! Key behaviors
//! -------------
//! - [`PredictorParameters::predict`] maps normalized parameters to initial
//!   iterates with the deterministic weights or the posterior mean.
//! - [`PredictorParameters::sample`] draws `w = μ + exp(½·logvar)·ε`.
//! - [`PredictorParameters::to_flat`] / [`PredictorParameters::with_flat`]
//!   convert to and from the flat vector seen by the optimizers.
//!
//! Invariants & assumptions
//! ------------------------
//! - Layer widths chain (`outputs(i) == inputs(i + 1)`).
//! - For stochastic parameters, mean and log-variance layers have identical
//!   shapes layer by layer; every constructor checks this.
//! - All values are finite.
//!
//! Conventions
//! -----------
//! Flat layout, weights row-major:
//! - deterministic: `[W₀, b₀, W₁, b₁, …, operator]`
//! - stochastic: `[μ-layers…, logvar-layers…, prior_log_width, operator]`
use crate::predictor::{
    errors::{PredictorError, PredictorResult},
    network::{DenseLayer, Mlp},
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand::distributions::Distribution;
use statrs::distribution::Normal;

/// Relative scale of the initial posterior standard deviation, `σ = |w|/100`
/// (stored as `logvar = log(|w|/100)`, matching the usual initialization).
pub const POSTERIOR_INIT_RATIO: f64 = 100.0;

/// Lower bound on the initial posterior log-variance for zero weights.
pub const LOG_VAR_FLOOR: f64 = -30.0;

#[derive(Debug, Clone, PartialEq)]
pub enum PredictorParameters {
    Deterministic {
        layers: Vec<DenseLayer>,
        operator: Array1<f64>,
    },
    Stochastic {
        mean: Vec<DenseLayer>,
        log_var: Vec<DenseLayer>,
        prior_log_width: f64,
        operator: Array1<f64>,
    },
}

/// Summary of one array of weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub sq_norm: f64,
}

impl SummaryStats {
    fn of<'a>(values: impl Iterator<Item = &'a f64> + Clone) -> Self {
        let n = values.clone().count().max(1) as f64;
        let mean = values.clone().sum::<f64>() / n;
        let var = values.clone().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
            min: values.clone().copied().fold(f64::INFINITY, f64::min),
            max: values.clone().copied().fold(f64::NEG_INFINITY, f64::max),
            sq_norm: values.map(|v| v * v).sum(),
        }
    }
}

/// Per-layer weight and bias statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStats {
    pub layer: usize,
    pub weights: SummaryStats,
    pub bias: SummaryStats,
}

impl PredictorParameters {
    /// Deterministic parameters.
    ///
    /// # Errors
    /// Architecture, shape or non-finite errors from validation.
    pub fn deterministic(layers: Vec<DenseLayer>, operator: Array1<f64>) -> PredictorResult<Self> {
        let params = PredictorParameters::Deterministic { layers, operator };
        params.validate()?;
        Ok(params)
    }

    /// Stochastic parameters.
    ///
    /// # Errors
    /// [`PredictorError::StructureMismatch`] when `mean` and `log_var`
    /// differ in shape, plus the deterministic checks.
    pub fn stochastic(
        mean: Vec<DenseLayer>, log_var: Vec<DenseLayer>, prior_log_width: f64, operator: Array1<f64>,
    ) -> PredictorResult<Self> {
        let params = PredictorParameters::Stochastic { mean, log_var, prior_log_width, operator };
        params.validate()?;
        Ok(params)
    }

    /// Posterior centred on the current weights with
    /// `logvar = log(|w| / 100)` (floored).
    pub fn to_stochastic(&self, prior_log_width: f64) -> PredictorParameters {
        let mean = self.mean_layers().to_vec();
        let log_var = mean
            .iter()
            .map(|l| l.map(|w| (w.abs() / POSTERIOR_INIT_RATIO).ln().max(LOG_VAR_FLOOR)))
            .collect();
        PredictorParameters::Stochastic {
            mean,
            log_var,
            prior_log_width,
            operator: self.operator_params().clone(),
        }
    }

    /// Cap the prior log-width of a stochastic predictor at `max`;
    /// deterministic parameters pass through.
    pub fn with_prior_log_width_at_most(mut self, max: f64) -> PredictorParameters {
        if let PredictorParameters::Stochastic { prior_log_width, .. } = &mut self {
            *prior_log_width = prior_log_width.min(max);
        }
        self
    }

    /// Check chaining widths, mean/variance structure, and finiteness.
    ///
    /// # Errors
    /// The first violated invariant.
    pub fn validate(&self) -> PredictorResult<()> {
        Mlp::new(self.mean_layers())?;
        if let PredictorParameters::Stochastic { mean, log_var, prior_log_width, .. } = self {
            if mean.len() != log_var.len() {
                return Err(PredictorError::StructureMismatch {
                    layer: mean.len().min(log_var.len()),
                    reason: "different number of layers",
                });
            }
            for (i, (m, v)) in mean.iter().zip(log_var).enumerate() {
                if !m.same_shape(v) {
                    return Err(PredictorError::StructureMismatch { layer: i, reason: "layer shapes differ" });
                }
            }
            if !prior_log_width.is_finite() {
                return Err(PredictorError::NonFiniteWeight { name: "prior_log_width".into(), index: 0 });
            }
        }
        if let Some(index) = self.to_flat().iter().position(|v| !v.is_finite()) {
            return Err(PredictorError::NonFiniteWeight { name: "parameters".into(), index });
        }
        Ok(())
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(self, PredictorParameters::Stochastic { .. })
    }

    /// Deterministic weights, or the posterior mean.
    pub fn mean_layers(&self) -> &[DenseLayer] {
        match self {
            PredictorParameters::Deterministic { layers, .. } => layers,
            PredictorParameters::Stochastic { mean, .. } => mean,
        }
    }

    pub fn log_var_layers(&self) -> Option<&[DenseLayer]> {
        match self {
            PredictorParameters::Deterministic { .. } => None,
            PredictorParameters::Stochastic { log_var, .. } => Some(log_var),
        }
    }

    pub fn prior_log_width(&self) -> Option<f64> {
        match self {
            PredictorParameters::Deterministic { .. } => None,
            PredictorParameters::Stochastic { prior_log_width, .. } => Some(*prior_log_width),
        }
    }

    /// Learned operator parameters (empty for families without any).
    pub fn operator_params(&self) -> &Array1<f64> {
        match self {
            PredictorParameters::Deterministic { operator, .. }
            | PredictorParameters::Stochastic { operator, .. } => operator,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.mean_layers().first().map_or(0, DenseLayer::inputs)
    }

    pub fn output_dim(&self) -> usize {
        self.mean_layers().last().map_or(0, DenseLayer::outputs)
    }

    /// Number of network weights and biases (one copy for stochastic).
    pub fn num_network_params(&self) -> usize {
        self.mean_layers().iter().map(DenseLayer::num_params).sum()
    }

    /// Initial iterates for a batch of normalized parameters.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] on an input-width mismatch.
    pub fn predict(&self, inputs: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        Mlp::new(self.mean_layers())?.forward(inputs)
    }

    /// Same parameters with the (mean) network replaced.
    ///
    /// # Errors
    /// [`PredictorError::StructureMismatch`] if a layer changes shape.
    pub fn with_mean_layers(&self, layers: Vec<DenseLayer>) -> PredictorResult<PredictorParameters> {
        let current = self.mean_layers();
        if layers.len() != current.len() {
            return Err(PredictorError::StructureMismatch {
                layer: layers.len().min(current.len()),
                reason: "replacement has a different number of layers",
            });
        }
        if let Some(i) = layers.iter().zip(current).position(|(a, b)| !a.same_shape(b)) {
            return Err(PredictorError::StructureMismatch { layer: i, reason: "replacement layer shape differs" });
        }
        let mut out = self.clone();
        match &mut out {
            PredictorParameters::Deterministic { layers: l, .. } => *l = layers,
            PredictorParameters::Stochastic { mean, .. } => *mean = layers,
        }
        out.validate()?;
        Ok(out)
    }

    /// Standard-normal noise shaped like the network.
    ///
    /// # Errors
    /// Never in practice; kept for the distribution constructor.
    pub fn draw_noise<R: Rng + ?Sized>(&self, rng: &mut R) -> PredictorResult<Vec<DenseLayer>> {
        let normal = Normal::new(0.0, 1.0).map_err(|_| PredictorError::InvalidScale { value: 1.0 })?;
        Ok(self
            .mean_layers()
            .iter()
            .map(|l| DenseLayer {
                weights: l.weights.mapv(|_| normal.sample(rng)),
                bias: l.bias.mapv(|_| normal.sample(rng)),
            })
            .collect())
    }

    /// Reparameterized weights `μ + exp(½·logvar)·ε`; the deterministic
    /// weights when there is no posterior.
    ///
    /// # Errors
    /// [`PredictorError::StructureMismatch`] if `noise` has another shape.
    pub fn perturbed_layers(&self, noise: &[DenseLayer]) -> PredictorResult<Vec<DenseLayer>> {
        let PredictorParameters::Stochastic { mean, log_var, .. } = self else {
            return Ok(self.mean_layers().to_vec());
        };
        if noise.len() != mean.len() {
            return Err(PredictorError::StructureMismatch {
                layer: noise.len().min(mean.len()),
                reason: "noise has a different number of layers",
            });
        }
        let mut out = Vec::with_capacity(mean.len());
        for (i, ((m, v), e)) in mean.iter().zip(log_var).zip(noise).enumerate() {
            if !m.same_shape(e) {
                return Err(PredictorError::StructureMismatch { layer: i, reason: "noise shape differs" });
            }
            out.push(DenseLayer {
                weights: &m.weights + &(v.weights.mapv(|lv| (0.5 * lv).exp()) * &e.weights),
                bias: &m.bias + &(v.bias.mapv(|lv| (0.5 * lv).exp()) * &e.bias),
            });
        }
        Ok(out)
    }

    /// One deterministic predictor drawn from the posterior.
    ///
    /// # Errors
    /// Propagates noise construction errors.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PredictorResult<PredictorParameters> {
        if !self.is_stochastic() {
            return Ok(self.clone());
        }
        let noise = self.draw_noise(rng)?;
        Ok(PredictorParameters::Deterministic {
            layers: self.perturbed_layers(&noise)?,
            operator: self.operator_params().clone(),
        })
    }

    /// Flatten in the documented layout.
    pub fn to_flat(&self) -> Array1<f64> {
        let mut flat = Vec::new();
        match self {
            PredictorParameters::Deterministic { layers, operator } => {
                push_layers(layers, &mut flat);
                flat.extend(operator.iter());
            }
            PredictorParameters::Stochastic { mean, log_var, prior_log_width, operator } => {
                push_layers(mean, &mut flat);
                push_layers(log_var, &mut flat);
                flat.push(*prior_log_width);
                flat.extend(operator.iter());
            }
        }
        Array1::from(flat)
    }

    /// Same structure, values taken from `flat`.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] if `flat` has the wrong length;
    /// [`PredictorError::NonFiniteWeight`] for non-finite entries.
    pub fn with_flat(&self, flat: ArrayView1<'_, f64>) -> PredictorResult<PredictorParameters> {
        let expected = self.to_flat().len();
        if flat.len() != expected {
            return Err(PredictorError::ShapeMismatch {
                what: "flat parameter vector",
                expected,
                found: flat.len(),
            });
        }
        if let Some(index) = flat.iter().position(|v| !v.is_finite()) {
            return Err(PredictorError::NonFiniteWeight { name: "parameters".into(), index });
        }
        let values = flat.to_vec();
        let mut at = 0;
        let out = match self {
            PredictorParameters::Deterministic { layers, operator } => {
                let layers = take_layers(layers, &values, &mut at);
                let operator = Array1::from(values[at..at + operator.len()].to_vec());
                PredictorParameters::Deterministic { layers, operator }
            }
            PredictorParameters::Stochastic { mean, log_var, operator, .. } => {
                let mean = take_layers(mean, &values, &mut at);
                let log_var = take_layers(log_var, &values, &mut at);
                let prior_log_width = values[at];
                at += 1;
                let operator = Array1::from(values[at..at + operator.len()].to_vec());
                PredictorParameters::Stochastic { mean, log_var, prior_log_width, operator }
            }
        };
        Ok(out)
    }

    /// Weight and bias summaries of the (mean) network, layer by layer.
    pub fn weight_stats(&self) -> Vec<LayerStats> {
        self.mean_layers()
            .iter()
            .enumerate()
            .map(|(layer, l)| LayerStats {
                layer,
                weights: SummaryStats::of(l.weights.iter()),
                bias: SummaryStats::of(l.bias.iter()),
            })
            .collect()
    }

    /// Mean and standard deviation of the posterior variances `exp(logvar)`.
    pub fn posterior_variance_stats(&self) -> Option<(f64, f64)> {
        let layers = self.log_var_layers()?;
        let vars: Vec<f64> = layers
            .iter()
            .flat_map(|l| l.weights.iter().chain(l.bias.iter()))
            .map(|lv| lv.exp())
            .collect();
        let stats = SummaryStats::of(vars.iter());
        Some((stats.mean, stats.std))
    }

    /// Mean of `w²` over all (mean) network weights and biases.
    pub fn mean_squared_weight(&self) -> f64 {
        let n = self.num_network_params().max(1) as f64;
        self.mean_layers()
            .iter()
            .flat_map(|l| l.weights.iter().chain(l.bias.iter()))
            .map(|w| w * w)
            .sum::<f64>()
            / n
    }
}

pub(crate) fn push_layers(layers: &[DenseLayer], flat: &mut Vec<f64>) {
    for layer in layers {
        flat.extend(layer.weights.iter());
        flat.extend(layer.bias.iter());
    }
}

fn take_layers(template: &[DenseLayer], values: &[f64], at: &mut usize) -> Vec<DenseLayer> {
    template
        .iter()
        .map(|l| {
            let (rows, cols) = l.weights.dim();
            let w_end = *at + rows * cols;
            let weights = Array2::from_shape_fn((rows, cols), |(r, c)| values[*at + r * cols + c]);
            let bias = Array1::from(values[w_end..w_end + rows].to_vec());
            *at = w_end + rows;
            DenseLayer { weights, bias }
        })
        .collect()
}
