//! Feed-forward ReLU network used as the warm-start predictor.
//!
//! Inputs are batched row-wise (`B × d_in`); every hidden layer applies
//! `relu(x Wᵀ + b)` and the output layer is linear. [`Mlp::forward_cached`]
//! keeps the per-layer inputs and pre-activations so [`Mlp::backward`] can
//! return weight and bias gradients for an upstream gradient on the output.
use crate::predictor::errors::{PredictorError, PredictorResult};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// Default standard deviation of the Gaussian weight initialization.
pub const DEFAULT_INIT_SCALE: f64 = 1e-2;

/// One affine layer; `weights` is `out × in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseLayer {
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self { weights: Array2::zeros((outputs, inputs)), bias: Array1::zeros(outputs) }
    }

    /// Gaussian `N(0, scale²)` weights and biases.
    pub fn gaussian<R: Rng + ?Sized>(inputs: usize, outputs: usize, normal: &Normal, rng: &mut R) -> Self {
        Self {
            weights: Array2::from_shape_simple_fn((outputs, inputs), || normal.sample(rng)),
            bias: Array1::from_shape_simple_fn(outputs, || normal.sample(rng)),
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn num_params(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    /// Elementwise map over weights and bias.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self { weights: self.weights.mapv(&f), bias: self.bias.mapv(&f) }
    }

    pub fn same_shape(&self, other: &DenseLayer) -> bool {
        self.weights.dim() == other.weights.dim() && self.bias.len() == other.bias.len()
    }
}

/// Values kept from a forward pass for backpropagation.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    /// Input to each layer (`inputs[0]` is the network input).
    inputs: Vec<Array2<f64>>,
    /// Pre-activation of each hidden layer.
    pre_activations: Vec<Array2<f64>>,
}

/// Borrowed view of a layer stack as a network.
#[derive(Debug, Clone, Copy)]
pub struct Mlp<'a> {
    layers: &'a [DenseLayer],
}

impl<'a> Mlp<'a> {
    /// Wrap `layers`, checking that consecutive widths chain.
    ///
    /// # Errors
    /// - [`PredictorError::InvalidArchitecture`] for an empty stack.
    /// - [`PredictorError::ShapeMismatch`] for non-chaining widths or bias
    ///   lengths.
    pub fn new(layers: &'a [DenseLayer]) -> PredictorResult<Self> {
        if layers.is_empty() {
            return Err(PredictorError::InvalidArchitecture { reason: "no layers" });
        }
        for (i, layer) in layers.iter().enumerate() {
            if layer.bias.len() != layer.outputs() {
                return Err(PredictorError::ShapeMismatch {
                    what: "layer bias",
                    expected: layer.outputs(),
                    found: layer.bias.len(),
                });
            }
            if i > 0 && layers[i - 1].outputs() != layer.inputs() {
                return Err(PredictorError::ShapeMismatch {
                    what: "layer input width",
                    expected: layers[i - 1].outputs(),
                    found: layer.inputs(),
                });
            }
        }
        Ok(Self { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].inputs()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }

    fn check_input(&self, x: &ArrayView2<'_, f64>) -> PredictorResult<()> {
        if x.ncols() != self.input_dim() {
            return Err(PredictorError::ShapeMismatch {
                what: "predictor input width",
                expected: self.input_dim(),
                found: x.ncols(),
            });
        }
        Ok(())
    }

    /// Network output for a batch of inputs.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] on an input-width mismatch.
    pub fn forward(&self, x: ArrayView2<'_, f64>) -> PredictorResult<Array2<f64>> {
        self.check_input(&x)?;
        let last = self.layers.len() - 1;
        let mut h = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let pre = h.dot(&layer.weights.t()) + &layer.bias;
            h = if i < last { pre.mapv(relu) } else { pre };
        }
        Ok(h)
    }

    /// Forward pass that also returns the backpropagation cache.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] on an input-width mismatch.
    pub fn forward_cached(&self, x: ArrayView2<'_, f64>) -> PredictorResult<(Array2<f64>, ForwardCache)> {
        self.check_input(&x)?;
        let last = self.layers.len() - 1;
        let mut cache = ForwardCache { inputs: Vec::with_capacity(last + 1), pre_activations: Vec::new() };
        let mut h = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let pre = h.dot(&layer.weights.t()) + &layer.bias;
            cache.inputs.push(h);
            h = if i < last {
                let act = pre.mapv(relu);
                cache.pre_activations.push(pre);
                act
            } else {
                pre
            };
        }
        Ok((h, cache))
    }

    /// Gradients of `Σ grad_out ⊙ output` with respect to every layer.
    ///
    /// # Errors
    /// [`PredictorError::ShapeMismatch`] when `grad_out` does not match the
    /// cached batch and output width.
    pub fn backward(
        &self, cache: &ForwardCache, grad_out: ArrayView2<'_, f64>,
    ) -> PredictorResult<Vec<DenseLayer>> {
        let batch = cache.inputs.first().map_or(0, |x| x.nrows());
        if grad_out.dim() != (batch, self.output_dim()) {
            return Err(PredictorError::ShapeMismatch {
                what: "output gradient",
                expected: batch * self.output_dim(),
                found: grad_out.len(),
            });
        }
        let mut grads = vec![DenseLayer::zeros(0, 0); self.layers.len()];
        let mut delta = grad_out.to_owned();
        for i in (0..self.layers.len()).rev() {
            if i < self.layers.len() - 1 {
                let mask = cache.pre_activations[i].mapv(|p| if p > 0.0 { 1.0 } else { 0.0 });
                delta = delta * mask;
            }
            grads[i] = DenseLayer {
                weights: delta.t().dot(&cache.inputs[i]),
                bias: delta.sum_axis(Axis(0)),
            };
            if i > 0 {
                delta = delta.dot(&self.layers[i].weights);
            }
        }
        Ok(grads)
    }
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Gaussian-initialized layer stack for widths `sizes = [d_in, h₁, …, d_out]`.
///
/// # Errors
/// - [`PredictorError::InvalidArchitecture`] for fewer than two widths or a
///   zero width.
/// - [`PredictorError::InvalidScale`] for a non-positive or non-finite scale.
pub fn init_layers(sizes: &[usize], scale: f64, seed: u64) -> PredictorResult<Vec<DenseLayer>> {
    if sizes.len() < 2 {
        return Err(PredictorError::InvalidArchitecture { reason: "need input and output widths" });
    }
    if sizes.contains(&0) {
        return Err(PredictorError::InvalidArchitecture { reason: "layer widths must be positive" });
    }
    if !scale.is_finite() || scale <= 0.0 {
        return Err(PredictorError::InvalidScale { value: scale });
    }
    let normal = Normal::new(0.0, scale).map_err(|_| PredictorError::InvalidScale { value: scale })?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Ok(sizes.windows(2).map(|w| DenseLayer::gaussian(w[0], w[1], &normal, &mut rng)).collect())
}
