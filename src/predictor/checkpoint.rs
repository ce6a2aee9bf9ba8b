//! Checkpoint payloads: predictor parameters as a set of named arrays.
//!
//! Purpose
//! -------
//! Convert [`PredictorParameters`] to and from a map of named, shaped `f64`
//! arrays, and encode that map as JSON. Persisting the bytes is up to the
//! caller.
//!
//! Key behaviors
//! -------------
//! - Deterministic layout: `layer_{i}_weight`, `layer_{i}_bias`, `operator`.
//! - Stochastic layout: `mean_layer_{i}_*`, `log_var_layer_{i}_*`,
//!   `prior_log_width` (shape `[]`), `operator`.
//! - JSON uses `serde_json` with `float_roundtrip`, so a save/load cycle
//!   reproduces every `f64` bit for bit.
//!
//! Invariants & assumptions
//! ------------------------
//! - Non-finite values cannot be represented in JSON and are rejected when
//!   encoding.
//! - Loading re-validates the parameter structure.
use crate::predictor::{
    errors::{PredictorError, PredictorResult},
    network::DenseLayer,
    params::PredictorParameters,
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    Deterministic,
    Stochastic,
}

/// Row-major data with its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NamedArray {
    fn matrix(m: &Array2<f64>) -> Self {
        Self { shape: vec![m.nrows(), m.ncols()], data: m.iter().copied().collect() }
    }

    fn vector(v: &Array1<f64>) -> Self {
        Self { shape: vec![v.len()], data: v.to_vec() }
    }

    fn scalar(x: f64) -> Self {
        Self { shape: Vec::new(), data: vec![x] }
    }

    fn check(&self, name: &str) -> PredictorResult<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(PredictorError::CorruptArray {
                name: name.to_string(),
                expected,
                found: self.data.len(),
            });
        }
        Ok(())
    }

    fn to_matrix(&self, name: &str) -> PredictorResult<Array2<f64>> {
        self.check(name)?;
        if self.shape.len() != 2 {
            return Err(PredictorError::ShapeMismatch {
                what: "checkpoint matrix rank",
                expected: 2,
                found: self.shape.len(),
            });
        }
        Array2::from_shape_vec((self.shape[0], self.shape[1]), self.data.clone())
            .map_err(|e| PredictorError::Checkpoint { reason: e.to_string() })
    }

    fn to_vector(&self, name: &str) -> PredictorResult<Array1<f64>> {
        self.check(name)?;
        if self.shape.len() != 1 {
            return Err(PredictorError::ShapeMismatch {
                what: "checkpoint vector rank",
                expected: 1,
                found: self.shape.len(),
            });
        }
        Ok(Array1::from(self.data.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub kind: CheckpointKind,
    pub arrays: BTreeMap<String, NamedArray>,
}

impl Checkpoint {
    pub fn from_params(params: &PredictorParameters) -> Self {
        let mut arrays = BTreeMap::new();
        let kind = match params {
            PredictorParameters::Deterministic { layers, operator } => {
                insert_layers(&mut arrays, "", layers);
                arrays.insert("operator".to_string(), NamedArray::vector(operator));
                CheckpointKind::Deterministic
            }
            PredictorParameters::Stochastic { mean, log_var, prior_log_width, operator } => {
                insert_layers(&mut arrays, "mean_", mean);
                insert_layers(&mut arrays, "log_var_", log_var);
                arrays.insert("prior_log_width".to_string(), NamedArray::scalar(*prior_log_width));
                arrays.insert("operator".to_string(), NamedArray::vector(operator));
                CheckpointKind::Stochastic
            }
        };
        Self { kind, arrays }
    }

    /// Rebuild and validate the parameters.
    ///
    /// # Errors
    /// Missing or corrupt arrays, and any parameter validation error.
    pub fn to_params(&self) -> PredictorResult<PredictorParameters> {
        let operator = self.get("operator")?.to_vector("operator")?;
        match self.kind {
            CheckpointKind::Deterministic => {
                PredictorParameters::deterministic(self.layers("")?, operator)
            }
            CheckpointKind::Stochastic => {
                let prior = self.get("prior_log_width")?;
                prior.check("prior_log_width")?;
                let prior_log_width = *prior.data.first().ok_or(PredictorError::CorruptArray {
                    name: "prior_log_width".into(),
                    expected: 1,
                    found: 0,
                })?;
                PredictorParameters::stochastic(
                    self.layers("mean_")?,
                    self.layers("log_var_")?,
                    prior_log_width,
                    operator,
                )
            }
        }
    }

    /// # Errors
    /// [`PredictorError::NonFiniteWeight`] for NaN/∞ entries, or a
    /// serialization error.
    pub fn to_json(&self) -> PredictorResult<String> {
        for (name, array) in &self.arrays {
            if let Some(index) = array.data.iter().position(|v| !v.is_finite()) {
                return Err(PredictorError::NonFiniteWeight { name: name.clone(), index });
            }
        }
        Ok(serde_json::to_string(self)?)
    }

    /// # Errors
    /// [`PredictorError::Checkpoint`] for malformed JSON.
    pub fn from_json(text: &str) -> PredictorResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn get(&self, name: &str) -> PredictorResult<&NamedArray> {
        self.arrays.get(name).ok_or_else(|| PredictorError::MissingArray { name: name.to_string() })
    }

    fn layers(&self, prefix: &str) -> PredictorResult<Vec<DenseLayer>> {
        let mut layers = Vec::new();
        loop {
            let w_name = format!("{prefix}layer_{}_weight", layers.len());
            let Some(w) = self.arrays.get(&w_name) else { break };
            let b_name = format!("{prefix}layer_{}_bias", layers.len());
            layers.push(DenseLayer {
                weights: w.to_matrix(&w_name)?,
                bias: self.get(&b_name)?.to_vector(&b_name)?,
            });
        }
        if layers.is_empty() {
            return Err(PredictorError::MissingArray { name: format!("{prefix}layer_0_weight") });
        }
        Ok(layers)
    }
}

fn insert_layers(arrays: &mut BTreeMap<String, NamedArray>, prefix: &str, layers: &[DenseLayer]) {
    for (i, layer) in layers.iter().enumerate() {
        arrays.insert(format!("{prefix}layer_{i}_weight"), NamedArray::matrix(&layer.weights));
        arrays.insert(format!("{prefix}layer_{i}_bias"), NamedArray::vector(&layer.bias));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::network::init_layers;
    use ndarray::array;

    // Scope
    // -----
    // Bit-exact JSON round trips and corrupt/missing array handling.

    fn bits(p: &PredictorParameters) -> Vec<u64> {
        p.to_flat().iter().map(|v| v.to_bits()).collect()
    }

    #[test]
    // Purpose
    // -------
    // Saving and loading reproduces bit-identical arrays for both parameter
    // shapes.
    //
    // Given
    // -----
    // Randomly initialized weights (full-precision mantissas) with operator
    // parameters, and the stochastic counterpart.
    //
    // Expect
    // ------
    // Identical bit patterns after `to_json` → `from_json` → `to_params`.
    fn json_round_trip_is_bit_exact() {
        let layers = init_layers(&[3, 5, 2], 0.37, 2024).unwrap();
        let det = PredictorParameters::deterministic(layers, array![0.1, 1.0 / 3.0]).unwrap();
        for params in [det.clone(), det.to_stochastic(-1.2345678901234567)] {
            let json = Checkpoint::from_params(&params).to_json().unwrap();
            let loaded = Checkpoint::from_json(&json).unwrap().to_params().unwrap();
            assert_eq!(bits(&loaded), bits(&params));
            assert_eq!(loaded, params);
        }
    }

    #[test]
    // Purpose
    // -------
    // Missing and corrupt arrays are reported by name.
    //
    // Given
    // -----
    // A checkpoint without `operator`, and one whose weight data is short.
    //
    // Expect
    // ------
    // `MissingArray { operator }` and `CorruptArray` for the weight.
    fn missing_and_corrupt_arrays_are_reported() {
        let det = PredictorParameters::deterministic(
            vec![DenseLayer::zeros(2, 1)],
            Array1::zeros(0),
        )
        .unwrap();
        let mut ckpt = Checkpoint::from_params(&det);
        ckpt.arrays.remove("operator");
        assert_eq!(ckpt.to_params().unwrap_err(), PredictorError::MissingArray { name: "operator".into() });

        let mut ckpt = Checkpoint::from_params(&det);
        if let Some(w) = ckpt.arrays.get_mut("layer_0_weight") {
            w.data.pop();
        }
        assert!(matches!(ckpt.to_params(), Err(PredictorError::CorruptArray { .. })));
    }

    #[test]
    // Purpose
    // -------
    // Non-finite values are rejected before encoding.
    //
    // Given
    // -----
    // A deterministic checkpoint with a NaN bias injected.
    //
    // Expect
    // ------
    // `NonFiniteWeight` naming the bias array.
    fn non_finite_values_are_not_encoded() {
        let det = PredictorParameters::deterministic(vec![DenseLayer::zeros(1, 1)], Array1::zeros(0))
            .unwrap();
        let mut ckpt = Checkpoint::from_params(&det);
        if let Some(b) = ckpt.arrays.get_mut("layer_0_bias") {
            b.data[0] = f64::NAN;
        }
        assert!(matches!(
            ckpt.to_json(),
            Err(PredictorError::NonFiniteWeight { ref name, .. }) if name == "layer_0_bias"
        ));
    }
}
