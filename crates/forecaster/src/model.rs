//! Sequence model loading and inference
//!
//! The trained network is a stack of LSTM layers followed by a dense head,
//! exported as a safetensors file. Tensor names follow the layer order:
//!
//! - `lstm_{k}.kernel` `[input, 4 * units]`
//! - `lstm_{k}.recurrent_kernel` `[units, 4 * units]`
//! - `lstm_{k}.bias` `[4 * units]`
//! - `dense.kernel` `[units, outputs]`, `dense.bias` `[outputs]`
//!
//! Gate columns are ordered input, forget, cell, output.

use crate::tensor::{add_bias, matmul, sigmoid, tanh, SafeTensorBuffer, Tensor, TensorView};
use std::path::Path;
use tracing::{debug, info, trace};
use wattcast_common::{Result, WattcastError};

/// A trained model mapping `[batch, steps, features]` to `[batch, outputs]`
pub trait SequenceModel: Send + Sync {
    fn predict(&self, input: &Tensor<f32>) -> Result<Tensor<f32>>;

    /// Window length the model was trained on, when recorded
    fn window_size(&self) -> Option<usize> {
        None
    }
}

/// Weights of one LSTM layer
#[derive(Debug, Clone)]
struct LstmLayer {
    input_dim: usize,
    units: usize,
    kernel: Tensor<f32>,
    recurrent_kernel: Tensor<f32>,
    bias: Vec<f32>,
}

/// Fully connected output layer
#[derive(Debug, Clone)]
struct DenseLayer {
    kernel: Tensor<f32>,
    bias: Vec<f32>,
}

/// Stacked LSTM with a dense head
#[derive(Debug, Clone)]
pub struct LstmModel {
    layers: Vec<LstmLayer>,
    head: DenseLayer,
    window_size: Option<usize>,
}

fn load_2d(buffer: &SafeTensorBuffer, name: &str) -> Result<Tensor<f32>> {
    let view = buffer.require(name)?;
    if view.shape().len() != 2 {
        return Err(WattcastError::model(format!(
            "{} must be 2D, got shape {:?}",
            name,
            view.shape()
        )));
    }
    Tensor::new(view.to_f32_vec(), view.shape().to_vec())
}

fn load_1d(buffer: &SafeTensorBuffer, name: &str, len: usize) -> Result<Vec<f32>> {
    let view = buffer.require(name)?;
    if view.shape() != [len] {
        return Err(WattcastError::model(format!(
            "{} must have shape [{}], got {:?}",
            name,
            len,
            view.shape()
        )));
    }
    Ok(view.to_f32_vec())
}

impl LstmModel {
    /// Load model weights from a safetensors file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading sequence model from {}", path.display());

        let buffer = SafeTensorBuffer::open(path)?;

        let mut layers: Vec<LstmLayer> = Vec::new();
        while buffer.get_tensor(&format!("lstm_{}.kernel", layers.len())).is_some() {
            let k = layers.len();
            let kernel = load_2d(&buffer, &format!("lstm_{}.kernel", k))?;
            let (input_dim, gates) = (kernel.shape[0], kernel.shape[1]);

            if gates == 0 || gates % 4 != 0 {
                return Err(WattcastError::model(format!(
                    "lstm_{}.kernel has {} columns, expected a positive multiple of 4",
                    k, gates
                )));
            }
            let units = gates / 4;

            if let Some(prev) = layers.last() {
                if prev.units != input_dim {
                    return Err(WattcastError::model(format!(
                        "lstm_{} expects {} inputs but lstm_{} emits {} units",
                        k,
                        input_dim,
                        k - 1,
                        prev.units
                    )));
                }
            }

            let recurrent_kernel = load_2d(&buffer, &format!("lstm_{}.recurrent_kernel", k))?;
            if recurrent_kernel.shape != [units, gates] {
                return Err(WattcastError::model(format!(
                    "lstm_{}.recurrent_kernel must have shape [{}, {}], got {:?}",
                    k, units, gates, recurrent_kernel.shape
                )));
            }

            let bias = load_1d(&buffer, &format!("lstm_{}.bias", k), gates)?;

            debug!("lstm_{}: {} inputs, {} units", k, input_dim, units);
            layers.push(LstmLayer {
                input_dim,
                units,
                kernel,
                recurrent_kernel,
                bias,
            });
        }

        let last_units = layers
            .last()
            .map(|layer| layer.units)
            .ok_or_else(|| WattcastError::model(format!("No lstm_0.kernel in {}", path.display())))?;

        let kernel = load_2d(&buffer, "dense.kernel")?;
        if kernel.shape[0] != last_units {
            return Err(WattcastError::model(format!(
                "dense.kernel expects {} inputs but the last LSTM layer emits {}",
                kernel.shape[0], last_units
            )));
        }
        let bias = load_1d(&buffer, "dense.bias", kernel.shape[1])?;

        let window_size = match buffer.metadata().get("window_size") {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
                WattcastError::model(format!("Invalid window_size metadata: {}", raw))
            })?),
            None => None,
        };

        info!(
            "Sequence model loaded: {} LSTM layer(s), {} output(s), window {:?}",
            layers.len(),
            bias.len(),
            window_size
        );

        Ok(Self {
            layers,
            head: DenseLayer { kernel, bias },
            window_size,
        })
    }

    /// Features per time step accepted by the first layer
    pub fn input_features(&self) -> usize {
        self.layers[0].input_dim
    }

    /// Values produced per sequence
    pub fn outputs(&self) -> usize {
        self.head.bias.len()
    }

    /// Run one sequence (`steps * features` values) through the LSTM stack and
    /// return the final hidden state of the last layer
    fn encode(&self, sequence: &[f32], steps: usize) -> Result<Vec<f32>> {
        let mut inputs = sequence.to_vec();

        for layer in &self.layers {
            inputs = Self::run_layer(layer, &inputs, steps)?;
        }

        let units = self.layers[self.layers.len() - 1].units;
        Ok(inputs[inputs.len() - units..].to_vec())
    }

    /// Unroll one layer over the sequence, returning every hidden state
    fn run_layer(layer: &LstmLayer, inputs: &[f32], steps: usize) -> Result<Vec<f32>> {
        let units = layer.units;
        let mut h = vec![0.0f32; units];
        let mut c = vec![0.0f32; units];
        let mut outputs = Vec::with_capacity(steps * units);

        let kernel = layer.kernel.view();
        let recurrent = layer.recurrent_kernel.view();

        for t in 0..steps {
            let x_t = TensorView::new(&inputs[t * layer.input_dim..(t + 1) * layer.input_dim], vec![1, layer.input_dim])?;
            let mut z = matmul(&x_t, &kernel)?;

            let h_prev = TensorView::new(&h, vec![1, units])?;
            let recurrent_part = matmul(&h_prev, &recurrent)?;
            for (zi, ri) in z.data.iter_mut().zip(&recurrent_part.data) {
                *zi += ri;
            }
            add_bias(&mut z, &layer.bias)?;

            let (gate_i, rest) = z.data.split_at(units);
            let (gate_f, rest) = rest.split_at(units);
            let (gate_c, gate_o) = rest.split_at(units);

            for j in 0..units {
                c[j] = sigmoid(gate_f[j]) * c[j] + sigmoid(gate_i[j]) * tanh(gate_c[j]);
                h[j] = sigmoid(gate_o[j]) * tanh(c[j]);
            }

            outputs.extend_from_slice(&h);
        }

        Ok(outputs)
    }
}

impl SequenceModel for LstmModel {
    fn predict(&self, input: &Tensor<f32>) -> Result<Tensor<f32>> {
        let (batch, steps, features) = match input.shape.as_slice() {
            [b, s, f] => (*b, *s, *f),
            other => {
                return Err(WattcastError::tensor(format!(
                    "model input must be [batch, steps, features], got {:?}",
                    other
                )))
            }
        };

        if features != self.input_features() {
            return Err(WattcastError::tensor(format!(
                "model expects {} feature(s) per step, got {}",
                self.input_features(),
                features
            )));
        }
        if steps == 0 {
            return Err(WattcastError::tensor("model input has no time steps"));
        }

        let view = input.view();
        let outputs = self.outputs();
        let mut data = Vec::with_capacity(batch * outputs);

        for b in 0..batch {
            let hidden = self.encode(view.rows(b, b + 1), steps)?;
            let hidden = TensorView::new(&hidden, vec![1, hidden.len()])?;

            let mut y = matmul(&hidden, &self.head.kernel.view())?;
            add_bias(&mut y, &self.head.bias)?;
            trace!("sequence {} -> {:?}", b, y.data);

            data.extend(y.data);
        }

        Tensor::new(data, vec![batch, outputs])
    }

    fn window_size(&self) -> Option<usize> {
        self.window_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::SafeTensorWriter;
    use tempfile::NamedTempFile;

    struct Cell {
        kernel: [f32; 4],
        recurrent: [f32; 4],
        bias: [f32; 4],
    }

    /// Single-unit, single-feature model file
    fn write_model(cell: &Cell, dense_w: f32, dense_b: f32) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        SafeTensorWriter::new()
            .tensor("lstm_0.kernel", vec![1, 4], cell.kernel.to_vec())
            .unwrap()
            .tensor("lstm_0.recurrent_kernel", vec![1, 4], cell.recurrent.to_vec())
            .unwrap()
            .tensor("lstm_0.bias", vec![4], cell.bias.to_vec())
            .unwrap()
            .tensor("dense.kernel", vec![1, 1], vec![dense_w])
            .unwrap()
            .tensor("dense.bias", vec![1], vec![dense_b])
            .unwrap()
            .write(file.path())
            .unwrap();
        file
    }

    fn sigmoid64(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    /// Scalar LSTM recurrence in f64
    fn reference(cell: &Cell, dense_w: f64, dense_b: f64, xs: &[f64]) -> f64 {
        let (mut h, mut c) = (0.0f64, 0.0f64);
        for &x in xs {
            let z: Vec<f64> = (0..4)
                .map(|g| cell.kernel[g] as f64 * x + cell.recurrent[g] as f64 * h + cell.bias[g] as f64)
                .collect();
            c = sigmoid64(z[1]) * c + sigmoid64(z[0]) * z[2].tanh();
            h = sigmoid64(z[3]) * c.tanh();
        }
        h * dense_w + dense_b
    }

    fn window(values: &[f32]) -> Tensor<f32> {
        Tensor::new(values.to_vec(), vec![1, values.len(), 1]).unwrap()
    }

    #[test]
    fn test_zero_weights_return_dense_bias() {
        let cell = Cell {
            kernel: [0.0; 4],
            recurrent: [0.0; 4],
            bias: [0.0; 4],
        };
        let file = write_model(&cell, 3.0, 0.25);
        let model = LstmModel::load(file.path()).unwrap();

        let out = model.predict(&window(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(out.shape, vec![1, 1]);
        assert_eq!(out.data, vec![0.25]);
    }

    #[test]
    fn test_single_step_cell() {
        let cell = Cell {
            kernel: [0.0, 0.0, 1.0, 0.0],
            recurrent: [0.0; 4],
            bias: [0.0; 4],
        };
        let file = write_model(&cell, 1.0, 0.0);
        let model = LstmModel::load(file.path()).unwrap();

        let out = model.predict(&window(&[1.0])).unwrap();
        let expected = 0.5 * (0.5 * 1.0f64.tanh()).tanh();
        assert!((out.data[0] as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_recurrence_matches_reference() {
        let cell = Cell {
            kernel: [0.5, -0.3, 0.8, 0.1],
            recurrent: [0.2, 0.4, -0.6, 0.3],
            bias: [0.0, 1.0, 0.1, -0.2],
        };
        let file = write_model(&cell, 1.5, 0.05);
        let model = LstmModel::load(file.path()).unwrap();

        let xs = [0.1f32, 0.4, -0.2, 0.9, 0.3];
        let out = model.predict(&window(&xs)).unwrap();

        let xs64: Vec<f64> = xs.iter().map(|&x| x as f64).collect();
        let expected = reference(&cell, 1.5, 0.05, &xs64);
        assert!((out.data[0] as f64 - expected).abs() < 1e-5, "{} vs {}", out.data[0], expected);
    }

    #[test]
    fn test_stacked_layers_and_batch() {
        let file = NamedTempFile::new().unwrap();
        SafeTensorWriter::new()
            .tensor("lstm_0.kernel", vec![1, 8], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8])
            .unwrap()
            .tensor("lstm_0.recurrent_kernel", vec![2, 8], vec![0.05; 16])
            .unwrap()
            .tensor("lstm_0.bias", vec![8], vec![0.0; 8])
            .unwrap()
            .tensor("lstm_1.kernel", vec![2, 4], vec![0.3, -0.1, 0.6, 0.2, -0.4, 0.1, 0.5, 0.3])
            .unwrap()
            .tensor("lstm_1.recurrent_kernel", vec![1, 4], vec![0.1; 4])
            .unwrap()
            .tensor("lstm_1.bias", vec![4], vec![0.0; 4])
            .unwrap()
            .tensor("dense.kernel", vec![1, 1], vec![2.0])
            .unwrap()
            .tensor("dense.bias", vec![1], vec![0.5])
            .unwrap()
            .metadata("window_size", "3")
            .write(file.path())
            .unwrap();

        let model = LstmModel::load(file.path()).unwrap();
        assert_eq!(model.window_size(), Some(3));
        assert_eq!(model.input_features(), 1);

        let batch = Tensor::new(vec![0.1, 0.2, 0.3, 0.9, 0.8, 0.7], vec![2, 3, 1]).unwrap();
        let out = model.predict(&batch).unwrap();
        assert_eq!(out.shape, vec![2, 1]);

        let first = model.predict(&window(&[0.1, 0.2, 0.3])).unwrap();
        let second = model.predict(&window(&[0.9, 0.8, 0.7])).unwrap();
        assert_eq!(out.data, vec![first.data[0], second.data[0]]);
        assert_ne!(first.data[0], second.data[0]);
    }

    #[test]
    fn test_rejects_wrong_input_shape() {
        let cell = Cell {
            kernel: [0.0; 4],
            recurrent: [0.0; 4],
            bias: [0.0; 4],
        };
        let file = write_model(&cell, 1.0, 0.0);
        let model = LstmModel::load(file.path()).unwrap();

        let two_features = Tensor::new(vec![0.0; 6], vec![1, 3, 2]).unwrap();
        assert!(model.predict(&two_features).is_err());

        let flat = Tensor::new(vec![0.0; 3], vec![3]).unwrap();
        assert!(model.predict(&flat).is_err());
    }

    #[test]
    fn test_load_rejects_missing_head() {
        let file = NamedTempFile::new().unwrap();
        SafeTensorWriter::new()
            .tensor("lstm_0.kernel", vec![1, 4], vec![0.0; 4])
            .unwrap()
            .tensor("lstm_0.recurrent_kernel", vec![1, 4], vec![0.0; 4])
            .unwrap()
            .tensor("lstm_0.bias", vec![4], vec![0.0; 4])
            .unwrap()
            .write(file.path())
            .unwrap();

        assert!(LstmModel::load(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_mismatched_recurrent_kernel() {
        let file = NamedTempFile::new().unwrap();
        SafeTensorWriter::new()
            .tensor("lstm_0.kernel", vec![1, 8], vec![0.0; 8])
            .unwrap()
            .tensor("lstm_0.recurrent_kernel", vec![1, 8], vec![0.0; 8])
            .unwrap()
            .tensor("lstm_0.bias", vec![8], vec![0.0; 8])
            .unwrap()
            .tensor("dense.kernel", vec![2, 1], vec![0.0; 2])
            .unwrap()
            .tensor("dense.bias", vec![1], vec![0.0])
            .unwrap()
            .write(file.path())
            .unwrap();

        assert!(LstmModel::load(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(LstmModel::load("/nonexistent/lstm_model.safetensors").is_err());
    }
}
