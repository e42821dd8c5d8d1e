//! Tensor types for CPU inference
//!
//! Row-major dense tensors sized for small sequence models. The model input is
//! `[batch, steps, features]` and weights are 1-D or 2-D.

pub mod ops;
pub mod safetensors;

pub use ops::{add_bias, matmul, sigmoid, tanh};
pub use safetensors::{SafeTensorBuffer, SafeTensorView, SafeTensorWriter, TensorDType};

use wattcast_common::{Result, WattcastError};

/// Tensor shape
pub type Shape = Vec<usize>;

/// Tensor strides
pub type Strides = Vec<usize>;

/// A tensor view with reference semantics
///
/// This type provides a zero-copy view into tensor data.
#[derive(Debug, Clone)]
pub struct TensorView<'a, T> {
    pub data: &'a [T],
    pub shape: Shape,
    pub strides: Strides,
}

impl<'a, T> TensorView<'a, T>
where
    T: Copy,
{
    /// Create a new tensor view, checking that `shape` covers `data` exactly
    pub fn new(data: &'a [T], shape: Shape) -> Result<Self> {
        check_len(data.len(), &shape)?;
        let strides = compute_strides(&shape);
        Ok(Self { data, shape, strides })
    }

    /// Get the total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Calculate the linear index from multi-dimensional indices
    pub fn index(&self, indices: &[usize]) -> usize {
        indices
            .iter()
            .zip(self.strides.iter())
            .map(|(&i, &s)| i * s)
            .sum()
    }

    /// Get a value at the given indices
    pub fn get(&self, indices: &[usize]) -> Option<T> {
        if indices.len() != self.ndim() || indices.iter().zip(&self.shape).any(|(&i, &d)| i >= d) {
            return None;
        }
        self.data.get(self.index(indices)).copied()
    }

    /// Rows `[start, end)` along the first axis, flattened
    pub fn rows(&self, start: usize, end: usize) -> &'a [T] {
        let row_len = self.strides.first().copied().unwrap_or(1);
        &self.data[start * row_len..end * row_len]
    }
}

/// Compute row-major strides from shape
fn compute_strides(shape: &[usize]) -> Strides {
    let mut strides = Vec::with_capacity(shape.len());
    let mut stride: usize = 1;

    for &dim in shape.iter().rev() {
        strides.push(stride);
        stride = stride.saturating_mul(dim);
    }

    strides.reverse();
    strides
}

/// Number of elements a shape holds, or `None` if it overflows `usize`
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

fn check_len(len: usize, shape: &[usize]) -> Result<()> {
    let expected = element_count(shape)
        .ok_or_else(|| WattcastError::tensor(format!("shape {:?} overflows the element count", shape)))?;
    if expected != len {
        return Err(WattcastError::tensor(format!(
            "shape {:?} needs {} elements, got {}",
            shape, expected, len
        )));
    }
    Ok(())
}

/// Owned tensor with heap-allocated data
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub data: Vec<T>,
    pub shape: Shape,
}

impl<T> Tensor<T>
where
    T: Copy,
{
    /// Create a new tensor from data and shape
    pub fn new(data: Vec<T>, shape: Shape) -> Result<Self> {
        check_len(data.len(), &shape)?;
        Ok(Self { data, shape })
    }

    /// Get the total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get a view of this tensor
    pub fn view(&self) -> TensorView<'_, T> {
        TensorView {
            data: &self.data,
            shape: self.shape.clone(),
            strides: compute_strides(&self.shape),
        }
    }

    /// Reshape the tensor
    pub fn reshape(mut self, new_shape: Shape) -> Result<Self> {
        check_len(self.len(), &new_shape)?;
        self.shape = new_shape;
        Ok(self)
    }
}
