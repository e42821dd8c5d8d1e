//! Tensor operations for recurrent inference
//!
//! The LSTM cell only needs a dense matmul, a row-broadcast bias add and the
//! two gate activations. Everything is generic over `num_traits::Float` so the
//! same code serves f32 weights and f64 reference checks in tests.

use crate::tensor::{Tensor, TensorView};
use num_traits::Float;
use wattcast_common::{Result, WattcastError};

/// Matrix multiplication: C = A @ B
///
/// A: (m, k), B: (k, n), C: (m, n)
pub fn matmul<T: Float>(a: &TensorView<'_, T>, b: &TensorView<'_, T>) -> Result<Tensor<T>> {
    if a.ndim() != 2 || b.ndim() != 2 {
        return Err(WattcastError::tensor("Matmul requires 2D tensors"));
    }

    let (m, k1) = (a.shape[0], a.shape[1]);
    let (k2, n) = (b.shape[0], b.shape[1]);

    if k1 != k2 {
        return Err(WattcastError::tensor(format!(
            "Matmul dimension mismatch: ({}, {}) @ ({}, {})",
            m, k1, k2, n
        )));
    }

    let mut c_data = vec![T::zero(); m * n];

    // i-k-j order keeps the inner loop on contiguous rows of B and C
    for i in 0..m {
        let c_row = &mut c_data[i * n..(i + 1) * n];
        for k in 0..k1 {
            let a_ik = a.data[i * k1 + k];
            let b_row = &b.data[k * n..(k + 1) * n];
            for (c, &b_kj) in c_row.iter_mut().zip(b_row) {
                *c = *c + a_ik * b_kj;
            }
        }
    }

    Tensor::new(c_data, vec![m, n])
}

/// Add `bias` to every row of a 2D tensor in place
pub fn add_bias<T: Float>(tensor: &mut Tensor<T>, bias: &[T]) -> Result<()> {
    let cols = match tensor.shape.as_slice() {
        [_, cols] => *cols,
        _ => return Err(WattcastError::tensor("Bias add expects a 2D tensor")),
    };

    if bias.len() != cols {
        return Err(WattcastError::tensor(format!(
            "Bias length {} does not match {} columns",
            bias.len(),
            cols
        )));
    }

    for row in tensor.data.chunks_mut(cols) {
        for (value, &b) in row.iter_mut().zip(bias) {
            *value = *value + b;
        }
    }

    Ok(())
}

/// Logistic sigmoid, split by sign so large magnitudes never overflow `exp`
pub fn sigmoid<T: Float>(x: T) -> T {
    if x >= T::zero() {
        T::one() / (T::one() + (-x).exp())
    } else {
        let e = x.exp();
        e / (T::one() + e)
    }
}

/// Hyperbolic tangent
pub fn tanh<T: Float>(x: T) -> T {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul() {
        let a_data = vec![1.0f32, 2.0, 3.0, 4.0];
        let a = TensorView::new(&a_data, vec![2, 2]).unwrap();

        let b_data = vec![5.0f32, 6.0, 7.0, 8.0];
        let b = TensorView::new(&b_data, vec![2, 2]).unwrap();

        let c = matmul(&a, &b).unwrap();

        assert_eq!(c.shape, vec![2, 2]);
        assert_eq!(c.data, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_row_vector() {
        let x = vec![1.0f64, -1.0, 2.0];
        let x = TensorView::new(&x, vec![1, 3]).unwrap();

        let w = vec![1.0f64, 0.0, 0.0, 1.0, 0.5, 0.5];
        let w = TensorView::new(&w, vec![3, 2]).unwrap();

        let y = matmul(&x, &w).unwrap();
        assert_eq!(y.shape, vec![1, 2]);
        assert_eq!(y.data, vec![2.0, 0.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let a = vec![1.0f32; 6];
        let a = TensorView::new(&a, vec![2, 3]).unwrap();
        let b = vec![1.0f32; 4];
        let b = TensorView::new(&b, vec![2, 2]).unwrap();

        assert!(matmul(&a, &b).is_err());
    }

    #[test]
    fn test_add_bias() {
        let mut t = Tensor::new(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        add_bias(&mut t, &[10.0, 20.0]).unwrap();
        assert_eq!(t.data, vec![11.0, 22.0, 13.0, 24.0]);

        assert!(add_bias(&mut t, &[1.0]).is_err());
    }

    #[test]
    fn test_activations() {
        assert_eq!(sigmoid(0.0f32), 0.5);
        assert!((sigmoid(2.0f64) - 0.8807970779778823).abs() < 1e-12);
        assert!((sigmoid(-2.0f64) - 0.11920292202211755).abs() < 1e-12);

        // no overflow at the extremes
        assert_eq!(sigmoid(-1000.0f32), 0.0);
        assert_eq!(sigmoid(1000.0f32), 1.0);

        assert_eq!(tanh(0.0f32), 0.0);
        assert!((tanh(1.0f64) - 0.7615941559557649).abs() < 1e-12);
    }
}
