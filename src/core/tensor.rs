// Core Layer: Dense Tensors
//
// Row-major f64 tensors. These are the reference values consumed by the
// interpreter and by constant folding; they are not a compute backend.

use crate::core::error::{GraphError, Result};
use std::fmt;

/// Dense row-major tensor of f64 values
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    /// Create a tensor, checking that `data` fills `shape` exactly
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(GraphError::InvalidValue(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn vector(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: values,
        }
    }

    /// Create a matrix from rows; all rows must have the same length
    pub fn matrix(rows: Vec<Vec<f64>>) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, |row| row.len());
        if rows.iter().any(|row| row.len() != ncols) {
            return Err(GraphError::InvalidValue(
                "matrix rows have different lengths".to_string(),
            ));
        }
        Ok(Self {
            shape: vec![nrows, ncols],
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    pub fn full(shape: Vec<usize>, value: f64) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when every element equals `value`
    pub fn all_equal(&self, value: f64) -> bool {
        self.data.iter().all(|&x| x == value)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Combine two tensors elementwise with right-aligned broadcasting
    pub fn zip_broadcast(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
        let out_shape = broadcast_shape(&self.shape, &other.shape).ok_or_else(|| {
            GraphError::Evaluation(format!(
                "cannot broadcast shapes {:?} and {:?}",
                self.shape, other.shape
            ))
        })?;

        let rank = out_shape.len();
        let len: usize = out_shape.iter().product();
        let out_strides = strides(&out_shape);
        let lhs_strides = strides(&self.shape);
        let rhs_strides = strides(&other.shape);

        let mut data = Vec::with_capacity(len);
        let mut index = vec![0usize; rank];
        for flat in 0..len {
            let mut rem = flat;
            for axis in 0..rank {
                index[axis] = rem / out_strides[axis];
                rem %= out_strides[axis];
            }
            let lhs = source_offset(&self.shape, &lhs_strides, &index);
            let rhs = source_offset(&other.shape, &rhs_strides, &index);
            data.push(f(self.data[lhs], other.data[rhs]));
        }

        Ok(Tensor {
            shape: out_shape,
            data,
        })
    }

    /// Inner product with NumPy `dot` semantics for ranks 1 and 2
    pub fn dot(&self, other: &Tensor) -> Result<Tensor> {
        let (m, k) = match self.shape.as_slice() {
            [k] => (1, *k),
            [m, k] => (*m, *k),
            _ => {
                return Err(GraphError::Evaluation(format!(
                    "dot is undefined for a rank {} left operand",
                    self.rank()
                )))
            }
        };
        let (k2, n) = match other.shape.as_slice() {
            [k] => (*k, 1),
            [k, n] => (*k, *n),
            _ => {
                return Err(GraphError::Evaluation(format!(
                    "dot is undefined for a rank {} right operand",
                    other.rank()
                )))
            }
        };
        if k != k2 {
            return Err(GraphError::Evaluation(format!(
                "dot contraction mismatch: {:?} and {:?}",
                self.shape, other.shape
            )));
        }

        let mut data = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for kk in 0..k {
                    sum += self.data[i * k + kk] * other.data[kk * n + j];
                }
                data[i * n + j] = sum;
            }
        }

        let mut shape = Vec::new();
        if self.rank() == 2 {
            shape.push(m);
        }
        if other.rank() == 2 {
            shape.push(n);
        }
        Tensor::new(shape, data)
    }

    /// Swap the two axes of a matrix; lower ranks are returned unchanged
    pub fn transpose(&self) -> Result<Tensor> {
        match self.shape.as_slice() {
            [] | [_] => Ok(self.clone()),
            [rows, cols] => {
                let (rows, cols) = (*rows, *cols);
                let mut data = Vec::with_capacity(self.data.len());
                for j in 0..cols {
                    for i in 0..rows {
                        data.push(self.data[i * cols + j]);
                    }
                }
                Tensor::new(vec![cols, rows], data)
            }
            _ => Err(GraphError::Evaluation(format!(
                "transpose is undefined for rank {}",
                self.rank()
            ))),
        }
    }

    /// Select one entry along the leading axis; negative positions count from the end
    pub fn index_leading(&self, position: isize) -> Result<Tensor> {
        let Some((&len, rest)) = self.shape.split_first() else {
            return Err(GraphError::Evaluation(
                "cannot index a scalar".to_string(),
            ));
        };
        let resolved = if position < 0 {
            len as isize + position
        } else {
            position
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(GraphError::Evaluation(format!(
                "index {} out of bounds for leading dimension {}",
                position, len
            )));
        }
        let chunk: usize = rest.iter().product();
        let start = resolved as usize * chunk;
        Tensor::new(rest.to_vec(), self.data[start..start + chunk].to_vec())
    }

    /// Stack equally shaped tensors along a new leading axis
    pub fn stack(items: &[Tensor]) -> Result<Tensor> {
        let Some(first) = items.first() else {
            return Err(GraphError::Evaluation(
                "cannot stack an empty list of tensors".to_string(),
            ));
        };
        let mut data = Vec::with_capacity(first.len() * items.len());
        for item in items {
            if item.shape != first.shape {
                return Err(GraphError::Evaluation(format!(
                    "cannot stack shapes {:?} and {:?}",
                    first.shape, item.shape
                )));
            }
            data.extend_from_slice(&item.data);
        }
        let mut shape = Vec::with_capacity(first.rank() + 1);
        shape.push(items.len());
        shape.extend_from_slice(&first.shape);
        Tensor::new(shape, data)
    }

    /// Sum all elements, or along one axis
    pub fn sum(&self, axis: Option<usize>) -> Result<Tensor> {
        let Some(axis) = axis else {
            return Ok(Tensor::scalar(self.data.iter().sum()));
        };
        if axis >= self.rank() {
            return Err(GraphError::Evaluation(format!(
                "sum axis {} out of range for rank {}",
                axis,
                self.rank()
            )));
        }

        let outer: usize = self.shape[..axis].iter().product();
        let dim = self.shape[axis];
        let inner: usize = self.shape[axis + 1..].iter().product();

        let mut data = vec![0.0; outer * inner];
        for o in 0..outer {
            for d in 0..dim {
                for i in 0..inner {
                    data[o * inner + i] += self.data[(o * dim + d) * inner + i];
                }
            }
        }

        let mut shape = self.shape.clone();
        shape.remove(axis);
        Tensor::new(shape, data)
    }

    /// Elementwise closeness: `|a - b| <= atol + rtol * |b|`
    pub fn allclose(&self, other: &Tensor, rtol: f64, atol: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= atol + rtol * b.abs())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tensor{:?}{:?}", self.shape, self.data)
    }
}

fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(rank);
    for axis in 0..rank {
        let a = aligned_dim(lhs, rank, axis);
        let b = aligned_dim(rhs, rank, axis);
        let dim = if a == b {
            a
        } else if a == 1 {
            b
        } else if b == 1 {
            a
        } else {
            return None;
        };
        out.push(dim);
    }
    Some(out)
}

fn aligned_dim(shape: &[usize], rank: usize, axis: usize) -> usize {
    let offset = rank - shape.len();
    if axis < offset {
        1
    } else {
        shape[axis - offset]
    }
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

fn source_offset(shape: &[usize], strides: &[usize], index: &[usize]) -> usize {
    let offset = index.len() - shape.len();
    shape
        .iter()
        .zip(strides)
        .enumerate()
        .map(|(axis, (&dim, &stride))| {
            if dim == 1 {
                0
            } else {
                index[axis + offset] * stride
            }
        })
        .sum()
}
