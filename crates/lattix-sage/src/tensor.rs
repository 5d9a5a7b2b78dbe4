//! Dense rank ≤ 2 tensors.
//!
//! A [`Tensor`] is a row-major `f64` buffer plus a [`Shape`]. Binary
//! operations require identical shapes (no broadcasting) and fail with
//! [`Error::ShapeMismatch`] otherwise. Every operation allocates its result;
//! the only in-place mutation is [`Tensor::add_inplace`] on accumulators and
//! [`Tensor::data_mut`], which the optimizer uses for weight updates.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tensor dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl Shape {
    /// Number of elements.
    pub fn size(self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
            Shape::Matrix(rows, cols) => rows * cols,
        }
    }

    pub fn rank(self) -> usize {
        match self {
            Shape::Scalar => 0,
            Shape::Vector(_) => 1,
            Shape::Matrix(..) => 2,
        }
    }

    /// Row count; vectors are read as columns.
    pub fn rows(self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
            Shape::Matrix(rows, _) => rows,
        }
    }

    pub fn cols(self) -> usize {
        match self {
            Shape::Matrix(_, cols) => cols,
            _ => 1,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(n) => write!(f, "vector[{n}]"),
            Shape::Matrix(rows, cols) => write!(f, "matrix[{rows}x{cols}]"),
        }
    }
}

/// Which operand of a matrix product is read transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    Neither,
    First,
    Second,
}

/// Dense row-major tensor. Invariant: `data.len() == shape.size()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Shape, data: Vec<f64>) -> Result<Self> {
        if data.len() != shape.size() {
            return Err(Error::ShapeMismatch {
                op: "tensor",
                expected: format!("{} elements for {shape}", shape.size()),
                actual: format!("{} elements", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Shape) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn ones(shape: Shape) -> Self {
        Self::filled(shape, 1.0)
    }

    pub fn filled(shape: Shape, value: f64) -> Self {
        Self {
            shape,
            data: vec![value; shape.size()],
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Shape::Scalar,
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: Shape::Vector(data.len()),
            data,
        }
    }

    pub fn matrix(data: Vec<f64>, rows: usize, cols: usize) -> Result<Self> {
        Self::new(Shape::Matrix(rows, cols), data)
    }

    /// Stack equally long rows into a matrix.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(Error::ShapeMismatch {
                    op: "from_rows",
                    expected: format!("{cols} columns"),
                    actual: format!("{} columns", row.len()),
                });
            }
            data.extend_from_slice(row);
        }
        Self::matrix(data, rows.len(), cols)
    }

    /// Zero tensor of the same shape.
    pub fn create_with_same_dimensions(&self) -> Self {
        Self::zeros(self.shape)
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows()
    }

    pub fn cols(&self) -> usize {
        self.shape.cols()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// First element; the value of a scalar.
    pub fn value(&self) -> f64 {
        self.data.first().copied().unwrap_or(0.0)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols() + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let cols = self.cols();
        &self.data[row * cols..(row + 1) * cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let cols = self.cols();
        &mut self.data[row * cols..(row + 1) * cols]
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            shape: self.shape,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Combine two equally shaped tensors elementwise.
    pub fn zip_with(
        &self,
        other: &Tensor,
        op: &'static str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Self> {
        self.expect_same_shape(other, op)?;
        Ok(Self {
            shape: self.shape,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    pub fn add(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Elementwise (Hadamard) product.
    pub fn multiply(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "multiply", |a, b| a * b)
    }

    /// Elementwise maximum.
    pub fn max(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "max", f64::max)
    }

    pub fn scalar_multiply(&self, factor: f64) -> Self {
        self.map(|x| x * factor)
    }

    /// `self += other`, for gradient accumulators.
    pub fn add_inplace(&mut self, other: &Tensor) -> Result<()> {
        self.expect_same_shape(other, "add_inplace")?;
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Matrix product `self * other`.
    pub fn matmul(&self, other: &Tensor) -> Result<Self> {
        self.matmul_with(other, Transpose::Neither)
    }

    /// Matrix product `selfᵀ * other`, without materializing the transpose.
    pub fn matmul_trans_a(&self, other: &Tensor) -> Result<Self> {
        self.matmul_with(other, Transpose::First)
    }

    /// Matrix product `self * otherᵀ`, without materializing the transpose.
    pub fn matmul_trans_b(&self, other: &Tensor) -> Result<Self> {
        self.matmul_with(other, Transpose::Second)
    }

    pub fn matmul_with(&self, other: &Tensor, transpose: Transpose) -> Result<Self> {
        product_shape(self.shape, other.shape, transpose)?;
        Ok(product(self, other, transpose))
    }

    /// Per-row sums as a vector.
    pub fn row_sums(&self) -> Self {
        self.row_aggregate(|row| row.iter().sum())
    }

    /// Per-row L2 norms as a vector.
    pub fn row_l2_norms(&self) -> Self {
        self.row_aggregate(|row| row.iter().map(|x| x * x).sum::<f64>().sqrt())
    }

    /// Per-column sums as a vector.
    pub fn column_sums(&self) -> Self {
        let cols = self.cols();
        let mut sums = vec![0.0; cols];
        for row in self.data.chunks(cols.max(1)) {
            for (sum, x) in sums.iter_mut().zip(row) {
                *sum += x;
            }
        }
        Self::vector(sums)
    }

    fn row_aggregate(&self, f: impl Fn(&[f64]) -> f64) -> Self {
        Self::vector((0..self.rows()).map(|r| f(self.row(r))).collect())
    }

    fn expect_same_shape(&self, other: &Tensor, op: &'static str) -> Result<()> {
        if self.shape == other.shape {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                op,
                expected: self.shape.to_string(),
                actual: other.shape.to_string(),
            })
        }
    }
}

/// Output shape of a matrix product, or `ShapeMismatch`.
pub fn product_shape(a: Shape, b: Shape, transpose: Transpose) -> Result<Shape> {
    let (Shape::Matrix(ar, ac), Shape::Matrix(br, bc)) = (a, b) else {
        return Err(Error::ShapeMismatch {
            op: "matmul",
            expected: "two matrices".into(),
            actual: format!("{a} and {b}"),
        });
    };
    let (rows, inner_a, inner_b, cols) = match transpose {
        Transpose::Neither => (ar, ac, br, bc),
        Transpose::First => (ac, ar, br, bc),
        Transpose::Second => (ar, ac, bc, br),
    };
    if inner_a != inner_b {
        return Err(Error::ShapeMismatch {
            op: "matmul",
            expected: format!("inner dimension {inner_a}"),
            actual: format!("{inner_b} ({a} x {b}, {transpose:?})"),
        });
    }
    Ok(Shape::Matrix(rows, cols))
}

/// Unchecked matrix product; callers validate with [`product_shape`].
pub(crate) fn product(a: &Tensor, b: &Tensor, transpose: Transpose) -> Tensor {
    let (ar, ac) = (a.rows(), a.cols());
    let (br, bc) = (b.rows(), b.cols());
    let (ad, bd) = (&a.data, &b.data);

    let (rows, cols, data) = match transpose {
        Transpose::Neither => {
            let mut out = vec![0.0; ar * bc];
            for i in 0..ar {
                for k in 0..ac {
                    let aik = ad[i * ac + k];
                    if aik == 0.0 {
                        continue;
                    }
                    let b_row = &bd[k * bc..(k + 1) * bc];
                    for (o, &bkj) in out[i * bc..(i + 1) * bc].iter_mut().zip(b_row) {
                        *o += aik * bkj;
                    }
                }
            }
            (ar, bc, out)
        }
        Transpose::First => {
            let mut out = vec![0.0; ac * bc];
            for k in 0..ar {
                let b_row = &bd[k * bc..(k + 1) * bc];
                for i in 0..ac {
                    let aki = ad[k * ac + i];
                    if aki == 0.0 {
                        continue;
                    }
                    for (o, &bkj) in out[i * bc..(i + 1) * bc].iter_mut().zip(b_row) {
                        *o += aki * bkj;
                    }
                }
            }
            (ac, bc, out)
        }
        Transpose::Second => {
            let mut out = Vec::with_capacity(ar * br);
            for i in 0..ar {
                let a_row = &ad[i * ac..(i + 1) * ac];
                for j in 0..br {
                    out.push(dot(a_row, &bd[j * bc..(j + 1) * bc]));
                }
            }
            (ar, br, out)
        }
    };

    Tensor {
        shape: Shape::Matrix(rows, cols),
        data,
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Logistic sigmoid `1 / (1 + e^-x)`, evaluated without overflow for large |x|.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `max(0, x)`.
pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// `ln(1 + e^x)`, i.e. `-ln σ(-x)`, evaluated without overflow.
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}
