//! Standard differentiable functions.
//!
//! | Function | Parents | Output |
//! |----------|---------|--------|
//! | [`MatrixMultiplyWithTransposedSecondOperand`] | `[n×k]`, `[m×k]` | `[n×m]` |
//! | [`MatrixVectorSum`] | `[n×c]`, `[c]` | `[n×c]` |
//! | [`ElementSum`] | one or more, same shape | same shape |
//! | [`ElementwiseProduct`] | two, same shape | same shape |
//! | [`Sigmoid`], [`Relu`] | any | same shape |
//! | [`ReduceSum`] | any | scalar |
//! | [`Slice`] | `[n×c]` | `[rows×c]` |
//! | [`NormalizeRows`] | `[n×c]` | `[n×c]` |
//!
//! The aggregation kernels and the loss live next to their callers
//! (`aggregator`, `loss`) but implement the same [`Function`] trait.

use super::Function;
use crate::tensor::{self, product, Shape, Tensor, Transpose};
use crate::{Error, Result};

/// Added to row norms before dividing.
pub const NORMALIZE_EPSILON: f64 = 1e-10;

pub(crate) fn expect_arity(op: &'static str, parents: &[Shape], arity: usize) -> Result<()> {
    if parents.len() == arity {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            op,
            expected: format!("{arity} operands"),
            actual: format!("{} operands", parents.len()),
        })
    }
}

pub(crate) fn expect_matrix(op: &'static str, shape: Shape) -> Result<(usize, usize)> {
    match shape {
        Shape::Matrix(rows, cols) => Ok((rows, cols)),
        other => Err(Error::ShapeMismatch {
            op,
            expected: "a matrix".into(),
            actual: other.to_string(),
        }),
    }
}

fn expect_same(op: &'static str, a: Shape, b: Shape) -> Result<()> {
    if a == b {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            op,
            expected: a.to_string(),
            actual: b.to_string(),
        })
    }
}

/// Elementwise combination of two tensors whose shapes were validated at
/// construction.
fn zip_map(a: &Tensor, b: &Tensor, f: impl Fn(f64, f64) -> f64) -> Tensor {
    let mut out = a.clone();
    for (o, &y) in out.data_mut().iter_mut().zip(b.data()) {
        *o = f(*o, y);
    }
    out
}

/// `a * bᵀ`
#[derive(Debug, Clone, Copy)]
pub struct MatrixMultiplyWithTransposedSecondOperand;

impl Function for MatrixMultiplyWithTransposedSecondOperand {
    fn name(&self) -> &'static str {
        "matmul_trans_b"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 2)?;
        tensor::product_shape(parents[0], parents[1], Transpose::Second)
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        product(inputs[0], inputs[1], Transpose::Second)
    }

    fn gradient(&self, parent: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        match parent {
            // d(a bᵀ)/da = G b
            0 => product(upstream, inputs[1], Transpose::Neither),
            // d(a bᵀ)/db = Gᵀ a
            _ => product(upstream, inputs[0], Transpose::First),
        }
    }
}

/// Adds a vector to every row of a matrix.
#[derive(Debug, Clone, Copy)]
pub struct MatrixVectorSum;

impl Function for MatrixVectorSum {
    fn name(&self) -> &'static str {
        "matrix_vector_sum"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 2)?;
        let (_, cols) = expect_matrix(self.name(), parents[0])?;
        expect_same(self.name(), Shape::Vector(cols), parents[1])?;
        Ok(parents[0])
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        let mut out = inputs[0].clone();
        let bias = inputs[1].data();
        for row in 0..out.rows() {
            for (o, b) in out.row_mut(row).iter_mut().zip(bias) {
                *o += b;
            }
        }
        out
    }

    fn gradient(&self, parent: usize, _: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        match parent {
            0 => upstream.clone(),
            _ => upstream.column_sums(),
        }
    }
}

/// Elementwise sum of any number of equally shaped operands.
#[derive(Debug, Clone, Copy)]
pub struct ElementSum;

impl Function for ElementSum {
    fn name(&self) -> &'static str {
        "element_sum"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        let Some((&first, rest)) = parents.split_first() else {
            return Err(Error::ShapeMismatch {
                op: self.name(),
                expected: "at least one operand".into(),
                actual: "none".into(),
            });
        };
        for &shape in rest {
            expect_same(self.name(), first, shape)?;
        }
        Ok(first)
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        let mut out = inputs[0].clone();
        for input in &inputs[1..] {
            for (o, x) in out.data_mut().iter_mut().zip(input.data()) {
                *o += x;
            }
        }
        out
    }

    fn gradient(&self, _: usize, _: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        upstream.clone()
    }
}

/// Hadamard product.
#[derive(Debug, Clone, Copy)]
pub struct ElementwiseProduct;

impl Function for ElementwiseProduct {
    fn name(&self) -> &'static str {
        "elementwise_product"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 2)?;
        expect_same(self.name(), parents[0], parents[1])?;
        Ok(parents[0])
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        zip_map(inputs[0], inputs[1], |a, b| a * b)
    }

    fn gradient(&self, parent: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        let other = inputs[1 - parent.min(1)];
        zip_map(upstream, other, |g, x| g * x)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sigmoid;

impl Function for Sigmoid {
    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        Ok(parents[0])
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        inputs[0].map(tensor::sigmoid)
    }

    fn gradient(&self, _: usize, _: &[&Tensor], output: &Tensor, upstream: &Tensor) -> Tensor {
        zip_map(upstream, output, |g, s| g * s * (1.0 - s))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Relu;

impl Function for Relu {
    fn name(&self) -> &'static str {
        "relu"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        Ok(parents[0])
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        inputs[0].map(tensor::relu)
    }

    fn gradient(&self, _: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        zip_map(upstream, inputs[0], |g, x| if x > 0.0 { g } else { 0.0 })
    }
}

/// Sum of all elements.
#[derive(Debug, Clone, Copy)]
pub struct ReduceSum;

impl Function for ReduceSum {
    fn name(&self) -> &'static str {
        "reduce_sum"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        Ok(Shape::Scalar)
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        Tensor::scalar(inputs[0].sum())
    }

    fn gradient(&self, _: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        Tensor::filled(inputs[0].shape(), upstream.value())
    }
}

/// Gathers rows of a matrix by index. Indices may repeat.
#[derive(Debug, Clone)]
pub struct Slice {
    rows: Vec<usize>,
}

impl Slice {
    pub fn new(rows: Vec<usize>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }
}

impl Function for Slice {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        let (rows, cols) = expect_matrix(self.name(), parents[0])?;
        if let Some(&bad) = self.rows.iter().find(|&&r| r >= rows) {
            return Err(Error::ShapeMismatch {
                op: self.name(),
                expected: format!("row index < {rows}"),
                actual: bad.to_string(),
            });
        }
        Ok(Shape::Matrix(self.rows.len(), cols))
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        let input = inputs[0];
        let cols = input.cols();
        let mut out = Tensor::zeros(Shape::Matrix(self.rows.len(), cols));
        for (target, &source) in self.rows.iter().enumerate() {
            out.row_mut(target).copy_from_slice(input.row(source));
        }
        out
    }

    fn gradient(&self, _: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        let mut grad = inputs[0].create_with_same_dimensions();
        for (target, &source) in self.rows.iter().enumerate() {
            for (g, u) in grad.row_mut(source).iter_mut().zip(upstream.row(target)) {
                *g += u;
            }
        }
        grad
    }
}

/// `row / (‖row‖₂ + ε)` for every row.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeRows;

impl Function for NormalizeRows {
    fn name(&self) -> &'static str {
        "normalize_rows"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        expect_matrix(self.name(), parents[0])?;
        Ok(parents[0])
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        let mut out = inputs[0].clone();
        for row in 0..out.rows() {
            let values = out.row_mut(row);
            let scale = 1.0 / (l2_norm(values) + NORMALIZE_EPSILON);
            values.iter_mut().for_each(|x| *x *= scale);
        }
        out
    }

    fn gradient(&self, _: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        let input = inputs[0];
        let mut grad = input.create_with_same_dimensions();
        for row in 0..input.rows() {
            let x = input.row(row);
            let g = upstream.row(row);
            let norm = l2_norm(x);
            let shifted = norm + NORMALIZE_EPSILON;
            // ∂/∂x_j = G_j / (n+ε) - x_j (G·x) / (n (n+ε)²)
            let projection = if norm > 0.0 {
                tensor::dot(g, x) / (norm * shifted * shifted)
            } else {
                0.0
            };
            for ((out, &gj), &xj) in grad.row_mut(row).iter_mut().zip(g).zip(x) {
                *out = gj / shifted - xj * projection;
            }
        }
        grad
    }
}

fn l2_norm(row: &[f64]) -> f64 {
    row.iter().map(|x| x * x).sum::<f64>().sqrt()
}
