//! Unsupervised contrastive loss over (anchor, positive, negative) triplets.
//!
//! The embedding matrix holds `3B` rows: anchors `0..B`, positives `B..2B`,
//! negatives `2B..3B`. With `σ` the logistic function and `Q` the negative
//! sample weight:
//!
//! ```text
//! L = Σᵢ  -ln σ(aᵢ·pᵢ)  -  Q · ln σ(-aᵢ·nᵢ)
//!   = Σᵢ  softplus(-aᵢ·pᵢ)  +  Q · softplus(aᵢ·nᵢ)
//! ```

use crate::autodiff::functions::{expect_arity, expect_matrix};
use crate::autodiff::Function;
use crate::tensor::{dot, sigmoid, softplus, Shape, Tensor};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct GraphSageLoss {
    negative_sample_weight: f64,
}

impl GraphSageLoss {
    pub fn new(negative_sample_weight: f64) -> Self {
        Self {
            negative_sample_weight,
        }
    }
}

impl Function for GraphSageLoss {
    fn name(&self) -> &'static str {
        "graph_sage_loss"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        let (rows, _) = expect_matrix(self.name(), parents[0])?;
        if rows % 3 != 0 {
            return Err(Error::ShapeMismatch {
                op: self.name(),
                expected: "a multiple of 3 rows (anchor, positive, negative)".into(),
                actual: format!("{rows} rows"),
            });
        }
        Ok(Shape::Scalar)
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        let embeddings = inputs[0];
        let batch = embeddings.rows() / 3;
        let loss = (0..batch)
            .map(|i| {
                let anchor = embeddings.row(i);
                let positive = dot(anchor, embeddings.row(batch + i));
                let negative = dot(anchor, embeddings.row(2 * batch + i));
                softplus(-positive) + self.negative_sample_weight * softplus(negative)
            })
            .sum();
        Tensor::scalar(loss)
    }

    fn gradient(&self, _: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        let embeddings = inputs[0];
        let batch = embeddings.rows() / 3;
        let scale = upstream.value();
        let mut grad = embeddings.create_with_same_dimensions();

        for i in 0..batch {
            let (a, p, n) = (i, batch + i, 2 * batch + i);
            let anchor = embeddings.row(a).to_vec();
            let positive = embeddings.row(p).to_vec();
            let negative = embeddings.row(n).to_vec();

            let d_positive = -sigmoid(-dot(&anchor, &positive)) * scale;
            let d_negative = self.negative_sample_weight * sigmoid(dot(&anchor, &negative)) * scale;

            for ((g, &pj), &nj) in grad.row_mut(a).iter_mut().zip(&positive).zip(&negative) {
                *g += d_positive * pj + d_negative * nj;
            }
            for (g, &aj) in grad.row_mut(p).iter_mut().zip(&anchor) {
                *g += d_positive * aj;
            }
            for (g, &aj) in grad.row_mut(n).iter_mut().zip(&anchor) {
                *g += d_negative * aj;
            }
        }
        grad
    }
}
