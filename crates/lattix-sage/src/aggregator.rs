//! Neighborhood aggregators.
//!
//! Each aggregator turns the previous layer's embeddings (one row per node of
//! the sub graph's *next* hop) into new embeddings (one row per sub graph row).
//!
//! | Aggregator | Computation | Weights |
//! |------------|-------------|---------|
//! | Mean | `act(mean(self ∪ N) · Wᵀ)` | `W [rows×cols]` |
//! | Pool | `act(h_self · Sᵀ + max_N(act(h_N · Pᵀ + b)) · Nᵀ)` | `P`, `S [rows×cols]`, `N [rows×rows]`, `b [rows]` |
//!
//! Rows without neighbors are well defined: the mean degenerates to the node
//! itself and the max to a zero vector.

use crate::autodiff::functions::{expect_arity, expect_matrix};
use crate::autodiff::{ComputationGraph, Function, Variable, Weights};
use crate::config::ActivationFunction;
use crate::tensor::{Shape, Tensor};
use crate::{Error, Result};
use lattix_graph::algo::sampling::SubGraph;
use std::sync::Arc;

/// Values closer than this to a column maximum count as attaining it.
pub const MAX_TIE_THRESHOLD: f64 = 1e-9;

impl ActivationFunction {
    /// Append this activation to `graph`.
    pub fn apply(self, graph: &mut ComputationGraph, x: Variable) -> Result<Variable> {
        match self {
            ActivationFunction::Sigmoid => graph.sigmoid(x),
            ActivationFunction::Relu => graph.relu(x),
        }
    }
}

fn expect_next_hop(op: &'static str, shape: Shape, sub_graph: &SubGraph) -> Result<usize> {
    let (rows, cols) = expect_matrix(op, shape)?;
    if rows != sub_graph.next_node_ids.len() {
        return Err(Error::ShapeMismatch {
            op,
            expected: format!("{} rows (next hop nodes)", sub_graph.next_node_ids.len()),
            actual: format!("{rows} rows"),
        });
    }
    Ok(cols)
}

/// Row-wise mean over a node and its sampled neighbors.
///
/// Neighbor rows are scaled by their relationship weight when the sub graph
/// carries weights. The divisor is always `degree + 1`.
#[derive(Debug, Clone)]
pub struct MeanAggregation {
    sub_graph: Arc<SubGraph>,
}

impl MeanAggregation {
    pub fn new(sub_graph: Arc<SubGraph>) -> Self {
        Self { sub_graph }
    }
}

impl Function for MeanAggregation {
    fn name(&self) -> &'static str {
        "mean_aggregation"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        let cols = expect_next_hop(self.name(), parents[0], &self.sub_graph)?;
        Ok(Shape::Matrix(self.sub_graph.row_count(), cols))
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        let previous = inputs[0];
        let sub_graph = &self.sub_graph;
        let mut out = Tensor::zeros(Shape::Matrix(sub_graph.row_count(), previous.cols()));

        for (row, neighbors) in sub_graph.adjacency.iter().enumerate() {
            let scale = 1.0 / (neighbors.len() + 1) as f64;
            let target = out.row_mut(row);
            for (o, x) in target.iter_mut().zip(previous.row(sub_graph.self_adjacency[row])) {
                *o += x * scale;
            }
            for (position, &neighbor) in neighbors.iter().enumerate() {
                let weight = sub_graph.relationship_weight(row, position) * scale;
                for (o, x) in target.iter_mut().zip(previous.row(neighbor)) {
                    *o += x * weight;
                }
            }
        }
        out
    }

    fn gradient(&self, _: usize, inputs: &[&Tensor], _: &Tensor, upstream: &Tensor) -> Tensor {
        let sub_graph = &self.sub_graph;
        let mut grad = inputs[0].create_with_same_dimensions();

        for (row, neighbors) in sub_graph.adjacency.iter().enumerate() {
            let scale = 1.0 / (neighbors.len() + 1) as f64;
            let g = upstream.row(row);
            for (out, u) in grad.row_mut(sub_graph.self_adjacency[row]).iter_mut().zip(g) {
                *out += u * scale;
            }
            for (position, &neighbor) in neighbors.iter().enumerate() {
                let weight = sub_graph.relationship_weight(row, position) * scale;
                for (out, u) in grad.row_mut(neighbor).iter_mut().zip(g) {
                    *out += u * weight;
                }
            }
        }
        grad
    }
}

/// Column-wise maximum over each row's sampled neighbors.
///
/// Rows without neighbors produce zeros. In the backward pass every neighbor
/// within [`MAX_TIE_THRESHOLD`] of a column's maximum receives that column's
/// full upstream gradient.
#[derive(Debug, Clone)]
pub struct ElementwiseMax {
    sub_graph: Arc<SubGraph>,
}

impl ElementwiseMax {
    pub fn new(sub_graph: Arc<SubGraph>) -> Self {
        Self { sub_graph }
    }
}

impl Function for ElementwiseMax {
    fn name(&self) -> &'static str {
        "elementwise_max"
    }

    fn output_shape(&self, parents: &[Shape]) -> Result<Shape> {
        expect_arity(self.name(), parents, 1)?;
        let cols = expect_next_hop(self.name(), parents[0], &self.sub_graph)?;
        Ok(Shape::Matrix(self.sub_graph.row_count(), cols))
    }

    fn apply(&self, inputs: &[&Tensor]) -> Tensor {
        let input = inputs[0];
        let mut out = Tensor::zeros(Shape::Matrix(self.sub_graph.row_count(), input.cols()));

        for (row, neighbors) in self.sub_graph.adjacency.iter().enumerate() {
            let Some((&first, rest)) = neighbors.split_first() else {
                continue;
            };
            let target = out.row_mut(row);
            target.copy_from_slice(input.row(first));
            for &neighbor in rest {
                for (o, &x) in target.iter_mut().zip(input.row(neighbor)) {
                    *o = o.max(x);
                }
            }
        }
        out
    }

    fn gradient(&self, _: usize, inputs: &[&Tensor], output: &Tensor, upstream: &Tensor) -> Tensor {
        let input = inputs[0];
        let mut grad = input.create_with_same_dimensions();
        let cols = input.cols();

        for (row, neighbors) in self.sub_graph.adjacency.iter().enumerate() {
            let maxima = output.row(row);
            let g = upstream.row(row);
            for &neighbor in neighbors {
                let values = input.row(neighbor);
                let target = grad.row_mut(neighbor);
                for col in 0..cols {
                    if (values[col] - maxima[col]).abs() <= MAX_TIE_THRESHOLD {
                        target[col] += g[col];
                    }
                }
            }
        }
        grad
    }
}

/// Trainable aggregation step of one layer.
#[derive(Debug, Clone)]
pub enum Aggregator {
    Mean {
        weights: Arc<Weights>,
        activation: ActivationFunction,
    },
    Pool {
        pool_weights: Arc<Weights>,
        self_weights: Arc<Weights>,
        neighbors_weights: Arc<Weights>,
        bias: Arc<Weights>,
        activation: ActivationFunction,
    },
}

impl Aggregator {
    /// Append the aggregation of `previous` over `sub_graph` to `graph`.
    ///
    /// `previous` has one row per `sub_graph.next_node_ids`; the result has
    /// one row per `sub_graph.node_ids`.
    pub fn aggregate(
        &self,
        graph: &mut ComputationGraph,
        previous: Variable,
        sub_graph: Arc<SubGraph>,
    ) -> Result<Variable> {
        match self {
            Aggregator::Mean {
                weights,
                activation,
            } => {
                let means = graph.apply(MeanAggregation::new(sub_graph), &[previous])?;
                let weights = graph.weights(weights);
                let projected = graph.matmul_trans_b(means, weights)?;
                activation.apply(graph, projected)
            }
            Aggregator::Pool {
                pool_weights,
                self_weights,
                neighbors_weights,
                bias,
                activation,
            } => {
                let pool_weights = graph.weights(pool_weights);
                let bias = graph.weights(bias);
                let pooled = graph.matmul_trans_b(previous, pool_weights)?;
                let pooled = graph.matrix_vector_sum(pooled, bias)?;
                let pooled = activation.apply(graph, pooled)?;
                let neighbor_max =
                    graph.apply(ElementwiseMax::new(Arc::clone(&sub_graph)), &[pooled])?;

                let self_rows = graph.slice(previous, sub_graph.self_adjacency.clone())?;
                let self_weights = graph.weights(self_weights);
                let self_part = graph.matmul_trans_b(self_rows, self_weights)?;

                let neighbors_weights = graph.weights(neighbors_weights);
                let neighbors_part = graph.matmul_trans_b(neighbor_max, neighbors_weights)?;

                let sum = graph.element_sum(&[self_part, neighbors_part])?;
                activation.apply(graph, sum)
            }
        }
    }

    /// Trainable weights, in a stable order.
    pub fn weights(&self) -> Vec<Arc<Weights>> {
        match self {
            Aggregator::Mean { weights, .. } => vec![Arc::clone(weights)],
            Aggregator::Pool {
                pool_weights,
                self_weights,
                neighbors_weights,
                bias,
                ..
            } => vec![
                Arc::clone(pool_weights),
                Arc::clone(self_weights),
                Arc::clone(neighbors_weights),
                Arc::clone(bias),
            ],
        }
    }

    pub fn activation(&self) -> ActivationFunction {
        match self {
            Aggregator::Mean { activation, .. } | Aggregator::Pool { activation, .. } => {
                *activation
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rows 0 and 1 of a 4-node next hop; row 1 has no neighbors.
    fn sub_graph() -> Arc<SubGraph> {
        Arc::new(SubGraph {
            node_ids: vec![10, 11],
            adjacency: vec![vec![2, 3], vec![]],
            self_adjacency: vec![0, 1],
            relationship_weights: None,
            next_node_ids: vec![10, 11, 12, 13],
        })
    }

    fn previous() -> Tensor {
        Tensor::from_rows(&[
            vec![1.0, 0.0],
            vec![4.0, 4.0],
            vec![2.0, 6.0],
            vec![3.0, 6.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_mean_includes_self() {
        let f = MeanAggregation::new(sub_graph());
        let out = f.apply(&[&previous()]);
        assert_eq!(out.shape(), Shape::Matrix(2, 2));
        assert_eq!(out.row(0), &[2.0, 4.0]);
        // No neighbors: just the node itself.
        assert_eq!(out.row(1), &[4.0, 4.0]);
    }

    #[test]
    fn test_mean_gradient_scatter() {
        let f = MeanAggregation::new(sub_graph());
        let input = previous();
        let out = f.apply(&[&input]);
        let grad = f.gradient(0, &[&input], &out, &Tensor::ones(out.shape()));
        let third = 1.0 / 3.0;
        assert_eq!(grad.row(0), &[third, third]);
        assert_eq!(grad.row(1), &[1.0, 1.0]);
        assert_eq!(grad.row(2), &[third, third]);
    }

    #[test]
    fn test_weighted_mean() {
        let mut weighted = (*sub_graph()).clone();
        weighted.relationship_weights = Some(vec![vec![2.0, 0.0], vec![]]);
        let f = MeanAggregation::new(Arc::new(weighted));
        let out = f.apply(&[&previous()]);
        // (row0 + 2 * row2 + 0 * row3) / 3
        for (actual, expected) in out.row(0).iter().zip([5.0 / 3.0, 4.0]) {
            assert!((actual - expected).abs() < 1e-12, "{actual} vs {expected}");
        }
    }

    #[test]
    fn test_max_with_empty_row_is_zero() {
        let f = ElementwiseMax::new(sub_graph());
        let out = f.apply(&[&previous()]);
        assert_eq!(out.row(0), &[3.0, 6.0]);
        assert_eq!(out.row(1), &[0.0, 0.0]);
    }

    #[test]
    fn test_max_ties_share_gradient() {
        let f = ElementwiseMax::new(sub_graph());
        let input = previous();
        let out = f.apply(&[&input]);
        let grad = f.gradient(0, &[&input], &out, &Tensor::ones(out.shape()));
        // Column 0: row 3 wins. Column 1: rows 2 and 3 tie at 6.
        assert_eq!(grad.row(2), &[0.0, 1.0]);
        assert_eq!(grad.row(3), &[1.0, 1.0]);
        assert_eq!(grad.row(0), &[0.0, 0.0]);
    }

    #[test]
    fn test_previous_rows_must_match_next_hop() {
        let f = MeanAggregation::new(sub_graph());
        assert!(f.output_shape(&[Shape::Matrix(3, 2)]).is_err());
        assert!(f.output_shape(&[Shape::Vector(4)]).is_err());
    }
}
