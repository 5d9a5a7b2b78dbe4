//! Reverse-mode automatic differentiation over an arena of variables.
//!
//! # Model
//!
//! A [`ComputationGraph`] is an append-only arena of nodes. A [`Variable`] is
//! a `Copy` handle into it. Nodes are one of:
//!
//! - **constants**: data-derived inputs, never differentiated
//! - **weights**: shared, trainable [`Weights`] leaves
//! - **functions**: a [`Function`] applied to parent variables
//!
//! Parents must exist before a node can reference them, so arena order is
//! a topological order. That is what makes evaluation simple:
//!
//! ```text
//! forward   ascending ids   (every parent before its consumers)
//! backward  descending ids  (every consumer before its parents)
//! ```
//!
//! A [`ComputationContext`] holds the values and gradients of one
//! evaluation. It is created per iteration and discarded after the optimizer
//! step; contexts are never shared between threads.
//!
//! # Shapes
//!
//! Every function declares its output shape at construction through
//! [`Function::output_shape`], which is where shape errors surface. Forward
//! evaluation then asserts that `apply` really produced that shape: a
//! mismatch there is a bug in the function, not a user error.
//!
//! # Example
//!
//! ```rust
//! use lattix_sage::autodiff::{ComputationContext, ComputationGraph, Weights};
//! use lattix_sage::tensor::Tensor;
//!
//! let mut graph = ComputationGraph::new();
//! let w = graph.weights(&Weights::new(Tensor::vector(vec![1.0, -2.0])));
//! let y = graph.sigmoid(w).unwrap();
//! let loss = graph.reduce_sum(y).unwrap();
//!
//! let mut ctx = ComputationContext::new(&graph);
//! let value = ctx.forward(loss).value();
//! ctx.backward(loss);
//!
//! assert!(value > 0.0);
//! assert_eq!(ctx.gradient(w).unwrap().size(), 2);
//! ```

mod context;
pub mod functions;
mod weights;

pub use context::ComputationContext;
pub use weights::{Weights, WeightsId};

use crate::tensor::{Shape, Tensor};
use crate::{Error, Result};
use functions::{
    ElementSum, ElementwiseProduct, MatrixMultiplyWithTransposedSecondOperand, MatrixVectorSum,
    NormalizeRows, ReduceSum, Relu, Sigmoid, Slice,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle of a node in a [`ComputationGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(usize);

impl Variable {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A differentiable operation.
///
/// `inputs` are the values of the node's parents, in parent order. Both
/// methods must be pure: they may read their inputs, the node's own output
/// and its upstream gradient, nothing else.
pub trait Function: Send + Sync + fmt::Debug {
    /// Short operation name for errors and tracing.
    fn name(&self) -> &'static str;

    /// Validate parent shapes and return the output shape.
    fn output_shape(&self, parents: &[Shape]) -> Result<Shape>;

    /// Compute the output value.
    fn apply(&self, inputs: &[&Tensor]) -> Tensor;

    /// Gradient with respect to the parent at `parent` (its position in the
    /// parent list), given this node's `output` and `upstream` gradient.
    fn gradient(&self, parent: usize, inputs: &[&Tensor], output: &Tensor, upstream: &Tensor)
        -> Tensor;
}

pub(crate) enum Operation {
    Constant(Tensor),
    Weights(Arc<Weights>),
    Function(Box<dyn Function>),
}

pub(crate) struct Node {
    pub(crate) operation: Operation,
    pub(crate) parents: Vec<Variable>,
    pub(crate) shape: Shape,
    pub(crate) requires_gradient: bool,
}

/// Append-only arena of variables for one batch's expression.
#[derive(Default)]
pub struct ComputationGraph {
    nodes: Vec<Node>,
    weights_index: HashMap<WeightsId, Variable>,
}

impl fmt::Debug for ComputationGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationGraph")
            .field("nodes", &self.nodes.len())
            .field("weights", &self.weights_index.len())
            .finish()
    }
}

impl ComputationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a constant input. Constants never receive gradients.
    pub fn constant(&mut self, value: Tensor) -> Variable {
        let shape = value.shape();
        self.push(Node {
            operation: Operation::Constant(value),
            parents: Vec::new(),
            shape,
            requires_gradient: false,
        })
    }

    /// Add (or reuse) the leaf for `weights`.
    ///
    /// Leaves are keyed by weights identity, so the same instance always maps
    /// to the same variable within a graph.
    pub fn weights(&mut self, weights: &Arc<Weights>) -> Variable {
        if let Some(&existing) = self.weights_index.get(&weights.id()) {
            return existing;
        }
        let variable = self.push(Node {
            operation: Operation::Weights(Arc::clone(weights)),
            parents: Vec::new(),
            shape: weights.shape(),
            requires_gradient: true,
        });
        self.weights_index.insert(weights.id(), variable);
        variable
    }

    /// Apply `function` to `parents`, validating shapes now.
    ///
    /// The result requires a gradient iff any parent does.
    pub fn apply<F: Function + 'static>(
        &mut self,
        function: F,
        parents: &[Variable],
    ) -> Result<Variable> {
        let mut shapes = Vec::with_capacity(parents.len());
        for parent in parents {
            let node = self
                .nodes
                .get(parent.0)
                .ok_or(Error::UnknownVariable(parent.0))?;
            shapes.push(node.shape);
        }
        let shape = function.output_shape(&shapes)?;
        let requires_gradient = parents.iter().any(|p| self.nodes[p.0].requires_gradient);

        Ok(self.push(Node {
            operation: Operation::Function(Box::new(function)),
            parents: parents.to_vec(),
            shape,
            requires_gradient,
        }))
    }

    pub fn shape(&self, variable: Variable) -> Shape {
        self.nodes[variable.0].shape
    }

    pub fn parents(&self, variable: Variable) -> &[Variable] {
        &self.nodes[variable.0].parents
    }

    pub fn requires_gradient(&self, variable: Variable) -> bool {
        self.nodes[variable.0].requires_gradient
    }

    /// All weights leaves with their variables, in insertion order.
    pub fn weights_variables(&self) -> impl Iterator<Item = (Variable, &Arc<Weights>)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| match &node.operation {
                Operation::Weights(w) => Some((Variable(i), w)),
                _ => None,
            })
    }

    pub(crate) fn node(&self, variable: Variable) -> &Node {
        &self.nodes[variable.0]
    }

    fn push(&mut self, node: Node) -> Variable {
        self.nodes.push(node);
        Variable(self.nodes.len() - 1)
    }

    // ------------------------------------------------------------------
    // Builders for the standard functions
    // ------------------------------------------------------------------

    /// `a * bᵀ`
    pub fn matmul_trans_b(&mut self, a: Variable, b: Variable) -> Result<Variable> {
        self.apply(MatrixMultiplyWithTransposedSecondOperand, &[a, b])
    }

    /// Add `vector` to every row of `matrix`.
    pub fn matrix_vector_sum(&mut self, matrix: Variable, vector: Variable) -> Result<Variable> {
        self.apply(MatrixVectorSum, &[matrix, vector])
    }

    /// Elementwise sum of equally shaped variables.
    pub fn element_sum(&mut self, parents: &[Variable]) -> Result<Variable> {
        self.apply(ElementSum, parents)
    }

    pub fn elementwise_product(&mut self, a: Variable, b: Variable) -> Result<Variable> {
        self.apply(ElementwiseProduct, &[a, b])
    }

    pub fn sigmoid(&mut self, x: Variable) -> Result<Variable> {
        self.apply(Sigmoid, &[x])
    }

    pub fn relu(&mut self, x: Variable) -> Result<Variable> {
        self.apply(Relu, &[x])
    }

    /// Sum of all elements, as a scalar.
    pub fn reduce_sum(&mut self, x: Variable) -> Result<Variable> {
        self.apply(ReduceSum, &[x])
    }

    /// Select (and possibly repeat) rows of a matrix.
    pub fn slice(&mut self, matrix: Variable, rows: Vec<usize>) -> Result<Variable> {
        self.apply(Slice::new(rows), &[matrix])
    }

    /// Scale every row to unit L2 norm.
    pub fn normalize_rows(&mut self, matrix: Variable) -> Result<Variable> {
        self.apply(NormalizeRows, &[matrix])
    }
}
