use super::{ComputationGraph, Node, Operation, Variable};
use crate::tensor::Tensor;

/// Values and gradients of one evaluation of a [`ComputationGraph`].
///
/// Forward values are memoized: a variable reachable through several paths
/// is applied once. Backward sums the contributions of every consumer into
/// each parent's gradient.
pub struct ComputationContext<'g> {
    graph: &'g ComputationGraph,
    data: Vec<Option<Tensor>>,
    gradients: Vec<Option<Tensor>>,
}

impl<'g> ComputationContext<'g> {
    pub fn new(graph: &'g ComputationGraph) -> Self {
        Self {
            graph,
            data: vec![None; graph.len()],
            gradients: vec![None; graph.len()],
        }
    }

    pub fn graph(&self) -> &'g ComputationGraph {
        self.graph
    }

    /// Evaluate `root` and every ancestor not evaluated yet.
    pub fn forward(&mut self, root: Variable) -> &Tensor {
        let reachable = self.reachable(root);
        for idx in 0..=root.0 {
            if reachable[idx] && self.data[idx].is_none() {
                let value = self.evaluate(self.graph.node(Variable(idx)));
                self.data[idx] = Some(value);
            }
        }
        self.data[root.0]
            .as_ref()
            .unwrap_or_else(|| unreachable!("root evaluated above"))
    }

    /// Propagate gradients from `root`, seeded with ones.
    ///
    /// Runs the forward pass first if needed. Branches that do not require a
    /// gradient are not descended into.
    pub fn backward(&mut self, root: Variable) {
        self.forward(root);
        let reachable = self.reachable(root);
        let graph = self.graph;
        let Self {
            data, gradients, ..
        } = self;

        gradients[root.0] = Some(Tensor::ones(graph.node(root).shape));

        for idx in (0..=root.0).rev() {
            let node = graph.node(Variable(idx));
            if !reachable[idx] || !node.requires_gradient {
                continue;
            }
            let Operation::Function(function) = &node.operation else {
                continue;
            };
            // Parents always have smaller ids than their consumers.
            let (lower, upper) = gradients.split_at_mut(idx);
            let Some(upstream) = upper[0].as_ref() else {
                continue;
            };
            let inputs = parent_values(data, node);
            let output = data[idx]
                .as_ref()
                .unwrap_or_else(|| unreachable!("forward evaluated {idx}"));

            for (position, parent) in node.parents.iter().enumerate() {
                let parent_node = graph.node(*parent);
                if !parent_node.requires_gradient {
                    continue;
                }
                let gradient = function.gradient(position, &inputs, output, upstream);
                assert_eq!(
                    gradient.shape(),
                    parent_node.shape,
                    "{} gradient for parent {position} has the wrong shape",
                    function.name()
                );
                lower[parent.0]
                    .get_or_insert_with(|| Tensor::zeros(parent_node.shape))
                    .add_inplace(&gradient)
                    .unwrap_or_else(|err| unreachable!("gradient shape checked above: {err}"));
            }
        }
    }

    /// Forward value of `variable`, if evaluated.
    pub fn data(&self, variable: Variable) -> Option<&Tensor> {
        self.data.get(variable.0).and_then(Option::as_ref)
    }

    /// Accumulated gradient of `variable`, if it received one.
    pub fn gradient(&self, variable: Variable) -> Option<&Tensor> {
        self.gradients.get(variable.0).and_then(Option::as_ref)
    }

    fn evaluate(&self, node: &Node) -> Tensor {
        match &node.operation {
            Operation::Constant(value) => value.clone(),
            Operation::Weights(weights) => weights.snapshot(),
            Operation::Function(function) => {
                let value = function.apply(&parent_values(&self.data, node));
                assert_eq!(
                    value.shape(),
                    node.shape,
                    "{} produced a value that does not match its declared shape",
                    function.name()
                );
                value
            }
        }
    }

    fn reachable(&self, root: Variable) -> Vec<bool> {
        let mut seen = vec![false; self.graph.len()];
        let mut stack = vec![root];
        while let Some(variable) = stack.pop() {
            if std::mem::replace(&mut seen[variable.0], true) {
                continue;
            }
            stack.extend(self.graph.node(variable).parents.iter().copied());
        }
        seen
    }
}

fn parent_values<'a>(data: &'a [Option<Tensor>], node: &Node) -> Vec<&'a Tensor> {
    node.parents
        .iter()
        .map(|parent| {
            data[parent.0]
                .as_ref()
                .unwrap_or_else(|| unreachable!("parent {} evaluated before child", parent.0))
        })
        .collect()
}
