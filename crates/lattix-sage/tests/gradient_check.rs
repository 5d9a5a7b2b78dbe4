//! Analytic gradients against central finite differences.
//!
//! Every check builds a scalar root from trainable inputs. Non-scalar
//! outputs are reduced through a fixed random projection so that every
//! output element receives a distinct upstream gradient.

use lattix_graph::algo::sampling::SubGraph;
use lattix_sage::aggregator::{ElementwiseMax, MeanAggregation};
use lattix_sage::autodiff::{ComputationContext, ComputationGraph, Variable, Weights};
use lattix_sage::config::{ActivationFunction, AggregatorType, LayerConfig};
use lattix_sage::layer::Layer;
use lattix_sage::loss::GraphSageLoss;
use lattix_sage::tensor::{Shape, Tensor};
use rand::prelude::*;
use std::sync::Arc;

const STEP: f64 = 1e-6;
const TOLERANCE: f64 = 1e-4;

fn random_tensor(shape: Shape, rng: &mut StdRng) -> Tensor {
    let data = (0..shape.size()).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Tensor::new(shape, data).unwrap()
}

/// Values in `[-1, -0.1] ∪ [0.1, 1]`, away from activation kinks.
fn away_from_zero(shape: Shape, rng: &mut StdRng) -> Tensor {
    random_tensor(shape, rng).map(|x| x.signum() * (0.1 + 0.9 * x.abs()))
}

/// Reduce `output` to a scalar through a random constant projection.
fn scalar_root(graph: &mut ComputationGraph, output: Variable, rng: &mut StdRng) -> Variable {
    let shape = graph.shape(output);
    if shape == Shape::Scalar {
        return output;
    }
    let projection = graph.constant(random_tensor(shape, rng));
    let weighted = graph.elementwise_product(output, projection).unwrap();
    graph.reduce_sum(weighted).unwrap()
}

fn evaluate(graph: &ComputationGraph, root: Variable) -> f64 {
    ComputationContext::new(graph).forward(root).value()
}

/// Compare every element of every weights leaf of `graph`.
fn assert_gradients_match(graph: &ComputationGraph, root: Variable) {
    let mut ctx = ComputationContext::new(graph);
    ctx.backward(root);

    let leaves: Vec<(Variable, Arc<Weights>)> = graph
        .weights_variables()
        .map(|(v, w)| (v, Arc::clone(w)))
        .collect();
    assert!(!leaves.is_empty());

    for (variable, weights) in leaves {
        let analytic = ctx
            .gradient(variable)
            .cloned()
            .unwrap_or_else(|| Tensor::zeros(weights.shape()));

        for i in 0..weights.shape().size() {
            let original = weights.snapshot().data()[i];
            weights.update(|t| t.data_mut()[i] = original + STEP);
            let plus = evaluate(graph, root);
            weights.update(|t| t.data_mut()[i] = original - STEP);
            let minus = evaluate(graph, root);
            weights.update(|t| t.data_mut()[i] = original);

            let numeric = (plus - minus) / (2.0 * STEP);
            let a = analytic.data()[i];
            let scale = 1.0 + a.abs().max(numeric.abs());
            assert!(
                (a - numeric).abs() <= TOLERANCE * scale,
                "variable {} element {i}: analytic {a}, numeric {numeric}",
                variable.index()
            );
        }
    }
}

fn leaf(graph: &mut ComputationGraph, tensor: Tensor) -> Variable {
    graph.weights(&Weights::new(tensor))
}

#[test]
fn matmul_trans_b() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut graph = ComputationGraph::new();
    let a = leaf(&mut graph, random_tensor(Shape::Matrix(3, 4), &mut rng));
    let b = leaf(&mut graph, random_tensor(Shape::Matrix(2, 4), &mut rng));
    let out = graph.matmul_trans_b(a, b).unwrap();
    let root = scalar_root(&mut graph, out, &mut rng);
    assert_gradients_match(&graph, root);
}

#[test]
fn matrix_vector_sum() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut graph = ComputationGraph::new();
    let m = leaf(&mut graph, random_tensor(Shape::Matrix(3, 2), &mut rng));
    let v = leaf(&mut graph, random_tensor(Shape::Vector(2), &mut rng));
    let out = graph.matrix_vector_sum(m, v).unwrap();
    let root = scalar_root(&mut graph, out, &mut rng);
    assert_gradients_match(&graph, root);
}

#[test]
fn element_sum_and_product() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut graph = ComputationGraph::new();
    let a = leaf(&mut graph, random_tensor(Shape::Matrix(2, 3), &mut rng));
    let b = leaf(&mut graph, random_tensor(Shape::Matrix(2, 3), &mut rng));
    let c = leaf(&mut graph, random_tensor(Shape::Matrix(2, 3), &mut rng));
    let sum = graph.element_sum(&[a, b, c]).unwrap();
    let product = graph.elementwise_product(sum, a).unwrap();
    let root = scalar_root(&mut graph, product, &mut rng);
    assert_gradients_match(&graph, root);
}

#[test]
fn sigmoid() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut graph = ComputationGraph::new();
    let x = leaf(&mut graph, random_tensor(Shape::Matrix(3, 3), &mut rng).scalar_multiply(3.0));
    let out = graph.sigmoid(x).unwrap();
    let root = scalar_root(&mut graph, out, &mut rng);
    assert_gradients_match(&graph, root);
}

#[test]
fn relu() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut graph = ComputationGraph::new();
    let x = leaf(&mut graph, away_from_zero(Shape::Vector(8), &mut rng));
    let out = graph.relu(x).unwrap();
    let root = scalar_root(&mut graph, out, &mut rng);
    assert_gradients_match(&graph, root);
}

#[test]
fn slice_with_repeats() {
    let mut rng = StdRng::seed_from_u64(6);
    let mut graph = ComputationGraph::new();
    let x = leaf(&mut graph, random_tensor(Shape::Matrix(4, 3), &mut rng));
    let out = graph.slice(x, vec![2, 0, 2, 1]).unwrap();
    let root = scalar_root(&mut graph, out, &mut rng);
    assert_gradients_match(&graph, root);
}

#[test]
fn normalize_rows() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut graph = ComputationGraph::new();
    let x = leaf(&mut graph, random_tensor(Shape::Matrix(4, 3), &mut rng));
    let out = graph.normalize_rows(x).unwrap();
    let root = scalar_root(&mut graph, out, &mut rng);
    assert_gradients_match(&graph, root);
}

fn sub_graph(weighted: bool) -> Arc<SubGraph> {
    Arc::new(SubGraph {
        node_ids: vec![0, 1, 2],
        adjacency: vec![vec![1, 2, 3], vec![], vec![0, 3]],
        self_adjacency: vec![0, 1, 2],
        relationship_weights: weighted.then(|| vec![vec![0.5, 2.0, 1.0], vec![], vec![3.0, 0.25]]),
        next_node_ids: vec![0, 1, 2, 3],
    })
}

#[test]
fn mean_aggregation() {
    for weighted in [false, true] {
        let mut rng = StdRng::seed_from_u64(8);
        let mut graph = ComputationGraph::new();
        let x = leaf(&mut graph, random_tensor(Shape::Matrix(4, 3), &mut rng));
        let out = graph
            .apply(MeanAggregation::new(sub_graph(weighted)), &[x])
            .unwrap();
        let root = scalar_root(&mut graph, out, &mut rng);
        assert_gradients_match(&graph, root);
    }
}

#[test]
fn elementwise_max() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut graph = ComputationGraph::new();
    let x = leaf(&mut graph, random_tensor(Shape::Matrix(4, 3), &mut rng));
    let out = graph.apply(ElementwiseMax::new(sub_graph(false)), &[x]).unwrap();
    let root = scalar_root(&mut graph, out, &mut rng);
    assert_gradients_match(&graph, root);
}

#[test]
fn elementwise_max_ties_reach_every_winner() {
    let rows = Tensor::from_rows(&[
        vec![0.0, 0.0],
        vec![0.7, -1.0],
        vec![0.7, 0.2],
        vec![0.1, 0.2],
    ])
    .unwrap();
    let mut graph = ComputationGraph::new();
    let x = graph.weights(&Weights::new(rows));
    let out = graph.apply(ElementwiseMax::new(sub_graph(false)), &[x]).unwrap();
    let root = graph.reduce_sum(out).unwrap();

    let mut ctx = ComputationContext::new(&graph);
    ctx.backward(root);
    let grad = ctx.gradient(x).unwrap();
    // Row 0 aggregates 1, 2, 3: column 0 tied by 1 and 2, column 1 by 2 and 3.
    assert_eq!(grad.row(1), &[1.0, 0.0]);
    assert_eq!(grad.row(2), &[1.0, 1.0]);
    // Row 2 aggregates 0 and 3: 3 wins both columns.
    assert_eq!(grad.row(3), &[1.0, 2.0]);
    assert_eq!(grad.row(0), &[0.0, 0.0]);
}

#[test]
fn contrastive_loss() {
    let mut rng = StdRng::seed_from_u64(10);
    let mut graph = ComputationGraph::new();
    let x = leaf(&mut graph, random_tensor(Shape::Matrix(6, 3), &mut rng));
    let root = graph.apply(GraphSageLoss::new(5.0), &[x]).unwrap();
    assert_gradients_match(&graph, root);
}

fn layer_root(aggregator: AggregatorType, activation: ActivationFunction, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let layer = Layer::new(
        LayerConfig {
            aggregator,
            activation,
            sample_size: 3,
            rows: 3,
            cols: 2,
        },
        seed,
    );
    let mut graph = ComputationGraph::new();
    let features = leaf(&mut graph, away_from_zero(Shape::Matrix(4, 2), &mut rng));
    let aggregated = layer
        .aggregator()
        .aggregate(&mut graph, features, sub_graph(false))
        .unwrap();
    let normalized = graph.normalize_rows(aggregated).unwrap();
    // Three rows are not a triplet layout, so project instead of the loss.
    let root = scalar_root(&mut graph, normalized, &mut rng);
    assert_eq!(graph.weights_variables().count(), layer.weights().len() + 1);
    assert_gradients_match(&graph, root);
}

#[test]
fn mean_layer_end_to_end() {
    layer_root(AggregatorType::Mean, ActivationFunction::Sigmoid, 11);
}

#[test]
fn pool_layer_end_to_end() {
    layer_root(AggregatorType::Pool, ActivationFunction::Sigmoid, 12);
}
