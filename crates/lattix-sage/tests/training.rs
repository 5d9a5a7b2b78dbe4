//! End-to-end training and inference.

use lattix_graph::{AdjacencyGraph, Graph, Orientation};
use lattix_sage::tensor::Shape;
use lattix_sage::{
    ActivationFunction, AggregatorType, Error, GraphSageConfig, GraphSageTrainer, TerminationFlag,
};

fn star() -> AdjacencyGraph {
    AdjacencyGraph::from_edges(5, &[(0, 1), (0, 2), (0, 3), (0, 4)], Orientation::Undirected)
        .unwrap()
}

fn star_features() -> Vec<Vec<f64>> {
    vec![
        vec![1.0, 0.5],
        vec![0.2, 1.0],
        vec![0.9, -0.3],
        vec![-0.5, 0.4],
        vec![0.3, 0.3],
    ]
}

fn star_config() -> GraphSageConfig {
    GraphSageConfig::default()
        .with_embedding_dimension(4)
        .with_sample_sizes(vec![3])
        .with_aggregator(AggregatorType::Mean)
        .with_activation(ActivationFunction::Sigmoid)
        .with_epochs(1)
        .with_tolerance(1e-4)
        .with_learning_rate(0.1)
        .with_concurrency(1)
        .with_random_seed(42)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("lattix_sage=debug")
        .try_init();
}

#[test]
fn star_graph_training_is_reproducible() {
    init_tracing();
    let graph = star();
    let features = star_features();

    let first = GraphSageTrainer::new(star_config())
        .unwrap()
        .train(&graph, &features)
        .unwrap();
    let second = GraphSageTrainer::new(star_config())
        .unwrap()
        .train(&graph, &features)
        .unwrap();

    assert!(first.start_loss.is_finite());
    assert_eq!(first.start_loss.to_bits(), second.start_loss.to_bits());
    assert_eq!(first.epoch_losses, second.epoch_losses);
    assert_eq!(first.ran_epochs, 1);

    let a = first.model.make_embeddings(&graph, &features).unwrap();
    let b = second.model.make_embeddings(&graph, &features).unwrap();
    assert_eq!(a, b);
}

#[test]
fn make_embeddings_is_idempotent() {
    let graph = star();
    let features = star_features();
    let result = GraphSageTrainer::new(star_config())
        .unwrap()
        .train(&graph, &features)
        .unwrap();

    let once = result.model.make_embeddings(&graph, &features).unwrap();
    let twice = result.model.make_embeddings(&graph, &features).unwrap();
    assert_eq!(once, twice);

    assert_eq!(once.len(), graph.node_count());
    for row in &once {
        assert_eq!(row.len(), 4);
        let norm = row.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6, "norm {norm}");
    }
}

#[test]
fn training_lowers_loss_with_full_neighborhoods() {
    // Sample size covers every neighbor, so training and evaluation see the
    // same neighborhoods.
    let config = star_config()
        .with_sample_sizes(vec![5])
        .with_learning_rate(0.01)
        .with_epochs(3)
        .with_tolerance(0.0);
    let result = GraphSageTrainer::new(config)
        .unwrap()
        .train(&star(), &star_features())
        .unwrap();

    assert_eq!(result.ran_epochs, 3);
    assert!(!result.did_converge);
    assert!(
        result.final_loss() < result.start_loss,
        "{} -> {}",
        result.start_loss,
        result.final_loss()
    );
}

#[test]
fn loose_tolerance_converges_after_first_epoch() {
    let config = star_config().with_epochs(5).with_tolerance(1e9);
    let result = GraphSageTrainer::new(config)
        .unwrap()
        .train(&star(), &star_features())
        .unwrap();

    assert!(result.did_converge);
    assert_eq!(result.ran_epochs, 1);
    assert_eq!(result.epoch_losses.len(), 1);
}

#[test]
fn pool_layers_have_expected_weights() {
    let graph = AdjacencyGraph::from_edges(
        8,
        &[(0, 1), (1, 2), (2, 3), (3, 0), (4, 5), (5, 6), (6, 7), (7, 4), (0, 4)],
        Orientation::Undirected,
    )
    .unwrap();
    let features: Vec<Vec<f64>> = (0..8).map(|n| vec![n as f64 / 8.0, 1.0, -0.5]).collect();
    let config = GraphSageConfig::default()
        .with_embedding_dimension(5)
        .with_sample_sizes(vec![3, 2])
        .with_aggregator(AggregatorType::Pool)
        .with_activation(ActivationFunction::Relu)
        .with_batch_size(3)
        .with_concurrency(2)
        .with_random_seed(7);

    let result = GraphSageTrainer::new(config)
        .unwrap()
        .train(&graph, &features)
        .unwrap();
    assert!(result.start_loss.is_finite());

    let layers = result.model.layers();
    assert_eq!(layers.len(), 2);
    let shapes: Vec<Vec<Shape>> = layers
        .iter()
        .map(|layer| layer.weights().iter().map(|w| w.shape()).collect())
        .collect();
    assert_eq!(
        shapes[0],
        vec![
            Shape::Matrix(5, 3),
            Shape::Matrix(5, 3),
            Shape::Matrix(5, 5),
            Shape::Vector(5)
        ]
    );
    assert_eq!(shapes[1][0], Shape::Matrix(5, 5));

    let embeddings = result.model.make_embeddings(&graph, &features).unwrap();
    assert_eq!(embeddings.len(), 8);
    assert!(embeddings.iter().flatten().all(|x| x.is_finite()));
}

#[test]
fn relationship_weights_and_properties() {
    let mut graph = AdjacencyGraph::new(4, Orientation::Undirected);
    graph.add_weighted_relationship(0, 1, 2.0).unwrap();
    graph.add_weighted_relationship(1, 2, 0.5).unwrap();
    graph.add_weighted_relationship(2, 3, 1.0).unwrap();
    for node in 0..4 {
        graph
            .set_node_property(node, "x", vec![node as f64, 1.0])
            .unwrap();
    }
    let config = star_config()
        .with_relationship_weights(true)
        .with_feature_properties(["x"]);

    let result = GraphSageTrainer::new(config)
        .unwrap()
        .train_from_properties(&graph)
        .unwrap();
    let embeddings = result.model.make_embeddings_from_properties(&graph).unwrap();
    assert_eq!(embeddings.len(), 4);
}

#[test]
fn metrics_are_labelled_by_epoch() {
    let config = star_config().with_epochs(2).with_tolerance(0.0);
    let result = GraphSageTrainer::new(config)
        .unwrap()
        .train(&star(), &star_features())
        .unwrap();

    let metrics = result.metrics();
    let labels: Vec<&str> = metrics.epoch_losses.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(labels, vec!["Epoch: 1", "Epoch: 2"]);

    let json = serde_json::to_string(&metrics).unwrap();
    let back: lattix_sage::TrainMetrics = serde_json::from_str(&json).unwrap();
    assert_eq!(back, metrics);
}

#[test]
fn terminated_run_fails() {
    let flag = TerminationFlag::new();
    flag.terminate();
    let trainer = GraphSageTrainer::new(star_config())
        .unwrap()
        .with_termination_flag(flag);

    assert!(matches!(
        trainer.train(&star(), &star_features()),
        Err(Error::Terminated)
    ));
}

#[test]
fn terminated_model_stops_inference() {
    let flag = TerminationFlag::new();
    let result = GraphSageTrainer::new(star_config())
        .unwrap()
        .with_termination_flag(flag.clone())
        .train(&star(), &star_features())
        .unwrap();

    flag.terminate();
    assert!(matches!(
        result.model.make_embeddings(&star(), &star_features()),
        Err(Error::Terminated)
    ));
}

#[test]
fn graph_without_relationships_cannot_sample_negatives() {
    let graph = AdjacencyGraph::new(3, Orientation::Natural);
    let features = vec![vec![1.0, 0.0]; 3];
    assert!(matches!(
        GraphSageTrainer::new(star_config())
            .unwrap()
            .train(&graph, &features),
        Err(Error::NegativeSampling(_))
    ));
}

#[test]
fn input_errors_surface_before_training() {
    assert!(matches!(
        GraphSageTrainer::new(star_config().with_sample_sizes(vec![])),
        Err(Error::InvalidConfig(_))
    ));

    let trainer = GraphSageTrainer::new(star_config()).unwrap();
    assert!(matches!(
        trainer.train(&star(), &star_features()[..3]),
        Err(Error::MissingFeatures {
            expected: 5,
            actual: 3
        })
    ));

    let mut ragged = star_features();
    ragged[2].push(1.0);
    assert!(matches!(
        trainer.train(&star(), &ragged),
        Err(Error::FeatureDimension { node: 2, .. })
    ));

    let result = trainer.train(&star(), &star_features()).unwrap();
    let wider = vec![vec![0.0; 3]; 5];
    assert!(matches!(
        result.model.make_embeddings(&star(), &wider),
        Err(Error::FeatureDimension { expected: 2, actual: 3, .. })
    ));
}

#[test]
fn isolated_nodes_still_get_embeddings() {
    let graph = AdjacencyGraph::from_edges(4, &[(0, 1)], Orientation::Undirected).unwrap();
    let features = vec![vec![1.0, 2.0], vec![2.0, 1.0], vec![0.5, 0.5], vec![-1.0, 1.0]];
    let result = GraphSageTrainer::new(star_config())
        .unwrap()
        .train(&graph, &features)
        .unwrap();
    let embeddings = result.model.make_embeddings(&graph, &features).unwrap();
    assert!(embeddings[3].iter().all(|x| x.is_finite()));
}
