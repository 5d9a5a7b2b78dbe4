//! Training orchestration and inference.
//!
//! # Training run
//!
//! ```text
//! validate config ─► init layers ─► negative sampler ─► start loss
//!                                                          │
//!        ┌─────────────────────────────────────────────────┘
//!        ▼
//!   epoch e: all batches in parallel ─► evaluate loss ─► converged? ──yes──► done
//!        ▲                                                   │ no
//!        └─────────────────────── next epoch ◄───────────────┘
//! ```
//!
//! Each batch builds its computation graph once and then repeats
//! forward → tolerance check → backward → Adam step up to `max_iterations`
//! times. Layer sampling seeds are fixed per (round, batch), so every
//! iteration of a batch sees the same neighborhoods.
//!
//! Batches of one epoch share the layer weights and the optimizer state;
//! see [`crate::autodiff::Weights`] for how concurrent updates are
//! serialized. With `concurrency == 1` a run is fully deterministic for a
//! given `random_seed`.

use crate::autodiff::{ComputationContext, ComputationGraph, Variable};
use crate::batch::{batch_seed, partition, triplet_batch, NegativeSampler};
use crate::config::GraphSageConfig;
use crate::features;
use crate::layer::{Layer, Round};
use crate::loss::GraphSageLoss;
use crate::optimizer::AdamOptimizer;
use crate::termination::TerminationFlag;
use crate::{Error, Result};
use lattix_graph::algo::sampling::{build_sub_graphs, mix_seed, NeighborhoodFunction};
use lattix_graph::{Graph, NodeId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Trained layers plus what is needed to run them.
#[derive(Debug, Clone)]
pub struct GraphSageModel {
    config: GraphSageConfig,
    layers: Vec<Layer>,
    termination: TerminationFlag,
}

impl GraphSageModel {
    /// Freshly initialized layers for `input_dimension` features.
    pub fn new(config: GraphSageConfig, input_dimension: usize, random_seed: u64) -> Result<Self> {
        config.validate()?;
        let layers = config
            .layer_configs(input_dimension)
            .into_iter()
            .enumerate()
            .map(|(i, layer)| Layer::new(layer, mix_seed(random_seed, i as u64)))
            .collect();
        Ok(Self {
            config,
            layers,
            termination: TerminationFlag::new(),
        })
    }

    pub fn with_termination_flag(mut self, termination: TerminationFlag) -> Self {
        self.termination = termination;
        self
    }

    pub fn config(&self) -> &GraphSageConfig {
        &self.config
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Input feature dimension the first layer expects.
    pub fn input_dimension(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.config().cols)
    }

    /// Append the embeddings of `nodes` to `graph`: one L2-normalized row per
    /// entry of `nodes`.
    pub fn embeddings_variable<G: Graph + ?Sized>(
        &self,
        computation: &mut ComputationGraph,
        graph: &G,
        features: &[Vec<f64>],
        nodes: &[NodeId],
        round: Round,
        batch: usize,
    ) -> Result<Variable> {
        let neighborhoods: Vec<NeighborhoodFunction> = self
            .layers
            .iter()
            .map(|layer| {
                layer.neighborhood_function(round, batch, self.config.use_relationship_weights)
            })
            .collect();
        let sub_graphs: Vec<_> = build_sub_graphs(nodes, &neighborhoods, graph)
            .into_iter()
            .map(Arc::new)
            .collect();

        let deepest = sub_graphs.first().map_or(nodes, |s| s.next_node_ids.as_slice());
        let mut previous = computation.constant(features::feature_matrix(features, deepest)?);

        // The first layer aggregates the deepest hop, the last layer the batch.
        for (layer, sub_graph) in self.layers.iter().zip(&sub_graphs) {
            previous = layer
                .aggregator()
                .aggregate(computation, previous, Arc::clone(sub_graph))?;
        }
        computation.normalize_rows(previous)
    }

    /// Embeddings of every node, indexed by node id. Forward passes only.
    pub fn make_embeddings<G: Graph + ?Sized>(
        &self,
        graph: &G,
        features: &[Vec<f64>],
    ) -> Result<Vec<Vec<f64>>> {
        let dimension = features::dimension(features, graph.node_count())?;
        if graph.node_count() > 0 && dimension != self.input_dimension() {
            return Err(Error::FeatureDimension {
                node: 0,
                expected: self.input_dimension(),
                actual: dimension,
            });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency)
            .build()?;
        let batches = partition(graph.node_count(), self.config.batch_size);
        info!(
            nodes = graph.node_count(),
            batches = batches.len(),
            "generating embeddings"
        );

        let per_batch = pool.install(|| {
            batches
                .par_iter()
                .enumerate()
                .map(|(index, range)| self.embed_batch(graph, features, index, range.clone()))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(per_batch.into_iter().flatten().collect())
    }

    /// [`make_embeddings`](Self::make_embeddings) over the configured
    /// `feature_properties`.
    pub fn make_embeddings_from_properties<G: Graph + ?Sized>(
        &self,
        graph: &G,
    ) -> Result<Vec<Vec<f64>>> {
        let features = features::extract(graph, &self.config.feature_properties)?;
        self.make_embeddings(graph, &features)
    }

    fn embed_batch<G: Graph + ?Sized>(
        &self,
        graph: &G,
        features: &[Vec<f64>],
        index: usize,
        range: Range<usize>,
    ) -> Result<Vec<Vec<f64>>> {
        self.termination.assert_running()?;
        let nodes: Vec<NodeId> = range.collect();
        let mut computation = ComputationGraph::new();
        let embeddings = self.embeddings_variable(
            &mut computation,
            graph,
            features,
            &nodes,
            Round::Inference,
            index,
        )?;
        let mut ctx = ComputationContext::new(&computation);
        let values = ctx.forward(embeddings);
        Ok((0..values.rows()).map(|r| values.row(r).to_vec()).collect())
    }
}

/// Outcome of [`GraphSageTrainer::train`].
#[derive(Debug, Clone)]
pub struct TrainResult {
    /// Loss over all batches before the first epoch.
    pub start_loss: f64,
    /// Loss over all batches after each epoch, keyed by 1-based epoch.
    pub epoch_losses: BTreeMap<usize, f64>,
    pub did_converge: bool,
    pub ran_epochs: usize,
    pub model: GraphSageModel,
}

impl TrainResult {
    pub fn metrics(&self) -> TrainMetrics {
        TrainMetrics {
            start_loss: self.start_loss,
            epoch_losses: self
                .epoch_losses
                .iter()
                .map(|(epoch, &loss)| (format!("Epoch: {epoch}"), loss))
                .collect(),
            did_converge: self.did_converge,
            ran_epochs: self.ran_epochs,
        }
    }

    /// Loss after the last epoch that ran, or the start loss.
    pub fn final_loss(&self) -> f64 {
        self.epoch_losses
            .values()
            .next_back()
            .copied()
            .unwrap_or(self.start_loss)
    }
}

/// Serializable training summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub start_loss: f64,
    /// `"Epoch: n"` labels in epoch order.
    pub epoch_losses: Vec<(String, f64)>,
    pub did_converge: bool,
    pub ran_epochs: usize,
}

/// Unsupervised GraphSAGE trainer.
///
/// ```rust
/// use lattix_graph::{AdjacencyGraph, Orientation};
/// use lattix_sage::{GraphSageConfig, GraphSageTrainer};
///
/// let graph = AdjacencyGraph::from_edges(
///     4,
///     &[(0, 1), (1, 2), (2, 3), (3, 0)],
///     Orientation::Undirected,
/// )
/// .unwrap();
/// let features = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0], vec![0.5, 0.0]];
///
/// let config = GraphSageConfig::default()
///     .with_embedding_dimension(4)
///     .with_sample_sizes(vec![2])
///     .with_concurrency(1)
///     .with_random_seed(7);
/// let result = GraphSageTrainer::new(config).unwrap().train(&graph, &features).unwrap();
///
/// let embeddings = result.model.make_embeddings(&graph, &features).unwrap();
/// assert_eq!(embeddings.len(), 4);
/// assert_eq!(embeddings[0].len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct GraphSageTrainer {
    config: GraphSageConfig,
    termination: TerminationFlag,
}

impl GraphSageTrainer {
    pub fn new(config: GraphSageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            termination: TerminationFlag::new(),
        })
    }

    /// Share `termination` with the run and the returned model.
    pub fn with_termination_flag(mut self, termination: TerminationFlag) -> Self {
        self.termination = termination;
        self
    }

    pub fn config(&self) -> &GraphSageConfig {
        &self.config
    }

    /// [`train`](Self::train) over the configured `feature_properties`.
    pub fn train_from_properties<G: Graph + ?Sized>(&self, graph: &G) -> Result<TrainResult> {
        let features = features::extract(graph, &self.config.feature_properties)?;
        self.train(graph, &features)
    }

    /// Train on `graph` with one feature row per node.
    pub fn train<G: Graph + ?Sized>(&self, graph: &G, features: &[Vec<f64>]) -> Result<TrainResult> {
        let config = &self.config;
        let input_dimension = features::dimension(features, graph.node_count())?;
        let random_seed = config.random_seed.unwrap_or_else(rand::random);
        let model = GraphSageModel::new(config.clone(), input_dimension, random_seed)?
            .with_termination_flag(self.termination.clone());
        let negatives = NegativeSampler::new(graph)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency)
            .build()?;

        let run = TrainingRun {
            config,
            graph,
            features,
            model: &model,
            negatives,
            optimizer: AdamOptimizer::new(config.learning_rate),
            random_seed,
            termination: &self.termination,
            batches: partition(graph.node_count(), config.batch_size),
        };

        info!(
            nodes = graph.node_count(),
            batches = run.batches.len(),
            layers = model.layers().len(),
            input_dimension,
            random_seed,
            "graph sage training started"
        );

        let start_loss = pool.install(|| run.evaluate_loss(0))?;
        info!(start_loss, "initial loss");

        let mut previous = start_loss;
        let mut epoch_losses = BTreeMap::new();
        let mut did_converge = false;
        let mut ran_epochs = 0;

        for epoch in 1..=config.epochs {
            self.termination.assert_running()?;
            info!(epoch, "epoch started");

            pool.install(|| run.train_epoch(epoch))?;
            let loss = pool.install(|| run.evaluate_loss(epoch))?;
            epoch_losses.insert(epoch, loss);
            ran_epochs = epoch;

            info!(epoch, loss, "epoch finished");
            if relative_change(previous, loss) < config.tolerance {
                did_converge = true;
                break;
            }
            previous = loss;
        }

        info!(ran_epochs, did_converge, "graph sage training finished");
        Ok(TrainResult {
            start_loss,
            epoch_losses,
            did_converge,
            ran_epochs,
            model,
        })
    }
}

/// `|old - new| / |old|`; zero when both are zero.
fn relative_change(old: f64, new: f64) -> f64 {
    if old == new {
        0.0
    } else {
        (old - new).abs() / old.abs()
    }
}

/// Everything the batches of one training run share.
struct TrainingRun<'a, G: ?Sized> {
    config: &'a GraphSageConfig,
    graph: &'a G,
    features: &'a [Vec<f64>],
    model: &'a GraphSageModel,
    negatives: NegativeSampler,
    optimizer: AdamOptimizer,
    random_seed: u64,
    termination: &'a TerminationFlag,
    batches: Vec<Range<usize>>,
}

impl<'a, G: Graph + ?Sized> TrainingRun<'a, G> {
    fn loss_graph(&self, index: usize, round: Round) -> Result<(ComputationGraph, Variable)> {
        let triplets = triplet_batch(
            self.graph,
            self.batches[index].clone(),
            batch_seed(self.random_seed, index),
            self.config.search_depth,
            &self.negatives,
            self.termination,
        )?;
        let mut computation = ComputationGraph::new();
        let embeddings = self.model.embeddings_variable(
            &mut computation,
            self.graph,
            self.features,
            &triplets,
            round,
            index,
        )?;
        let loss = computation.apply(
            GraphSageLoss::new(self.config.negative_sample_weight as f64),
            &[embeddings],
        )?;
        Ok((computation, loss))
    }

    /// Summed loss of all batches at the current weights. `epoch` 0 is the
    /// baseline before training.
    fn evaluate_loss(&self, epoch: usize) -> Result<f64> {
        let losses = (0..self.batches.len())
            .into_par_iter()
            .map(|index| {
                let (computation, loss) = self.loss_graph(index, Round::Evaluation)?;
                let mut ctx = ComputationContext::new(&computation);
                let value = ctx.forward(loss).value();
                ensure_finite(value, epoch, index)
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(losses.into_iter().sum())
    }

    fn train_epoch(&self, epoch: usize) -> Result<()> {
        (0..self.batches.len())
            .into_par_iter()
            .try_for_each(|index| self.train_on_batch(epoch, index))
    }

    fn train_on_batch(&self, epoch: usize, index: usize) -> Result<()> {
        let (computation, loss) = self.loss_graph(index, Round::Training { epoch })?;
        let mut previous = f64::MAX;
        let mut initial = None;
        let mut last = f64::NAN;
        let mut iterations = 0;

        for iteration in 0..self.config.max_iterations {
            self.termination.assert_running()?;
            let mut ctx = ComputationContext::new(&computation);
            let current = ensure_finite(ctx.forward(loss).value(), epoch, index)?;
            initial.get_or_insert(current);
            last = current;
            trace!(epoch, batch = index, iteration, loss = current, "iteration");

            if relative_change(previous, current) < self.config.tolerance {
                break;
            }
            ctx.backward(loss);
            self.optimizer.update(&ctx);
            previous = current;
            iterations = iteration + 1;
        }

        debug!(
            epoch,
            batch = index,
            initial_loss = initial.unwrap_or(f64::NAN),
            final_loss = last,
            iterations,
            "batch trained"
        );
        Ok(())
    }
}

fn ensure_finite(loss: f64, epoch: usize, batch: usize) -> Result<f64> {
    if loss.is_finite() {
        Ok(loss)
    } else {
        Err(Error::NonFiniteLoss { loss, epoch, batch })
    }
}
