use crate::aggregator::Aggregator;
use crate::autodiff::Weights;
use crate::config::{AggregatorType, LayerConfig};
use crate::tensor::{Shape, Tensor};
use lattix_graph::algo::sampling::{mix_seed, NeighborhoodFunction};
use rand::prelude::*;
use rand_distr::Uniform;
use std::sync::Arc;

/// Phase a mini-batch is processed in. Part of every sampling seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    /// Optimizer steps in the given epoch.
    Training { epoch: usize },
    /// Loss evaluation between epochs.
    Evaluation,
    /// `make_embeddings`.
    Inference,
}

impl Round {
    fn salt(self) -> u64 {
        match self {
            Round::Training { epoch } => 2 + epoch as u64,
            Round::Evaluation => 0,
            Round::Inference => 1,
        }
    }
}

/// One GraphSAGE layer: sampling rule plus trainable aggregator.
#[derive(Debug, Clone)]
pub struct Layer {
    config: LayerConfig,
    seed: u64,
    aggregator: Aggregator,
}

impl Layer {
    /// Create a layer with Glorot-uniform weights drawn from `seed`.
    pub fn new(config: LayerConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let LayerConfig { rows, cols, .. } = config;

        let aggregator = match config.aggregator {
            AggregatorType::Mean => Aggregator::Mean {
                weights: glorot(rows, cols, &mut rng),
                activation: config.activation,
            },
            AggregatorType::Pool => Aggregator::Pool {
                pool_weights: glorot(rows, cols, &mut rng),
                self_weights: glorot(rows, cols, &mut rng),
                neighbors_weights: glorot(rows, rows, &mut rng),
                bias: Weights::new(Tensor::zeros(Shape::Vector(rows))),
                activation: config.activation,
            },
        };

        Self {
            config,
            seed,
            aggregator,
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn sample_size(&self) -> usize {
        self.config.sample_size
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn weights(&self) -> Vec<Arc<Weights>> {
        self.aggregator.weights()
    }

    /// Sampling seed of this layer for one batch in one round.
    ///
    /// Stable for every forward and backward pass over that batch.
    pub fn random_state(&self, round: Round, batch: usize) -> u64 {
        mix_seed(mix_seed(self.seed, round.salt()), batch as u64)
    }

    pub fn neighborhood_function(
        &self,
        round: Round,
        batch: usize,
        weighted: bool,
    ) -> NeighborhoodFunction {
        let seed = self.random_state(round, batch);
        if weighted {
            NeighborhoodFunction::weighted(self.sample_size(), seed)
        } else {
            NeighborhoodFunction::uniform(self.sample_size(), seed)
        }
    }
}

fn glorot(rows: usize, cols: usize, rng: &mut StdRng) -> Arc<Weights> {
    let bound = (6.0 / (rows + cols) as f64).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    let data = (0..rows * cols).map(|_| rng.sample(dist)).collect();
    let tensor = Tensor::new(Shape::Matrix(rows, cols), data)
        .unwrap_or_else(|_| unreachable!("rows * cols values drawn"));
    Weights::new(tensor)
}
