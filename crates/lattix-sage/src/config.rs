//! Training configuration.
//!
//! ```rust
//! use lattix_sage::config::{AggregatorType, GraphSageConfig};
//!
//! let config = GraphSageConfig::default()
//!     .with_embedding_dimension(16)
//!     .with_sample_sizes(vec![10, 5])
//!     .with_aggregator(AggregatorType::Pool)
//!     .with_random_seed(42);
//! config.validate().unwrap();
//!
//! let layers = config.layer_configs(8);
//! assert_eq!((layers[0].rows, layers[0].cols), (16, 8));
//! assert_eq!((layers[1].rows, layers[1].cols), (16, 16));
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// How a layer combines a node with its sampled neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorType {
    /// Mean over self and neighbors, then a linear projection.
    #[default]
    Mean,
    /// Column-wise max over projected neighbors, summed with a self projection.
    Pool,
}

/// Nonlinearity applied by a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationFunction {
    #[default]
    Sigmoid,
    Relu,
}

/// GraphSAGE training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSageConfig {
    /// Output dimension of every layer (default: 64).
    pub embedding_dimension: usize,
    /// Neighbors sampled per node, one entry per layer (default: [25, 10]).
    pub sample_sizes: Vec<usize>,
    /// Aggregator of every layer (default: mean).
    pub aggregator: AggregatorType,
    /// Activation of every layer (default: sigmoid).
    pub activation: ActivationFunction,
    /// Nodes per mini-batch (default: 100).
    pub batch_size: usize,
    /// Worker threads (default: 4).
    pub concurrency: usize,
    /// Adam step size (default: 0.1).
    pub learning_rate: f64,
    /// Relative loss change counted as converged (default: 1e-4).
    pub tolerance: f64,
    /// Passes over all batches (default: 1).
    pub epochs: usize,
    /// Optimizer steps per batch (default: 10).
    pub max_iterations: usize,
    /// Maximum hops of the positive-example walk (default: 5).
    pub search_depth: usize,
    /// Weight `Q` of the negative term in the loss (default: 20).
    pub negative_sample_weight: usize,
    /// Seed of every random stream (default: drawn from entropy).
    pub random_seed: Option<u64>,
    /// Sample and aggregate by relationship weight (default: false).
    pub use_relationship_weights: bool,
    /// Node properties concatenated into input features.
    pub feature_properties: Vec<String>,
}

impl Default for GraphSageConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 64,
            sample_sizes: vec![25, 10],
            aggregator: AggregatorType::Mean,
            activation: ActivationFunction::Sigmoid,
            batch_size: 100,
            concurrency: 4,
            learning_rate: 0.1,
            tolerance: 1e-4,
            epochs: 1,
            max_iterations: 10,
            search_depth: 5,
            negative_sample_weight: 20,
            random_seed: None,
            use_relationship_weights: false,
            feature_properties: Vec::new(),
        }
    }
}

impl GraphSageConfig {
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    pub fn with_sample_sizes(mut self, sample_sizes: Vec<usize>) -> Self {
        self.sample_sizes = sample_sizes;
        self
    }

    pub fn with_aggregator(mut self, aggregator: AggregatorType) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_activation(mut self, activation: ActivationFunction) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_search_depth(mut self, search_depth: usize) -> Self {
        self.search_depth = search_depth;
        self
    }

    pub fn with_negative_sample_weight(mut self, weight: usize) -> Self {
        self.negative_sample_weight = weight;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_relationship_weights(mut self, enabled: bool) -> Self {
        self.use_relationship_weights = enabled;
        self
    }

    pub fn with_feature_properties<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_properties = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Check every field, reporting the first violation.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("embedding_dimension", self.embedding_dimension),
            ("batch_size", self.batch_size),
            ("concurrency", self.concurrency),
            ("epochs", self.epochs),
            ("max_iterations", self.max_iterations),
            ("search_depth", self.search_depth),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        if self.sample_sizes.is_empty() {
            return Err(Error::InvalidConfig(
                "sample_sizes must name at least one layer".into(),
            ));
        }
        if let Some(layer) = self.sample_sizes.iter().position(|&size| size == 0) {
            return Err(Error::InvalidConfig(format!(
                "sample size of layer {layer} must be at least 1"
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// One layer config per sample size. The first layer reads
    /// `input_dimension` features; later layers read the previous embedding.
    pub fn layer_configs(&self, input_dimension: usize) -> Vec<LayerConfig> {
        self.sample_sizes
            .iter()
            .enumerate()
            .map(|(i, &sample_size)| LayerConfig {
                aggregator: self.aggregator,
                activation: self.activation,
                sample_size,
                rows: self.embedding_dimension,
                cols: if i == 0 {
                    input_dimension
                } else {
                    self.embedding_dimension
                },
            })
            .collect()
    }
}

/// Shape and behavior of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub aggregator: AggregatorType,
    pub activation: ActivationFunction,
    pub sample_size: usize,
    /// Output dimension.
    pub rows: usize,
    /// Input dimension.
    pub cols: usize,
}
