//! Error types for lattix-sage.

use thiserror::Error;

/// Errors raised while building, training or evaluating a GraphSAGE model.
#[derive(Debug, Error)]
pub enum Error {
    /// Operand shapes of a tensor or graph operation disagree.
    #[error("shape mismatch in {op}: expected {expected}, got {actual}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: String,
    },

    /// Variable handle does not belong to this computation graph.
    #[error("unknown variable {0}")]
    UnknownVariable(usize),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Fewer feature rows than nodes.
    #[error("expected features for {expected} nodes, got {actual}")]
    MissingFeatures { expected: usize, actual: usize },

    /// A node's feature vector has the wrong length.
    #[error("node {node} has {actual} features, expected {expected}")]
    FeatureDimension {
        node: usize,
        expected: usize,
        actual: usize,
    },

    /// The degree distribution cannot be sampled from.
    #[error("negative sampling: {0}")]
    NegativeSampling(String),

    /// Loss became NaN or infinite.
    #[error("non-finite loss {loss} in epoch {epoch}, batch {batch}")]
    NonFiniteLoss {
        loss: f64,
        epoch: usize,
        batch: usize,
    },

    /// The run was cancelled through its termination flag.
    #[error("run terminated")]
    Terminated,

    /// Worker pool could not be created.
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Graph oracle error.
    #[error("graph error: {0}")]
    Graph(#[from] lattix_graph::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
