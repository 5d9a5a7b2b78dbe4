// Allow minor clippy style warnings at crate level
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

//! Unsupervised GraphSAGE on a small reverse-mode autodiff engine.
//!
//! `lattix-sage` learns inductive node embeddings: every mini-batch samples
//! multi-hop neighborhoods, aggregates raw features through trainable
//! layers, and pulls sampled neighbors together while pushing degree-biased
//! negatives apart.
//!
//! # Modules
//!
//! - [`tensor`]: Dense scalar/vector/matrix buffers
//! - [`autodiff`]: Computation graph, memoized forward, additive backward
//! - [`aggregator`], [`layer`]: Mean and max-pool aggregation layers
//! - [`loss`], [`optimizer`]: Contrastive triplet loss and Adam
//! - [`batch`]: Partitioning, positive walks, negative sampling
//! - [`model`]: [`GraphSageTrainer::train`] and
//!   [`GraphSageModel::make_embeddings`]
//!
//! # Pipeline
//!
//! ```text
//! batch nodes ─► sub graphs (hop 0 .. L-1) ─► features of hop L-1
//!                                                   │
//!             layer 0 ◄─────────────────────────────┘
//!                │  ...
//!             layer L-1 ─► normalize rows ─► loss (train) / embeddings
//! ```
//!
//! # Example
//!
//! ```rust
//! use lattix_graph::{AdjacencyGraph, Orientation};
//! use lattix_sage::{AggregatorType, GraphSageConfig, GraphSageTrainer};
//!
//! let graph = AdjacencyGraph::from_edges(
//!     6,
//!     &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3)],
//!     Orientation::Undirected,
//! )
//! .unwrap();
//! let features: Vec<Vec<f64>> = (0..6).map(|n| vec![n as f64, 1.0]).collect();
//!
//! let config = GraphSageConfig::default()
//!     .with_embedding_dimension(8)
//!     .with_sample_sizes(vec![3, 2])
//!     .with_aggregator(AggregatorType::Pool)
//!     .with_random_seed(42);
//!
//! let result = GraphSageTrainer::new(config).unwrap().train(&graph, &features).unwrap();
//! assert!(result.start_loss.is_finite());
//!
//! let embeddings = result.model.make_embeddings(&graph, &features).unwrap();
//! assert_eq!(embeddings.len(), 6);
//! ```

pub mod aggregator;
pub mod autodiff;
pub mod batch;
pub mod config;
mod error;
pub mod features;
pub mod layer;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod tensor;
pub mod termination;

pub use config::{ActivationFunction, AggregatorType, GraphSageConfig, LayerConfig};
pub use error::{Error, Result};
pub use model::{GraphSageModel, GraphSageTrainer, TrainMetrics, TrainResult};
pub use termination::TerminationFlag;
