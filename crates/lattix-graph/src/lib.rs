// Allow minor clippy style warnings at crate level
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]

//! Graph substrate for inductive node embeddings.
//!
//! This crate is the read-only side of GraphSAGE training:
//!
//! - [`Graph`] - The oracle a trainer consumes (node count, degree, neighbor
//!   iteration, node properties). Implementations must be safe to read from
//!   many threads at once.
//! - [`AdjacencyGraph`] - An in-memory, petgraph-backed implementation with
//!   dense `0..n` node ids, optional relationship weights and per-node
//!   numeric properties.
//! - [`algo::sampling`] - Neighborhood sampling and the per-layer
//!   [`algo::sampling::SubGraph`] builder used for mini-batch aggregation.
//!
//! # Example
//!
//! ```rust
//! use lattix_graph::{AdjacencyGraph, Graph, Orientation};
//!
//! let mut graph = AdjacencyGraph::new(3, Orientation::Undirected);
//! graph.add_relationship(0, 1).unwrap();
//! graph.add_relationship(0, 2).unwrap();
//!
//! assert_eq!(graph.node_count(), 3);
//! assert_eq!(graph.degree(0), 2);
//! assert_eq!(graph.degree(1), 1);
//! ```

pub mod algo;
mod error;
mod graph;

pub use error::{Error, Result};
pub use graph::{AdjacencyGraph, Graph, NodeId, Orientation};

// Re-export petgraph for callers building graphs from existing petgraph data
pub use petgraph;
