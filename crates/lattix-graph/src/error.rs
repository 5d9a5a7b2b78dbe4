//! Error types for lattix-graph.

use thiserror::Error;

/// Errors raised while building or querying a graph.
#[derive(Debug, Error)]
pub enum Error {
    /// Node id outside `0..node_count`.
    #[error("node {node} not found (node count {node_count})")]
    NodeNotFound { node: usize, node_count: usize },

    /// A node has no value for a requested property key.
    #[error("node {node} has no property '{key}'")]
    MissingProperty { node: usize, key: String },

    /// Relationship rejected at construction.
    #[error("invalid relationship: {0}")]
    InvalidRelationship(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
