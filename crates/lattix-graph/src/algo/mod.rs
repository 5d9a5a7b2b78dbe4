//! Graph algorithms used by mini-batch GNN training.
//!
//! - [`sampling`] - Uniform and weighted neighbor sampling, multi-hop
//!   sub graph construction.

pub mod sampling;
