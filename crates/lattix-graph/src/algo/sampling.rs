//! Neighbor sampling for Graph Neural Networks.
//!
//! Provides the mini-batch sampling used for training GNNs like `GraphSAGE`.
//!
//! # Key Types
//!
//! - [`sample_neighbors`] - Up to k distinct neighbors of one node (single hop)
//! - [`sample_neighbors_weighted`] - Same, biased by relationship weight
//! - [`NeighborhoodFunction`] - One layer's sampling rule (size, seed, weighting)
//! - [`build_sub_graphs`] - Multi-hop sampling producing one [`SubGraph`] per layer
//!
//! # Local Indexing
//!
//! Each [`SubGraph`] rewrites original node ids into local row offsets of the
//! *next* hop's node list. Offsets are handed out in first-seen order, with a
//! row's own node mapped before its neighbors, so the same batch always yields
//! the same layout.
//!
//! ```text
//! batch          [7, 3]
//! hop 1 rows     7 -> {3, 9}      3 -> {7}
//! next nodes     [7, 3, 9]        (self first, then neighbors, deduplicated)
//! adjacency      [[1, 2], [0]]
//! self adjacency [0, 1]
//! ```

use crate::{Graph, NodeId};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::collections::{HashMap, HashSet};

/// Derive an independent seed from `seed` and `salt` (splitmix64 finalizer).
///
/// Used to give every (layer, batch, node) its own reproducible stream
/// without sharing mutable RNG state between threads.
#[must_use]
pub fn mix_seed(seed: u64, salt: u64) -> u64 {
    let mut z = seed ^ salt.wrapping_add(0x9E37_79B9_7F4A_7C15).rotate_left(17);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Out-neighbors of `node` with parallel relationships collapsed.
///
/// Targets keep visiting order and the weight of the first relationship
/// visited that passes `keep`.
fn distinct_neighbors<G: Graph + ?Sized>(
    graph: &G,
    node: NodeId,
    keep: impl Fn(f64) -> bool,
) -> Vec<(NodeId, f64)> {
    let mut seen = HashSet::new();
    graph
        .neighbors(node)
        .into_iter()
        .filter(|&(target, weight)| keep(weight) && seen.insert(target))
        .collect()
}

/// Sample up to `k` distinct out-neighbors of `node`, uniformly without replacement.
///
/// Nodes with at most `k` distinct neighbors return all of them (no padding,
/// no duplicates). Nodes without neighbors return an empty list.
///
/// Returned pairs carry the relationship weight of each sampled neighbor;
/// parallel relationships count once, with the first visited weight.
///
/// # Complexity
/// O(degree)
#[must_use]
pub fn sample_neighbors<G: Graph + ?Sized>(
    graph: &G,
    node: NodeId,
    k: usize,
    seed: u64,
) -> Vec<(NodeId, f64)> {
    let all_neighbors = distinct_neighbors(graph, node, |_| true);
    if all_neighbors.len() <= k {
        return all_neighbors;
    }

    let mut rng = XorShiftRng::seed_from_u64(seed);
    all_neighbors
        .choose_multiple(&mut rng, k)
        .copied()
        .collect()
}

/// Sample up to `k` out-neighbors of `node` with probability proportional to
/// relationship weight (weighted reservoir sampling, key `u^(1/w)`).
///
/// Relationships with a non-positive weight are never sampled. Parallel
/// relationships count once, with the first visited positive weight.
///
/// # Complexity
/// O(degree log degree)
#[must_use]
pub fn sample_neighbors_weighted<G: Graph + ?Sized>(
    graph: &G,
    node: NodeId,
    k: usize,
    seed: u64,
) -> Vec<(NodeId, f64)> {
    let candidates = distinct_neighbors(graph, node, |weight| weight > 0.0);
    if candidates.len() <= k {
        return candidates;
    }

    let mut rng = XorShiftRng::seed_from_u64(seed);
    let mut keyed: Vec<(f64, (NodeId, f64))> = candidates
        .into_iter()
        .map(|candidate| {
            let u: f64 = rng.gen();
            (u.powf(1.0 / candidate.1), candidate)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.truncate(k);
    keyed.into_iter().map(|(_, candidate)| candidate).collect()
}

/// Draw a single uniform out-neighbor of `node`, or `None` if it has none.
pub fn sample_one<G: Graph + ?Sized, R: Rng + ?Sized>(
    graph: &G,
    node: NodeId,
    rng: &mut R,
) -> Option<NodeId> {
    let degree = graph.degree(node);
    if degree == 0 {
        return None;
    }
    let pick = rng.gen_range(0..degree);
    let mut seen = 0;
    let mut chosen = None;
    graph.for_each_neighbor(node, &mut |target, _| {
        if seen == pick {
            chosen = Some(target);
        }
        seen += 1;
    });
    chosen
}

/// Sampling rule of one layer for one mini-batch.
///
/// The seed is fixed for the lifetime of a batch so that every forward and
/// backward pass over that batch sees the same neighborhoods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborhoodFunction {
    /// Maximum neighbors kept per node.
    pub sample_size: usize,
    /// Batch-level seed; each node derives its own stream from it.
    pub seed: u64,
    /// Sample proportionally to relationship weight instead of uniformly.
    pub weighted: bool,
}

impl NeighborhoodFunction {
    pub fn uniform(sample_size: usize, seed: u64) -> Self {
        Self {
            sample_size,
            seed,
            weighted: false,
        }
    }

    pub fn weighted(sample_size: usize, seed: u64) -> Self {
        Self {
            sample_size,
            seed,
            weighted: true,
        }
    }

    /// Sample the neighborhood of `node`.
    pub fn sample<G: Graph + ?Sized>(&self, graph: &G, node: NodeId) -> Vec<(NodeId, f64)> {
        let seed = mix_seed(self.seed, node as u64);
        if self.weighted {
            sample_neighbors_weighted(graph, node, self.sample_size, seed)
        } else {
            sample_neighbors(graph, node, self.sample_size, seed)
        }
    }
}

/// Append-order map from original node ids to dense local ids.
#[derive(Debug, Clone, Default)]
pub struct LocalIdMap {
    original_ids: Vec<NodeId>,
    to_local: HashMap<NodeId, usize>,
}

impl LocalIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local id of `original`, assigning the next free one on first sight.
    pub fn to_mapped(&mut self, original: NodeId) -> usize {
        if let Some(&local) = self.to_local.get(&original) {
            return local;
        }
        let local = self.original_ids.len();
        self.to_local.insert(original, local);
        self.original_ids.push(original);
        local
    }

    pub fn len(&self) -> usize {
        self.original_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original_ids.is_empty()
    }

    pub fn original_ids(&self) -> &[NodeId] {
        &self.original_ids
    }

    pub fn into_original_ids(self) -> Vec<NodeId> {
        self.original_ids
    }
}

/// One hop of a sampled, locally re-indexed neighborhood.
///
/// Row `i` corresponds to `node_ids[i]`. All indices in `adjacency` and
/// `self_adjacency` are offsets into `next_node_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubGraph {
    /// Original ids of this hop's rows (may contain repeats).
    pub node_ids: Vec<NodeId>,
    /// Local ids of each row's sampled neighbors.
    pub adjacency: Vec<Vec<usize>>,
    /// Local id of each row's own node.
    pub self_adjacency: Vec<usize>,
    /// Relationship weights parallel to `adjacency`, when sampling was weighted.
    pub relationship_weights: Option<Vec<Vec<f64>>>,
    /// Deduplicated original ids of the next hop, in local-id order.
    pub next_node_ids: Vec<NodeId>,
}

impl SubGraph {
    /// Number of rows (nodes aggregated into at this hop).
    pub fn row_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Relationship weight of the `position`-th neighbor of `row` (1.0 if unweighted).
    pub fn relationship_weight(&self, row: usize, position: usize) -> f64 {
        self.relationship_weights
            .as_ref()
            .and_then(|weights| weights.get(row))
            .and_then(|row_weights| row_weights.get(position))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Sample one hop for `node_ids`.
pub fn build_sub_graph<G: Graph + ?Sized>(
    node_ids: &[NodeId],
    neighborhood: &NeighborhoodFunction,
    graph: &G,
) -> SubGraph {
    let mut id_map = LocalIdMap::new();
    let mut adjacency = Vec::with_capacity(node_ids.len());
    let mut self_adjacency = Vec::with_capacity(node_ids.len());
    let mut weights = neighborhood
        .weighted
        .then(|| Vec::with_capacity(node_ids.len()));

    for &node in node_ids {
        let sampled = neighborhood.sample(graph, node);
        self_adjacency.push(id_map.to_mapped(node));
        adjacency.push(
            sampled
                .iter()
                .map(|&(neighbor, _)| id_map.to_mapped(neighbor))
                .collect(),
        );
        if let Some(weights) = weights.as_mut() {
            weights.push(sampled.iter().map(|&(_, weight)| weight).collect());
        }
    }

    SubGraph {
        node_ids: node_ids.to_vec(),
        adjacency,
        self_adjacency,
        relationship_weights: weights,
        next_node_ids: id_map.into_original_ids(),
    }
}

/// Sample `neighborhoods.len()` hops starting from `batch`, returned
/// outermost-first.
///
/// `neighborhoods[h]` samples hop `h`, counted from the batch. Hop `h + 1`
/// has one row per entry of hop `h`'s `next_node_ids`. The result is ordered
/// deepest hop first: element 0 holds the hop whose `next_node_ids` carry the
/// raw features, and the last element has one row per batch entry, so
/// aggregation layers consume the elements in order.
pub fn build_sub_graphs<G: Graph + ?Sized>(
    batch: &[NodeId],
    neighborhoods: &[NeighborhoodFunction],
    graph: &G,
) -> Vec<SubGraph> {
    let mut sub_graphs: Vec<SubGraph> = Vec::with_capacity(neighborhoods.len());
    for neighborhood in neighborhoods {
        let rows = sub_graphs
            .last()
            .map_or(batch, |previous| previous.next_node_ids.as_slice());
        let sub_graph = build_sub_graph(rows, neighborhood, graph);
        sub_graphs.push(sub_graph);
    }
    sub_graphs.reverse();
    sub_graphs
}
