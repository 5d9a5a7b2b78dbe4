//! Mini-batch construction: partitioning, positive walks and degree-biased
//! negative sampling.
//!
//! A training batch over anchors `a₀..a_B` is laid out as
//!
//! ```text
//! [ a₀ .. a_B | p₀ .. p_B | n₀ .. n_B ]
//! ```
//!
//! where `pᵢ` ends a random walk from `aᵢ` and `nᵢ` is drawn with probability
//! proportional to `degree^0.75`.

use crate::termination::TerminationFlag;
use crate::{Error, Result};
use lattix_graph::algo::sampling::sample_one;
use lattix_graph::{Graph, NodeId};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::ops::Range;

/// Exponent applied to degrees in the negative sampling distribution.
pub const DEGREE_SMOOTHING: f64 = 0.75;

/// Split `0..node_count` into contiguous ranges of `batch_size` nodes.
/// The last range may be shorter.
pub fn partition(node_count: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..node_count)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(node_count))
        .collect()
}

/// Seed of the triplet stream of one batch. Identical in every epoch.
pub fn batch_seed(random_seed: u64, batch_index: usize) -> u64 {
    random_seed.wrapping_add(batch_index as u64)
}

/// Draws nodes with probability `degree^0.75 / Σ degree^0.75`.
///
/// The normalizer is computed once; each draw is a single cumulative pass
/// over all nodes.
#[derive(Debug, Clone, Copy)]
pub struct NegativeSampler {
    normalizer: f64,
    last_positive: NodeId,
}

impl NegativeSampler {
    /// Fails if no node has a positive degree.
    pub fn new<G: Graph + ?Sized>(graph: &G) -> Result<Self> {
        let mut normalizer = 0.0;
        let mut last_positive = None;
        for node in 0..graph.node_count() {
            let degree = graph.degree(node);
            if degree > 0 {
                normalizer += (degree as f64).powf(DEGREE_SMOOTHING);
                last_positive = Some(node);
            }
        }
        match last_positive {
            Some(last_positive) if normalizer > 0.0 && normalizer.is_finite() => Ok(Self {
                normalizer,
                last_positive,
            }),
            _ => Err(Error::NegativeSampling(format!(
                "degree distribution of {} nodes has no mass",
                graph.node_count()
            ))),
        }
    }

    pub fn normalizer(&self) -> f64 {
        self.normalizer
    }

    pub fn sample<G: Graph + ?Sized, R: Rng + ?Sized>(&self, graph: &G, rng: &mut R) -> NodeId {
        let target: f64 = rng.gen();
        let mut cumulative = 0.0;
        for node in 0..graph.node_count() {
            let degree = graph.degree(node);
            if degree == 0 {
                continue;
            }
            cumulative += (degree as f64).powf(DEGREE_SMOOTHING) / self.normalizer;
            if target <= cumulative {
                return node;
            }
        }
        // Rounding left the cumulative sum just short of 1.
        self.last_positive
    }
}

/// End of a walk of `1..=search_depth` uniform hops from `anchor`.
///
/// The walk stops early at a node without neighbors, so an isolated anchor
/// is its own positive example.
pub fn positive_sample<G: Graph + ?Sized, R: Rng + ?Sized>(
    graph: &G,
    anchor: NodeId,
    search_depth: usize,
    rng: &mut R,
) -> NodeId {
    let depth = rng.gen_range(1..=search_depth.max(1));
    let mut current = anchor;
    for _ in 0..depth {
        match sample_one(graph, current, rng) {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

/// Anchors, then one positive per anchor, then one negative per anchor.
pub fn triplet_batch<G: Graph + ?Sized>(
    graph: &G,
    anchors: Range<usize>,
    seed: u64,
    search_depth: usize,
    negatives: &NegativeSampler,
    termination: &TerminationFlag,
) -> Result<Vec<NodeId>> {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    let batch: Vec<NodeId> = anchors.collect();

    let mut positives = Vec::with_capacity(batch.len());
    for &anchor in &batch {
        termination.assert_running()?;
        positives.push(positive_sample(graph, anchor, search_depth, &mut rng));
    }
    let mut sampled_negatives = Vec::with_capacity(batch.len());
    for _ in &batch {
        termination.assert_running()?;
        sampled_negatives.push(negatives.sample(graph, &mut rng));
    }

    let mut triplets = batch;
    triplets.extend(positives);
    triplets.extend(sampled_negatives);
    Ok(triplets)
}
