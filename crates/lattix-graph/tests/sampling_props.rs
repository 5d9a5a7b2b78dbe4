//! Property-based tests for neighborhood sampling.
//!
//! These tests verify invariants that should hold for any graph:
//! - Sample size bounds
//! - Samples are drawn from the real neighbor set, without duplicates,
//!   even when relationships are parallel
//! - Local indices of every sub graph hop are valid offsets

use lattix_graph::algo::sampling::{
    build_sub_graphs, sample_neighbors, sample_neighbors_weighted, NeighborhoodFunction,
};
use lattix_graph::{AdjacencyGraph, Graph, Orientation};
use proptest::prelude::*;
use std::collections::HashSet;

prop_compose! {
    fn arb_graph()(node_count in 1usize..20)(
        edges in prop::collection::vec((0..node_count, 0..node_count, 0.0f64..5.0), 0..60),
        undirected in any::<bool>(),
        node_count in Just(node_count),
    ) -> AdjacencyGraph {
        let orientation = if undirected { Orientation::Undirected } else { Orientation::Natural };
        let mut graph = AdjacencyGraph::new(node_count, orientation);
        for (s, t, w) in edges {
            graph.add_weighted_relationship(s, t, w).unwrap();
        }
        graph
    }
}

fn neighbor_set(graph: &AdjacencyGraph, node: usize) -> HashSet<usize> {
    graph.neighbors(node).into_iter().map(|(n, _)| n).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn uniform_sample_is_bounded_and_drawn_from_neighbors(
        graph in arb_graph(),
        k in 0usize..8,
        seed in any::<u64>(),
    ) {
        for node in 0..graph.node_count() {
            let sampled = sample_neighbors(&graph, node, k, seed);
            let neighbors = neighbor_set(&graph, node);

            let distinct: HashSet<usize> = sampled.iter().map(|&(n, _)| n).collect();

            prop_assert!(sampled.iter().all(|(n, _)| neighbors.contains(n)));
            prop_assert_eq!(distinct.len(), sampled.len());
            prop_assert_eq!(sampled.len(), k.min(neighbors.len()));
        }
    }

    #[test]
    fn parallel_relationships_are_sampled_once(
        targets in prop::collection::vec(1usize..12, 0..40),
        k in 1usize..16,
        seed in any::<u64>(),
        weighted in any::<bool>(),
    ) {
        // Hub node 0; repeated targets become parallel relationships.
        let mut graph = AdjacencyGraph::new(12, Orientation::Natural);
        for &t in &targets {
            graph.add_weighted_relationship(0, t, 1.5).unwrap();
        }
        let distinct_targets: HashSet<usize> = targets.iter().copied().collect();

        let hop = NeighborhoodFunction { sample_size: k, seed, weighted };
        let sampled = hop.sample(&graph, 0);
        let distinct: HashSet<usize> = sampled.iter().map(|&(n, _)| n).collect();
        prop_assert_eq!(distinct.len(), sampled.len());
        prop_assert_eq!(sampled.len(), k.min(distinct_targets.len()));

        let sub_graph = build_sub_graphs(&[0], &[hop], &graph).remove(0);
        let locals: HashSet<usize> = sub_graph.adjacency[0].iter().copied().collect();
        prop_assert_eq!(locals.len(), sub_graph.adjacency[0].len());
    }

    #[test]
    fn weighted_sample_is_bounded_and_positive(
        graph in arb_graph(),
        k in 0usize..8,
        seed in any::<u64>(),
    ) {
        for node in 0..graph.node_count() {
            let sampled = sample_neighbors_weighted(&graph, node, k, seed);
            let neighbors = neighbor_set(&graph, node);
            let distinct: HashSet<usize> = sampled.iter().map(|&(n, _)| n).collect();
            prop_assert!(sampled.len() <= k);
            prop_assert_eq!(distinct.len(), sampled.len());
            prop_assert!(sampled.iter().all(|(n, w)| neighbors.contains(n) && *w > 0.0));
        }
    }

    #[test]
    fn sub_graph_indices_are_valid_offsets(
        graph in arb_graph(),
        sizes in prop::collection::vec(1usize..5, 1..4),
        seed in any::<u64>(),
        weighted in any::<bool>(),
    ) {
        let batch: Vec<usize> = (0..graph.node_count()).step_by(2).collect();
        let hops: Vec<NeighborhoodFunction> = sizes
            .iter()
            .map(|&size| NeighborhoodFunction { sample_size: size, seed, weighted })
            .collect();

        let sub_graphs = build_sub_graphs(&batch, &hops, &graph);
        prop_assert_eq!(sub_graphs.len(), hops.len());
        prop_assert_eq!(sub_graphs.last().unwrap().row_count(), batch.len());

        for (i, sub_graph) in sub_graphs.iter().enumerate() {
            let next = sub_graph.next_node_ids.len();
            prop_assert_eq!(sub_graph.self_adjacency.len(), sub_graph.row_count());
            prop_assert!(sub_graph.self_adjacency.iter().all(|&l| l < next));
            prop_assert!(sub_graph.adjacency.iter().flatten().all(|&l| l < next));
            for (row, &node) in sub_graph.node_ids.iter().enumerate() {
                prop_assert_eq!(sub_graph.next_node_ids[sub_graph.self_adjacency[row]], node);
            }
            // Outermost first: each element's rows are the next element's next hop.
            if let Some(inner) = sub_graphs.get(i + 1) {
                prop_assert_eq!(&sub_graph.node_ids, &inner.next_node_ids);
            }
        }
    }
}
