//! Input features: node property extraction and per-batch feature matrices.

use crate::tensor::Tensor;
use crate::{Error, Result};
use lattix_graph::{Graph, NodeId};

/// Concatenate the `keys` properties of every node, in key order.
///
/// Every node must carry every key, and all nodes must end up with the same
/// feature dimension.
pub fn extract<G: Graph + ?Sized>(graph: &G, keys: &[String]) -> Result<Vec<Vec<f64>>> {
    let mut features = Vec::with_capacity(graph.node_count());
    for node in 0..graph.node_count() {
        let mut row = Vec::new();
        for key in keys {
            let values =
                graph
                    .node_property(node, key)
                    .ok_or_else(|| lattix_graph::Error::MissingProperty {
                        node,
                        key: key.clone(),
                    })?;
            row.extend_from_slice(values);
        }
        features.push(row);
    }
    dimension(&features, graph.node_count())?;
    Ok(features)
}

/// Feature dimension shared by the first `node_count` rows.
pub fn dimension(features: &[Vec<f64>], node_count: usize) -> Result<usize> {
    if features.len() < node_count {
        return Err(Error::MissingFeatures {
            expected: node_count,
            actual: features.len(),
        });
    }
    let expected = features.first().map_or(0, Vec::len);
    if let Some((node, row)) = features[..node_count]
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != expected)
    {
        return Err(Error::FeatureDimension {
            node,
            expected,
            actual: row.len(),
        });
    }
    Ok(expected)
}

/// Rows of `features` for `node_ids`, in order.
pub fn feature_matrix(features: &[Vec<f64>], node_ids: &[NodeId]) -> Result<Tensor> {
    let rows: Vec<Vec<f64>> = node_ids
        .iter()
        .map(|&node| {
            features.get(node).cloned().ok_or(Error::MissingFeatures {
                expected: node + 1,
                actual: features.len(),
            })
        })
        .collect::<Result<_>>()?;
    let cols = features.first().map_or(0, Vec::len);
    if rows.is_empty() {
        return Tensor::matrix(Vec::new(), 0, cols);
    }
    Tensor::from_rows(&rows)
}
