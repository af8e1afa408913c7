//! Disjoint-union batching of k-hop sub-graphs.
//!
//! A batch glues the neighborhoods of several episode nodes into one graph
//! the encoder can process in a single forward pass. Sub-graph `i` occupies
//! rows `offsets[i]..offsets[i + 1]`; its local edges are shifted by
//! `offsets[i]`; its target (local index 0) becomes a `true` entry of
//! `classify_mask`.
//!
//! ```text
//! sub-graphs   [3, u1, u2]   [8, u5]
//! node_ids     [3, u1, u2, 8, u5]
//! offsets      [0, 3]
//! edges        (0,1) (0,2) | (3,4)
//! mask         [T, F, F, T, F]
//! targets      [label(3), label(8)]
//! ```
//!
//! The same original node may appear in several segments (two documents
//! shared by one user); segments never share rows.

use crate::algo::khop::KHopExtractor;
use crate::graph::EdgeKind;
use crate::{ClassId, Error, GraphDataset, NodeId, Result};
use ndarray::{concatenate, Array2, Axis};
use std::ops::Range;

/// Merged graph of several sub-graphs with a classify mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Original id of every row, in concatenation order.
    pub node_ids: Vec<NodeId>,
    /// Row-gathered features, one row per entry of `node_ids`.
    pub features: Array2<f32>,
    /// Batch-level edges, each undirected edge once.
    pub edges: Vec<(usize, usize)>,
    /// Kind of each edge.
    pub edge_kinds: Vec<EdgeKind>,
    /// `true` exactly at each sub-graph's target row.
    pub classify_mask: Vec<bool>,
    /// Class of each target, in mask order.
    pub targets: Vec<ClassId>,
    /// First row of each sub-graph.
    pub offsets: Vec<usize>,
}

impl Batch {
    /// Batch with no sub-graphs.
    pub fn empty(num_features: usize) -> Self {
        Self {
            node_ids: Vec::new(),
            features: Array2::zeros((0, num_features)),
            edges: Vec::new(),
            edge_kinds: Vec::new(),
            classify_mask: Vec::new(),
            targets: Vec::new(),
            offsets: Vec::new(),
        }
    }

    /// Total rows.
    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    /// Undirected edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of merged sub-graphs.
    pub fn num_graphs(&self) -> usize {
        self.offsets.len()
    }

    /// Rows of sub-graph `i`.
    pub fn segment(&self, i: usize) -> Range<usize> {
        let end = self
            .offsets
            .get(i + 1)
            .copied()
            .unwrap_or_else(|| self.num_nodes());
        self.offsets[i]..end
    }

    /// Row indices where `classify_mask` is set, ascending.
    pub fn target_rows(&self) -> Vec<usize> {
        self.classify_mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect()
    }

    /// Both orientations of every edge.
    pub fn directed_edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().flat_map(|&(i, j)| [(i, j), (j, i)])
    }

    /// COO edge index `(src, dst)` with both orientations, as GNN layers expect.
    pub fn edge_index(&self) -> (Vec<usize>, Vec<usize>) {
        self.directed_edges().unzip()
    }

    /// Concatenate batches, shifting rows of later batches.
    ///
    /// # Errors
    /// `DataIntegrity` if feature dimensions differ.
    pub fn concat(batches: &[Batch]) -> Result<Batch> {
        let Some(first) = batches.first() else {
            return Ok(Batch::empty(0));
        };
        let num_features = first.features.ncols();
        if let Some(bad) = batches.iter().find(|b| b.features.ncols() != num_features) {
            return Err(Error::DataIntegrity(format!(
                "cannot concatenate batches with {} and {} features",
                num_features,
                bad.features.ncols()
            )));
        }

        let mut out = Batch::empty(num_features);
        let views: Vec<_> = batches.iter().map(|b| b.features.view()).collect();
        out.features = concatenate(Axis(0), &views)
            .map_err(|e| Error::DataIntegrity(format!("feature concatenation failed: {e}")))?;

        for batch in batches {
            let shift = out.node_ids.len();
            out.node_ids.extend_from_slice(&batch.node_ids);
            out.edges
                .extend(batch.edges.iter().map(|&(i, j)| (i + shift, j + shift)));
            out.edge_kinds.extend_from_slice(&batch.edge_kinds);
            out.classify_mask.extend_from_slice(&batch.classify_mask);
            out.targets.extend_from_slice(&batch.targets);
            out.offsets.extend(batch.offsets.iter().map(|o| o + shift));
        }
        Ok(out)
    }
}

/// Builds [`Batch`]es from episode node ids.
#[derive(Debug, Clone, Copy)]
pub struct BatchAssembler<'a> {
    dataset: &'a GraphDataset,
    extractor: KHopExtractor<'a>,
}

impl<'a> BatchAssembler<'a> {
    /// Create an assembler over a dataset.
    pub fn new(dataset: &'a GraphDataset) -> Self {
        Self {
            dataset,
            extractor: KHopExtractor::new(dataset),
        }
    }

    /// Extract the `hop_size` neighborhood of every id and merge them in order.
    ///
    /// Targets are the dataset labels of `node_ids`.
    ///
    /// # Errors
    /// - `UnknownNode` for ids outside the graph.
    /// - `DataIntegrity` if a target has no label.
    pub fn assemble(&self, node_ids: &[NodeId], hop_size: usize) -> Result<Batch> {
        let mut batch = Batch::empty(self.dataset.num_features());
        batch.offsets.reserve(node_ids.len());
        batch.targets.reserve(node_ids.len());

        for &target in node_ids {
            let label = self.dataset.label(target).ok_or_else(|| {
                Error::DataIntegrity(format!("batch target {target} has no label"))
            })?;
            let sub = self.extractor.extract(target, hop_size)?;

            let offset = batch.node_ids.len();
            batch.offsets.push(offset);
            batch.targets.push(label);
            batch.classify_mask.push(true);
            batch
                .classify_mask
                .extend(std::iter::repeat(false).take(sub.num_nodes() - 1));
            batch
                .edges
                .extend(sub.edges.iter().map(|&(i, j)| (i + offset, j + offset)));
            batch.edge_kinds.extend_from_slice(&sub.edge_kinds);
            batch.node_ids.extend_from_slice(&sub.nodes);
        }

        batch.features = self
            .dataset
            .feature_matrix()
            .select(Axis(0), &batch.node_ids);
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphParts;

    fn toy() -> GraphDataset {
        GraphDataset::from_parts(GraphParts::toy(&[0, 0, 0, 1, 1, 1], 2)).unwrap()
    }

    #[test]
    fn test_assemble_offsets_and_mask() {
        let ds = toy();
        let batch = BatchAssembler::new(&ds).assemble(&[0, 3], 1).unwrap();

        assert_eq!(batch.node_ids, vec![0, 6, 7, 3, 12, 13]);
        assert_eq!(batch.offsets, vec![0, 3]);
        assert_eq!(batch.edges, vec![(0, 1), (0, 2), (3, 4), (3, 5)]);
        assert_eq!(
            batch.classify_mask,
            vec![true, false, false, true, false, false]
        );
        assert_eq!(batch.targets, vec![0, 1]);
        assert_eq!(batch.target_rows(), vec![0, 3]);
        assert_eq!(batch.features.nrows(), 6);
        assert_eq!(batch.features.row(3), ds.features(3));
        assert_eq!(batch.segment(1), 3..6);
    }

    #[test]
    fn test_assemble_shared_neighbors_duplicate_rows() {
        let mut parts = GraphParts::toy(&[0, 1], 1);
        parts.edges.push((1, 2));
        let ds = GraphDataset::from_parts(parts).unwrap();
        let batch = BatchAssembler::new(&ds).assemble(&[0, 1], 1).unwrap();
        // user 2 is in both neighborhoods and gets a row in each segment
        assert_eq!(batch.node_ids, vec![0, 2, 1, 2, 3]);
        assert_eq!(batch.target_rows(), vec![0, 2]);
    }

    #[test]
    fn test_assemble_unlabeled_target() {
        let ds = toy();
        assert!(matches!(
            BatchAssembler::new(&ds).assemble(&[6], 1),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_assemble_empty() {
        let ds = toy();
        let batch = BatchAssembler::new(&ds).assemble(&[], 2).unwrap();
        assert_eq!(batch.num_nodes(), 0);
        assert_eq!(batch.features.ncols(), ds.num_features());
    }

    #[test]
    fn test_concat_shifts_rows() {
        let ds = toy();
        let asm = BatchAssembler::new(&ds);
        let a = asm.assemble(&[0], 1).unwrap();
        let b = asm.assemble(&[4, 5], 1).unwrap();
        let merged = Batch::concat(&[a.clone(), b.clone()]).unwrap();

        assert_eq!(merged.num_nodes(), a.num_nodes() + b.num_nodes());
        assert_eq!(merged.offsets, vec![0, 3, 6]);
        assert_eq!(merged.targets, vec![0, 1, 1]);
        assert_eq!(merged.target_rows(), vec![0, 3, 6]);
        assert_eq!(merged, asm.assemble(&[0, 4, 5], 1).unwrap());
    }

    #[test]
    fn test_edge_index_both_directions() {
        let ds = toy();
        let batch = BatchAssembler::new(&ds).assemble(&[1], 1).unwrap();
        let (src, dst) = batch.edge_index();
        assert_eq!(src, vec![0, 1, 0, 2]);
        assert_eq!(dst, vec![1, 0, 2, 0]);
    }
}
