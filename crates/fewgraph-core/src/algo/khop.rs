//! k-hop neighborhood extraction.
//!
//! Every episode node is classified from its local context: the documents
//! and users reachable within `hop_size` edges. The extractor runs a BFS
//! from the target and returns the *induced* sub-graph over the visited
//! set, relabeled to local indices.
//!
//! # Ordering
//!
//! Local index 0 is always the target. The remaining nodes follow BFS
//! discovery order, and neighbor rows are sorted by id, so extraction is a
//! pure function of `(graph, target, hop_size)`.
//!
//! ```text
//! global:  d0 - u4 - u5 - d1        extract(d0, 2)
//!                                    nodes  [d0, u4, u5]
//!                                    depths [0,  1,  2 ]
//!                                    edges  (0,1) (1,2)
//! ```
//!
//! # Scaling
//!
//! Cost is O(visited nodes + edges touched). There is no cap on hub
//! expansion: a popular user at hop 1 pulls every document it shared into a
//! 2-hop neighborhood. Keep `hop_size` small (1-3).

use crate::graph::EdgeKind;
use crate::{Error, GraphDataset, NodeId, Result};
use ndarray::Array2;
use std::collections::{HashMap, VecDeque};

/// Induced neighborhood around one target node.
#[derive(Debug, Clone, PartialEq)]
pub struct SubGraph {
    /// Original node ids; `nodes[0]` is the target.
    pub nodes: Vec<NodeId>,
    /// BFS hop distance of each node from the target.
    pub depths: Vec<usize>,
    /// Local edges, each undirected edge once as `(i, j)` with `i < j`.
    pub edges: Vec<(usize, usize)>,
    /// Kind of each local edge.
    pub edge_kinds: Vec<EdgeKind>,
}

impl SubGraph {
    /// Original id of the target node.
    pub fn target(&self) -> NodeId {
        self.nodes[0]
    }

    /// Number of included nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected local edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Both orientations of every local edge, for message passing.
    pub fn directed_edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().flat_map(|&(i, j)| [(i, j), (j, i)])
    }

    /// Feature rows of the included nodes, in local order.
    pub fn features(&self, dataset: &GraphDataset) -> Array2<f32> {
        dataset
            .feature_matrix()
            .select(ndarray::Axis(0), &self.nodes)
    }

    /// Local edges mapped back to original ids.
    pub fn global_edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.edges
            .iter()
            .map(|&(i, j)| (self.nodes[i], self.nodes[j]))
    }
}

/// BFS neighborhood extractor over a [`GraphDataset`].
///
/// # Example
///
/// ```rust
/// use fewgraph_core::{GraphDataset, GraphParts, KHopExtractor};
///
/// let ds = GraphDataset::from_parts(GraphParts::toy(&[0, 1], 2)).unwrap();
/// let sub = KHopExtractor::new(&ds).extract(0, 1).unwrap();
///
/// assert_eq!(sub.nodes, vec![0, 2, 3]);
/// assert_eq!(sub.edges, vec![(0, 1), (0, 2)]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct KHopExtractor<'a> {
    dataset: &'a GraphDataset,
}

impl<'a> KHopExtractor<'a> {
    /// Create an extractor over a dataset.
    pub fn new(dataset: &'a GraphDataset) -> Self {
        Self { dataset }
    }

    /// Extract the induced `hop_size`-hop neighborhood of `target`.
    ///
    /// An isolated node yields a single-node sub-graph with no edges;
    /// `hop_size == 0` yields the target alone.
    ///
    /// # Errors
    /// `UnknownNode` if `target` is not a node of the dataset.
    ///
    /// # Complexity
    /// O(V_h + E_h) where V_h, E_h are the visited nodes and their incident edges.
    pub fn extract(&self, target: NodeId, hop_size: usize) -> Result<SubGraph> {
        if !self.dataset.contains(target) {
            return Err(Error::UnknownNode(target));
        }

        let mut nodes = vec![target];
        let mut depths = vec![0];
        let mut local: HashMap<NodeId, usize> = HashMap::new();
        local.insert(target, 0);

        let mut frontier = VecDeque::from([target]);
        while let Some(node) = frontier.pop_front() {
            let depth = depths[local[&node]];
            if depth == hop_size {
                continue;
            }
            for &neighbor in self.dataset.neighbors(node) {
                if local.contains_key(&neighbor) {
                    continue;
                }
                local.insert(neighbor, nodes.len());
                nodes.push(neighbor);
                depths.push(depth + 1);
                frontier.push_back(neighbor);
            }
        }

        let mut edges = Vec::new();
        let mut edge_kinds = Vec::new();
        for (i, &node) in nodes.iter().enumerate() {
            for &neighbor in self.dataset.neighbors(node) {
                let Some(&j) = local.get(&neighbor) else {
                    continue;
                };
                if j > i {
                    if let Some(kind) = self.dataset.edge_kind(node, neighbor) {
                        edges.push((i, j));
                        edge_kinds.push(kind);
                    }
                }
            }
        }

        Ok(SubGraph {
            nodes,
            depths,
            edges,
            edge_kinds,
        })
    }
}
