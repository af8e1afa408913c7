//! Typed node/edge vocabulary and the symmetric CSR adjacency.
//!
//! The social graph has two node kinds laid out in contiguous id ranges:
//!
//! ```text
//! [0 ............ num_docs) [num_docs ............ num_nodes)
//!        documents                     users
//! ```
//!
//! Edge kinds follow from the endpoint kinds, so they are never stored:
//!
//! | Endpoints | Edge kind | Source |
//! |-----------|-----------|--------|
//! | document - user | [`EdgeKind::DocumentUser`] | engagements (shares, retweets) |
//! | user - user | [`EdgeKind::UserUser`] | follower / following lists |
//!
//! Document-document edges and self loops do not exist in this model.

use crate::{Error, NodeId, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a node, decided by its id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A news article or tweet; may carry a label and a split.
    Document,
    /// An account that engaged with documents.
    User,
}

/// Type of an undirected edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// A user engaged with a document.
    DocumentUser,
    /// One user follows the other.
    UserUser,
}

impl EdgeKind {
    /// Edge kind between two node kinds, `None` for document-document pairs.
    pub fn between(a: NodeKind, b: NodeKind) -> Option<Self> {
        match (a, b) {
            (NodeKind::Document, NodeKind::Document) => None,
            (NodeKind::User, NodeKind::User) => Some(Self::UserUser),
            _ => Some(Self::DocumentUser),
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocumentUser => write!(f, "document-user"),
            Self::UserUser => write!(f, "user-user"),
        }
    }
}

/// Symmetric adjacency in CSR form.
///
/// Every undirected edge `{u, v}` is stored in both rows. Rows are sorted
/// ascending and free of duplicates, so neighbor iteration is stable and
/// [`Adjacency::has_edge`] is a binary search.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    row_ptr: Vec<usize>,
    col_idx: Vec<NodeId>,
}

impl Adjacency {
    /// Build from an undirected edge list.
    ///
    /// Duplicate edges (in either orientation) collapse into one.
    ///
    /// # Errors
    /// `DataIntegrity` if an endpoint is `>= num_nodes` or an edge is a self loop.
    ///
    /// # Complexity
    /// O(n + e log d) where d is the largest degree.
    pub fn from_edges(num_nodes: usize, edges: &[(NodeId, NodeId)]) -> Result<Self> {
        let mut degree = vec![0usize; num_nodes];
        for &(u, v) in edges {
            if u >= num_nodes || v >= num_nodes {
                return Err(Error::DataIntegrity(format!(
                    "edge ({u}, {v}) references a node outside [0, {num_nodes})"
                )));
            }
            if u == v {
                return Err(Error::DataIntegrity(format!("self loop on node {u}")));
            }
            degree[u] += 1;
            degree[v] += 1;
        }

        let mut row_ptr = vec![0; num_nodes + 1];
        for i in 0..num_nodes {
            row_ptr[i + 1] = row_ptr[i] + degree[i];
        }

        let mut fill = row_ptr.clone();
        let mut col_idx = vec![0; row_ptr[num_nodes]];
        for &(u, v) in edges {
            col_idx[fill[u]] = v;
            fill[u] += 1;
            col_idx[fill[v]] = u;
            fill[v] += 1;
        }

        // Sort and dedup each row, compacting in place.
        let mut compact_ptr = vec![0; num_nodes + 1];
        let mut write = 0;
        for i in 0..num_nodes {
            let row = &mut col_idx[row_ptr[i]..row_ptr[i + 1]];
            row.sort_unstable();
            let mut last = None;
            for k in row_ptr[i]..row_ptr[i + 1] {
                let n = col_idx[k];
                if last != Some(n) {
                    col_idx[write] = n;
                    write += 1;
                    last = Some(n);
                }
            }
            compact_ptr[i + 1] = write;
        }
        col_idx.truncate(write);

        Ok(Self {
            row_ptr: compact_ptr,
            col_idx,
        })
    }

    /// Number of rows.
    pub fn num_nodes(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    /// Number of undirected edges.
    pub fn num_edges(&self) -> usize {
        self.col_idx.len() / 2
    }

    /// Sorted neighbors of `node`. Empty for out-of-range ids.
    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        if node >= self.num_nodes() {
            return &[];
        }
        &self.col_idx[self.row_ptr[node]..self.row_ptr[node + 1]]
    }

    /// Degree of `node`.
    pub fn degree(&self, node: NodeId) -> usize {
        self.neighbors(node).len()
    }

    /// Whether `{u, v}` is an edge.
    pub fn has_edge(&self, u: NodeId, v: NodeId) -> bool {
        self.neighbors(u).binary_search(&v).is_ok()
    }

    /// Iterate each undirected edge once as `(u, v)` with `u < v`.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        (0..self.num_nodes()).flat_map(move |u| {
            self.neighbors(u)
                .iter()
                .copied()
                .filter(move |&v| v > u)
                .map(move |v| (u, v))
        })
    }
}
