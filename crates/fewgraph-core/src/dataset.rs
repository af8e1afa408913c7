//! The read-only social graph: features, adjacency, labels and split masks.
//!
//! A [`GraphDataset`] is built once, either from in-memory [`GraphParts`] or
//! from the JSON artifacts described by a [`DatasetConfig`], and never
//! mutated afterwards. All accessors take `&self`, so one instance can be
//! shared across sampler workers behind an `Arc`.
//!
//! # Invariants checked at construction
//!
//! - feature rows == `num_docs + num_users`
//! - labels only on documents, each in `0..num_classes`
//! - split lists reference documents only and are pairwise disjoint
//! - edges are in range, not self loops, never document-document

use crate::config::{DatasetConfig, DatasetName};
use crate::graph::{Adjacency, EdgeKind, NodeKind};
use crate::{ClassId, Error, NodeId, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Document partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    /// Training documents.
    Train,
    /// Validation documents.
    Val,
    /// Test documents.
    Test,
}

impl Split {
    /// All splits in canonical order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Mask name, as in `train_mask`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Train => 0,
            Self::Val => 1,
            Self::Test => 2,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One boolean mask per split over all node ids.
#[derive(Debug, Clone, Default)]
pub struct SplitMasks {
    masks: [Vec<bool>; 3],
}

impl SplitMasks {
    /// Build masks from document id lists.
    ///
    /// # Errors
    /// `DataIntegrity` when an id is not a document or lists overlap.
    pub fn from_doc_ids(
        num_nodes: usize,
        num_docs: usize,
        train: &[NodeId],
        val: &[NodeId],
        test: &[NodeId],
    ) -> Result<Self> {
        let mut masks = [
            vec![false; num_nodes],
            vec![false; num_nodes],
            vec![false; num_nodes],
        ];
        let mut owner: Vec<Option<Split>> = vec![None; num_docs];

        for (split, ids) in Split::ALL.into_iter().zip([train, val, test]) {
            for &id in ids {
                if id >= num_docs {
                    return Err(Error::DataIntegrity(format!(
                        "{split} split references node {id}, which is not a document"
                    )));
                }
                if let Some(prev) = owner[id] {
                    if prev != split {
                        return Err(Error::DataIntegrity(format!(
                            "document {id} is in both the {prev} and {split} splits"
                        )));
                    }
                }
                owner[id] = Some(split);
                masks[split.index()][id] = true;
            }
        }

        Ok(Self { masks })
    }

    /// Mask of one split.
    pub fn get(&self, split: Split) -> &[bool] {
        &self.masks[split.index()]
    }

    /// Number of nodes in one split.
    pub fn count(&self, split: Split) -> usize {
        self.get(split).iter().filter(|&&m| m).count()
    }
}

/// In-memory ingredients of a [`GraphDataset`].
#[derive(Debug, Clone)]
pub struct GraphParts {
    /// Corpus the parts come from, if known.
    pub name: Option<DatasetName>,
    /// Documents occupy ids `0..num_docs`.
    pub num_docs: usize,
    /// Users occupy ids `num_docs..num_docs + num_users`.
    pub num_users: usize,
    /// `num_nodes x num_features` feature matrix.
    pub features: Array2<f32>,
    /// Undirected edges; orientation and duplicates do not matter.
    pub edges: Vec<(NodeId, NodeId)>,
    /// Per-node label, `None` for users and unlabeled documents.
    pub labels: Vec<Option<ClassId>>,
    /// Class names indexed by label.
    pub label_names: Vec<String>,
    /// Training document ids.
    pub train: Vec<NodeId>,
    /// Validation document ids.
    pub val: Vec<NodeId>,
    /// Test document ids.
    pub test: Vec<NodeId>,
}

impl GraphParts {
    /// Small labeled graph for examples and tests.
    ///
    /// Document `i` gets `labels[i]` and is connected to `users_per_doc`
    /// users of its own. Every document is in the train split. Features are
    /// a one-hot of the class for documents and their users, plus a final
    /// column set for users.
    pub fn toy(labels: &[ClassId], users_per_doc: usize) -> Self {
        let num_docs = labels.len();
        let num_users = num_docs * users_per_doc;
        let num_nodes = num_docs + num_users;
        let num_classes = labels.iter().max().map_or(0, |m| m + 1);

        let mut features = Array2::zeros((num_nodes, num_classes + 1));
        let mut edges = Vec::with_capacity(num_users);
        let mut node_labels = vec![None; num_nodes];

        for (doc, &label) in labels.iter().enumerate() {
            node_labels[doc] = Some(label);
            features[[doc, label]] = 1.0;
            for u in 0..users_per_doc {
                let user = num_docs + doc * users_per_doc + u;
                edges.push((doc, user));
                features[[user, label]] = 1.0;
                features[[user, num_classes]] = 1.0;
            }
        }

        Self {
            name: None,
            num_docs,
            num_users,
            features,
            edges,
            labels: node_labels,
            label_names: (0..num_classes).map(|c| format!("class_{c}")).collect(),
            train: (0..num_docs).collect(),
            val: Vec::new(),
            test: Vec::new(),
        }
    }
}

/// Summary counts of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Document nodes.
    pub num_docs: usize,
    /// User nodes.
    pub num_users: usize,
    /// Undirected edges.
    pub num_edges: usize,
    /// Document-user edges.
    pub doc_user_edges: usize,
    /// User-user edges.
    pub user_user_edges: usize,
    /// Feature dimension.
    pub num_features: usize,
    /// Labeled documents.
    pub num_labeled: usize,
    /// Documents per split (train, val, test).
    pub split_sizes: [usize; 3],
    /// Average node degree.
    pub avg_degree: f64,
}

/// Immutable heterogeneous document/user graph.
#[derive(Debug, Clone)]
pub struct GraphDataset {
    name: Option<DatasetName>,
    num_docs: usize,
    features: Array2<f32>,
    adjacency: Adjacency,
    labels: Vec<Option<ClassId>>,
    label_names: Vec<String>,
    masks: SplitMasks,
}

impl GraphDataset {
    /// Validate and assemble a dataset from in-memory parts.
    ///
    /// # Errors
    /// `DataIntegrity` if any invariant listed in the module docs is violated.
    pub fn from_parts(parts: GraphParts) -> Result<Self> {
        let num_nodes = parts.num_docs + parts.num_users;

        if parts.features.nrows() != num_nodes {
            return Err(Error::DataIntegrity(format!(
                "feature matrix has {} rows, graph has {num_nodes} nodes",
                parts.features.nrows()
            )));
        }
        if parts.labels.len() != num_nodes {
            return Err(Error::DataIntegrity(format!(
                "label vector has {} entries, graph has {num_nodes} nodes",
                parts.labels.len()
            )));
        }

        let num_classes = parts.label_names.len();
        for (node, label) in parts.labels.iter().enumerate() {
            let Some(label) = *label else { continue };
            if node >= parts.num_docs {
                return Err(Error::DataIntegrity(format!(
                    "user node {node} carries label {label}"
                )));
            }
            if label >= num_classes {
                return Err(Error::DataIntegrity(format!(
                    "document {node} has label {label}, only {num_classes} classes exist"
                )));
            }
        }

        for &(u, v) in &parts.edges {
            if u < parts.num_docs && v < parts.num_docs {
                return Err(Error::DataIntegrity(format!(
                    "edge ({u}, {v}) connects two documents"
                )));
            }
        }
        let adjacency = Adjacency::from_edges(num_nodes, &parts.edges)?;

        let masks = SplitMasks::from_doc_ids(
            num_nodes,
            parts.num_docs,
            &parts.train,
            &parts.val,
            &parts.test,
        )?;

        Ok(Self {
            name: parts.name,
            num_docs: parts.num_docs,
            features: parts.features,
            adjacency,
            labels: parts.labels,
            label_names: parts.label_names,
            masks,
        })
    }

    /// Load the JSON artifacts of one corpus.
    ///
    /// # Errors
    /// `Io` for missing files, `DataIntegrity` for malformed JSON and for
    /// inconsistent id mappings, labels or splits.
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let layout = &config.layout;
        tracing::info!(
            "Loading {} graph from {}",
            config.name,
            config.data_dir.display()
        );

        let doc2id: HashMap<String, NodeId> = read_json(&config.path(&layout.doc2id))?;
        let user2id: HashMap<String, NodeId> = read_json(&config.path(&layout.user2id))?;
        let num_docs = doc2id.len();
        let num_users = user2id.len();
        let num_nodes = num_docs + num_users;

        check_dense_ids("doc2id", doc2id.values().copied(), 0, num_docs)?;
        check_dense_ids("user2id", user2id.values().copied(), num_docs, num_nodes)?;

        let edges: Vec<(NodeId, NodeId)> = read_json(&config.path(&layout.edges))?;

        let feature_file: FeatureFile = read_json(&config.path(&layout.features))?;
        let mut features = Array2::zeros((num_nodes, feature_file.num_features));
        for (row, col, value) in feature_file.entries {
            if row >= num_nodes || col >= feature_file.num_features {
                return Err(Error::DataIntegrity(format!(
                    "feature entry ({row}, {col}) outside {num_nodes} x {}",
                    feature_file.num_features
                )));
            }
            features[[row, col]] = value;
        }

        let label_names = config.name.label_names();
        let doc2labels: HashMap<String, i64> = read_json(&config.path(&layout.labels))?;
        let mut labels = vec![None; num_nodes];
        for (key, label) in &doc2labels {
            let id = *doc2id.get(key).ok_or_else(|| {
                Error::DataIntegrity(format!("labeled document '{key}' is missing from doc2id"))
            })?;
            let label = usize::try_from(*label)
                .ok()
                .filter(|&l| l < label_names.len())
                .ok_or_else(|| {
                    Error::DataIntegrity(format!(
                        "document '{key}' has label {label}, expected 0..{}",
                        label_names.len()
                    ))
                })?;
            labels[id] = Some(label);
        }

        let split_file: SplitFile = read_json(&config.path(&layout.splits))?;
        let to_ids = |split: Split, keys: &[String]| -> Result<Vec<NodeId>> {
            keys.iter()
                .map(|k| {
                    doc2id.get(k).copied().ok_or_else(|| {
                        Error::DataIntegrity(format!(
                            "{split} split document '{k}' is missing from doc2id"
                        ))
                    })
                })
                .collect()
        };

        let dataset = Self::from_parts(GraphParts {
            name: Some(config.name),
            num_docs,
            num_users,
            features,
            edges,
            labels,
            label_names,
            train: to_ids(Split::Train, &split_file.train)?,
            val: to_ids(Split::Val, &split_file.val)?,
            test: to_ids(Split::Test, &split_file.test)?,
        })?;

        let stats = dataset.stats();
        tracing::info!(
            "Loaded {} documents, {} users, {} edges, {} features (train/val/test = {}/{}/{})",
            stats.num_docs,
            stats.num_users,
            stats.num_edges,
            stats.num_features,
            stats.split_sizes[0],
            stats.split_sizes[1],
            stats.split_sizes[2]
        );
        Ok(dataset)
    }

    /// Corpus name, if loaded from artifacts.
    pub fn name(&self) -> Option<DatasetName> {
        self.name
    }

    /// Total nodes.
    pub fn num_nodes(&self) -> usize {
        self.features.nrows()
    }

    /// Document nodes (ids `0..num_docs`).
    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    /// User nodes.
    pub fn num_users(&self) -> usize {
        self.num_nodes() - self.num_docs
    }

    /// Feature dimension.
    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.label_names.len()
    }

    /// Class names indexed by label.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Feature row of one node.
    ///
    /// # Panics
    /// If `node >= num_nodes()`.
    pub fn features(&self, node: NodeId) -> ArrayView1<'_, f32> {
        self.features.row(node)
    }

    /// Full feature matrix.
    pub fn feature_matrix(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    /// Sorted neighbors of `node`.
    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.adjacency.neighbors(node)
    }

    /// Whether `{u, v}` is an edge.
    pub fn has_edge(&self, u: NodeId, v: NodeId) -> bool {
        self.adjacency.has_edge(u, v)
    }

    /// Underlying adjacency.
    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    /// Whether `node` is a valid id.
    pub fn contains(&self, node: NodeId) -> bool {
        node < self.num_nodes()
    }

    /// Kind of a node, decided by its id range.
    pub fn node_kind(&self, node: NodeId) -> NodeKind {
        if node < self.num_docs {
            NodeKind::Document
        } else {
            NodeKind::User
        }
    }

    /// Kind of the edge between two nodes (whether or not it exists).
    pub fn edge_kind(&self, u: NodeId, v: NodeId) -> Option<EdgeKind> {
        EdgeKind::between(self.node_kind(u), self.node_kind(v))
    }

    /// Label of a node.
    pub fn label(&self, node: NodeId) -> Option<ClassId> {
        self.labels.get(node).copied().flatten()
    }

    /// Boolean mask of one split over all node ids.
    pub fn mask(&self, split: Split) -> &[bool] {
        self.masks.get(split)
    }

    /// Number of documents in one split.
    pub fn split_size(&self, split: Split) -> usize {
        self.masks.count(split)
    }

    /// Labeled documents of one split, ascending by id.
    pub fn labeled_in(&self, split: Split) -> impl Iterator<Item = (NodeId, ClassId)> + '_ {
        let mask = self.mask(split);
        (0..self.num_docs)
            .filter(move |&n| mask[n])
            .filter_map(move |n| self.label(n).map(|l| (n, l)))
    }

    /// Fraction of labeled documents per class.
    pub fn class_ratio(&self) -> Vec<f64> {
        let mut counts = vec![0usize; self.num_classes()];
        for label in self.labels.iter().flatten() {
            counts[*label] += 1;
        }
        let total: usize = counts.iter().sum();
        counts
            .into_iter()
            .map(|c| if total == 0 { 0.0 } else { c as f64 / total as f64 })
            .collect()
    }

    /// Summary counts.
    pub fn stats(&self) -> DatasetStats {
        let mut doc_user_edges = 0;
        let mut user_user_edges = 0;
        for (u, v) in self.adjacency.edges() {
            match self.edge_kind(u, v) {
                Some(EdgeKind::DocumentUser) => doc_user_edges += 1,
                Some(EdgeKind::UserUser) => user_user_edges += 1,
                None => {}
            }
        }
        let n = self.num_nodes();
        DatasetStats {
            num_docs: self.num_docs,
            num_users: self.num_users(),
            num_edges: self.adjacency.num_edges(),
            doc_user_edges,
            user_user_edges,
            num_features: self.num_features(),
            num_labeled: self.labels.iter().flatten().count(),
            split_sizes: Split::ALL.map(|s| self.split_size(s)),
            avg_degree: if n == 0 {
                0.0
            } else {
                2.0 * self.adjacency.num_edges() as f64 / n as f64
            },
        }
    }

    /// Undirected petgraph view; node index `i` is node id `i`.
    pub fn as_petgraph(&self) -> UnGraph<NodeKind, EdgeKind> {
        let mut graph = UnGraph::with_capacity(self.num_nodes(), self.adjacency.num_edges());
        for node in 0..self.num_nodes() {
            graph.add_node(self.node_kind(node));
        }
        for (u, v) in self.adjacency.edges() {
            if let Some(kind) = self.edge_kind(u, v) {
                graph.add_edge(NodeIndex::new(u), NodeIndex::new(v), kind);
            }
        }
        graph
    }
}

/// Sparse feature artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FeatureFile {
    pub(crate) num_features: usize,
    pub(crate) entries: Vec<(NodeId, usize, f32)>,
}

/// Document split artifact.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct SplitFile {
    #[serde(default)]
    pub(crate) train: Vec<String>,
    #[serde(default)]
    pub(crate) val: Vec<String>,
    #[serde(default)]
    pub(crate) test: Vec<String>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::DataIntegrity(format!("{}: {e}", path.display())))
}

fn check_dense_ids(
    what: &str,
    ids: impl Iterator<Item = NodeId>,
    start: NodeId,
    end: NodeId,
) -> Result<()> {
    let mut seen = vec![false; end - start];
    for id in ids {
        if id < start || id >= end {
            return Err(Error::DataIntegrity(format!(
                "{what} id {id} outside [{start}, {end})"
            )));
        }
        if std::mem::replace(&mut seen[id - start], true) {
            return Err(Error::DataIntegrity(format!("{what} id {id} assigned twice")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toy_dataset_shape() {
        let ds = GraphDataset::from_parts(GraphParts::toy(&[0, 0, 0, 1, 1, 1], 2)).unwrap();
        assert_eq!(ds.num_docs(), 6);
        assert_eq!(ds.num_users(), 12);
        assert_eq!(ds.num_classes(), 2);
        assert_eq!(ds.neighbors(0), &[6, 7]);
        assert_eq!(ds.node_kind(0), NodeKind::Document);
        assert_eq!(ds.node_kind(6), NodeKind::User);
        assert_eq!(ds.edge_kind(0, 6), Some(EdgeKind::DocumentUser));
        assert_eq!(ds.label(3), Some(1));
        assert_eq!(ds.label(7), None);
        assert_eq!(ds.split_size(Split::Train), 6);
        assert_eq!(ds.class_ratio(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_overlapping_splits_rejected() {
        let mut parts = GraphParts::toy(&[0, 1], 1);
        parts.val = vec![1];
        let err = GraphDataset::from_parts(parts).unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(ref m) if m.contains("both")));
    }

    #[test]
    fn test_user_in_split_rejected() {
        let mut parts = GraphParts::toy(&[0, 1], 1);
        parts.test = vec![3];
        assert!(matches!(
            GraphDataset::from_parts(parts),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_doc_doc_edge_rejected() {
        let mut parts = GraphParts::toy(&[0, 1], 1);
        parts.edges.push((0, 1));
        assert!(matches!(
            GraphDataset::from_parts(parts),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_label_out_of_range_rejected() {
        let mut parts = GraphParts::toy(&[0, 1], 1);
        parts.labels[0] = Some(5);
        assert!(GraphDataset::from_parts(parts).is_err());
    }

    #[test]
    fn test_feature_rows_mismatch_rejected() {
        let mut parts = GraphParts::toy(&[0, 1], 1);
        parts.features = Array2::zeros((2, 3));
        assert!(GraphDataset::from_parts(parts).is_err());
    }

    #[test]
    fn test_stats_and_petgraph() {
        let mut parts = GraphParts::toy(&[0, 1], 2);
        parts.edges.push((2, 4));
        let ds = GraphDataset::from_parts(parts).unwrap();
        let stats = ds.stats();
        assert_eq!(stats.num_edges, 5);
        assert_eq!(stats.doc_user_edges, 4);
        assert_eq!(stats.user_user_edges, 1);
        assert_eq!(stats.num_labeled, 2);

        let graph = ds.as_petgraph();
        assert_eq!(graph.node_count(), 6);
        assert_eq!(graph.edge_count(), 5);
        assert_eq!(petgraph::algo::connected_components(&graph), 1);
    }

    #[test]
    fn test_labeled_in_ascending() {
        let mut parts = GraphParts::toy(&[1, 0, 1, 0], 1);
        parts.train = vec![3, 0, 2];
        parts.val = vec![1];
        let ds = GraphDataset::from_parts(parts).unwrap();
        let train: Vec<_> = ds.labeled_in(Split::Train).collect();
        assert_eq!(train, vec![(0, 1), (2, 1), (3, 0)]);
    }
}
