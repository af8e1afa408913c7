//! Error types for fewgraph-core.

use crate::dataset::Split;
use crate::NodeId;
use thiserror::Error;

/// Error type for dataset loading, sampling and batching.
#[derive(Error, Debug)]
pub enum Error {
    /// Unsupported dataset or model name, or invalid split sizes.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Preprocessing artifacts are malformed or inconsistent with each other.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// A class lacks enough eligible nodes for the requested episode shape.
    #[error(
        "Insufficient data in {split} split: class {class} has {available} eligible nodes, \
         {required} required"
    )]
    InsufficientData {
        /// Split the sampler was built on.
        split: Split,
        /// Offending class.
        class: usize,
        /// Labeled nodes of that class inside the split mask.
        available: usize,
        /// Nodes needed for one episode.
        required: usize,
    },

    /// Node id outside `[0, num_nodes)`.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error outside artifact loading (loader config, artifact writes).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for fewgraph operations.
pub type Result<T> = std::result::Result<T, Error>;
