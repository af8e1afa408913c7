// Allow minor clippy style warnings at crate level
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

//! Episodic sub-graph sampling for few-shot classification on social graphs.
//!
//! Fake-news and hate-speech detectors that use social context classify a
//! *document* node by looking at the *users* who shared it and at whom those
//! users follow. In the few-shot setting, training is organized in episodes:
//!
//! ```text
//! episode = N classes x (K support + K query) documents
//!           support -> class prototypes, query -> scored against them
//! ```
//!
//! Every episode node is replaced by its k-hop neighborhood, and the
//! neighborhoods of one set are merged into a single batch graph:
//!
//! ```text
//!  doc_3 + 2 users          doc_8 + 1 user          batch (offsets 0, 3)
//!  [3, u1, u2]       (+)    [8, u5]          =>     [3, u1, u2, 8, u5]
//!  edges (0,1) (0,2)        edges (0,1)             edges (0,1) (0,2) (3,4)
//!                                                   classify_mask [T F F T F]
//! ```
//!
//! # Pipeline
//!
//! | Stage | Type | Module |
//! |-------|------|--------|
//! | Read-only graph, features, labels, split masks | [`GraphDataset`] | [`dataset`] |
//! | k-hop neighborhood around one node | [`KHopExtractor`] | [`algo::khop`] |
//! | N-way K-shot support/query draws | [`FewShotEpisodeSampler`] | [`algo::episode`] |
//! | Offset-merged batch with classify mask | [`BatchAssembler`] | [`batch`] |
//! | Epochs of episodes, optionally in parallel | [`EpisodeLoader`] | [`loader`] |
//!
//! Artifacts are produced by [`preprocess`]; [`proto`] holds the
//! prototype classifier that consumes the classify masks.
//!
//! # Example
//!
//! ```rust
//! use fewgraph_core::{GraphDataset, GraphParts, Split};
//! use fewgraph_core::algo::episode::{FewShotEpisodeSampler, SamplerConfig};
//! use fewgraph_core::BatchAssembler;
//!
//! // 4 documents (2 per class), each shared by its own user.
//! let parts = GraphParts::toy(&[0, 0, 1, 1], 1);
//! let ds = GraphDataset::from_parts(parts).unwrap();
//!
//! let mut sampler =
//!     FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(1)).unwrap();
//! let episode = sampler.next_episode();
//! assert_eq!(episode.support.len(), 2);
//!
//! let batch = BatchAssembler::new(&ds).assemble(&episode.support, 1).unwrap();
//! assert_eq!(batch.num_nodes(), 4);
//! assert_eq!(batch.target_rows().len(), 2);
//! ```

pub mod algo;
pub mod batch;
pub mod config;
pub mod dataset;
mod error;
pub mod graph;
pub mod loader;
pub mod preprocess;
pub mod proto;

/// Dense node id in `[0, num_nodes)`.
pub type NodeId = usize;

/// Class index in `[0, num_classes)`.
pub type ClassId = usize;

pub use algo::episode::{Episode, FewShotEpisodeSampler, SamplerConfig, ShufflePolicy};
pub use algo::khop::{KHopExtractor, SubGraph};
pub use batch::{Batch, BatchAssembler};
pub use config::{
    BatchStrategy, DatasetConfig, DatasetName, FeatureType, FileLayout, LoaderConfig, ModelKind,
    SplitSizes,
};
pub use dataset::{DatasetStats, GraphDataset, GraphParts, Split, SplitMasks};
pub use error::{Error, Result};
pub use graph::{Adjacency, EdgeKind, NodeKind};
pub use loader::{build_loaders, Collated, EpisodeBatch, EpisodeLoader, LoaderOptions, Loaders};
