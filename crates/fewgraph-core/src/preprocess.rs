//! Raw engagement data to loadable graph artifacts.
//!
//! Input directory (`raw_dir`):
//!
//! ```text
//! doc2labels.json            {doc_key: label}
//! doc_vocab.json             {doc_key: [token_id, ...]}
//! engagements/<doc_key>.json {"users": [user_key, ...]}
//! user_followers/*.json      {"user_id": key, "followers": [key, ...]}
//! user_following/*.json      {"user_id": key, "following": [key, ...]}
//! ```
//!
//! Stages run in order: [`scan_engagements`], [`filter_users`],
//! [`split_documents`], then a [`GraphBuilder`] that assigns ids, adds
//! edges, builds features and writes the files read by
//! [`GraphDataset::load`](crate::GraphDataset::load).
//!
//! Directory listings are materialized and sorted before reading, so the
//! output depends only on the input files and the seed. Per-file failures
//! (bad encoding, malformed JSON) are logged, counted and skipped; only
//! missing directories and unwritable outputs abort the run.

use crate::config::{DatasetName, FeatureType, FileLayout, SplitSizes};
use crate::dataset::FeatureFile;
use crate::{ClassId, Error, NodeId, Result};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Engagement subdirectory of the raw data.
pub const ENGAGEMENTS_DIR: &str = "engagements";
/// Follower lists subdirectory.
pub const FOLLOWERS_DIR: &str = "user_followers";
/// Following lists subdirectory.
pub const FOLLOWING_DIR: &str = "user_following";
/// Document labels input file.
pub const DOC_LABELS_FILE: &str = "doc2labels.json";
/// Document vocabulary ids input file.
pub const DOC_VOCAB_FILE: &str = "doc_vocab.json";

/// User or document key as found in raw files: a string or an integer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawKey {
    Int(i64),
    Text(String),
}

impl From<RawKey> for String {
    fn from(key: RawKey) -> Self {
        match key {
            RawKey::Int(i) => i.to_string(),
            RawKey::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EngagementFile {
    users: Vec<RawKey>,
}

#[derive(Debug, Deserialize)]
struct FollowFile {
    user_id: RawKey,
    #[serde(default)]
    followers: Vec<RawKey>,
    #[serde(default)]
    following: Vec<RawKey>,
}

/// Users engaging with each document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Engagements {
    /// Document key to the users that shared it, in file order.
    pub by_doc: BTreeMap<String, Vec<String>>,
    /// Files that could not be read or parsed.
    pub skipped: usize,
}

impl Engagements {
    /// Distinct users across all documents.
    pub fn users(&self) -> BTreeSet<&str> {
        self.by_doc
            .values()
            .flat_map(|users| users.iter().map(String::as_str))
            .collect()
    }
}

/// Sorted `*.json` files of a directory.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        std::io::Error::new(e.kind(), format!("{}: {e}", dir.display()))
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::DataIntegrity(format!("{}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
    })?;
    serde_json::to_writer(BufWriter::new(file), value)?;
    Ok(())
}

/// Read `<doc_key>.json` engagement files of `dir` for which `keep(doc_key)` holds.
///
/// # Errors
/// `Io` if `dir` cannot be listed. Individual files never fail the scan.
pub fn scan_engagements(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Engagements> {
    let files = json_files(dir)?;
    let total = files.len();

    let engagements = files.into_iter().fold(Engagements::default(), |mut acc, path| {
        let Some(doc_key) = path.file_stem().and_then(|s| s.to_str()) else {
            return acc;
        };
        if doc_key.is_empty() || !keep(doc_key) {
            return acc;
        }
        match read_json::<EngagementFile>(&path) {
            Ok(file) => {
                let users = file.users.into_iter().map(String::from).collect();
                acc.by_doc.insert(doc_key.to_string(), users);
            }
            Err(e) => {
                tracing::warn!("Skipping engagements of doc {}: {}", doc_key, e);
                acc.skipped += 1;
            }
        }
        acc
    });

    tracing::info!(
        "Read engagements of {} documents from {} files ({} skipped)",
        engagements.by_doc.len(),
        total,
        engagements.skipped
    );
    Ok(engagements)
}

/// Restrictions on which users enter the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserFilter {
    /// Users who shared more than this fraction of the documents of any
    /// class are dropped.
    pub threshold: f64,
    /// Most active users kept, in thousands.
    pub top_k: usize,
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            top_k: 30,
        }
    }
}

/// Users passing `filter`, ascending by key.
///
/// Only documents with a label in `doc_labels` count towards the per-class
/// shares; activity for the top-k cut counts all engagements. Ties in
/// activity are broken by key.
pub fn filter_users(
    engagements: &Engagements,
    doc_labels: &HashMap<String, ClassId>,
    num_classes: usize,
    filter: UserFilter,
) -> BTreeSet<String> {
    let mut class_docs = vec![0usize; num_classes];
    let mut per_user: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut activity: HashMap<&str, usize> = HashMap::new();

    for (doc, users) in &engagements.by_doc {
        let class = doc_labels.get(doc).copied().filter(|&c| c < num_classes);
        if let Some(c) = class {
            class_docs[c] += 1;
        }
        for user in users {
            *activity.entry(user.as_str()).or_default() += 1;
            if let Some(c) = class {
                per_user
                    .entry(user.as_str())
                    .or_insert_with(|| vec![0; num_classes])[c] += 1;
            }
        }
    }

    let too_active = |user: &str| {
        per_user.get(user).is_some_and(|counts| {
            counts
                .iter()
                .zip(&class_docs)
                .any(|(&n, &total)| total > 0 && n as f64 / total as f64 > filter.threshold)
        })
    };

    let (mut ranked, over): (Vec<(&str, usize)>, Vec<_>) = activity
        .into_iter()
        .partition(|&(user, _)| !too_active(user));
    let dropped = over.len();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(filter.top_k.saturating_mul(1000));

    tracing::info!(
        "Kept {} users (threshold {:.0}%, top {}K), {} over threshold",
        ranked.len(),
        filter.threshold * 100.0,
        filter.top_k,
        dropped
    );
    ranked.into_iter().map(|(user, _)| user.to_string()).collect()
}

/// Document keys of each split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocSplits {
    /// Training documents.
    pub train: Vec<String>,
    /// Validation documents.
    pub val: Vec<String>,
    /// Test documents.
    pub test: Vec<String>,
}

impl DocSplits {
    /// All documents, train then val then test.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.train.iter().chain(&self.val).chain(&self.test)
    }
}

/// Shuffle `keys` with `seed` and cut them by `sizes`.
///
/// Each split gets `floor(n * ratio)` documents; when the ratios sum to
/// less than 1 the leftover documents are unused.
///
/// # Errors
/// `Configuration` for invalid ratios.
pub fn split_documents(keys: &[String], sizes: SplitSizes, seed: u64) -> Result<DocSplits> {
    sizes.validate()?;
    let mut order: Vec<String> = keys.to_vec();
    order.sort();
    order.dedup();
    let mut rng = XorShiftRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n = order.len() as f64;
    let n_train = (n * sizes.train).floor() as usize;
    let n_val = (n * sizes.val).floor() as usize;
    let n_test = ((n * sizes.test).floor() as usize)
        .min(order.len().saturating_sub(n_train + n_val));

    let mut rest = order.into_iter();
    let splits = DocSplits {
        train: rest.by_ref().take(n_train).collect(),
        val: rest.by_ref().take(n_val).collect(),
        test: rest.take(n_test).collect(),
    };
    tracing::info!(
        "Split {} documents into {}/{}/{}",
        keys.len(),
        splits.train.len(),
        splits.val.len(),
        splits.test.len()
    );
    Ok(splits)
}

/// Direction of a follow file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowKind {
    /// `{"user_id", "followers"}` files.
    Followers,
    /// `{"user_id", "following"}` files.
    Following,
}

/// Counters reported by [`GraphBuilder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Document-user edges added.
    pub doc_user_edges: usize,
    /// User-user edges added.
    pub user_user_edges: usize,
    /// Engagements whose document or user is not in the graph.
    pub engagements_not_used: usize,
    /// Engagements dropped because the document is a test document.
    pub test_engagements: usize,
    /// Follow entries naming a user outside the graph.
    pub follows_not_found: usize,
    /// Follow files that could not be read.
    pub skipped_files: usize,
    /// Vocabulary ids at or above the vocabulary size.
    pub dropped_feature_ids: usize,
}

/// Assigns ids and accumulates edges, labels and features.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    splits: DocSplits,
    test_docs: HashSet<String>,
    doc2id: BTreeMap<String, NodeId>,
    user2id: BTreeMap<String, NodeId>,
    edges: BTreeSet<(NodeId, NodeId)>,
    labels: BTreeMap<String, ClassId>,
    features: FeatureFile,
    feature_type: FeatureType,
    stats: BuildStats,
}

impl GraphBuilder {
    /// Documents get ids `0..num_docs` in train, val, test order; users get
    /// `num_docs..` in key order.
    pub fn new(splits: DocSplits, users: &BTreeSet<String>) -> Self {
        let doc2id: BTreeMap<String, NodeId> = splits
            .all()
            .enumerate()
            .map(|(id, key)| (key.clone(), id))
            .collect();
        let num_docs = doc2id.len();
        let test_docs = splits.test.iter().cloned().collect();
        let user2id = users
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), num_docs + i))
            .collect();
        Self {
            splits,
            test_docs,
            doc2id,
            user2id,
            edges: BTreeSet::new(),
            labels: BTreeMap::new(),
            features: FeatureFile {
                num_features: 0,
                entries: Vec::new(),
            },
            feature_type: FeatureType::OneHot,
            stats: BuildStats::default(),
        }
    }

    /// Number of documents.
    pub fn num_docs(&self) -> usize {
        self.doc2id.len()
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.user2id.len()
    }

    /// Number of undirected edges so far.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Counters so far.
    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// Document key to id.
    pub fn doc2id(&self) -> &BTreeMap<String, NodeId> {
        &self.doc2id
    }

    /// User key to id.
    pub fn user2id(&self) -> &BTreeMap<String, NodeId> {
        &self.user2id
    }

    /// Undirected edges, `u < v`.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.edges.iter().copied()
    }

    fn add_edge(&mut self, u: NodeId, v: NodeId) -> bool {
        u != v && self.edges.insert((u.min(v), u.max(v)))
    }

    /// Connect documents to the users that shared them. Test documents get
    /// no engagement edges.
    pub fn add_engagements(&mut self, engagements: &Engagements) -> &mut Self {
        for (doc, users) in &engagements.by_doc {
            if self.test_docs.contains(doc) {
                self.stats.test_engagements += users.len();
                continue;
            }
            let Some(&doc_id) = self.doc2id.get(doc) else {
                self.stats.engagements_not_used += users.len();
                continue;
            };
            for user in users {
                match self.user2id.get(user) {
                    Some(&user_id) => {
                        if self.add_edge(doc_id, user_id) {
                            self.stats.doc_user_edges += 1;
                        }
                    }
                    None => self.stats.engagements_not_used += 1,
                }
            }
        }
        tracing::info!(
            "{} document-user edges ({} engagements unused, {} on test documents)",
            self.stats.doc_user_edges,
            self.stats.engagements_not_used,
            self.stats.test_engagements
        );
        self
    }

    /// Connect users listed in the follow files of `dir`.
    ///
    /// # Errors
    /// `Io` if `dir` cannot be listed. Unreadable files are skipped.
    pub fn add_follows(&mut self, dir: &Path, kind: FollowKind) -> Result<&mut Self> {
        for path in json_files(dir)? {
            let file: FollowFile = match read_json(&path) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!("Skipping follow file {}: {}", path.display(), e);
                    self.stats.skipped_files += 1;
                    continue;
                }
            };
            let Some(&user_id) = self.user2id.get(&String::from(file.user_id)) else {
                continue;
            };
            let others = match kind {
                FollowKind::Followers => file.followers,
                FollowKind::Following => file.following,
            };
            for other in others {
                match self.user2id.get(&String::from(other)) {
                    Some(&other_id) => {
                        if self.add_edge(user_id, other_id) {
                            self.stats.user_user_edges += 1;
                        }
                    }
                    None => self.stats.follows_not_found += 1,
                }
            }
        }
        tracing::info!(
            "{} user-user edges after {} ({} follows outside the graph, {} files skipped)",
            self.stats.user_user_edges,
            dir.display(),
            self.stats.follows_not_found,
            self.stats.skipped_files
        );
        Ok(self)
    }

    /// Record labels of the documents in the graph.
    pub fn set_labels(&mut self, doc_labels: &HashMap<String, ClassId>) -> &mut Self {
        self.labels = doc_labels
            .iter()
            .filter(|(key, _)| self.doc2id.contains_key(*key))
            .map(|(key, &label)| (key.clone(), label))
            .collect();
        self
    }

    /// Build sparse features from document vocabulary ids.
    ///
    /// Documents get their own ids; users get the ids of every non-test
    /// document they engaged with. Ids `>= vocab_size` are dropped;
    /// `vocab_size == 0` uses the largest id seen plus one.
    pub fn set_features(
        &mut self,
        doc_vocab: &HashMap<String, Vec<usize>>,
        engagements: &Engagements,
        vocab_size: usize,
        feature_type: FeatureType,
    ) -> &mut Self {
        let vocab_size = if vocab_size == 0 {
            doc_vocab
                .values()
                .flatten()
                .max()
                .map_or(0, |&max| max + 1)
        } else {
            vocab_size
        };

        let num_nodes = self.num_docs() + self.num_users();
        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];
        for (doc, &doc_id) in &self.doc2id {
            if let Some(ids) = doc_vocab.get(doc) {
                rows[doc_id].extend_from_slice(ids);
            }
        }
        for (doc, users) in &engagements.by_doc {
            if !self.doc2id.contains_key(doc) || self.test_docs.contains(doc) {
                continue;
            }
            let Some(ids) = doc_vocab.get(doc) else {
                continue;
            };
            for user in users {
                if let Some(&user_id) = self.user2id.get(user) {
                    rows[user_id].extend_from_slice(ids);
                }
            }
        }

        let mut entries = Vec::new();
        let mut dropped = 0;
        for (row, ids) in rows.into_iter().enumerate() {
            let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
            for id in ids {
                if id < vocab_size {
                    *counts.entry(id).or_default() += 1;
                } else {
                    dropped += 1;
                }
            }
            let total: usize = counts.values().sum();
            entries.extend(counts.into_iter().map(|(col, n)| {
                let value = match feature_type {
                    FeatureType::OneHot => 1.0,
                    FeatureType::TermFrequency => n as f32 / total as f32,
                };
                (row, col, value)
            }));
        }

        if dropped > 0 {
            tracing::warn!(
                "Dropped {} vocabulary ids outside vocab_size {}",
                dropped,
                vocab_size
            );
        }
        self.stats.dropped_feature_ids += dropped;
        self.features = FeatureFile {
            num_features: vocab_size,
            entries,
        };
        self.feature_type = feature_type;
        self
    }

    /// Write every artifact of `layout` into `dir`.
    ///
    /// # Errors
    /// `Io`/`Json` if a file cannot be written.
    pub fn write_artifacts(&self, dir: &Path, layout: &FileLayout, top_k: usize) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = |template: &str| dir.join(FileLayout::resolve(template, top_k, self.feature_type));

        let edges: Vec<(NodeId, NodeId)> = self.edges().collect();
        write_json(&path(&layout.doc2id), &self.doc2id)?;
        write_json(&path(&layout.user2id), &self.user2id)?;
        write_json(&path(&layout.edges), &edges)?;
        write_json(&path(&layout.features), &self.features)?;
        write_json(&path(&layout.splits), &self.splits)?;
        write_json(&path(&layout.labels), &self.labels)?;

        tracing::info!(
            "Wrote {} documents, {} users, {} edges to {}",
            self.num_docs(),
            self.num_users(),
            edges.len(),
            dir.display()
        );
        Ok(())
    }
}

/// Settings of a full preprocessing run.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Corpus, used for its label count and default split sizes.
    pub dataset: DatasetName,
    /// Raw input directory.
    pub raw_dir: PathBuf,
    /// Artifact output directory.
    pub out_dir: PathBuf,
    /// Apply `user_filter`. When false every user that engaged with a
    /// split document becomes a node.
    pub valid_users: bool,
    /// User restrictions (`top_k` also names the artifacts).
    pub user_filter: UserFilter,
    /// Document ratios; `None` uses the dataset default.
    pub split_sizes: Option<SplitSizes>,
    /// Feature construction.
    pub feature_type: FeatureType,
    /// Vocabulary size; `0` infers it.
    pub vocab_size: usize,
    /// Split shuffle seed.
    pub seed: u64,
    /// Artifact file names.
    pub layout: FileLayout,
}

impl PreprocessConfig {
    /// Defaults for everything except the corpus and directories.
    pub fn new(dataset: DatasetName, raw_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset,
            raw_dir: raw_dir.into(),
            out_dir: out_dir.into(),
            valid_users: true,
            user_filter: UserFilter::default(),
            split_sizes: None,
            feature_type: FeatureType::OneHot,
            vocab_size: 0,
            seed: 42,
            layout: FileLayout::default(),
        }
    }
}

/// Result of [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessSummary {
    /// Documents in the graph.
    pub num_docs: usize,
    /// Users in the graph.
    pub num_users: usize,
    /// Undirected edges.
    pub num_edges: usize,
    /// Engagement files skipped.
    pub skipped_engagements: usize,
    /// Builder counters.
    pub build: BuildStats,
}

/// Run every stage and write the artifacts.
///
/// Documents are the labeled keys of `doc2labels.json`; follow directories
/// are optional.
///
/// # Errors
/// `Io` for missing input files, `DataIntegrity` for malformed ones (other
/// than per-document engagement and follow files, which are skipped) and
/// for labels outside the corpus classes, `Configuration` for invalid split
/// sizes.
pub fn run(config: &PreprocessConfig) -> Result<PreprocessSummary> {
    let raw = &config.raw_dir;
    let num_classes = config.dataset.num_classes();

    let raw_labels: HashMap<String, i64> = read_json(&raw.join(DOC_LABELS_FILE))?;
    let mut doc_labels = HashMap::with_capacity(raw_labels.len());
    for (key, label) in raw_labels {
        let class = usize::try_from(label)
            .ok()
            .filter(|&c| c < num_classes)
            .ok_or_else(|| {
                Error::DataIntegrity(format!(
                    "document '{key}' has label {label}, expected 0..{num_classes}"
                ))
            })?;
        doc_labels.insert(key, class);
    }
    let doc_vocab: HashMap<String, Vec<usize>> = read_json(&raw.join(DOC_VOCAB_FILE))?;

    let keys: Vec<String> = doc_labels.keys().cloned().collect();
    let sizes = config
        .split_sizes
        .unwrap_or_else(|| config.dataset.default_split_sizes());
    let splits = split_documents(&keys, sizes, config.seed)?;

    let used: BTreeSet<&str> = splits.all().map(String::as_str).collect();
    let engagements = scan_engagements(&raw.join(ENGAGEMENTS_DIR), |k| used.contains(k))?;
    let users = if config.valid_users {
        filter_users(&engagements, &doc_labels, num_classes, config.user_filter)
    } else {
        let all: BTreeSet<String> = engagements.users().into_iter().map(String::from).collect();
        tracing::info!("Kept all {} users, no user filter", all.len());
        all
    };

    let mut builder = GraphBuilder::new(splits, &users);
    builder.add_engagements(&engagements);
    for (sub, kind) in [
        (FOLLOWERS_DIR, FollowKind::Followers),
        (FOLLOWING_DIR, FollowKind::Following),
    ] {
        let dir = raw.join(sub);
        if dir.is_dir() {
            builder.add_follows(&dir, kind)?;
        } else {
            tracing::debug!("No {} directory, skipping", sub);
        }
    }
    builder
        .set_labels(&doc_labels)
        .set_features(&doc_vocab, &engagements, config.vocab_size, config.feature_type);
    builder.write_artifacts(&config.out_dir, &config.layout, config.user_filter.top_k)?;

    Ok(PreprocessSummary {
        num_docs: builder.num_docs(),
        num_users: builder.num_users(),
        num_edges: builder.num_edges(),
        skipped_engagements: engagements.skipped,
        build: builder.stats(),
    })
}
