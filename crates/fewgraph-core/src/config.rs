//! Configuration surface: dataset/model names, split sizes and file layout.
//!
//! Dataset-specific behavior (label names, default split sizes) hangs off the
//! closed [`DatasetName`] enum rather than per-dataset types. File names are
//! templates resolved per loading call, so nothing here is process-global.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Supported corpora.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetName {
    /// FakeHealth `HealthStory` (real / fake).
    HealthStory,
    /// FakeNewsNet `gossipcop` (real / fake).
    Gossipcop,
    /// Waseem & Hovy hate speech tweets (racism / sexism / none).
    TwitterHateSpeech,
}

impl DatasetName {
    /// All supported names, in the order they are reported in errors.
    pub const ALL: [DatasetName; 3] = [
        DatasetName::HealthStory,
        DatasetName::Gossipcop,
        DatasetName::TwitterHateSpeech,
    ];

    /// Canonical spelling, as used on the command line and in directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthStory => "HealthStory",
            Self::Gossipcop => "gossipcop",
            Self::TwitterHateSpeech => "twitterHateSpeech",
        }
    }

    /// Class names indexed by label value.
    pub fn label_names(&self) -> Vec<String> {
        let names: &[&str] = match self {
            Self::HealthStory | Self::Gossipcop => &["real", "fake"],
            Self::TwitterHateSpeech => &["racism", "sexism", "none"],
        };
        names.iter().map(|s| (*s).to_string()).collect()
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.label_names().len()
    }

    /// Default train/val/test document ratios.
    pub fn default_split_sizes(&self) -> SplitSizes {
        match self {
            Self::HealthStory | Self::Gossipcop => SplitSizes::new(0.7, 0.1, 0.2),
            Self::TwitterHateSpeech => SplitSizes::new(0.6, 0.2, 0.2),
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let supported: Vec<_> = Self::ALL.iter().map(|n| n.as_str()).collect();
                Error::Configuration(format!(
                    "data with name '{s}' is not supported (expected one of {})",
                    supported.join(", ")
                ))
            })
    }
}

/// Model family consuming the batches; decides how episodes are collated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// Plain GAT baseline trained on flat batches.
    Gat,
    /// Prototypical network over support/query episodes.
    ProtoNet,
    /// Meta-learned GAT (MAML-style inner/outer loop) over episodes.
    GMeta,
}

impl ModelKind {
    const ALL: [ModelKind; 3] = [ModelKind::Gat, ModelKind::ProtoNet, ModelKind::GMeta];

    /// Canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gat => "gat",
            Self::ProtoNet => "prototypical",
            Self::GMeta => "gmeta",
        }
    }

    /// Collate strategy for this model.
    pub fn batch_strategy(&self) -> BatchStrategy {
        match self {
            Self::Gat => BatchStrategy::Flat,
            Self::ProtoNet | Self::GMeta => BatchStrategy::Episodic,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Configuration(format!("model with name '{s}' is not supported")))
    }
}

/// How one episode is handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStrategy {
    /// Support and query stay separate batches.
    Episodic,
    /// Support and query are concatenated into a single batch.
    Flat,
}

/// Node feature construction used by preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureType {
    /// Binary bag of vocabulary ids.
    OneHot,
    /// Vocabulary counts normalized to sum to one per node.
    TermFrequency,
}

impl FeatureType {
    /// Canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHot => "one-hot",
            Self::TermFrequency => "term-frequency",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "one-hot" | "onehot" => Ok(Self::OneHot),
            "term-frequency" | "tf" => Ok(Self::TermFrequency),
            _ => Err(Error::Configuration(format!(
                "feature type '{s}' is not supported"
            ))),
        }
    }
}

/// Train/val/test document ratios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitSizes {
    /// Fraction of documents used for training.
    pub train: f64,
    /// Fraction used for validation.
    pub val: f64,
    /// Fraction used for testing.
    pub test: f64,
}

impl SplitSizes {
    /// Create split sizes (not validated).
    pub const fn new(train: f64, val: f64, test: f64) -> Self {
        Self { train, val, test }
    }

    /// Each ratio must lie in `[0, 1]` and the three must sum to at most 1.
    ///
    /// # Errors
    /// `Configuration` describing the offending ratios.
    pub fn validate(&self) -> Result<()> {
        let all = [self.train, self.val, self.test];
        if all.iter().any(|r| !r.is_finite() || !(0.0..=1.0).contains(r)) {
            return Err(Error::Configuration(format!(
                "split sizes must lie in [0, 1], got {self}"
            )));
        }
        if all.iter().sum::<f64>() > 1.0 + 1e-9 {
            return Err(Error::Configuration(format!(
                "split sizes must sum to at most 1.0, got {self}"
            )));
        }
        Ok(())
    }

    /// Whether any ratio is zero.
    pub fn any_zero(&self) -> bool {
        self.train == 0.0 || self.val == 0.0 || self.test == 0.0
    }
}

impl fmt::Display for SplitSizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.train, self.val, self.test)
    }
}

impl FromStr for SplitSizes {
    type Err = Error;

    /// Parse `"0.7,0.1,0.2"`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Configuration(format!("invalid split sizes '{s}': {e}")))?;
        match parts.as_slice() {
            &[train, val, test] => Ok(Self::new(train, val, test)),
            _ => Err(Error::Configuration(format!(
                "split sizes need three comma-separated values, got '{s}'"
            ))),
        }
    }
}

/// Artifact file names. `{top_k}` and `{feature_type}` are substituted at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLayout {
    /// Document key to node id.
    pub doc2id: String,
    /// User key to node id.
    pub user2id: String,
    /// Undirected edge list.
    pub edges: String,
    /// Sparse feature entries.
    pub features: String,
    /// Train/val/test document keys.
    pub splits: String,
    /// Document key to integer label.
    pub labels: String,
}

impl Default for FileLayout {
    fn default() -> Self {
        Self {
            doc2id: "doc2id_top{top_k}.json".to_string(),
            user2id: "user2id_top{top_k}.json".to_string(),
            edges: "edges_top{top_k}.json".to_string(),
            features: "features_{feature_type}_top{top_k}.json".to_string(),
            splits: "doc_splits.json".to_string(),
            labels: "doc2labels.json".to_string(),
        }
    }
}

impl FileLayout {
    /// Substitute template variables in one file name.
    pub fn resolve(template: &str, top_k: usize, feature_type: FeatureType) -> String {
        template
            .replace("{top_k}", &top_k.to_string())
            .replace("{feature_type}", feature_type.as_str())
    }
}

/// Everything needed to load one [`GraphDataset`](crate::GraphDataset).
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Corpus name; fixes the label names.
    pub name: DatasetName,
    /// Directory holding the artifacts.
    pub data_dir: PathBuf,
    /// Top-K users (in thousands) the artifacts were built with.
    pub top_k: usize,
    /// Feature construction the artifacts were built with.
    pub feature_type: FeatureType,
    /// Artifact file names.
    pub layout: FileLayout,
}

impl DatasetConfig {
    /// Config with the default layout.
    pub fn new(name: DatasetName, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name,
            data_dir: data_dir.into(),
            top_k: 30,
            feature_type: FeatureType::OneHot,
            layout: FileLayout::default(),
        }
    }

    /// Resolved path of one artifact.
    pub fn path(&self, template: &str) -> PathBuf {
        self.data_dir
            .join(FileLayout::resolve(template, self.top_k, self.feature_type))
    }
}

/// Loader factory configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Training corpus.
    pub data_name: DatasetName,
    /// Evaluation corpus, when different from the training one.
    pub eval_data: Option<DatasetName>,
    /// Model family (decides the collate strategy).
    pub model: ModelKind,
    /// Hops of the neighborhood extracted around every episode node.
    pub hop_size: usize,
    /// Top-K users (in thousands).
    pub top_k: usize,
    /// Support examples per class.
    pub k_shot: usize,
    /// Document ratios; `None` uses the dataset default.
    pub split_sizes: Option<SplitSizes>,
    /// Feature construction.
    pub feature_type: FeatureType,
    /// Expected feature dimension; `0` accepts whatever the artifacts hold.
    pub vocab_size: usize,
    /// Worker threads per loader; `0` assembles inline.
    pub num_workers: usize,
    /// Seed for every sampler built by the factory.
    pub seed: u64,
    /// Artifact directory.
    pub data_dir: PathBuf,
    /// Artifact file names.
    pub layout: FileLayout,
}

impl LoaderConfig {
    /// Config with defaults for everything except the dataset and directory.
    pub fn new(data_name: DatasetName, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_name,
            eval_data: None,
            model: ModelKind::ProtoNet,
            hop_size: 2,
            top_k: 30,
            k_shot: 5,
            split_sizes: None,
            feature_type: FeatureType::OneHot,
            vocab_size: 0,
            num_workers: 0,
            seed: 42,
            data_dir: data_dir.into(),
            layout: FileLayout::default(),
        }
    }

    /// Effective split sizes.
    pub fn split_sizes(&self) -> SplitSizes {
        self.split_sizes
            .unwrap_or_else(|| self.data_name.default_split_sizes())
    }

    /// Check the configuration before touching any file.
    ///
    /// # Errors
    /// `Configuration` for invalid ratios, a zero split when training and
    /// evaluating on the same corpus, or `k_shot == 0`.
    pub fn validate(&self) -> Result<()> {
        let sizes = self.split_sizes();
        sizes.validate()?;
        let same_corpus = self.eval_data.map_or(true, |e| e == self.data_name);
        if same_corpus && sizes.any_zero() {
            return Err(Error::Configuration(format!(
                "train and eval data are both '{}' but a split size is zero ({sizes})",
                self.data_name
            )));
        }
        if self.k_shot == 0 {
            return Err(Error::Configuration("k_shot must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Dataset part of this configuration.
    pub fn dataset_config(&self) -> DatasetConfig {
        DatasetConfig {
            name: self.data_name,
            data_dir: self.data_dir.clone(),
            top_k: self.top_k,
            feature_type: self.feature_type,
            layout: self.layout.clone(),
        }
    }

    /// Read a JSON configuration file.
    ///
    /// Names are validated through their `FromStr` impls so unsupported
    /// values surface as `Configuration` errors naming the value.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raw: RawLoaderConfig = serde_json::from_str(&text)?;
        raw.try_into()
    }
}

/// On-disk form of [`LoaderConfig`]; names stay strings until validated.
#[derive(Debug, Deserialize)]
struct RawLoaderConfig {
    data_name: String,
    #[serde(default)]
    eval_data: Option<String>,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_hop_size")]
    hop_size: usize,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_k_shot")]
    k_shot: usize,
    #[serde(default)]
    split_sizes: Option<String>,
    #[serde(default = "default_feature_type")]
    feature_type: String,
    #[serde(default)]
    vocab_size: usize,
    #[serde(default)]
    num_workers: usize,
    #[serde(default = "default_seed")]
    seed: u64,
    data_dir: PathBuf,
    #[serde(default)]
    layout: FileLayout,
}

fn default_model() -> String {
    ModelKind::ProtoNet.as_str().to_string()
}
fn default_hop_size() -> usize {
    2
}
fn default_top_k() -> usize {
    30
}
fn default_k_shot() -> usize {
    5
}
fn default_feature_type() -> String {
    FeatureType::OneHot.as_str().to_string()
}
fn default_seed() -> u64 {
    42
}

impl TryFrom<RawLoaderConfig> for LoaderConfig {
    type Error = Error;

    fn try_from(raw: RawLoaderConfig) -> Result<Self> {
        Ok(Self {
            data_name: raw.data_name.parse()?,
            eval_data: raw.eval_data.as_deref().map(str::parse::<DatasetName>).transpose()?,
            model: raw.model.parse()?,
            hop_size: raw.hop_size,
            top_k: raw.top_k,
            k_shot: raw.k_shot,
            split_sizes: raw.split_sizes.as_deref().map(str::parse::<SplitSizes>).transpose()?,
            feature_type: raw.feature_type.parse()?,
            vocab_size: raw.vocab_size,
            num_workers: raw.num_workers,
            seed: raw.seed,
            data_dir: raw.data_dir,
            layout: raw.layout,
        })
    }
}
