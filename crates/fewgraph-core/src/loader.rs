//! Episode loaders: sampling plus batch assembly, sequential or on a rayon pool.
//!
//! An [`EpisodeLoader`] owns one [`FewShotEpisodeSampler`] over one split
//! and turns each episode into two independent batches, one for the support
//! ids and one for the query ids. The batches are assembled separately so
//! support nodes never see query nodes beyond what the raw graph connects.
//!
//! # Parallel epochs
//!
//! Episode `i` of a sampler is a pure function of `(seed, i)`, so
//! [`EpisodeLoader::next_epoch`] hands index ranges to rayon tasks, each
//! owning a sampler clone. Results are collected in index order and equal
//! what sequential [`EpisodeLoader::next_batch`] calls would produce.
//!
//! ```text
//! worker 0: clone -> episode_at(0), episode_at(1), ...
//! worker 1: clone -> episode_at(k), ...
//! collect  -> [batch 0, batch 1, ..., batch len-1]
//! ```

use crate::algo::episode::{Episode, FewShotEpisodeSampler, SamplerConfig, ShufflePolicy};
use crate::batch::{Batch, BatchAssembler};
use crate::config::{BatchStrategy, LoaderConfig};
use crate::{ClassId, Error, GraphDataset, Result, Split};
use rayon::prelude::*;
use std::sync::Arc;

/// Options of one loader.
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    /// Hops extracted around every episode node.
    pub hop_size: usize,
    /// Rayon threads used by [`EpisodeLoader::next_epoch`]; `0` runs inline.
    pub num_workers: usize,
    /// How support and query batches are handed to the model.
    pub strategy: BatchStrategy,
    /// Episode sampling.
    pub sampler: SamplerConfig,
}

impl LoaderOptions {
    /// Episodic loader with `k_shot` support per class, 2 hops, no workers.
    pub fn new(k_shot: usize) -> Self {
        Self {
            hop_size: 2,
            num_workers: 0,
            strategy: BatchStrategy::Episodic,
            sampler: SamplerConfig::new(k_shot),
        }
    }

    /// Set the hop size.
    pub fn with_hop_size(mut self, hop_size: usize) -> Self {
        self.hop_size = hop_size;
        self
    }

    /// Set the worker count.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the batch strategy.
    pub fn with_strategy(mut self, strategy: BatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replace the sampler configuration.
    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }
}

/// Support and query batches of one episode.
///
/// Targets are aligned with each batch's classify-mask order.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeBatch {
    /// Episode index within the sampler sequence.
    pub index: usize,
    /// Merged support neighborhoods.
    pub support: Batch,
    /// Merged query neighborhoods.
    pub query: Batch,
}

impl EpisodeBatch {
    /// Classes of the support targets.
    pub fn support_targets(&self) -> &[ClassId] {
        &self.support.targets
    }

    /// Classes of the query targets.
    pub fn query_targets(&self) -> &[ClassId] {
        &self.query.targets
    }

    /// `(support, query, support_targets, query_targets)`.
    pub fn into_parts(self) -> (Batch, Batch, Vec<ClassId>, Vec<ClassId>) {
        let support_targets = self.support.targets.clone();
        let query_targets = self.query.targets.clone();
        (self.support, self.query, support_targets, query_targets)
    }

    /// Shape the batch for a model family.
    pub fn collate(self, strategy: BatchStrategy) -> Result<Collated> {
        match strategy {
            BatchStrategy::Episodic => Ok(Collated::Episodic(self)),
            BatchStrategy::Flat => {
                let num_support = self.support.num_graphs();
                let batch = Batch::concat(&[self.support, self.query])?;
                Ok(Collated::Flat { batch, num_support })
            }
        }
    }
}

/// Loader output after collation.
#[derive(Debug, Clone, PartialEq)]
pub enum Collated {
    /// Support and query kept apart (prototype and meta-learning models).
    Episodic(EpisodeBatch),
    /// One graph holding support then query (plain GAT baseline).
    Flat {
        /// Concatenated batch.
        batch: Batch,
        /// Leading targets that came from the support set.
        num_support: usize,
    },
}

impl Collated {
    /// All targets in classify-mask order, support first.
    pub fn targets(&self) -> Vec<ClassId> {
        match self {
            Collated::Episodic(eb) => eb
                .support_targets()
                .iter()
                .chain(eb.query_targets())
                .copied()
                .collect(),
            Collated::Flat { batch, .. } => batch.targets.clone(),
        }
    }

    /// Total rows handed to the model.
    pub fn num_nodes(&self) -> usize {
        match self {
            Collated::Episodic(eb) => eb.support.num_nodes() + eb.query.num_nodes(),
            Collated::Flat { batch, .. } => batch.num_nodes(),
        }
    }
}

/// Episodes of one split turned into batches.
pub struct EpisodeLoader {
    dataset: Arc<GraphDataset>,
    sampler: FewShotEpisodeSampler,
    options: LoaderOptions,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for EpisodeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeLoader")
            .field("split", &self.sampler.split())
            .field("len", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

impl EpisodeLoader {
    /// Build the sampler for `split` and, when `num_workers > 0`, a thread pool.
    ///
    /// # Errors
    /// Sampler construction errors (`InsufficientData`, `Configuration`) and
    /// `Configuration` if the thread pool cannot be built.
    pub fn new(dataset: Arc<GraphDataset>, split: Split, options: LoaderOptions) -> Result<Self> {
        let sampler = FewShotEpisodeSampler::new(&dataset, split, options.sampler)?;
        let pool = if options.num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.num_workers)
                .build()
                .map_err(|e| Error::Configuration(format!("cannot start worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            dataset,
            sampler,
            options,
            pool,
        })
    }

    /// Episodes per epoch.
    pub fn len(&self) -> usize {
        self.sampler.num_batches()
    }

    /// True if an epoch holds no episodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split this loader samples from.
    pub fn split(&self) -> Split {
        self.sampler.split()
    }

    /// Loader options.
    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Shared dataset.
    pub fn dataset(&self) -> &Arc<GraphDataset> {
        &self.dataset
    }

    /// Underlying sampler.
    pub fn sampler(&self) -> &FewShotEpisodeSampler {
        &self.sampler
    }

    /// Episode `index` without moving this loader.
    pub fn get(&self, index: usize) -> Result<EpisodeBatch> {
        let mut sampler = self.sampler.clone();
        let episode = sampler.episode_at(index);
        self.assemble(&episode)
    }

    /// Next episode in sequence.
    pub fn next_batch(&mut self) -> Result<EpisodeBatch> {
        let episode = self.sampler.next_episode();
        self.assemble(&episode)
    }

    /// Next episode, collated with the loader's strategy.
    pub fn next_collated(&mut self) -> Result<Collated> {
        let strategy = self.options.strategy;
        self.next_batch()?.collate(strategy)
    }

    /// One epoch of episodes, pulled sequentially.
    ///
    /// The consumer may stop early; the loader stays positioned after the
    /// last episode produced.
    pub fn iter(&mut self) -> impl Iterator<Item = Result<EpisodeBatch>> + '_ {
        let n = self.len();
        (0..n).map(move |_| self.next_batch())
    }

    /// One epoch of episodes, assembled on the worker pool.
    ///
    /// Produces every index of the epoch exactly once, in index order.
    pub fn next_epoch(&mut self) -> Result<Vec<EpisodeBatch>> {
        let start = self.sampler.position();
        let end = start + self.len();

        let batches = if let Some(pool) = &self.pool {
            let this = &*self;
            pool.install(|| {
                (start..end)
                    .into_par_iter()
                    .map_init(
                        || this.sampler.clone(),
                        |sampler, index| this.assemble(&sampler.episode_at(index)),
                    )
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            let mut batches = Vec::with_capacity(end - start);
            for _ in start..end {
                batches.push(self.next_batch()?);
            }
            batches
        };
        self.sampler.seek(end);

        tracing::debug!(
            "{} loader: epoch of {} episodes ({}..{})",
            self.split(),
            batches.len(),
            start,
            end
        );
        Ok(batches)
    }

    /// Rewind to episode 0.
    pub fn reset(&mut self) {
        self.sampler.reset();
    }

    fn assemble(&self, episode: &Episode) -> Result<EpisodeBatch> {
        let assembler = BatchAssembler::new(&self.dataset);
        let support = assembler.assemble(&episode.support, self.options.hop_size)?;
        let query = assembler.assemble(&episode.query, self.options.hop_size)?;
        Ok(EpisodeBatch {
            index: episode.index,
            support,
            query,
        })
    }
}

/// Loaders for the three splits.
#[derive(Debug)]
pub struct Loaders {
    /// Training episodes, reshuffled every epoch.
    pub train: EpisodeLoader,
    /// Validation episodes, shuffled once.
    pub val: EpisodeLoader,
    /// Test episodes, shuffled once.
    pub test: EpisodeLoader,
    /// Feature dimension of the training corpus.
    pub num_features: usize,
    /// Class names of the training corpus.
    pub label_names: Vec<String>,
    /// Labeled-document share of each class in the training corpus.
    pub class_ratio: Vec<f64>,
}

/// Validate `config`, load the corpus once and build train/val/test loaders.
///
/// When `eval_data` names a different corpus, validation and test episodes
/// come from that corpus.
///
/// # Errors
/// `Configuration` for invalid settings, load errors from
/// [`GraphDataset::load`], and sampler errors for unusable splits.
pub fn build_loaders(config: &LoaderConfig) -> Result<Loaders> {
    config.validate()?;

    let train_data = Arc::new(GraphDataset::load(&config.dataset_config())?);
    check_vocab(config, &train_data);

    let eval_data = match config.eval_data {
        Some(name) if name != config.data_name => {
            let mut eval_config = config.dataset_config();
            eval_config.name = name;
            let eval = Arc::new(GraphDataset::load(&eval_config)?);
            if eval.num_features() != train_data.num_features() {
                return Err(Error::Configuration(format!(
                    "eval data '{}' has {} features, train data '{}' has {}",
                    name,
                    eval.num_features(),
                    config.data_name,
                    train_data.num_features()
                )));
            }
            eval
        }
        _ => Arc::clone(&train_data),
    };

    let options = LoaderOptions {
        hop_size: config.hop_size,
        num_workers: config.num_workers,
        strategy: config.model.batch_strategy(),
        sampler: SamplerConfig::new(config.k_shot).with_seed(config.seed),
    };
    let with_shuffle = |shuffle: ShufflePolicy| LoaderOptions {
        sampler: options.sampler.with_shuffle(shuffle),
        ..options
    };

    let train = EpisodeLoader::new(
        Arc::clone(&train_data),
        Split::Train,
        with_shuffle(ShufflePolicy::EveryEpoch),
    )?;
    let val = EpisodeLoader::new(
        Arc::clone(&eval_data),
        Split::Val,
        with_shuffle(ShufflePolicy::Once),
    )?;
    let test = EpisodeLoader::new(eval_data, Split::Test, with_shuffle(ShufflePolicy::Once))?;

    for loader in [&train, &val, &test] {
        tracing::info!(
            "{} batches in {} loader ({}-way {}-shot, {} hops, model {})",
            loader.len(),
            loader.split(),
            loader.sampler().n_way(),
            config.k_shot,
            config.hop_size,
            config.model
        );
    }

    Ok(Loaders {
        num_features: train_data.num_features(),
        label_names: train_data.label_names().to_vec(),
        class_ratio: train_data.class_ratio(),
        train,
        val,
        test,
    })
}

fn check_vocab(config: &LoaderConfig, dataset: &GraphDataset) {
    if config.vocab_size != 0 && config.vocab_size != dataset.num_features() {
        tracing::warn!(
            "vocab_size is {} but the {} artifacts hold {} features; using {}",
            config.vocab_size,
            config.data_name,
            dataset.num_features(),
            dataset.num_features()
        );
    }
}
