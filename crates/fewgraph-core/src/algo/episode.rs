//! N-way K-shot episode sampling over a split mask.
//!
//! # Episodes
//!
//! An episode draws, for every class, `k_shot` *support* documents (used to
//! build the class prototype) and `k_shot` *query* documents (classified
//! against the prototypes). All classes of the dataset take part, so
//! `n_way == num_classes`.
//!
//! # Cursors
//!
//! Each class owns an ordered pool of its labeled documents inside the mask
//! and a [`ClassCursor`] `{epoch, cursor}`. Drawing takes the next `need`
//! ids and moves the cursor; when fewer than `need` ids remain the class
//! wraps into its next epoch (reshuffled under
//! [`ShufflePolicy::EveryEpoch`]) and the tail is skipped:
//!
//! ```text
//! class 0 (7 nodes, need 2):  [a b|c d|e f|g]  -> epoch 0 yields 3 draws, g skipped
//!                              ^ cursor
//! ```
//!
//! The pool order of a class is a pure function of `(seed, class, epoch)`,
//! so the cursor state for any episode index can be computed directly
//! ([`FewShotEpisodeSampler::seek`]), and independent sampler clones agree.
//!
//! # Epoch length
//!
//! [`FewShotEpisodeSampler::num_batches`] is `floor(min population / need)`.
//! Larger classes keep going past that boundary and wrap on their own
//! schedule; the smallest class decides how many non-overlapping episodes
//! one pass contains.

use crate::{ClassId, Error, GraphDataset, NodeId, Result, Split};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;

/// When a class pool is reshuffled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShufflePolicy {
    /// Ascending node id order, every epoch.
    Never,
    /// Shuffled once at construction, identical across epochs.
    Once,
    /// Reshuffled at every wrap (and at construction).
    #[default]
    EveryEpoch,
}

/// Configuration for episode sampling.
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Support examples per class.
    pub k_shot: usize,
    /// Query set of exactly `k_shot` per class, disjoint from the support.
    /// When false the query is the rest of the class pool, read circularly
    /// from the end of the support slice and bounded by `query_cap`.
    pub include_query: bool,
    /// Reshuffle policy.
    pub shuffle: ShufflePolicy,
    /// Upper bound on query nodes per class when `include_query` is false.
    pub query_cap: usize,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl SamplerConfig {
    /// `k_shot` support + `k_shot` query per class, reshuffled every epoch.
    pub fn new(k_shot: usize) -> Self {
        Self {
            k_shot,
            include_query: true,
            shuffle: ShufflePolicy::EveryEpoch,
            query_cap: 64,
            seed: 42,
        }
    }

    /// Set the shuffle policy.
    pub fn with_shuffle(mut self, shuffle: ShufflePolicy) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set whether the query is a disjoint `k_shot` slice.
    pub fn with_include_query(mut self, include_query: bool) -> Self {
        self.include_query = include_query;
        self
    }

    /// Set the query cap used when `include_query` is false.
    pub fn with_query_cap(mut self, query_cap: usize) -> Self {
        self.query_cap = query_cap;
        self
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Ids consumed from each class per episode.
    pub fn need(&self) -> usize {
        if self.include_query {
            2 * self.k_shot
        } else {
            self.k_shot
        }
    }
}

/// One sampled task.
///
/// Support and query lists are class-major: all ids of `classes[0]` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    /// Position of this episode in the sampler's sequence.
    pub index: usize,
    /// Participating classes, ascending.
    pub classes: Vec<ClassId>,
    /// Support node ids.
    pub support: Vec<NodeId>,
    /// Class of each support node.
    pub support_labels: Vec<ClassId>,
    /// Query node ids.
    pub query: Vec<NodeId>,
    /// Class of each query node.
    pub query_labels: Vec<ClassId>,
}

impl Episode {
    /// Number of classes.
    pub fn n_way(&self) -> usize {
        self.classes.len()
    }
}

/// Read position inside one class pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassCursor {
    /// Completed passes over the pool.
    pub epoch: u64,
    /// Index of the next id to draw.
    pub cursor: usize,
}

impl ClassCursor {
    /// Split one draw of `need` ids from a pool of `len` into the position it
    /// reads from (wrapped if needed) and the state after it.
    pub fn step(self, need: usize, len: usize) -> (ClassCursor, ClassCursor) {
        let at = if self.cursor + need > len {
            ClassCursor {
                epoch: self.epoch + 1,
                cursor: 0,
            }
        } else {
            self
        };
        let next = ClassCursor {
            epoch: at.epoch,
            cursor: at.cursor + need,
        };
        (at, next)
    }

    /// Position the `index`-th draw reads from.
    pub fn at_index(index: usize, need: usize, len: usize) -> ClassCursor {
        let per_epoch = (len / need).max(1);
        ClassCursor {
            epoch: (index / per_epoch) as u64,
            cursor: (index % per_epoch) * need,
        }
    }
}

#[derive(Debug, Clone)]
struct ClassPool {
    class: ClassId,
    /// Eligible ids in ascending order.
    base: Vec<NodeId>,
    /// Current order and the shuffle key it was built for.
    order: Vec<NodeId>,
    order_key: Option<u64>,
}

/// Episodic sampler over the labeled documents of one split.
///
/// # Example
///
/// ```rust
/// use fewgraph_core::{GraphDataset, GraphParts, Split};
/// use fewgraph_core::algo::episode::{FewShotEpisodeSampler, SamplerConfig};
///
/// let ds = GraphDataset::from_parts(GraphParts::toy(&[0, 0, 0, 0, 1, 1, 1, 1], 1)).unwrap();
/// let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(2)).unwrap();
///
/// assert_eq!(sampler.num_batches(), 1);
/// let episode = sampler.next_episode();
/// assert_eq!(episode.support.len(), 4);
/// assert_eq!(episode.query.len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct FewShotEpisodeSampler {
    split: Split,
    config: SamplerConfig,
    pools: Vec<ClassPool>,
    cursors: Vec<ClassCursor>,
    position: usize,
}

impl FewShotEpisodeSampler {
    /// Build a sampler over the labeled documents of `split`.
    ///
    /// # Errors
    /// - `Configuration` if `k_shot == 0` or the dataset has no classes.
    /// - `InsufficientData` if any class has fewer than `need` eligible
    ///   documents, including none at all.
    pub fn new(dataset: &GraphDataset, split: Split, config: SamplerConfig) -> Result<Self> {
        if config.k_shot == 0 {
            return Err(Error::Configuration("k_shot must be at least 1".to_string()));
        }
        let num_classes = dataset.num_classes();
        if num_classes == 0 {
            return Err(Error::Configuration("dataset has no classes".to_string()));
        }

        let mut base: Vec<Vec<NodeId>> = vec![Vec::new(); num_classes];
        for (node, class) in dataset.labeled_in(split) {
            base[class].push(node);
        }

        let need = config.need();
        for (class, nodes) in base.iter().enumerate() {
            if nodes.len() < need {
                return Err(Error::InsufficientData {
                    split,
                    class,
                    available: nodes.len(),
                    required: need,
                });
            }
        }

        let pools: Vec<ClassPool> = base
            .into_iter()
            .enumerate()
            .map(|(class, base)| ClassPool {
                class,
                order: Vec::new(),
                order_key: None,
                base,
            })
            .collect();

        let mut sampler = Self {
            split,
            config,
            cursors: vec![ClassCursor::default(); pools.len()],
            pools,
            position: 0,
        };
        for class in 0..sampler.pools.len() {
            sampler.ensure_order(class, 0);
        }

        tracing::debug!(
            "{} sampler: populations {:?}, {} episodes per epoch",
            split,
            sampler.populations(),
            sampler.num_batches()
        );
        Ok(sampler)
    }

    /// Split this sampler draws from.
    pub fn split(&self) -> Split {
        self.split
    }

    /// Sampler configuration.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Number of classes per episode.
    pub fn n_way(&self) -> usize {
        self.pools.len()
    }

    /// Eligible documents per class.
    pub fn populations(&self) -> Vec<usize> {
        self.pools.iter().map(|p| p.base.len()).collect()
    }

    /// Non-overlapping episodes per pass, bounded by the smallest class.
    pub fn num_batches(&self) -> usize {
        let need = self.config.need();
        self.pools
            .iter()
            .map(|p| p.base.len() / need)
            .min()
            .unwrap_or(0)
    }

    /// Index of the next episode [`next_episode`](Self::next_episode) returns.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Current cursor of each class.
    pub fn cursors(&self) -> &[ClassCursor] {
        &self.cursors
    }

    /// Move every class cursor to where episode `index` starts.
    pub fn seek(&mut self, index: usize) {
        let need = self.config.need();
        for (class, pool) in self.pools.iter().enumerate() {
            self.cursors[class] = ClassCursor::at_index(index, need, pool.base.len());
        }
        self.position = index;
    }

    /// Rewind to the first episode.
    pub fn reset(&mut self) {
        self.seek(0);
    }

    /// Episode at an arbitrary index; leaves the sampler positioned after it.
    pub fn episode_at(&mut self, index: usize) -> Episode {
        self.seek(index);
        self.next_episode()
    }

    /// Draw the next episode, wrapping classes that run out.
    pub fn next_episode(&mut self) -> Episode {
        let need = self.config.need();
        let k = self.config.k_shot;
        let n_way = self.pools.len();

        let mut episode = Episode {
            index: self.position,
            classes: (0..n_way).collect(),
            support: Vec::with_capacity(n_way * k),
            support_labels: Vec::with_capacity(n_way * k),
            query: Vec::new(),
            query_labels: Vec::new(),
        };

        for class in 0..n_way {
            let len = self.pools[class].base.len();
            let (at, next) = self.cursors[class].step(need, len);
            if at.epoch != self.cursors[class].epoch {
                tracing::debug!(
                    "{} sampler: class {} wrapped into epoch {}",
                    self.split,
                    class,
                    at.epoch
                );
            }
            self.cursors[class] = next;

            self.ensure_order(class, at.epoch);
            let pool = &self.pools[class];
            let order = &pool.order;

            let support_end = at.cursor + k;
            episode.support.extend_from_slice(&order[at.cursor..support_end]);
            episode
                .support_labels
                .extend(std::iter::repeat(pool.class).take(k));

            // Reads circularly from the support end; `len - k` steps never
            // reach the support slice again.
            let query_len = if self.config.include_query {
                k
            } else {
                self.config.query_cap.min(len - k)
            };
            episode
                .query
                .extend((0..query_len).map(|i| order[(support_end + i) % len]));
            episode
                .query_labels
                .extend(std::iter::repeat(pool.class).take(query_len));
        }

        self.position += 1;
        episode
    }

    fn shuffle_key(&self, epoch: u64) -> Option<u64> {
        match self.config.shuffle {
            ShufflePolicy::Never => None,
            ShufflePolicy::Once => Some(0),
            ShufflePolicy::EveryEpoch => Some(epoch),
        }
    }

    /// Make `pools[class].order` the order for `epoch`.
    fn ensure_order(&mut self, class: usize, epoch: u64) {
        let key = self.shuffle_key(epoch);
        let seed = self.config.seed;
        let pool = &mut self.pools[class];
        if !pool.order.is_empty() && pool.order_key == key {
            return;
        }
        pool.order.clone_from(&pool.base);
        if let Some(key) = key {
            let mut rng = XorShiftRng::seed_from_u64(mix_seed(seed, class, key));
            pool.order.shuffle(&mut rng);
        }
        pool.order_key = key;
    }
}

fn mix_seed(seed: u64, class: usize, epoch: u64) -> u64 {
    seed ^ (class as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ epoch.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphParts;
    use std::collections::HashSet;

    fn dataset(per_class: &[usize]) -> GraphDataset {
        let labels: Vec<ClassId> = per_class
            .iter()
            .enumerate()
            .flat_map(|(c, &n)| std::iter::repeat(c).take(n))
            .collect();
        GraphDataset::from_parts(GraphParts::toy(&labels, 1)).unwrap()
    }

    #[test]
    fn test_episode_shape_and_labels() {
        let ds = dataset(&[3, 3]);
        let mut sampler =
            FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(1)).unwrap();
        let ep = sampler.next_episode();

        assert_eq!(ep.n_way(), 2);
        assert_eq!(ep.support.len(), 2);
        assert_eq!(ep.query.len(), 2);
        assert_eq!(ep.support_labels, vec![0, 1]);
        assert_eq!(ep.query_labels, vec![0, 1]);

        let support: HashSet<_> = ep.support.iter().collect();
        assert!(ep.query.iter().all(|q| !support.contains(q)));
        for (node, class) in ep.support.iter().zip(&ep.support_labels) {
            assert_eq!(ds.label(*node), Some(*class));
        }
    }

    #[test]
    fn test_num_batches_min_population() {
        let ds = dataset(&[10, 5]);
        let sampler =
            FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(2)).unwrap();
        assert_eq!(sampler.num_batches(), 1);

        let sampler = FewShotEpisodeSampler::new(
            &ds,
            Split::Train,
            SamplerConfig::new(2).with_include_query(false),
        )
        .unwrap();
        assert_eq!(sampler.num_batches(), 2);
    }

    #[test]
    fn test_insufficient_class() {
        let ds = dataset(&[4, 1]);
        let err = FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(1)).unwrap_err();
        match err {
            Error::InsufficientData {
                class,
                available,
                required,
                ..
            } => {
                assert_eq!(class, 1);
                assert_eq!(available, 1);
                assert_eq!(required, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_class_fails_fast() {
        let mut parts = GraphParts::toy(&[0, 0, 0, 1, 1, 1], 1);
        parts.train = vec![0, 1, 2];
        parts.val = vec![3, 4, 5];
        let ds = GraphDataset::from_parts(parts).unwrap();
        assert!(matches!(
            FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(1)),
            Err(Error::InsufficientData { class: 1, available: 0, .. })
        ));
    }

    #[test]
    fn test_zero_k_shot_rejected() {
        let ds = dataset(&[2, 2]);
        assert!(matches!(
            FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(0)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_no_shuffle_is_ascending() {
        let ds = dataset(&[4, 4]);
        let config = SamplerConfig::new(1).with_shuffle(ShufflePolicy::Never);
        let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
        let first = sampler.next_episode();
        let second = sampler.next_episode();
        assert_eq!(first.support, vec![0, 4]);
        assert_eq!(first.query, vec![1, 5]);
        assert_eq!(second.support, vec![2, 6]);
        assert_eq!(second.query, vec![3, 7]);
    }

    #[test]
    fn test_wrap_skips_tail() {
        let ds = dataset(&[5, 4]);
        let config = SamplerConfig::new(1).with_shuffle(ShufflePolicy::Never);
        let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
        let _ = sampler.next_episode();
        let _ = sampler.next_episode();
        let third = sampler.next_episode();
        // Class 0 has one leftover node (4), so it wraps to the start.
        assert_eq!(third.support[0], 0);
        assert_eq!(sampler.cursors()[0].epoch, 1);
    }

    #[test]
    fn test_remainder_query() {
        let ds = dataset(&[5, 3]);
        let config = SamplerConfig::new(2)
            .with_include_query(false)
            .with_shuffle(ShufflePolicy::Never)
            .with_query_cap(2);
        let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
        let ep = sampler.next_episode();
        assert_eq!(ep.support, vec![0, 1, 5, 6]);
        assert_eq!(ep.query, vec![2, 3, 7]);
        assert_eq!(ep.query_labels, vec![0, 0, 1]);
    }

    #[test]
    fn test_remainder_query_wraps_around_support() {
        let ds = dataset(&[4, 4]);
        let config = SamplerConfig::new(2)
            .with_include_query(false)
            .with_shuffle(ShufflePolicy::Never);
        let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
        assert_eq!(sampler.num_batches(), 2);

        let first = sampler.next_episode();
        assert_eq!(first.query, vec![2, 3, 6, 7]);

        // Last draw of the pass: the support is the pool tail, the query
        // comes from the head.
        let last = sampler.next_episode();
        assert_eq!(last.support, vec![2, 3, 6, 7]);
        assert_eq!(last.query, vec![0, 1, 4, 5]);
        assert_eq!(last.query_labels, vec![0, 0, 1, 1]);

        let support: HashSet<_> = last.support.iter().collect();
        for class in 0..2 {
            let count = last.query_labels.iter().filter(|&&c| c == class).count();
            assert!(count > 0, "class {class} has an empty query");
        }
        assert!(last.query.iter().all(|q| !support.contains(q)));
    }

    #[test]
    fn test_remainder_query_respects_cap_mid_pool() {
        let ds = dataset(&[6, 6]);
        let config = SamplerConfig::new(1)
            .with_include_query(false)
            .with_shuffle(ShufflePolicy::Never)
            .with_query_cap(3);
        let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
        let ep = sampler.episode_at(4);
        assert_eq!(ep.support, vec![4, 10]);
        assert_eq!(ep.query, vec![5, 0, 1, 11, 6, 7]);
    }

    #[test]
    fn test_episode_at_matches_sequence() {
        let ds = dataset(&[7, 9, 6]);
        let mut sequential =
            FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(1).with_seed(7))
                .unwrap();
        let seq: Vec<_> = (0..12).map(|_| sequential.next_episode()).collect();

        let mut indexed =
            FewShotEpisodeSampler::new(&ds, Split::Train, SamplerConfig::new(1).with_seed(7))
                .unwrap();
        for i in [5, 0, 11, 3, 8] {
            assert_eq!(indexed.episode_at(i), seq[i]);
        }
    }

    #[test]
    fn test_cursor_step() {
        let start = ClassCursor::default();
        let (at, next) = start.step(2, 5);
        assert_eq!(at, start);
        assert_eq!(next.cursor, 2);
        let (at, _) = ClassCursor { epoch: 0, cursor: 4 }.step(2, 5);
        assert_eq!(at, ClassCursor { epoch: 1, cursor: 0 });
        assert_eq!(ClassCursor::at_index(3, 2, 5), ClassCursor { epoch: 1, cursor: 2 });
    }
}
