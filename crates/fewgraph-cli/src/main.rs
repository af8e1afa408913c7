//! fewgraph CLI - few-shot episode tooling for social graphs.
//!
//! # Usage
//!
//! ```bash
//! # Build artifacts from raw engagement files
//! fewgraph preprocess raw/gossipcop -o data/gossipcop --data gossipcop --top-k 30
//!
//! # Dataset statistics
//! fewgraph stats data/gossipcop --data gossipcop
//!
//! # Sample a few 5-shot training episodes and print their shapes
//! fewgraph episodes data/gossipcop --data gossipcop --k-shot 5 --hops 2 --count 3
//!
//! # Mean-aggregation prototype baseline over one validation epoch
//! fewgraph eval data/gossipcop --data gossipcop --split val --workers 4
//! ```
//!
//! Set `RUST_LOG=info` (or `debug`) for loader and sampler logs on stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fewgraph_core::preprocess::{self, PreprocessConfig, UserFilter};
use fewgraph_core::{
    build_loaders, proto, DatasetConfig, DatasetName, EpisodeLoader, FeatureType, GraphDataset,
    LoaderConfig, LoaderOptions, ModelKind, SamplerConfig, Split, SplitSizes,
};
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fewgraph")]
#[command(about = "Few-shot episode sampling on social graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the artifacts live and how they were built.
#[derive(Args)]
struct DataArgs {
    /// Artifact directory
    dir: PathBuf,

    /// Dataset name (HealthStory, gossipcop, twitterHateSpeech)
    #[arg(short, long, default_value = "gossipcop")]
    data: DatasetName,

    /// Top-K users (in thousands) the artifacts were built with
    #[arg(long, default_value = "30")]
    top_k: usize,

    /// Feature type the artifacts were built with (one-hot, term-frequency)
    #[arg(long, default_value = "one-hot")]
    feature_type: FeatureType,
}

impl DataArgs {
    fn dataset_config(&self) -> DatasetConfig {
        let mut config = DatasetConfig::new(self.data, self.dir.clone());
        config.top_k = self.top_k;
        config.feature_type = self.feature_type;
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show statistics about a preprocessed dataset
    Stats {
        #[command(flatten)]
        data: DataArgs,
    },

    /// Sample episodes and print their batch shapes
    Episodes {
        #[command(flatten)]
        data: DataArgs,

        /// Split to sample from
        #[arg(long, default_value = "train")]
        split: SplitArg,

        /// Support examples per class
        #[arg(short, long, default_value = "5")]
        k_shot: usize,

        /// Neighborhood hops around every episode node
        #[arg(long, default_value = "2")]
        hops: usize,

        /// Number of episodes to print
        #[arg(short, long, default_value = "3")]
        count: usize,

        /// Use the rest of each class as query instead of k_shot nodes
        #[arg(long)]
        remainder_query: bool,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Evaluate the mean-aggregation prototype baseline over one epoch
    Eval {
        #[command(flatten)]
        data: DataArgs,

        /// JSON loader configuration; the directory argument still wins
        #[arg(long)]
        config: Option<PathBuf>,

        /// Split to evaluate
        #[arg(long, default_value = "val")]
        split: SplitArg,

        /// Support examples per class
        #[arg(short, long, default_value = "5")]
        k_shot: usize,

        /// Neighborhood hops (also the number of aggregation rounds)
        #[arg(long, default_value = "2")]
        hops: usize,

        /// Worker threads assembling episodes
        #[arg(short, long, default_value = "0")]
        workers: usize,

        /// Model family (gat, prototypical, gmeta)
        #[arg(long, default_value = "prototypical")]
        model: ModelKind,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Build graph artifacts from raw engagement files
    Preprocess {
        /// Raw data directory (doc2labels.json, doc_vocab.json, engagements/)
        raw: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Dataset name
        #[arg(short, long, default_value = "gossipcop")]
        data: DatasetName,

        /// Top-K most active users kept (in thousands)
        #[arg(long, default_value = "30")]
        top_k: usize,

        /// Drop users who shared more than this fraction of any class
        #[arg(long, default_value = "0.3")]
        threshold: f64,

        /// Keep every engaging user (skips --threshold and --top-k filtering)
        #[arg(long)]
        all_users: bool,

        /// Train,val,test ratios (defaults per dataset)
        #[arg(long)]
        split_sizes: Option<SplitSizes>,

        /// Feature type (one-hot, term-frequency)
        #[arg(long, default_value = "one-hot")]
        feature_type: FeatureType,

        /// Vocabulary size; 0 infers it from the data
        #[arg(long, default_value = "0")]
        vocab_size: usize,

        /// Split shuffle seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitArg {
    /// Training documents
    Train,
    /// Validation documents
    Val,
    /// Test documents
    Test,
}

impl From<SplitArg> for Split {
    fn from(split: SplitArg) -> Self {
        match split {
            SplitArg::Train => Split::Train,
            SplitArg::Val => Split::Val,
            SplitArg::Test => Split::Test,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stats { data } => cmd_stats(&data),
        Commands::Episodes {
            data,
            split,
            k_shot,
            hops,
            count,
            remainder_query,
            seed,
        } => cmd_episodes(&data, split.into(), k_shot, hops, count, remainder_query, seed),
        Commands::Eval {
            data,
            config,
            split,
            k_shot,
            hops,
            workers,
            model,
            seed,
        } => {
            let loader_config = match config {
                Some(path) => {
                    let mut c = LoaderConfig::from_json_file(&path)
                        .with_context(|| format!("Failed to read config {}", path.display()))?;
                    c.data_dir = data.dir.clone();
                    c
                }
                None => {
                    let mut c = LoaderConfig::new(data.data, data.dir.clone());
                    c.top_k = data.top_k;
                    c.feature_type = data.feature_type;
                    c.k_shot = k_shot;
                    c.hop_size = hops;
                    c.num_workers = workers;
                    c.model = model;
                    c.seed = seed;
                    c
                }
            };
            cmd_eval(&loader_config, split.into())
        }
        Commands::Preprocess {
            raw,
            output,
            data,
            top_k,
            threshold,
            all_users,
            split_sizes,
            feature_type,
            vocab_size,
            seed,
        } => {
            let mut config = PreprocessConfig::new(data, raw, output);
            config.user_filter = UserFilter { threshold, top_k };
            config.valid_users = !all_users;
            config.split_sizes = split_sizes;
            config.feature_type = feature_type;
            config.vocab_size = vocab_size;
            config.seed = seed;
            cmd_preprocess(&config)
        }
    }
}

fn load_dataset(args: &DataArgs) -> Result<GraphDataset> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", args.dir.display()));

    let ds = GraphDataset::load(&args.dataset_config())
        .with_context(|| format!("Failed to load {} from {}", args.data, args.dir.display()))?;

    pb.finish_with_message(format!("Loaded in {:.2?}", start.elapsed()));
    Ok(ds)
}

fn cmd_stats(args: &DataArgs) -> Result<()> {
    let ds = load_dataset(args)?;
    let stats = ds.stats();
    let components = petgraph::algo::connected_components(&ds.as_petgraph());

    println!("Dataset Statistics");
    println!("==================");
    println!("Documents:      {}", stats.num_docs);
    println!("Users:          {}", stats.num_users);
    println!(
        "Edges:          {} ({} doc-user, {} user-user)",
        stats.num_edges, stats.doc_user_edges, stats.user_user_edges
    );
    println!("Features:       {}", stats.num_features);
    println!("Labeled docs:   {}", stats.num_labeled);
    println!(
        "Train/val/test: {}/{}/{}",
        stats.split_sizes[0], stats.split_sizes[1], stats.split_sizes[2]
    );
    println!("Avg degree:     {:.2}", stats.avg_degree);
    println!("Components:     {}", components);

    println!("\nClass ratio:");
    for (name, ratio) in ds.label_names().iter().zip(ds.class_ratio()) {
        println!("  {:<10} {:.3}", name, ratio);
    }

    Ok(())
}

fn cmd_episodes(
    args: &DataArgs,
    split: Split,
    k_shot: usize,
    hops: usize,
    count: usize,
    remainder_query: bool,
    seed: u64,
) -> Result<()> {
    let ds = Arc::new(load_dataset(args)?);

    let sampler = SamplerConfig::new(k_shot)
        .with_seed(seed)
        .with_include_query(!remainder_query);
    let options = LoaderOptions::new(k_shot)
        .with_hop_size(hops)
        .with_sampler(sampler);
    let mut loader = EpisodeLoader::new(ds, split, options)
        .with_context(|| format!("Cannot sample {} episodes", split))?;

    println!(
        "{} episodes per epoch ({}-way {}-shot, {} hops)",
        loader.len(),
        loader.sampler().n_way(),
        k_shot,
        hops
    );
    for _ in 0..count {
        let eb = loader.next_batch()?;
        println!(
            "episode {}: support {} targets / {} nodes / {} edges, query {} targets / {} nodes / {} edges",
            eb.index,
            eb.support.num_graphs(),
            eb.support.num_nodes(),
            eb.support.num_edges(),
            eb.query.num_graphs(),
            eb.query.num_nodes(),
            eb.query.num_edges()
        );
    }

    Ok(())
}

fn cmd_eval(config: &LoaderConfig, split: Split) -> Result<()> {
    let start = Instant::now();
    let mut loaders = build_loaders(config).context("Failed to build loaders")?;
    let loader = match split {
        Split::Train => &mut loaders.train,
        Split::Val => &mut loaders.val,
        Split::Test => &mut loaders.test,
    };

    let batches = loader.next_epoch()?;
    let pb = ProgressBar::new(batches.len() as u64);
    let (mut accuracy, mut loss, mut macro_f1) = (0.0f32, 0.0f32, 0.0f32);
    for eb in &batches {
        let result = proto::evaluate_episode(eb, config.hop_size)
            .with_context(|| format!("Failed to evaluate episode {}", eb.index))?;
        tracing::debug!(
            "episode {}: accuracy {:.3}, loss {:.3}",
            eb.index,
            result.accuracy,
            result.loss
        );
        accuracy += result.accuracy;
        loss += result.loss;
        macro_f1 += result.macro_f1;
        pb.inc(1);
    }
    pb.finish_and_clear();

    let n = batches.len().max(1) as f32;
    println!(
        "Prototype baseline ({} split, {} episodes, model {})",
        split,
        batches.len(),
        config.model
    );
    println!("==========================================");
    println!("Accuracy: {:.4}", accuracy / n);
    println!("Loss:     {:.4}", loss / n);
    println!("Macro F1: {:.4}", macro_f1 / n);
    println!("Evaluated in {:.2?}", start.elapsed());

    Ok(())
}

fn cmd_preprocess(config: &PreprocessConfig) -> Result<()> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Preprocessing {}...", config.raw_dir.display()));

    let summary = preprocess::run(config)
        .with_context(|| format!("Failed to preprocess {}", config.raw_dir.display()))?;

    pb.finish_with_message(format!("Preprocessed in {:.2?}", start.elapsed()));

    println!("Wrote artifacts to {}", config.out_dir.display());
    println!("Documents:            {}", summary.num_docs);
    println!("Users:                {}", summary.num_users);
    println!("Edges:                {}", summary.num_edges);
    println!("Skipped engagements:  {}", summary.skipped_engagements);
    println!("Skipped follow files: {}", summary.build.skipped_files);

    Ok(())
}
