//! Prototype classification over classify-masked embeddings.
//!
//! The consumer side of an [`EpisodeBatch`]: embed both batches, keep the
//! rows flagged by `classify_mask`, average the support rows of each class
//! into a prototype, and score every query row by
//! `log_softmax(-||q - p_c||^2)`.
//!
//! [`mean_aggregate`] is a parameter-free encoder (repeated neighborhood
//! means) that makes the pipeline usable as a baseline without a trained
//! model.

use crate::batch::Batch;
use crate::loader::EpisodeBatch;
use crate::{ClassId, Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Scores of one query set against the prototypes.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// `[num_queries, num_classes]` log-probabilities.
    pub log_probs: Array2<f32>,
    /// Predicted class of each query.
    pub predictions: Vec<ClassId>,
    /// Mean negative log-likelihood of the true classes.
    pub loss: f32,
    /// Fraction of correct predictions.
    pub accuracy: f32,
    /// Unweighted mean of per-class F1 scores.
    pub macro_f1: f32,
}

/// Class-mean prototypes of `embeddings`, with the classes in ascending order.
///
/// # Errors
/// `DataIntegrity` if the row count differs from `targets.len()` or there
/// are no rows.
pub fn prototypes(
    embeddings: ArrayView2<'_, f32>,
    targets: &[ClassId],
) -> Result<(Array2<f32>, Vec<ClassId>)> {
    check_rows("support", embeddings.nrows(), targets.len())?;

    let mut classes = targets.to_vec();
    classes.sort_unstable();
    classes.dedup();

    let mut protos = Array2::zeros((classes.len(), embeddings.ncols()));
    for (row, &class) in classes.iter().enumerate() {
        let members: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter_map(|(i, &t)| (t == class).then_some(i))
            .collect();
        if let Some(mean) = embeddings.select(Axis(0), &members).mean_axis(Axis(0)) {
            protos.row_mut(row).assign(&mean);
        }
    }
    Ok((protos, classes))
}

/// Score `queries` against `prototypes`.
///
/// # Errors
/// `DataIntegrity` for mismatched shapes or a target absent from `classes`.
pub fn classify(
    prototypes: ArrayView2<'_, f32>,
    classes: &[ClassId],
    queries: ArrayView2<'_, f32>,
    targets: &[ClassId],
) -> Result<Classification> {
    check_rows("query", queries.nrows(), targets.len())?;
    if prototypes.nrows() != classes.len() || prototypes.ncols() != queries.ncols() {
        return Err(Error::DataIntegrity(format!(
            "prototypes are {}x{} for {} classes and {}-dim queries",
            prototypes.nrows(),
            prototypes.ncols(),
            classes.len(),
            queries.ncols()
        )));
    }
    let labels: Vec<usize> = targets
        .iter()
        .map(|t| {
            classes.iter().position(|c| c == t).ok_or_else(|| {
                Error::DataIntegrity(format!("query class {t} has no prototype"))
            })
        })
        .collect::<Result<_>>()?;

    let mut log_probs = Array2::zeros((queries.nrows(), classes.len()));
    for (q, query) in queries.outer_iter().enumerate() {
        let logits: Array1<f32> = prototypes
            .outer_iter()
            .map(|p| -(&p - &query).mapv(|x| x * x).sum())
            .collect();
        let max = logits.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        let log_norm = max + logits.mapv(|x| (x - max).exp()).sum().ln();
        log_probs.row_mut(q).assign(&logits.mapv(|x| x - log_norm));
    }

    let argmax: Vec<usize> = log_probs
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &x)| {
                    if x > best.1 {
                        (i, x)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect();

    let n = labels.len().max(1) as f32;
    let loss = -labels
        .iter()
        .enumerate()
        .map(|(q, &l)| log_probs[[q, l]])
        .sum::<f32>()
        / n;
    let correct = argmax.iter().zip(&labels).filter(|(p, l)| p == l).count();

    Ok(Classification {
        predictions: argmax.iter().map(|&i| classes[i]).collect(),
        loss,
        accuracy: correct as f32 / n,
        macro_f1: macro_f1(&argmax, &labels, classes.len()),
        log_probs,
    })
}

fn macro_f1(predicted: &[usize], actual: &[usize], num_classes: usize) -> f32 {
    if num_classes == 0 {
        return 0.0;
    }
    let total: f32 = (0..num_classes)
        .map(|c| {
            let tp = predicted
                .iter()
                .zip(actual)
                .filter(|&(&p, &a)| p == c && a == c)
                .count() as f32;
            let fp = predicted.iter().filter(|&&p| p == c).count() as f32 - tp;
            let fn_ = actual.iter().filter(|&&a| a == c).count() as f32 - tp;
            if tp == 0.0 {
                0.0
            } else {
                2.0 * tp / (2.0 * tp + fp + fn_)
            }
        })
        .sum();
    total / num_classes as f32
}

fn check_rows(what: &str, rows: usize, targets: usize) -> Result<()> {
    if rows == 0 || rows != targets {
        return Err(Error::DataIntegrity(format!(
            "{what} has {rows} embedding rows for {targets} targets"
        )));
    }
    Ok(())
}

/// Embed the target rows of `batch` by `hops` rounds of mean aggregation
/// over each node and its batch neighbors.
///
/// Rows come back in classify-mask order.
pub fn mean_aggregate(batch: &Batch, hops: usize) -> Array2<f32> {
    let n = batch.num_nodes();
    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, j) in batch.directed_edges() {
        neighbors[i].push(j);
    }

    let mut h = batch.features.clone();
    for _ in 0..hops {
        let mut next = h.clone();
        for (i, adj) in neighbors.iter().enumerate() {
            if adj.is_empty() {
                continue;
            }
            let mut row = next.row_mut(i);
            for &j in adj {
                row += &h.row(j);
            }
            row /= (adj.len() + 1) as f32;
        }
        h = next;
    }
    h.select(Axis(0), &batch.target_rows())
}

/// Run the mean-aggregation prototype baseline on one episode.
///
/// # Errors
/// `DataIntegrity` if a batch is empty or a query class is missing from
/// the support.
pub fn evaluate_episode(episode: &EpisodeBatch, hops: usize) -> Result<Classification> {
    let support = mean_aggregate(&episode.support, hops);
    let query = mean_aggregate(&episode.query, hops);
    let (protos, classes) = prototypes(support.view(), episode.support_targets())?;
    classify(protos.view(), &classes, query.view(), episode.query_targets())
}
