//! Property-based tests for neighborhood extraction, batching and sampling.
//!
//! These tests verify invariants that should hold for any social graph:
//! - k-hop sub-graphs are exactly the BFS ball around the target
//! - local edges map back to global edges and nothing else
//! - batches keep one masked row per requested node
//! - episodes are disjoint, correctly labeled and reproducible

use fewgraph_core::{
    BatchAssembler, ClassId, FewShotEpisodeSampler, GraphDataset, GraphParts, KHopExtractor,
    SamplerConfig, ShufflePolicy, Split,
};
use ndarray::Array2;
use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};

/// Random documents and users with doc-user and user-user edges.
fn arb_graph() -> impl Strategy<Value = GraphDataset> {
    (1usize..10, 0usize..12)
        .prop_flat_map(|(docs, users)| {
            let n = docs + users;
            (
                Just(docs),
                Just(users),
                prop::collection::vec(0usize..2, docs),
                prop::collection::vec((0..n, 0..n), 0..40),
            )
        })
        .prop_map(|(docs, users, labels, raw)| {
            let n = docs + users;
            let edges = raw
                .into_iter()
                .filter(|&(u, v)| u != v && (u >= docs || v >= docs))
                .collect();
            let mut node_labels: Vec<Option<ClassId>> = labels.into_iter().map(Some).collect();
            node_labels.resize(n, None);
            let features = Array2::from_shape_fn((n, 3), |(i, j)| (i * 3 + j) as f32);
            GraphDataset::from_parts(GraphParts {
                name: None,
                num_docs: docs,
                num_users: users,
                features,
                edges,
                labels: node_labels,
                label_names: vec!["real".to_string(), "fake".to_string()],
                train: (0..docs).collect(),
                val: Vec::new(),
                test: Vec::new(),
            })
            .unwrap()
        })
}

/// Hop distance of every node from `source`, `None` if unreachable.
fn bfs_distances(ds: &GraphDataset, source: usize) -> Vec<Option<usize>> {
    let mut dist = vec![None; ds.num_nodes()];
    dist[source] = Some(0);
    let mut queue = VecDeque::from([source]);
    while let Some(u) = queue.pop_front() {
        let d = dist[u].unwrap();
        for &v in ds.neighbors(u) {
            if dist[v].is_none() {
                dist[v] = Some(d + 1);
                queue.push_back(v);
            }
        }
    }
    dist
}

mod khop_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn subgraph_is_exact_bfs_ball(ds in arb_graph(), pick in any::<prop::sample::Index>(), hops in 0usize..4) {
            let target = pick.index(ds.num_nodes());
            let sub = KHopExtractor::new(&ds).extract(target, hops).unwrap();
            let dist = bfs_distances(&ds, target);

            prop_assert_eq!(sub.nodes[0], target);
            prop_assert_eq!(sub.depths[0], 0);

            let included: HashSet<usize> = sub.nodes.iter().copied().collect();
            prop_assert_eq!(included.len(), sub.nodes.len(), "duplicate node in sub-graph");

            for (node, &depth) in sub.nodes.iter().zip(&sub.depths) {
                prop_assert_eq!(dist[*node], Some(depth));
                prop_assert!(depth <= hops);
            }
            for (node, d) in dist.iter().enumerate() {
                if d.is_some_and(|d| d <= hops) {
                    prop_assert!(included.contains(&node), "node {} within {} hops missing", node, hops);
                }
            }
        }

        #[test]
        fn local_edges_round_trip(ds in arb_graph(), pick in any::<prop::sample::Index>(), hops in 0usize..4) {
            let target = pick.index(ds.num_nodes());
            let sub = KHopExtractor::new(&ds).extract(target, hops).unwrap();

            for &(i, j) in &sub.edges {
                prop_assert!(i < j && j < sub.num_nodes());
            }
            prop_assert_eq!(sub.edges.len(), sub.edge_kinds.len());

            let local: HashSet<(usize, usize)> = sub
                .global_edges()
                .map(|(u, v)| (u.min(v), u.max(v)))
                .collect();
            let mut induced = HashSet::new();
            for &u in &sub.nodes {
                for &v in &sub.nodes {
                    if u < v && ds.has_edge(u, v) {
                        induced.insert((u, v));
                    }
                }
            }
            prop_assert_eq!(local, induced);
        }
    }
}

mod batch_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn rows_add_up_and_mask_counts_targets(
            ds in arb_graph(),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
            hops in 0usize..3,
        ) {
            let ids: Vec<usize> = picks.iter().map(|p| p.index(ds.num_docs())).collect();
            let extractor = KHopExtractor::new(&ds);
            let batch = BatchAssembler::new(&ds).assemble(&ids, hops).unwrap();

            let expected: usize = ids
                .iter()
                .map(|&id| extractor.extract(id, hops).unwrap().num_nodes())
                .sum();
            prop_assert_eq!(batch.features.nrows(), expected);
            prop_assert_eq!(batch.num_nodes(), expected);

            let rows = batch.target_rows();
            prop_assert_eq!(rows.len(), ids.len());
            prop_assert_eq!(&rows, &batch.offsets);
            for (row, &id) in rows.iter().zip(&ids) {
                prop_assert_eq!(batch.node_ids[*row], id);
            }
            for &(i, j) in &batch.edges {
                prop_assert!(i < batch.num_nodes() && j < batch.num_nodes());
            }
        }
    }
}

mod episode_props {
    use super::*;

    /// Two classes with the given populations, one user per document.
    fn two_classes(a: usize, b: usize) -> GraphDataset {
        let labels: Vec<ClassId> = std::iter::repeat(0)
            .take(a)
            .chain(std::iter::repeat(1).take(b))
            .collect();
        GraphDataset::from_parts(GraphParts::toy(&labels, 1)).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn support_and_query_disjoint_and_labeled(
            a in 2usize..20,
            b in 2usize..20,
            k in 1usize..3,
            seed in any::<u64>(),
            draws in 1usize..12,
        ) {
            prop_assume!(a >= 2 * k && b >= 2 * k);
            let ds = two_classes(a, b);
            let config = SamplerConfig::new(k).with_seed(seed);
            let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
            prop_assert_eq!(sampler.num_batches(), a.min(b) / (2 * k));

            for _ in 0..draws {
                let ep = sampler.next_episode();
                prop_assert_eq!(ep.support.len(), 2 * k);
                prop_assert_eq!(ep.query.len(), 2 * k);

                let support: HashSet<_> = ep.support.iter().collect();
                prop_assert!(ep.query.iter().all(|q| !support.contains(q)));

                for (node, class) in ep.support.iter().zip(&ep.support_labels) {
                    prop_assert_eq!(ds.label(*node), Some(*class));
                }
                for (node, class) in ep.query.iter().zip(&ep.query_labels) {
                    prop_assert_eq!(ds.label(*node), Some(*class));
                }
            }
        }

        #[test]
        fn same_seed_same_episodes(a in 2usize..16, b in 2usize..16, seed in any::<u64>()) {
            let ds = two_classes(a, b);
            let config = SamplerConfig::new(1).with_seed(seed);
            let mut first = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
            let mut second = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
            for _ in 0..10 {
                prop_assert_eq!(first.next_episode(), second.next_episode());
            }
        }

        #[test]
        fn unshuffled_epochs_repeat(a in 2usize..16, b in 2usize..16) {
            let ds = two_classes(a, b);
            let config = SamplerConfig::new(1).with_shuffle(ShufflePolicy::Never);
            let mut sampler = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();

            let first = sampler.next_episode();
            let pass = sampler.num_batches();
            // class 0 wraps exactly at the end of its own pass
            let class0_pass = a / 2;
            for _ in 1..class0_pass {
                sampler.next_episode();
            }
            let again = sampler.next_episode();
            prop_assert_eq!(&again.support[..1], &first.support[..1]);
            prop_assert!(pass <= class0_pass);
        }

        #[test]
        fn episode_at_agrees_with_sequence(a in 2usize..16, b in 2usize..16, seed in any::<u64>(), idx in 0usize..20) {
            let ds = two_classes(a, b);
            let config = SamplerConfig::new(1).with_seed(seed);
            let mut seq = FewShotEpisodeSampler::new(&ds, Split::Train, config).unwrap();
            let mut direct = seq.clone();
            let mut last = seq.next_episode();
            for _ in 0..idx {
                last = seq.next_episode();
            }
            prop_assert_eq!(direct.episode_at(idx), last);
        }
    }
}
