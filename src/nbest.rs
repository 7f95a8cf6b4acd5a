//! N-best decoding by A* search over the lattice.
//!
//! Partial paths grow forward from the start state. Their priority is the
//! score so far plus the exact best completion score from the backward
//! Viterbi table, so complete paths leave the frontier in non-increasing
//! score order and the first one is the Viterbi path.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use ndarray::Array2;
use tracing::debug;

use crate::context::Context;
use crate::lattice::Lattice;

/// One link of a partial path. Paths sharing a prefix share its nodes.
#[derive(Debug)]
struct PathNode {
    edge: u32,
    parent: Option<Rc<PathNode>>,
}

#[derive(Debug)]
struct Partial {
    /// Score so far plus the best possible completion
    priority: f64,
    /// Score so far
    score: f64,
    /// Tokens consumed
    position: usize,
    state: u32,
    node: Option<Rc<PathNode>>,
    /// Insertion order, breaks priority ties
    seq: u64,
}

impl PartialEq for Partial {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Partial {}

impl PartialOrd for Partial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Partial {
    fn cmp(&self, other: &Self) -> Ordering {
        // Greatest = best: higher priority first, then earlier insertion
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

fn collect_path(node: &Option<Rc<PathNode>>, len: usize) -> Vec<u32> {
    let mut path = Vec::with_capacity(len);
    let mut cur = node.as_deref();
    while let Some(n) = cur {
        path.push(n.edge);
        cur = n.parent.as_deref();
    }
    path.reverse();
    path
}

/// Best completion score from every (position, state), `[T+1][S]`.
fn completion_scores(ctx: &Context, lattice: &Lattice) -> Array2<f64> {
    let t_len = ctx.num_items();
    let mut gamma = Array2::from_elem((t_len + 1, lattice.num_states()), f64::NEG_INFINITY);
    for (s, state) in lattice.states().iter().enumerate() {
        gamma[[t_len, s]] = state.final_weight;
    }
    for t in (0..t_len).rev() {
        for s in 0..lattice.num_states() {
            let mut best = f64::NEG_INFINITY;
            for &e in lattice.outgoing(s as u32) {
                let dst = lattice.edge(e).dst as usize;
                let score = ctx.edge_score(t, e) + gamma[[t + 1, dst]];
                if score > best {
                    best = score;
                }
            }
            gamma[[t, s]] = best;
        }
    }
    gamma
}

/// Find up to `k` distinct paths through the scored lattice in `ctx`, best
/// first. Each path is one transition per token, paired with its score.
///
/// At most `cache_size` partial paths are kept; when the frontier
/// overflows, the lowest-priority ones are dropped.
pub(crate) fn nbest(
    ctx: &Context,
    lattice: &Lattice,
    k: usize,
    cache_size: usize,
) -> Vec<(Vec<u32>, f64)> {
    let t_len = ctx.num_items();
    let num_states = lattice.num_states();
    if k == 0 || t_len == 0 {
        return Vec::new();
    }
    let gamma = completion_scores(ctx, lattice);

    let mut frontier = BTreeSet::new();
    let mut seq = 0u64;
    for (s, state) in lattice.states().iter().enumerate() {
        let priority = state.initial + gamma[[0, s]];
        if priority.is_finite() {
            frontier.insert(Partial {
                priority,
                score: state.initial,
                position: 0,
                state: s as u32,
                node: None,
                seq,
            });
            seq += 1;
        }
    }

    let mut expansions = vec![0usize; (t_len + 1) * num_states];
    let mut seen: HashSet<Vec<u32>> = HashSet::new();
    let mut results = Vec::with_capacity(k);
    let mut evicted = 0usize;

    while let Some(best) = frontier.pop_last() {
        let slot = best.position * num_states + best.state as usize;
        if expansions[slot] >= k {
            continue;
        }
        expansions[slot] += 1;

        if best.position == t_len {
            let path = collect_path(&best.node, t_len);
            if seen.insert(path.clone()) {
                let score = best.score + lattice.state(best.state).final_weight;
                results.push((path, score));
                if results.len() == k {
                    break;
                }
            }
            continue;
        }

        for &e in lattice.outgoing(best.state) {
            let dst = lattice.edge(e).dst;
            let score = best.score + ctx.edge_score(best.position, e);
            let priority = score + gamma[[best.position + 1, dst as usize]];
            if !priority.is_finite() {
                continue;
            }
            frontier.insert(Partial {
                priority,
                score,
                position: best.position + 1,
                state: dst,
                node: Some(Rc::new(PathNode {
                    edge: e,
                    parent: best.node.clone(),
                })),
                seq,
            });
            seq += 1;
        }
        while frontier.len() > cache_size {
            frontier.pop_first();
            evicted += 1;
        }
    }

    if evicted > 0 {
        debug!(evicted, cache_size, "n-best frontier overflowed");
    }
    results
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::alphabet::Alphabet;
    use crate::config::Config;
    use crate::context::tests::{all_paths, fixture};
    use crate::context::Flag;
    use crate::dataset::{Instance, Observation};
    use crate::lattice::LatticeBuilder;
    use crate::weights::{WeightPolicy, WeightStore};

    fn scored(orders: &[usize]) -> (Lattice, Context, usize) {
        let (lattice, store, weights, inst) = fixture(orders);
        let mut ctx = Context::new(Flag::VITERBI, &lattice, &store);
        ctx.compute_scores(&lattice, &store, &weights, &inst);
        (lattice, ctx, inst.len())
    }

    #[test]
    fn test_top_one_is_viterbi() {
        for orders in [&[1][..], &[2, 1][..]] {
            let (lattice, mut ctx, _) = scored(orders);
            let best = nbest(&ctx, &lattice, 1, 1000);
            let (path, score) = ctx.viterbi(&lattice).unwrap();
            assert_eq!(best.len(), 1);
            assert!((best[0].1 - score).abs() < 1e-12);
            assert!((ctx.path_score(&lattice, &path) - best[0].1).abs() < 1e-12);
        }
    }

    #[test]
    fn test_matches_sorted_enumeration() {
        let (lattice, ctx, len) = scored(&[1]);
        let mut expected: Vec<f64> = all_paths(&lattice, len)
            .iter()
            .map(|p| ctx.path_score(&lattice, p))
            .collect();
        expected.sort_by(|a, b| b.total_cmp(a));

        let found = nbest(&ctx, &lattice, 6, 1000);
        assert_eq!(found.len(), 6);
        for ((path, score), want) in found.iter().zip(&expected) {
            assert!((score - want).abs() < 1e-9);
            assert!((ctx.path_score(&lattice, path) - score).abs() < 1e-9);
        }
    }

    #[test]
    fn test_two_labels_length_three() {
        let labels = Alphabet::from_entries(["O", "GENE"]).unwrap();
        let lattice = LatticeBuilder::new(&labels, &Config::default())
            .build()
            .unwrap();
        let store = WeightStore::new(&lattice, &labels, WeightPolicy::Dense, &HashMap::new(), 1, 2);
        let weights: Vec<f64> = (0..store.num_parameters())
            .map(|i| (i as f64 * 0.7).sin())
            .collect();
        let mut inst = Instance::with_capacity(3);
        inst.push_item(vec![Observation::new(0, 1.0)]);
        inst.push_item(vec![Observation::new(1, 1.0)]);
        inst.push_item(vec![Observation::new(0, 1.0), Observation::new(1, 1.0)]);
        let mut ctx = Context::new(Flag::VITERBI, &lattice, &store);
        ctx.compute_scores(&lattice, &store, &weights, &inst);

        let found = nbest(&ctx, &lattice, 5, 100);
        assert_eq!(found.len(), 5);
        assert!(found.windows(2).all(|w| w[0].1 >= w[1].1));
        let distinct: HashSet<_> = found.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(distinct.len(), found.len());

        // asking for more than exist returns all 8
        assert_eq!(nbest(&ctx, &lattice, 20, 100).len(), 8);
    }

    #[test]
    fn test_small_cache_still_returns_best() {
        let (lattice, mut ctx, _) = scored(&[1]);
        let found = nbest(&ctx, &lattice, 3, 2);
        let (_, score) = ctx.viterbi(&lattice).unwrap();
        assert!(!found.is_empty());
        assert!((found[0].1 - score).abs() < 1e-12);
        assert!(found.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_empty_input() {
        let (lattice, store, weights, _) = fixture(&[1]);
        let mut ctx = Context::new(Flag::VITERBI, &lattice, &store);
        ctx.compute_scores(&lattice, &store, &weights, &Instance::with_capacity(0));
        assert!(nbest(&ctx, &lattice, 3, 10).is_empty());
    }
}
