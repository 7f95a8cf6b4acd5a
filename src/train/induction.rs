//! Feature induction: growing the feature set between optimization rounds.

use std::collections::HashMap;

use crate::context::{Context, Flag};
use crate::dataset::{self, Instance};
use crate::model::Model;

/// A proposed conjunction of two existing features.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub first: u32,
    pub second: u32,
    /// Estimated benefit of adding the conjunction; larger is better
    pub gain: f64,
}

/// Proposes new features from the current model and the training data.
///
/// Candidates are returned best first; the trainer keeps at most
/// `features_per_induction` of them and skips ones it already has.
pub trait FeatureInducer {
    fn propose_features(&mut self, model: &Model, data: &[Instance]) -> Vec<Candidate>;
}

/// Conjunctions of feature pairs that co-fire where the current model
/// mislabels a token, each occurrence weighted by `1 - p(gold label)`.
#[derive(Debug, Clone)]
pub struct ConjunctionInducer {
    sample_fraction: f64,
    seed: u64,
    /// Only the first this many features of a token are paired
    max_features_per_token: usize,
    round: u64,
}

impl Default for ConjunctionInducer {
    fn default() -> Self {
        Self::new(0.5, 0)
    }
}

impl ConjunctionInducer {
    /// Score candidates on a random `sample_fraction` of the labeled data.
    pub fn new(sample_fraction: f64, seed: u64) -> Self {
        Self {
            sample_fraction: sample_fraction.clamp(0.0, 1.0),
            seed,
            max_features_per_token: 64,
            round: 0,
        }
    }

    pub fn with_max_features_per_token(mut self, n: usize) -> Self {
        self.max_features_per_token = n.max(2);
        self
    }
}

impl FeatureInducer for ConjunctionInducer {
    fn propose_features(&mut self, model: &Model, data: &[Instance]) -> Vec<Candidate> {
        let lattice = model.lattice();
        let store = model.weights();
        let (probe, _) = dataset::split(
            data.len(),
            self.sample_fraction,
            self.seed.wrapping_add(self.round),
        );
        self.round += 1;

        let mut gains: HashMap<(u32, u32), f64> = HashMap::new();
        let mut ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, lattice, store);
        for index in probe {
            let inst = &data[index];
            if !inst.is_labeled() {
                continue;
            }
            ctx.compute_scores(lattice, store, store.as_slice(), inst);
            if !ctx.forward(lattice).is_finite() {
                continue;
            }
            ctx.backward(lattice);
            let predicted = match ctx.viterbi(lattice) {
                Some((path, _)) => path,
                None => continue,
            };

            for (t, item) in inst.items.iter().enumerate() {
                let gold = inst.labels[t];
                if lattice.edge(predicted[t]).label == gold {
                    continue;
                }
                // Every state remembers the label that entered it last
                let p_gold: f64 = lattice
                    .states()
                    .iter()
                    .enumerate()
                    .filter(|(_, state)| state.history.last() == Some(&gold))
                    .map(|(s, _)| ctx.state_marginal(t + 1, s as u32))
                    .sum();
                let residual = (1.0 - p_gold).max(0.0);

                let mut ids: Vec<u32> = item.iter().map(|o| o.id).collect();
                ids.sort_unstable();
                ids.dedup();
                ids.truncate(self.max_features_per_token);
                for (i, &a) in ids.iter().enumerate() {
                    for &b in &ids[i + 1..] {
                        *gains.entry((a, b)).or_insert(0.0) += residual;
                    }
                }
            }
        }

        let mut candidates: Vec<Candidate> = gains
            .into_iter()
            .filter(|&(_, gain)| gain > 0.0)
            .map(|((first, second), gain)| Candidate {
                first,
                second,
                gain,
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.gain
                .total_cmp(&a.gain)
                .then_with(|| (a.first, a.second).cmp(&(b.first, b.second)))
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::alphabet::Alphabet;
    use crate::config::Config;
    use crate::dataset::Observation;
    use crate::lattice::LatticeBuilder;
    use crate::weights::{WeightPolicy, WeightStore};

    #[test]
    fn test_proposes_pairs_at_errors() {
        let labels = Alphabet::from_entries(["O", "GENE"]).unwrap();
        let features = Alphabet::from_entries(["a", "b", "c"]).unwrap();
        let lattice = LatticeBuilder::new(&labels, &Config::default())
            .build()
            .unwrap();
        let store = WeightStore::new(
            &lattice,
            &labels,
            WeightPolicy::Sparse,
            &HashMap::new(),
            1,
            3,
        );
        // All weights zero: Viterbi ties resolve to a single label, so one
        // of the two gold labels below is always wrong.
        let model = Model::from_parts(labels, features, lattice, store, Vec::new()).unwrap();

        let mut inst = Instance::with_capacity(2);
        inst.push(
            vec![Observation::new(0, 1.0), Observation::new(1, 1.0)],
            0,
        );
        inst.push(
            vec![Observation::new(0, 1.0), Observation::new(1, 1.0), Observation::new(2, 1.0)],
            1,
        );
        let data = vec![inst.clone(), inst.clone(), inst];

        let mut inducer = ConjunctionInducer::new(1.0, 7);
        let candidates = inducer.propose_features(&model, &data);
        assert!(!candidates.is_empty());
        assert!(candidates.windows(2).all(|w| w[0].gain >= w[1].gain));
        for c in &candidates {
            assert!(c.first < c.second);
            assert!(c.gain > 0.0);
        }
    }

    #[test]
    fn test_no_candidates_without_errors() {
        let labels = Alphabet::from_entries(["O"]).unwrap();
        let features = Alphabet::from_entries(["a", "b"]).unwrap();
        let lattice = LatticeBuilder::new(&labels, &Config::default())
            .build()
            .unwrap();
        let store = WeightStore::new(
            &lattice,
            &labels,
            WeightPolicy::Dense,
            &HashMap::new(),
            1,
            2,
        );
        let model = Model::from_parts(labels, features, lattice, store, Vec::new()).unwrap();
        let mut inst = Instance::with_capacity(1);
        inst.push(vec![Observation::new(0, 1.0), Observation::new(1, 1.0)], 0);
        let candidates = ConjunctionInducer::default().propose_features(&model, &[inst]);
        assert!(candidates.is_empty());
    }
}
