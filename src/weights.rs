use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::alphabet::Alphabet;
use crate::dataset::Item;
use crate::error::{Error, Result};
use crate::lattice::Lattice;

/// How transitions are mapped onto weight groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightPolicy {
    /// Every n-gram weight name gets its own group.
    Dense,
    /// Transitions emitting the same label share one group.
    Sparse,
    /// Own groups for n-grams with enough gold-path support, the rest tied
    /// to the emitted label's group.
    #[default]
    SomeDense,
}

impl FromStr for WeightPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dense" => Ok(Self::Dense),
            "sparse" => Ok(Self::Sparse),
            "some-dense" => Ok(Self::SomeDense),
            _ => Err(Error::Config(format!("unknown weight policy `{}`", s))),
        }
    }
}

impl fmt::Display for WeightPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
            Self::SomeDense => "some-dense",
        })
    }
}

/// Count how often each weight name is used along gold paths.
pub fn support_counts<'a, I>(lattice: &Lattice, gold_paths: I) -> HashMap<String, usize>
where
    I: IntoIterator<Item = &'a [u32]>,
{
    let mut counts = HashMap::new();
    for path in gold_paths {
        for &eid in path {
            for name in &lattice.edge(eid).weight_names {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// Weight vectors over the feature alphabet, one per weight group.
///
/// Parameters are stored flat: group `g` occupies
/// `[g * stride, (g + 1) * stride)` with its bias first and then one weight
/// per feature id, `stride` being `1 + num_features`. Each transition
/// scores as the sum of its groups' biases and feature dot products.
#[derive(Debug, Clone)]
pub struct WeightStore {
    policy: WeightPolicy,
    num_features: usize,
    group_names: Vec<String>,
    edge_groups: Vec<Vec<u32>>,
    weights: Vec<f64>,
}

impl WeightStore {
    /// Assign weight groups to every transition of `lattice`, all weights zero.
    ///
    /// `support` holds the gold-path counts of weight names, used by
    /// [`WeightPolicy::SomeDense`].
    pub fn new(
        lattice: &Lattice,
        labels: &Alphabet,
        policy: WeightPolicy,
        support: &HashMap<String, usize>,
        min_support: usize,
        num_features: usize,
    ) -> Self {
        let mut index: HashMap<String, u32> = HashMap::new();
        let mut group_names = Vec::new();
        let mut edge_groups = Vec::with_capacity(lattice.num_edges());

        for edge in lattice.edges() {
            let label = labels.name(edge.label).unwrap_or_default();
            let keys: Vec<&str> = match policy {
                WeightPolicy::Dense => edge.weight_names.iter().map(String::as_str).collect(),
                WeightPolicy::Sparse => vec![label],
                WeightPolicy::SomeDense => edge
                    .weight_names
                    .iter()
                    .map(|name| {
                        if support.get(name).copied().unwrap_or(0) >= min_support {
                            name.as_str()
                        } else {
                            label
                        }
                    })
                    .collect(),
            };
            let mut groups: Vec<u32> = Vec::with_capacity(keys.len());
            for key in keys {
                let gid = *index.entry(key.to_string()).or_insert_with(|| {
                    group_names.push(key.to_string());
                    (group_names.len() - 1) as u32
                });
                if !groups.contains(&gid) {
                    groups.push(gid);
                }
            }
            edge_groups.push(groups);
        }

        let weights = vec![0.0; group_names.len() * (1 + num_features)];
        Self {
            policy,
            num_features,
            group_names,
            edge_groups,
            weights,
        }
    }

    /// Reassemble a store from persisted parts.
    pub fn from_parts(
        policy: WeightPolicy,
        num_features: usize,
        group_names: Vec<String>,
        edge_groups: Vec<Vec<u32>>,
        weights: Vec<f64>,
    ) -> Result<Self> {
        if weights.len() != group_names.len() * (1 + num_features) {
            return Err(Error::InvalidInput(format!(
                "expected {} weights, got {}",
                group_names.len() * (1 + num_features),
                weights.len()
            )));
        }
        if edge_groups
            .iter()
            .flatten()
            .any(|&g| g as usize >= group_names.len())
        {
            return Err(Error::InvalidInput(
                "transition refers to an unknown weight group".to_string(),
            ));
        }
        Ok(Self {
            policy,
            num_features,
            group_names,
            edge_groups,
            weights,
        })
    }

    pub fn policy(&self) -> WeightPolicy {
        self.policy
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_groups(&self) -> usize {
        self.group_names.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.weights.len()
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    pub fn group_name(&self, group: u32) -> &str {
        &self.group_names[group as usize]
    }

    /// Weight groups scoring transition `edge`.
    pub fn edge_groups(&self, edge: u32) -> &[u32] {
        &self.edge_groups[edge as usize]
    }

    pub fn all_edge_groups(&self) -> &[Vec<u32>] {
        &self.edge_groups
    }

    #[inline]
    fn stride(&self) -> usize {
        1 + self.num_features
    }

    /// Flat index of the bias of `group`.
    #[inline]
    pub fn bias_index(&self, group: u32) -> usize {
        group as usize * self.stride()
    }

    /// Flat index of the weight of feature `feature` in `group`.
    #[inline]
    pub fn feature_index(&self, group: u32, feature: u32) -> usize {
        group as usize * self.stride() + 1 + feature as usize
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Replace all parameters.
    ///
    /// # Panics
    ///
    /// Panics if `weights.len()` does not equal `self.num_parameters()`.
    pub fn set_weights(&mut self, weights: &[f64]) {
        assert_eq!(
            weights.len(),
            self.weights.len(),
            "weights length ({}) must equal number of parameters ({})",
            weights.len(),
            self.weights.len()
        );
        self.weights.copy_from_slice(weights);
    }

    /// Widen every group to `num_features` features, keeping existing
    /// weights and zeroing the new ones.
    pub fn grow_features(&mut self, num_features: usize) {
        if num_features <= self.num_features {
            return;
        }
        let old_stride = self.stride();
        let new_stride = 1 + num_features;
        let mut weights = vec![0.0; self.group_names.len() * new_stride];
        for g in 0..self.group_names.len() {
            weights[g * new_stride..g * new_stride + old_stride]
                .copy_from_slice(&self.weights[g * old_stride..(g + 1) * old_stride]);
        }
        self.weights = weights;
        self.num_features = num_features;
    }

    /// Score every group on one item using the parameter vector `weights`
    /// laid out like this store. Features outside the alphabet are ignored.
    pub fn group_scores(&self, weights: &[f64], item: &Item, out: &mut [f64]) {
        let stride = self.stride();
        for (g, score) in out.iter_mut().enumerate().take(self.group_names.len()) {
            let base = g * stride;
            let mut s = weights[base];
            for obs in item {
                let f = obs.id as usize;
                if f < self.num_features {
                    s += weights[base + 1 + f] * obs.value;
                }
            }
            *score = s;
        }
    }

    /// Add `scale` times the feature counts of one item to `counts` for `group`.
    pub fn accumulate(&self, counts: &mut [f64], group: u32, item: &Item, scale: f64) {
        let base = self.bias_index(group);
        counts[base] += scale;
        for obs in item {
            let f = obs.id as usize;
            if f < self.num_features {
                counts[base + 1 + f] += scale * obs.value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dataset::Observation;
    use crate::lattice::LatticeBuilder;

    fn setup() -> (Alphabet, Lattice) {
        let labels = Alphabet::from_entries(["O", "A"]).unwrap();
        let config = Config::default();
        let lattice = LatticeBuilder::new(&labels, &config).build().unwrap();
        (labels, lattice)
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("dense".parse::<WeightPolicy>().unwrap(), WeightPolicy::Dense);
        assert_eq!(
            "some-dense".parse::<WeightPolicy>().unwrap(),
            WeightPolicy::SomeDense
        );
        assert!("medium".parse::<WeightPolicy>().is_err());
        assert_eq!(WeightPolicy::Sparse.to_string(), "sparse");
    }

    #[test]
    fn test_dense_and_sparse_grouping() {
        let (labels, lattice) = setup();
        let support = HashMap::new();

        let dense = WeightStore::new(&lattice, &labels, WeightPolicy::Dense, &support, 1, 3);
        assert_eq!(dense.num_groups(), 4);
        assert_eq!(dense.num_parameters(), 4 * 4);

        let sparse = WeightStore::new(&lattice, &labels, WeightPolicy::Sparse, &support, 1, 3);
        assert_eq!(sparse.num_groups(), 2);
        let into_a: Vec<u32> = lattice
            .edges()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.label == 1)
            .map(|(i, _)| sparse.edge_groups(i as u32)[0])
            .collect();
        assert_eq!(into_a.len(), 2);
        assert_eq!(into_a[0], into_a[1]);
    }

    #[test]
    fn test_some_dense_ties_unsupported() {
        let (labels, lattice) = setup();
        let support = HashMap::from([("O,A".to_string(), 5), ("A,A".to_string(), 0)]);
        let store = WeightStore::new(&lattice, &labels, WeightPolicy::SomeDense, &support, 1, 2);

        let o_a = lattice.successor(lattice.start(), 1).unwrap();
        let a = lattice.state_by_name("A").unwrap();
        let a_a = lattice.successor(a, 1).unwrap();
        assert_eq!(store.group_name(store.edge_groups(o_a)[0]), "O,A");
        assert_eq!(store.group_name(store.edge_groups(a_a)[0]), "A");
    }

    #[test]
    fn test_grow_and_score() {
        let (labels, lattice) = setup();
        let mut store =
            WeightStore::new(&lattice, &labels, WeightPolicy::Sparse, &HashMap::new(), 1, 1);
        let mut w = vec![0.0; store.num_parameters()];
        w[store.bias_index(0)] = 0.5;
        w[store.feature_index(0, 0)] = 2.0;
        store.set_weights(&w);

        store.grow_features(3);
        assert_eq!(store.num_parameters(), 2 * 4);
        assert_eq!(store.as_slice()[store.bias_index(0)], 0.5);
        assert_eq!(store.as_slice()[store.feature_index(0, 0)], 2.0);
        assert_eq!(store.as_slice()[store.feature_index(0, 2)], 0.0);

        let item = vec![Observation::new(0, 1.5), Observation::new(9, 1.0)];
        let mut out = vec![0.0; store.num_groups()];
        store.group_scores(store.as_slice(), &item, &mut out);
        assert_eq!(out[0], 0.5 + 3.0);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_from_parts_checks_length() {
        assert!(WeightStore::from_parts(
            WeightPolicy::Dense,
            2,
            vec!["a".into()],
            vec![vec![0]],
            vec![0.0; 2]
        )
        .is_err());
        assert!(WeightStore::from_parts(
            WeightPolicy::Dense,
            2,
            vec!["a".into()],
            vec![vec![0]],
            vec![0.0; 3]
        )
        .is_ok());
    }
}
