use std::io::{self, Write};

use crate::alphabet::Alphabet;
use crate::attribute::Attribute;
use crate::config::Config;
use crate::dataset::{Instance, Item, Observation};
use crate::error::{Error, Result};
use crate::lattice::Lattice;
use crate::tagger::Tagger;
use crate::weights::WeightStore;

/// A feature that fires where both of its parts fire, with the product of
/// their values. Produced by feature induction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conjunction {
    pub first: u32,
    pub second: u32,
    /// Id of the conjunction in the feature alphabet
    pub id: u32,
}

/// Add every conjunction whose parts are present in `item`.
///
/// Conjunctions are applied in order, so later ones may build on earlier ones.
pub(crate) fn apply_conjunctions(item: &mut Item, conjunctions: &[Conjunction]) {
    for c in conjunctions {
        if item.iter().any(|o| o.id == c.id) {
            continue;
        }
        let first = item.iter().find(|o| o.id == c.first).map(|o| o.value);
        let second = item.iter().find(|o| o.id == c.second).map(|o| o.value);
        if let (Some(a), Some(b)) = (first, second) {
            item.push(Observation::new(c.id, a * b));
        }
    }
}

/// The trained CRF model
///
/// Immutable once built. Every part is exposed so that an external
/// persistence layer can store it and rebuild it with [`Model::from_parts`].
#[derive(Debug, Clone)]
pub struct Model {
    labels: Alphabet,
    features: Alphabet,
    lattice: Lattice,
    weights: WeightStore,
    conjunctions: Vec<Conjunction>,
    /// Answers per input when decoding
    n_best: usize,
    /// Frontier bound for n-best decoding
    cache_size: usize,
}

impl Model {
    /// Assemble a model, checking that its parts agree with each other.
    pub fn from_parts(
        labels: Alphabet,
        features: Alphabet,
        lattice: Lattice,
        weights: WeightStore,
        conjunctions: Vec<Conjunction>,
    ) -> Result<Self> {
        if lattice.num_labels() > labels.len() {
            return Err(Error::InvalidInput(format!(
                "lattice uses {} labels but the alphabet has {}",
                lattice.num_labels(),
                labels.len()
            )));
        }
        if weights.all_edge_groups().len() != lattice.num_edges() {
            return Err(Error::InvalidInput(format!(
                "weight store covers {} transitions but the lattice has {}",
                weights.all_edge_groups().len(),
                lattice.num_edges()
            )));
        }
        if weights.num_features() != features.len() {
            return Err(Error::InvalidInput(format!(
                "weight store covers {} features but the alphabet has {}",
                weights.num_features(),
                features.len()
            )));
        }
        let num_features = features.len() as u32;
        if conjunctions
            .iter()
            .any(|c| c.first >= num_features || c.second >= num_features || c.id >= num_features)
        {
            return Err(Error::InvalidInput(
                "conjunction refers to an unknown feature".to_string(),
            ));
        }
        Ok(Self::assemble(labels, features, lattice, weights, conjunctions))
    }

    /// Assemble a model from parts known to agree.
    pub(crate) fn assemble(
        mut labels: Alphabet,
        mut features: Alphabet,
        lattice: Lattice,
        weights: WeightStore,
        conjunctions: Vec<Conjunction>,
    ) -> Self {
        labels.freeze();
        features.freeze();
        let defaults = Config::default();
        Self {
            labels,
            features,
            lattice,
            weights,
            conjunctions,
            n_best: defaults.n_best(),
            cache_size: defaults.cache_size(),
        }
    }

    /// Take the decoding options (`n_best`, `cache_size`) from `config`.
    pub fn with_decoding(mut self, config: &Config) -> Self {
        self.n_best = config.n_best();
        self.cache_size = config.cache_size();
        self
    }

    /// Split the model back into its parts.
    pub fn into_parts(self) -> (Alphabet, Alphabet, Lattice, WeightStore, Vec<Conjunction>) {
        (
            self.labels,
            self.features,
            self.lattice,
            self.weights,
            self.conjunctions,
        )
    }

    pub fn labels(&self) -> &Alphabet {
        &self.labels
    }

    pub fn features(&self) -> &Alphabet {
        &self.features
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn weights(&self) -> &WeightStore {
        &self.weights
    }

    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.conjunctions
    }

    /// Number of labels
    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    /// Number of features
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Convert a label ID to label string
    pub fn to_label(&self, lid: u32) -> Option<&str> {
        self.labels.name(lid)
    }

    /// Convert a label string to label ID
    pub fn to_label_id(&self, value: &str) -> Option<u32> {
        self.labels.get(value)
    }

    /// Convert a feature ID to feature string
    pub fn to_feature(&self, fid: u32) -> Option<&str> {
        self.features.name(fid)
    }

    /// Convert a feature string to feature ID
    pub fn to_feature_id(&self, value: &str) -> Option<u32> {
        self.features.get(value)
    }

    /// Default number of answers per input
    pub fn n_best(&self) -> usize {
        self.n_best
    }

    /// Default frontier bound for n-best decoding
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Get a new tagger
    pub fn tagger(&self) -> Tagger<'_> {
        Tagger::new(self)
    }

    /// Get a new tagger using the decoding options of `config`
    pub fn tagger_with(&self, config: &Config) -> Tagger<'_> {
        Tagger::new(self).with_config(config)
    }

    /// Map an attribute sequence onto feature ids. Unknown attributes are
    /// dropped and induced conjunctions are added.
    pub(crate) fn encode<T: AsRef<[Attribute]>>(&self, xseq: &[T]) -> Instance {
        let mut instance = Instance::with_capacity(xseq.len());
        for attrs in xseq {
            let mut item: Item = attrs
                .as_ref()
                .iter()
                .filter_map(|a| {
                    self.features
                        .get(&a.name)
                        .map(|id| Observation::new(id, a.value))
                })
                .collect();
            apply_conjunctions(&mut item, &self.conjunctions);
            instance.push_item(item);
        }
        instance
    }

    /// Print the model in human-readable format
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "LABELS = {{")?;
        for (label, id) in self.labels.iter() {
            writeln!(w, "  {:>5}: {}", id, label)?;
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "STATES = {{")?;
        for (sid, state) in self.lattice.states().iter().enumerate() {
            let start = if sid as u32 == self.lattice.start() {
                " (start)"
            } else {
                ""
            };
            writeln!(w, "  {:>5}: {}{}", sid, state.name, start)?;
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "TRANSITIONS = {{")?;
        for (eid, edge) in self.lattice.edges().iter().enumerate() {
            let groups: Vec<&str> = self
                .weights
                .edge_groups(eid as u32)
                .iter()
                .map(|&g| self.weights.group_name(g))
                .collect();
            writeln!(
                w,
                "  {} --> {} [{}]",
                self.lattice.state(edge.src).name,
                self.lattice.state(edge.dst).name,
                groups.join(" ")
            )?;
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "WEIGHTS = {{")?;
        let params = self.weights.as_slice();
        for g in 0..self.weights.num_groups() as u32 {
            let name = self.weights.group_name(g);
            writeln!(w, "  {} <bias>: {:.6}", name, params[self.weights.bias_index(g)])?;
            for (feature, fid) in self.features.iter() {
                let weight = params[self.weights.feature_index(g, fid)];
                if weight != 0.0 {
                    writeln!(w, "  {} {}: {:.6}", name, feature, weight)?;
                }
            }
        }
        writeln!(w, "}}\n")?;
        Ok(())
    }
}
