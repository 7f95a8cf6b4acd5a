use std::collections::HashSet;
use std::fmt;

use tracing::{info, warn};

use super::evaluator::Evaluator;
use super::induction::{Candidate, ConjunctionInducer, FeatureInducer};
use super::lbfgs::{self, AbortHandle, Hooks, Outcome, StopReason};
use super::objective::{Objective, Sample};
use crate::alphabet::Alphabet;
use crate::attribute::Attribute;
use crate::config::Config;
use crate::dataset::{Instance, Observation};
use crate::error::{Error, InstanceError, Result, SkippedInstance};
use crate::lattice::{Lattice, LatticeBuilder};
use crate::model::{apply_conjunctions, Conjunction, Model};
use crate::weights::{support_counts, WeightStore};

/// Summary of a training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// L-BFGS iterations run, across all induction rounds
    pub iterations: usize,
    /// Penalized log-likelihood of the returned weights
    pub log_likelihood: f64,
    pub stop: StopReason,
    /// Instances left out of training, in index order
    pub skipped: Vec<SkippedInstance>,
    /// Conjunction features added by feature induction
    pub induced_features: usize,
}

/// A trained model with its training report.
#[derive(Debug, Clone)]
pub struct Trained {
    pub model: Model,
    pub report: TrainingReport,
}

/// CRF Trainer
pub struct Trainer {
    /// Training parameters
    config: Config,
    /// Training instances
    instances: Vec<Instance>,
    /// Feature alphabet
    features: Alphabet,
    /// Label alphabet
    labels: Alphabet,
    /// Lattice and weights to continue from
    warm_start: Option<(Lattice, WeightStore)>,
    /// Induced conjunctions, applied to every appended instance
    conjunctions: Vec<Conjunction>,
    evaluators: Vec<Box<dyn Evaluator>>,
    inducer: Option<Box<dyn FeatureInducer>>,
    abort: AbortHandle,
}

impl fmt::Debug for Trainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trainer")
            .field("config", &self.config)
            .field("instances", &self.instances.len())
            .field("features", &self.features.len())
            .field("labels", &self.labels.len())
            .field("warm_start", &self.warm_start.is_some())
            .field("conjunctions", &self.conjunctions.len())
            .field("evaluators", &self.evaluators.len())
            .finish()
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Trainer {
    /// Create a new trainer
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            instances: Vec::new(),
            features: Alphabet::new(),
            labels: Alphabet::new(),
            warm_start: None,
            conjunctions: Vec::new(),
            evaluators: Vec::new(),
            inducer: None,
            abort: AbortHandle::new(),
        }
    }

    /// Continue training from `model`: its alphabets, lattice, weights and
    /// induced conjunctions are the starting point.
    ///
    /// The lattice is reused as is, so label sequences it does not admit
    /// are skipped.
    pub fn resume(model: &Model) -> Self {
        let (mut labels, mut features, lattice, weights, conjunctions) = model.clone().into_parts();
        labels.unfreeze();
        features.unfreeze();
        let mut trainer = Self::new();
        trainer.labels = labels;
        trainer.features = features;
        trainer.conjunctions = conjunctions;
        trainer.warm_start = Some((lattice, weights));
        trainer
    }

    /// Get training parameters
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get training parameters for mutation
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Set a training parameter from its string form, e.g.
    /// `trainer.set("variance", "2.0")`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        self.config.set(name, value)
    }

    /// Replace all evaluators with `evaluator`.
    pub fn set_evaluator<E: Evaluator + 'static>(&mut self, evaluator: E) {
        self.evaluators.clear();
        self.evaluators.push(Box::new(evaluator));
    }

    pub fn add_evaluator<E: Evaluator + 'static>(&mut self, evaluator: E) {
        self.evaluators.push(Box::new(evaluator));
    }

    /// Use `inducer` instead of [`ConjunctionInducer`] for feature induction.
    pub fn set_inducer<I: FeatureInducer + 'static>(&mut self, inducer: I) {
        self.inducer = Some(Box::new(inducer));
    }

    /// A handle that stops [`train`](Self::train) at the next iteration.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn labels(&self) -> &Alphabet {
        &self.labels
    }

    pub fn features(&self) -> &Alphabet {
        &self.features
    }

    /// Append training data
    pub fn append<I, L>(&mut self, xseq: &[I], yseq: &[L]) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        self.append_with_weight(xseq, yseq, 1.0)
    }

    /// Append weighted training data
    pub fn append_with_weight<I, L>(&mut self, xseq: &[I], yseq: &[L], weight: f64) -> Result<()>
    where
        I: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return Err(Error::InvalidInput(format!(
                "xseq and yseq must have the same length, got {} and {}",
                xseq.len(),
                yseq.len()
            )));
        }
        if xseq.is_empty() {
            return Err(Error::InvalidInput(
                "empty sequences are not allowed".to_string(),
            ));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::InvalidInput(format!(
                "instance weight must be a non-negative number, got {}",
                weight
            )));
        }
        // The default label always comes first in a fresh alphabet
        if self.labels.is_empty() {
            self.labels.lookup_or_insert(self.config.default_label())?;
        }

        let mut instance = Instance::with_capacity(xseq.len());
        instance.weight = weight;
        for (item, label) in xseq.iter().zip(yseq) {
            let mut observations = Vec::with_capacity(item.as_ref().len());
            for attr in item.as_ref() {
                let fid = self.features.lookup_or_insert(&attr.name)?;
                observations.push(Observation::new(fid, attr.value));
            }
            apply_conjunctions(&mut observations, &self.conjunctions);
            let lid = self.labels.lookup_or_insert(label.as_ref())?;
            instance.push(observations, lid);
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Clear all training data. Alphabets keep their entries so ids stay
    /// stable.
    pub fn clear(&mut self) {
        self.instances.clear();
    }

    /// Train a model on the appended data.
    pub fn train(&mut self) -> Result<Trained> {
        self.config.validate()?;
        if self.instances.is_empty() {
            return Err(Error::NoData);
        }
        self.labels.lookup_or_insert(self.config.default_label())?;
        info!(
            instances = self.instances.len(),
            labels = self.labels.len(),
            features = self.features.len(),
            "start training"
        );

        let lattice = match &self.warm_start {
            Some((lattice, _)) => lattice.clone(),
            None => self.build_lattice()?,
        };
        let (samples, mut skipped) = self.gold_paths(&lattice);
        if samples.is_empty() {
            return Err(Error::NoUsableInstances { skipped });
        }

        let mut store = match &self.warm_start {
            Some((_, store)) => {
                let mut store = store.clone();
                store.grow_features(self.features.len());
                store
            }
            None => {
                let support = support_counts(&lattice, samples.iter().map(|s| s.gold.as_slice()));
                WeightStore::new(
                    &lattice,
                    &self.labels,
                    self.config.weight_policy(),
                    &support,
                    self.config.min_support(),
                    self.features.len(),
                )
            }
        };
        info!(
            states = lattice.num_states(),
            transitions = lattice.num_edges(),
            groups = store.num_groups(),
            parameters = store.num_parameters(),
            policy = %store.policy(),
            "weights ready"
        );

        let mut weights = store.as_slice().to_vec();
        let conjunctions_before = self.conjunctions.len();
        let outcome = if self.config.feature_induction() {
            self.optimize_with_induction(&lattice, &mut store, &mut weights, &samples)?
        } else {
            let max_iterations = self.config.max_iterations();
            self.optimize(&lattice, &store, &mut weights, &samples, max_iterations, 0)?
        };
        store.set_weights(&weights);
        self.abort.reset();

        for &index in &outcome.failed {
            if skipped.iter().all(|s| s.index != index) {
                warn!(index, "skipping instance with non-finite partition function");
                skipped.push(SkippedInstance {
                    index,
                    reason: InstanceError::NonFinite,
                });
            }
        }
        skipped.sort_by_key(|s| s.index);
        if samples.iter().all(|s| outcome.failed.contains(&s.index)) {
            return Err(Error::NoUsableInstances { skipped });
        }

        let model = Model::assemble(
            self.labels.clone(),
            self.features.clone(),
            lattice,
            store,
            self.conjunctions.clone(),
        )
        .with_decoding(&self.config);
        let report = TrainingReport {
            iterations: outcome.iterations,
            log_likelihood: -outcome.loss,
            stop: outcome.stop,
            skipped,
            induced_features: self.conjunctions.len() - conjunctions_before,
        };
        info!(
            iterations = report.iterations,
            log_likelihood = report.log_likelihood,
            stop = %report.stop,
            skipped = report.skipped.len(),
            "training finished"
        );
        Ok(Trained { model, report })
    }

    fn build_lattice(&self) -> Result<Lattice> {
        let mut builder = LatticeBuilder::new(&self.labels, &self.config);
        if !self.config.fully_connected() {
            let mut observed = HashSet::new();
            if let Some(default) = self.labels.get(self.config.default_label()) {
                for inst in &self.instances {
                    if let Some(&first) = inst.labels.first() {
                        observed.insert((default, first));
                    }
                    for pair in inst.labels.windows(2) {
                        observed.insert((pair[0], pair[1]));
                    }
                }
            }
            builder = builder.connections(observed);
        }
        builder.build()
    }

    /// Follow every instance through the lattice, setting aside those whose
    /// labels it does not admit.
    fn gold_paths(&self, lattice: &Lattice) -> (Vec<Sample>, Vec<SkippedInstance>) {
        let mut samples = Vec::with_capacity(self.instances.len());
        let mut skipped = Vec::new();
        for (index, inst) in self.instances.iter().enumerate() {
            match lattice.gold_path(&inst.labels, &self.labels) {
                Ok(gold) => samples.push(Sample { index, gold }),
                Err(reason) => {
                    warn!(index, %reason, "skipping training instance");
                    skipped.push(SkippedInstance { index, reason });
                }
            }
        }
        (samples, skipped)
    }

    /// Run L-BFGS for at most `max_iterations` iterations.
    fn optimize(
        &mut self,
        lattice: &Lattice,
        store: &WeightStore,
        weights: &mut [f64],
        samples: &[Sample],
        max_iterations: usize,
        iteration_offset: usize,
    ) -> Result<Outcome> {
        let mut objective = Objective::new(
            lattice,
            store,
            &self.instances,
            samples,
            self.config.variance(),
            self.config.threads(),
        )?;
        if objective.num_workers() > 1 {
            info!(workers = objective.num_workers(), "training in parallel");
        }

        let (labels, features, conjunctions) = (&self.labels, &self.features, &self.conjunctions);
        let snapshot = |w: &[f64]| {
            let mut store = store.clone();
            store.set_weights(w);
            Model::assemble(
                labels.clone(),
                features.clone(),
                lattice.clone(),
                store,
                conjunctions.clone(),
            )
        };
        let mut hooks = Hooks {
            evaluators: &mut self.evaluators,
            eval_period: self.config.eval_period(),
            abort: &self.abort,
            snapshot: &snapshot,
            iteration_offset,
        };
        lbfgs::optimize(
            &mut objective,
            weights,
            &self.config,
            max_iterations,
            &mut hooks,
        )
    }

    /// Alternate optimization with feature induction rounds, then spend the
    /// remaining iterations on the final feature set.
    fn optimize_with_induction(
        &mut self,
        lattice: &Lattice,
        store: &mut WeightStore,
        weights: &mut Vec<f64>,
        samples: &[Sample],
    ) -> Result<Outcome> {
        let max_iterations = self.config.max_iterations();
        let between = self.config.iterations_between_inductions();
        let mut total = Outcome {
            iterations: 0,
            loss: f64::INFINITY,
            stop: StopReason::Converged,
            failed: Default::default(),
        };

        for round in 0..self.config.induction_rounds() {
            if total.iterations >= max_iterations {
                break;
            }
            let budget = between.min(max_iterations - total.iterations);
            let outcome = self.optimize(lattice, store, weights, samples, budget, total.iterations)?;
            total.iterations += outcome.iterations;
            total.loss = outcome.loss;
            total.stop = outcome.stop;
            total.failed.extend(outcome.failed);
            if outcome.stop == StopReason::Aborted {
                return Ok(total);
            }

            store.set_weights(weights);
            let model = Model::assemble(
                self.labels.clone(),
                self.features.clone(),
                lattice.clone(),
                store.clone(),
                self.conjunctions.clone(),
            );
            let seed = self.config.seed();
            let inducer = self
                .inducer
                .get_or_insert_with(|| Box::new(ConjunctionInducer::new(0.5, seed)));
            let candidates = inducer.propose_features(&model, &self.instances);
            let added = self.add_conjunctions(candidates)?;
            info!(
                round,
                added,
                features = self.features.len(),
                "feature induction round"
            );
            if added > 0 {
                store.grow_features(self.features.len());
                *weights = store.as_slice().to_vec();
            }
        }

        if total.iterations < max_iterations {
            let outcome = self.optimize(
                lattice,
                store,
                weights,
                samples,
                max_iterations - total.iterations,
                total.iterations,
            )?;
            total.iterations += outcome.iterations;
            total.loss = outcome.loss;
            total.stop = outcome.stop;
            total.failed.extend(outcome.failed);
        }
        Ok(total)
    }

    /// Add up to `features_per_induction` new conjunctions and rewrite the
    /// training instances with them. Returns how many were added.
    fn add_conjunctions(&mut self, candidates: Vec<Candidate>) -> Result<usize> {
        let limit = self.config.features_per_induction();
        let before = self.conjunctions.len();
        for c in candidates {
            if self.conjunctions.len() - before >= limit {
                break;
            }
            let name = match (self.features.name(c.first), self.features.name(c.second)) {
                (Some(a), Some(b)) => format!("{}&{}", a, b),
                _ => continue,
            };
            if self.features.get(&name).is_some() {
                continue;
            }
            let id = self.features.lookup_or_insert(&name)?;
            self.conjunctions.push(Conjunction {
                first: c.first,
                second: c.second,
                id,
            });
        }

        let added = &self.conjunctions[before..];
        if !added.is_empty() {
            for inst in &mut self.instances {
                for item in &mut inst.items {
                    apply_conjunctions(item, added);
                }
            }
        }
        Ok(added.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::token;

    fn gene_trainer() -> Trainer {
        let mut trainer = Trainer::new();
        let xseq = vec![token(["w1"]), token(["w2"]), token(["w3"])];
        for _ in 0..20 {
            trainer.append(&xseq, &["O", "GENE", "GENE"]).unwrap();
        }
        trainer
    }

    #[test]
    fn test_append_validation() {
        let mut trainer = Trainer::new();
        let xseq = vec![token(["a"]), token(["b"])];
        assert!(trainer.append(&xseq, &["O"]).is_err());
        let empty: Vec<Vec<Attribute>> = Vec::new();
        let no_labels: Vec<&str> = Vec::new();
        assert!(trainer.append(&empty, &no_labels).is_err());
        assert!(trainer.append_with_weight(&xseq, &["O", "A"], -1.0).is_err());
        assert!(trainer.append_with_weight(&xseq, &["A", "O"], 2.0).is_ok());
        assert_eq!(trainer.num_instances(), 1);
        // default label first
        assert_eq!(trainer.labels().get("O"), Some(0));
        assert_eq!(trainer.labels().get("A"), Some(1));
        assert_eq!(trainer.features().len(), 2);
    }

    #[test]
    fn test_train_without_data() {
        let mut trainer = Trainer::new();
        assert!(matches!(trainer.train(), Err(Error::NoData)));
    }

    #[test]
    fn test_train_gene() {
        let mut trainer = gene_trainer();
        trainer.set("iterations", "100").unwrap();
        let trained = trainer.train().unwrap();
        assert!(trained.report.skipped.is_empty());
        assert!(trained.report.iterations > 0);
        assert!(trained.report.log_likelihood.is_finite());

        let tagger = trained.model.tagger();
        let xseq = vec![token(["w1"]), token(["w2"]), token(["w3"])];
        assert_eq!(tagger.tag(&xseq).unwrap(), vec!["O", "GENE", "GENE"]);
    }

    #[test]
    fn test_validation_happens_first() {
        let mut trainer = gene_trainer();
        trainer.set("feature_induction", "true").unwrap();
        trainer.set("threads", "2").unwrap();
        assert!(matches!(
            trainer.train(),
            Err(Error::InductionWithThreads { threads: 2 })
        ));
    }

    #[test]
    fn test_inadmissible_instances_are_skipped() {
        let mut trainer = gene_trainer();
        trainer.set("forbidden", "O,X").unwrap();
        let xseq = vec![token(["w1"]), token(["w4"])];
        trainer.append(&xseq, &["O", "X"]).unwrap();
        let trained = trainer.train().unwrap();
        assert_eq!(trained.report.skipped.len(), 1);
        assert_eq!(trained.report.skipped[0].index, 20);
        assert!(matches!(
            trained.report.skipped[0].reason,
            InstanceError::Inadmissible { position: 1, .. }
        ));
    }

    #[test]
    fn test_all_instances_skipped() {
        let mut trainer = Trainer::new();
        trainer.set("forbidden", "O,X").unwrap();
        let xseq = vec![token(["a"])];
        trainer.append(&xseq, &["X"]).unwrap();
        match trainer.train() {
            Err(Error::NoUsableInstances { skipped }) => assert_eq!(skipped.len(), 1),
            other => panic!("unexpected result: {:?}", other.map(|t| t.report)),
        }
    }

    #[test]
    fn test_observed_connections_only() {
        let mut trainer = gene_trainer();
        trainer.set("fully_connected", "false").unwrap();
        let trained = trainer.train().unwrap();
        let lattice = trained.model.lattice();
        let gene = trained.model.to_label_id("GENE").unwrap();
        let o = trained.model.to_label_id("O").unwrap();
        let gene_state = lattice.state_by_name("GENE").unwrap();
        // GENE -> O never occurs in the data
        assert!(lattice.successor(gene_state, o).is_none());
        assert!(lattice.successor(gene_state, gene).is_some());
    }

    #[test]
    fn test_abort_before_training() {
        let mut trainer = gene_trainer();
        let handle = trainer.abort_handle();
        handle.abort();
        let trained = trainer.train().unwrap();
        assert_eq!(trained.report.stop, StopReason::Aborted);
        assert_eq!(trained.report.iterations, 0);
        assert!(trained.model.weights().as_slice().iter().all(|&w| w == 0.0));
        // the flag is lowered once training returns
        assert!(!handle.is_aborted());
        let trained = trainer.train().unwrap();
        assert_ne!(trained.report.stop, StopReason::Aborted);
    }

    #[test]
    fn test_feature_induction_adds_conjunctions() {
        let mut trainer = Trainer::new();
        trainer.set("feature_induction", "true").unwrap();
        trainer.set("induction_rounds", "2").unwrap();
        trainer.set("iterations_between_inductions", "1").unwrap();
        trainer.set("iterations", "20").unwrap();
        // "a" and "b" alone are ambiguous, together they mark GENE
        for _ in 0..5 {
            trainer
                .append(&[token(["a", "b"]), token(["a"])], &["GENE", "O"])
                .unwrap();
            trainer
                .append(&[token(["b"]), token(["a", "b"])], &["O", "GENE"])
                .unwrap();
        }
        let trained = trainer.train().unwrap();
        assert!(trained.report.iterations <= 20);
        let model = &trained.model;
        assert_eq!(model.conjunctions().len(), trained.report.induced_features);
        for c in model.conjunctions() {
            let name = model.to_feature(c.id).unwrap();
            assert!(name.contains('&'));
        }
    }
}
