use tracing::warn;

use crate::attribute::Attribute;
use crate::config::Config;
use crate::context::{Context, Flag};
use crate::dataset::Instance;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::nbest;

/// A label sequence with its unnormalized path score.
#[derive(Debug, Clone, PartialEq)]
pub struct Labeling<'a> {
    pub labels: Vec<&'a str>,
    pub score: f64,
}

/// The tagger provides the functionality for predicting label sequences for input sequences using a model
#[derive(Debug, Clone)]
pub struct Tagger<'a> {
    /// CRF model
    model: &'a Model,
    /// Frontier bound for n-best decoding
    cache_size: usize,
    /// Answers per input for [`decode`](Self::decode)
    n_best: usize,
}

impl<'a> Tagger<'a> {
    pub(crate) fn new(model: &'a Model) -> Self {
        Self {
            model,
            cache_size: model.cache_size(),
            n_best: model.n_best(),
        }
    }

    /// Use the `n_best` and `cache_size` options of `config`.
    pub fn with_config(self, config: &Config) -> Self {
        self.with_n_best(config.n_best())
            .with_cache_size(config.cache_size())
    }

    pub fn with_n_best(mut self, n_best: usize) -> Self {
        self.n_best = n_best.max(1);
        self
    }

    pub fn n_best(&self) -> usize {
        self.n_best
    }

    /// Bound the number of partial paths n-best decoding keeps at once.
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size.max(1);
        self
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    fn score<T: AsRef<[Attribute]>>(&self, xseq: &[T], flag: Flag) -> (Context, Instance) {
        let model = self.model;
        let instance = model.encode(xseq);
        let mut ctx = Context::new(flag, model.lattice(), model.weights());
        ctx.compute_scores(
            model.lattice(),
            model.weights(),
            model.weights().as_slice(),
            &instance,
        );
        (ctx, instance)
    }

    fn labels_of(&self, path: &[u32]) -> Result<Vec<&'a str>> {
        let model: &'a Model = self.model;
        path.iter()
            .map(|&e| {
                let lid = model.lattice().edge(e).label;
                model
                    .to_label(lid)
                    .ok_or_else(|| Error::InvalidInput(format!("unknown label id {}", lid)))
            })
            .collect()
    }

    /// Predict the label sequence for the item sequence.
    pub fn tag<T: AsRef<[Attribute]>>(&self, xseq: &[T]) -> Result<Vec<&'a str>> {
        Ok(self.viterbi(xseq)?.labels)
    }

    /// Best label sequence with its score.
    pub fn viterbi<T: AsRef<[Attribute]>>(&self, xseq: &[T]) -> Result<Labeling<'a>> {
        if xseq.is_empty() {
            return Ok(Labeling {
                labels: Vec::new(),
                score: 0.0,
            });
        }
        let (mut ctx, _) = self.score(xseq, Flag::VITERBI);
        let (path, score) = ctx.viterbi(self.model.lattice()).ok_or(Error::NoPath)?;
        Ok(Labeling {
            labels: self.labels_of(&path)?,
            score,
        })
    }

    /// Up to `k` distinct label sequences, best first.
    pub fn tag_nbest<T: AsRef<[Attribute]>>(
        &self,
        xseq: &[T],
        k: usize,
    ) -> Result<Vec<Labeling<'a>>> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be positive".to_string()));
        }
        if xseq.is_empty() {
            return Ok(vec![Labeling {
                labels: Vec::new(),
                score: 0.0,
            }]);
        }
        let (ctx, _) = self.score(xseq, Flag::VITERBI);
        let paths = nbest::nbest(&ctx, self.model.lattice(), k, self.cache_size);
        if paths.is_empty() {
            return Err(Error::NoPath);
        }
        paths
            .into_iter()
            .map(|(path, score)| {
                Ok(Labeling {
                    labels: self.labels_of(&path)?,
                    score,
                })
            })
            .collect()
    }

    /// Viterbi when `k == 1`, n-best search otherwise.
    pub fn apply<T: AsRef<[Attribute]>>(&self, xseq: &[T], k: usize) -> Result<Vec<Labeling<'a>>> {
        if k == 1 {
            Ok(vec![self.viterbi(xseq)?])
        } else {
            self.tag_nbest(xseq, k)
        }
    }

    /// [`apply`](Self::apply) with the configured number of answers.
    pub fn decode<T: AsRef<[Attribute]>>(&self, xseq: &[T]) -> Result<Vec<Labeling<'a>>> {
        self.apply(xseq, self.n_best)
    }

    /// [`decode_all`](Self::decode_all) with the configured number of answers.
    pub fn decode_batch<S, T>(&self, inputs: &[S]) -> Vec<Result<Vec<Labeling<'a>>>>
    where
        S: AsRef<[T]>,
        T: AsRef<[Attribute]>,
    {
        self.decode_all(inputs, self.n_best)
    }

    /// Decode every input independently. A failure on one input is reported
    /// in its slot and does not stop the others.
    pub fn decode_all<S, T>(&self, inputs: &[S], k: usize) -> Vec<Result<Vec<Labeling<'a>>>>
    where
        S: AsRef<[T]>,
        T: AsRef<[Attribute]>,
    {
        inputs
            .iter()
            .enumerate()
            .map(|(index, xseq)| {
                let xseq = xseq.as_ref();
                let result = self.apply(xseq, k).and_then(|answers| {
                    match answers.iter().find(|a| a.labels.len() != xseq.len()) {
                        Some(bad) => Err(Error::LengthMismatch {
                            expected: xseq.len(),
                            actual: bad.labels.len(),
                        }),
                        None => Ok(answers),
                    }
                });
                if let Err(e) = &result {
                    warn!(index, error = %e, "decoding failed");
                }
                result
            })
            .collect()
    }

    /// Log of the partition function for the item sequence.
    pub fn log_norm<T: AsRef<[Attribute]>>(&self, xseq: &[T]) -> Result<f64> {
        if xseq.is_empty() {
            return Ok(0.0);
        }
        let (mut ctx, _) = self.score(xseq, Flag::empty());
        let log_z = ctx.forward(self.model.lattice());
        if !log_z.is_finite() {
            return Err(Error::NoPath);
        }
        Ok(log_z)
    }

    /// Conditional probability of `yseq` given the item sequence.
    pub fn probability<T, L>(&self, xseq: &[T], yseq: &[L]) -> Result<f64>
    where
        T: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return Err(Error::LengthMismatch {
                expected: xseq.len(),
                actual: yseq.len(),
            });
        }
        if xseq.is_empty() {
            return Ok(1.0);
        }
        let model = self.model;
        let labels = yseq
            .iter()
            .map(|y| {
                model
                    .to_label_id(y.as_ref())
                    .ok_or_else(|| Error::InvalidInput(format!("unknown label {}", y.as_ref())))
            })
            .collect::<Result<Vec<u32>>>()?;
        let (mut ctx, _) = self.score(xseq, Flag::empty());
        let log_z = ctx.forward(model.lattice());
        if !log_z.is_finite() {
            return Err(Error::NoPath);
        }
        match model.lattice().gold_path(&labels, model.labels()) {
            Ok(path) => Ok((ctx.path_score(model.lattice(), &path) - log_z).exp()),
            Err(_) => Ok(0.0),
        }
    }
}
