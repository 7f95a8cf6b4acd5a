//! Periodic evaluation hooks run by the optimizer driver.

use std::collections::HashSet;

use crate::attribute::Attribute;
use crate::model::Model;

/// Named values reported by an evaluator, e.g. `("accuracy", 0.93)`.
pub type Metrics = Vec<(String, f64)>;

/// Training state handed to evaluators.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    /// Iterations completed so far, counted across induction rounds
    pub iteration: usize,
    /// Penalized log-likelihood at the current weights
    pub log_likelihood: f64,
    pub gradient_norm: f64,
    /// A model built from the current weights
    pub model: &'a Model,
}

/// Something that can judge a model in the middle of training.
pub trait Evaluator {
    fn evaluate(&mut self, snapshot: &Snapshot<'_>) -> Metrics;
}

impl<F> Evaluator for F
where
    F: FnMut(&Snapshot<'_>) -> Metrics,
{
    fn evaluate(&mut self, snapshot: &Snapshot<'_>) -> Metrics {
        self(snapshot)
    }
}

/// Token and sequence accuracy on held-out labeled data.
#[derive(Debug, Clone, Default)]
pub struct TokenAccuracy {
    name: String,
    data: Vec<(Vec<Vec<Attribute>>, Vec<String>)>,
}

impl TokenAccuracy {
    /// `name` prefixes the reported metric names, e.g. `"test"`.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            data: Vec::new(),
        }
    }

    /// Add one labeled sequence. Sequences whose lengths disagree are ignored.
    pub fn push<T, L>(&mut self, xseq: &[T], yseq: &[L])
    where
        T: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return;
        }
        self.data.push((
            xseq.iter().map(|x| x.as_ref().to_vec()).collect(),
            yseq.iter().map(|y| y.as_ref().to_string()).collect(),
        ));
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Evaluator for TokenAccuracy {
    fn evaluate(&mut self, snapshot: &Snapshot<'_>) -> Metrics {
        let tagger = snapshot.model.tagger();
        let mut tokens = 0usize;
        let mut correct = 0usize;
        let mut sequences_correct = 0usize;
        for (xseq, yseq) in &self.data {
            let predicted = tagger.tag(xseq).unwrap_or_default();
            let hits = predicted
                .iter()
                .zip(yseq)
                .filter(|(p, y)| **p == y.as_str())
                .count();
            tokens += yseq.len();
            correct += hits;
            if hits == yseq.len() {
                sequences_correct += 1;
            }
        }
        let ratio = |num: usize, den: usize| {
            if den == 0 {
                0.0
            } else {
                num as f64 / den as f64
            }
        };
        vec![
            (
                format!("{}.token_accuracy", self.name),
                ratio(correct, tokens),
            ),
            (
                format!("{}.sequence_accuracy", self.name),
                ratio(sequences_correct, self.data.len()),
            ),
        ]
    }
}

/// Segment precision, recall and F1 on held-out labeled data.
///
/// Segments are spans described by `(start, continue)` label pairs, such as
/// `("B-PER", "I-PER")`: a segment opens on a start label and extends over
/// the continue labels of the same pair that follow it. A predicted segment
/// is correct when its kind and both boundaries match a true one.
#[derive(Debug, Clone, Default)]
pub struct SegmentAccuracy {
    name: String,
    kinds: Vec<(String, String)>,
    data: Vec<(Vec<Vec<Attribute>>, Vec<String>)>,
}

impl SegmentAccuracy {
    pub fn new<S, I, L>(name: S, kinds: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (L, L)>,
        L: Into<String>,
    {
        Self {
            name: name.into(),
            kinds: kinds
                .into_iter()
                .map(|(start, cont)| (start.into(), cont.into()))
                .collect(),
            data: Vec::new(),
        }
    }

    /// Add one labeled sequence. Sequences whose lengths disagree are ignored.
    pub fn push<T, L>(&mut self, xseq: &[T], yseq: &[L])
    where
        T: AsRef<[Attribute]>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return;
        }
        self.data.push((
            xseq.iter().map(|x| x.as_ref().to_vec()).collect(),
            yseq.iter().map(|y| y.as_ref().to_string()).collect(),
        ));
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Spans `(begin, end, kind)` of `labels`, `end` exclusive.
    fn segments<S: AsRef<str>>(&self, labels: &[S]) -> Vec<(usize, usize, usize)> {
        let mut spans = Vec::new();
        let mut open: Option<(usize, usize)> = None;
        for (t, label) in labels.iter().enumerate() {
            let label = label.as_ref();
            if let Some((begin, kind)) = open {
                if self.kinds[kind].1 == label {
                    continue;
                }
                spans.push((begin, t, kind));
                open = None;
            }
            if let Some(kind) = self.kinds.iter().position(|(start, _)| start == label) {
                open = Some((t, kind));
            }
        }
        if let Some((begin, kind)) = open {
            spans.push((begin, labels.len(), kind));
        }
        spans
    }

    /// `(correct, predicted, true)` segment counts for one sequence.
    fn count<P: AsRef<str>, G: AsRef<str>>(&self, predicted: &[P], gold: &[G]) -> (usize, usize, usize) {
        let truth: HashSet<_> = self.segments(gold).into_iter().collect();
        let guess = self.segments(predicted);
        let correct = guess.iter().filter(|span| truth.contains(span)).count();
        (correct, guess.len(), truth.len())
    }
}

impl Evaluator for SegmentAccuracy {
    fn evaluate(&mut self, snapshot: &Snapshot<'_>) -> Metrics {
        let tagger = snapshot.model.tagger();
        let (mut correct, mut predicted, mut truth) = (0usize, 0usize, 0usize);
        for (xseq, yseq) in &self.data {
            let labels = tagger.tag(xseq).unwrap_or_default();
            let (c, p, t) = self.count(&labels, yseq);
            correct += c;
            predicted += p;
            truth += t;
        }
        let precision = if predicted == 0 {
            0.0
        } else {
            correct as f64 / predicted as f64
        };
        let recall = if truth == 0 {
            0.0
        } else {
            correct as f64 / truth as f64
        };
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        vec![
            (format!("{}.segment_precision", self.name), precision),
            (format!("{}.segment_recall", self.name), recall),
            (format!("{}.segment_f1", self.name), f1),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::alphabet::Alphabet;
    use crate::config::Config;
    use crate::lattice::LatticeBuilder;
    use crate::weights::{WeightPolicy, WeightStore};

    fn model() -> Model {
        let labels = Alphabet::from_entries(["O", "GENE"]).unwrap();
        let features = Alphabet::from_entries(["g"]).unwrap();
        let lattice = LatticeBuilder::new(&labels, &Config::default())
            .build()
            .unwrap();
        let mut store = WeightStore::new(
            &lattice,
            &labels,
            WeightPolicy::Sparse,
            &HashMap::new(),
            1,
            1,
        );
        let mut w = store.as_slice().to_vec();
        for g in 0..store.num_groups() as u32 {
            if store.group_name(g) == "GENE" {
                w[store.feature_index(g, 0)] = 5.0;
                w[store.bias_index(g)] = -2.0;
            }
        }
        store.set_weights(&w);
        Model::from_parts(labels, features, lattice, store, Vec::new()).unwrap()
    }

    #[test]
    fn test_token_accuracy() {
        let model = model();
        let mut eval = TokenAccuracy::new("test");
        eval.push(
            &[vec![Attribute::from("x")], vec![Attribute::from("g")]],
            &["O", "GENE"],
        );
        eval.push(
            &[vec![Attribute::from("g")], vec![Attribute::from("x")]],
            &["O", "O"],
        );
        eval.push(&[vec![Attribute::from("g")]], &["O", "O"]);
        assert_eq!(eval.len(), 2);

        let snapshot = Snapshot {
            iteration: 1,
            log_likelihood: -1.0,
            gradient_norm: 0.5,
            model: &model,
        };
        let metrics = eval.evaluate(&snapshot);
        assert_eq!(metrics[0], ("test.token_accuracy".to_string(), 0.75));
        assert_eq!(metrics[1], ("test.sequence_accuracy".to_string(), 0.5));
    }

    #[test]
    fn test_closure_evaluator() {
        let model = model();
        let mut calls = 0;
        let mut eval = |s: &Snapshot<'_>| {
            calls += 1;
            vec![("iteration".to_string(), s.iteration as f64)]
        };
        let snapshot = Snapshot {
            iteration: 7,
            log_likelihood: 0.0,
            gradient_norm: 0.0,
            model: &model,
        };
        assert_eq!(Evaluator::evaluate(&mut eval, &snapshot)[0].1, 7.0);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_segment_counts() {
        let eval = SegmentAccuracy::new("dev", [("B", "I")]);
        let gold = ["B", "I", "O", "B", "O", "B", "I", "I"];
        let predicted = ["B", "I", "O", "B", "I", "O", "B", "I"];
        assert_eq!(eval.segments(&gold), vec![(0, 2, 0), (3, 4, 0), (5, 8, 0)]);
        assert_eq!(eval.count(&predicted, &gold), (1, 3, 3));
        // A continue label without a start opens nothing
        assert!(eval.segments(&["I", "I", "O"]).is_empty());
    }

    #[test]
    fn test_segment_kinds_must_match() {
        let eval = SegmentAccuracy::new("dev", [("B-PER", "I-PER"), ("B-LOC", "I-LOC")]);
        let gold = ["B-PER", "I-PER", "B-LOC"];
        let predicted = ["B-LOC", "I-LOC", "B-LOC"];
        assert_eq!(eval.segments(&predicted), vec![(0, 2, 1), (2, 3, 1)]);
        assert_eq!(eval.count(&predicted, &gold), (1, 2, 2));
    }

    #[test]
    fn test_segment_accuracy() {
        let model = model();
        let mut eval = SegmentAccuracy::new("test", [("GENE", "GENE")]);
        let x = || vec![Attribute::from("x")];
        let g = || vec![Attribute::from("g")];
        // Predicted GENE O GENE GENE
        eval.push(&[g(), x(), g(), g()], &["GENE", "O", "GENE", "O"]);
        assert_eq!(eval.len(), 1);

        let snapshot = Snapshot {
            iteration: 1,
            log_likelihood: -1.0,
            gradient_norm: 0.5,
            model: &model,
        };
        let metrics = eval.evaluate(&snapshot);
        assert_eq!(metrics[0], ("test.segment_precision".to_string(), 0.5));
        assert_eq!(metrics[1], ("test.segment_recall".to_string(), 0.5));
        assert_eq!(metrics[2], ("test.segment_f1".to_string(), 0.5));
    }
}
