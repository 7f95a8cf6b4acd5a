use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{Error, Result};
use crate::weights::WeightPolicy;

type Predicate = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Decides whether a `prev,next` label transition may appear in the lattice.
///
/// Checks run in order: the forbidden pattern (a match excludes the
/// transition, whatever else says), the allowed pattern (a miss excludes
/// it), then the custom predicate. Patterns must match the whole
/// `prev,next` string.
#[derive(Clone, Default)]
pub struct TransitionFilter {
    forbidden: Option<(String, Regex)>,
    allowed: Option<(String, Regex)>,
    predicate: Option<Predicate>,
}

impl TransitionFilter {
    /// A filter admitting every transition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forbid transitions whose `prev,next` string matches `pattern`.
    pub fn forbid(mut self, pattern: &str) -> Result<Self> {
        self.forbidden = Some((pattern.to_string(), compile_anchored(pattern)?));
        Ok(self)
    }

    /// Only admit transitions whose `prev,next` string matches `pattern`.
    pub fn allow(mut self, pattern: &str) -> Result<Self> {
        self.allowed = Some((pattern.to_string(), compile_anchored(pattern)?));
        Ok(self)
    }

    /// Add an arbitrary admissibility predicate over `(prev, next)` labels.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn forbidden_pattern(&self) -> Option<&str> {
        self.forbidden.as_ref().map(|(p, _)| p.as_str())
    }

    pub fn allowed_pattern(&self) -> Option<&str> {
        self.allowed.as_ref().map(|(p, _)| p.as_str())
    }

    /// Whether the transition `prev -> next` is admissible.
    pub fn admits(&self, prev: &str, next: &str) -> bool {
        if self.forbidden.is_some() || self.allowed.is_some() {
            let pair = format!("{},{}", prev, next);
            if let Some((_, re)) = &self.forbidden {
                if re.is_match(&pair) {
                    return false;
                }
            }
            if let Some((_, re)) = &self.allowed {
                if !re.is_match(&pair) {
                    return false;
                }
            }
        }
        match &self.predicate {
            Some(predicate) => predicate(prev, next),
            None => true,
        }
    }
}

impl fmt::Debug for TransitionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionFilter")
            .field("forbidden", &self.forbidden_pattern())
            .field("allowed", &self.allowed_pattern())
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

fn compile_anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| Error::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Line search algorithm for L-BFGS optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSearchAlgorithm {
    /// More-Thuente line search
    #[default]
    MoreThuente,
    /// Backtracking with Armijo condition
    BacktrackingArmijo,
    /// Backtracking with Wolfe condition
    BacktrackingWolfe,
    /// Backtracking with strong Wolfe condition
    BacktrackingStrongWolfe,
}

impl LineSearchAlgorithm {
    pub(crate) fn to_liblbfgs_str(self) -> &'static str {
        match self {
            Self::MoreThuente => "MoreThuente",
            Self::BacktrackingArmijo => "BacktrackingArmijo",
            Self::BacktrackingWolfe => "BacktrackingWolfe",
            Self::BacktrackingStrongWolfe => "BacktrackingStrongWolfe",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "MoreThuente" | "more-thuente" => Ok(Self::MoreThuente),
            "Armijo" | "armijo" => Ok(Self::BacktrackingArmijo),
            "Wolfe" | "wolfe" => Ok(Self::BacktrackingWolfe),
            "StrongWolfe" | "strong-wolfe" => Ok(Self::BacktrackingStrongWolfe),
            _ => Err(Error::InvalidParameter(format!(
                "unknown line search algorithm: {}",
                value
            ))),
        }
    }
}

/// Options for building, training and applying a CRF.
#[derive(Debug, Clone)]
pub struct Config {
    orders: Vec<usize>,
    default_label: String,
    filter: TransitionFilter,
    fully_connected: bool,
    weight_policy: WeightPolicy,
    min_support: usize,
    variance: f64,
    max_iterations: usize,
    epsilon: f64,
    delta: f64,
    period: usize,
    linesearch: LineSearchAlgorithm,
    max_linesearch: usize,
    threads: usize,
    feature_induction: bool,
    induction_rounds: usize,
    iterations_between_inductions: usize,
    features_per_induction: usize,
    eval_period: usize,
    n_best: usize,
    cache_size: usize,
    seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orders: vec![1],
            default_label: "O".to_string(),
            filter: TransitionFilter::new(),
            fully_connected: true,
            weight_policy: WeightPolicy::default(),
            min_support: 1,
            variance: 10.0,
            max_iterations: 500,
            epsilon: 1e-5,
            delta: 1e-5,
            period: 10,
            linesearch: LineSearchAlgorithm::default(),
            max_linesearch: 20,
            threads: 1,
            feature_induction: false,
            induction_rounds: 20,
            iterations_between_inductions: 10,
            features_per_induction: 500,
            eval_period: 1,
            n_best: 1,
            cache_size: 100_000,
            seed: 0,
        }
    }
}

fn invalid(msg: &str) -> Error {
    Error::InvalidParameter(msg.to_string())
}

impl Config {
    /// Label Markov orders, main order and backoff orders.
    pub fn orders(&self) -> &[usize] {
        &self.orders
    }

    pub fn set_orders(&mut self, orders: &[usize]) -> Result<()> {
        if orders.is_empty() {
            return Err(invalid("orders must not be empty"));
        }
        let mut sorted = orders.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != orders.len() {
            return Err(invalid("orders must be distinct"));
        }
        self.orders = orders.to_vec();
        Ok(())
    }

    /// Orders sorted ascending; the last one is the main order.
    pub(crate) fn sorted_orders(&self) -> Vec<usize> {
        let mut orders = self.orders.clone();
        orders.sort_unstable();
        orders
    }

    /// Label of the initial context and of uninteresting tokens.
    pub fn default_label(&self) -> &str {
        &self.default_label
    }

    pub fn set_default_label(&mut self, label: &str) -> Result<()> {
        if label.is_empty() {
            return Err(invalid("default_label must not be empty"));
        }
        self.default_label = label.to_string();
        Ok(())
    }

    pub fn filter(&self) -> &TransitionFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: TransitionFilter) {
        self.filter = filter;
    }

    /// Include every admissible transition, even those not seen in training.
    pub fn fully_connected(&self) -> bool {
        self.fully_connected
    }

    pub fn set_fully_connected(&mut self, enabled: bool) {
        self.fully_connected = enabled;
    }

    pub fn weight_policy(&self) -> WeightPolicy {
        self.weight_policy
    }

    pub fn set_weight_policy(&mut self, policy: WeightPolicy) {
        self.weight_policy = policy;
    }

    /// Minimum gold-path support for an untied weight group under `some-dense`.
    pub fn min_support(&self) -> usize {
        self.min_support
    }

    pub fn set_min_support(&mut self, min_support: usize) -> Result<()> {
        if min_support == 0 {
            return Err(invalid("min_support must be positive"));
        }
        self.min_support = min_support;
        Ok(())
    }

    /// Variance of the Gaussian prior on the weights.
    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn set_variance(&mut self, variance: f64) -> Result<()> {
        if !(variance > 0.0) || !variance.is_finite() {
            return Err(invalid("variance must be positive"));
        }
        self.variance = variance;
        Ok(())
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations < 1 {
            return Err(invalid("max_iterations must be at least 1"));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if epsilon < 0.0 {
            return Err(invalid("epsilon must be non-negative"));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if delta < 0.0 {
            return Err(invalid("delta must be non-negative"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Set the period for the delta-based convergence test.
    ///
    /// Setting period to 0 disables the delta-based test, leaving only the
    /// gradient-based epsilon test.
    pub fn set_period(&mut self, period: usize) {
        self.period = period;
    }

    pub fn linesearch(&self) -> LineSearchAlgorithm {
        self.linesearch
    }

    pub fn set_linesearch(&mut self, linesearch: LineSearchAlgorithm) {
        self.linesearch = linesearch;
    }

    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> Result<()> {
        if max_linesearch == 0 {
            return Err(invalid("max_linesearch must be positive"));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }

    /// Number of worker threads for gradient computation.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn set_threads(&mut self, threads: usize) -> Result<()> {
        if threads == 0 {
            return Err(invalid("threads must be positive"));
        }
        self.threads = threads;
        Ok(())
    }

    pub fn feature_induction(&self) -> bool {
        self.feature_induction
    }

    pub fn set_feature_induction(&mut self, enabled: bool) {
        self.feature_induction = enabled;
    }

    pub fn induction_rounds(&self) -> usize {
        self.induction_rounds
    }

    pub fn set_induction_rounds(&mut self, rounds: usize) -> Result<()> {
        if rounds == 0 {
            return Err(invalid("induction_rounds must be positive"));
        }
        self.induction_rounds = rounds;
        Ok(())
    }

    pub fn iterations_between_inductions(&self) -> usize {
        self.iterations_between_inductions
    }

    pub fn set_iterations_between_inductions(&mut self, iterations: usize) -> Result<()> {
        if iterations == 0 {
            return Err(invalid("iterations_between_inductions must be positive"));
        }
        self.iterations_between_inductions = iterations;
        Ok(())
    }

    pub fn features_per_induction(&self) -> usize {
        self.features_per_induction
    }

    pub fn set_features_per_induction(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(invalid("features_per_induction must be positive"));
        }
        self.features_per_induction = count;
        Ok(())
    }

    /// Run evaluators every this many iterations.
    pub fn eval_period(&self) -> usize {
        self.eval_period
    }

    pub fn set_eval_period(&mut self, eval_period: usize) -> Result<()> {
        if eval_period == 0 {
            return Err(invalid("eval_period must be positive"));
        }
        self.eval_period = eval_period;
        Ok(())
    }

    /// Number of answers to produce when applying a model.
    pub fn n_best(&self) -> usize {
        self.n_best
    }

    pub fn set_n_best(&mut self, n_best: usize) -> Result<()> {
        if n_best == 0 {
            return Err(invalid("n_best must be positive"));
        }
        self.n_best = n_best;
        Ok(())
    }

    /// How many partial paths n-best decoding may keep at once.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn set_cache_size(&mut self, cache_size: usize) -> Result<()> {
        if cache_size == 0 {
            return Err(invalid("cache_size must be positive"));
        }
        self.cache_size = cache_size;
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Set a parameter from its string form.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "orders" => {
                let orders = value
                    .split(',')
                    .map(|s| parse_usize(name, s.trim()))
                    .collect::<Result<Vec<_>>>()?;
                self.set_orders(&orders)
            }
            "default_label" => self.set_default_label(value),
            "forbidden" => {
                self.filter = self.filter.clone().forbid(value)?;
                Ok(())
            }
            "allowed" => {
                self.filter = self.filter.clone().allow(value)?;
                Ok(())
            }
            "fully_connected" => {
                self.set_fully_connected(parse_bool(name, value)?);
                Ok(())
            }
            "weights" => {
                self.set_weight_policy(value.parse()?);
                Ok(())
            }
            "min_support" => self.set_min_support(parse_usize(name, value)?),
            "variance" => self.set_variance(parse_f64(name, value)?),
            "iterations" | "max_iterations" => self.set_max_iterations(parse_usize(name, value)?),
            "epsilon" => self.set_epsilon(parse_f64(name, value)?),
            "delta" => self.set_delta(parse_f64(name, value)?),
            "period" => {
                self.set_period(parse_usize(name, value)?);
                Ok(())
            }
            "linesearch" => {
                self.set_linesearch(LineSearchAlgorithm::parse(value)?);
                Ok(())
            }
            "max_linesearch" => self.set_max_linesearch(parse_usize(name, value)?),
            "threads" => self.set_threads(parse_usize(name, value)?),
            "feature_induction" => {
                self.set_feature_induction(parse_bool(name, value)?);
                Ok(())
            }
            "induction_rounds" => self.set_induction_rounds(parse_usize(name, value)?),
            "iterations_between_inductions" => {
                self.set_iterations_between_inductions(parse_usize(name, value)?)
            }
            "features_per_induction" => self.set_features_per_induction(parse_usize(name, value)?),
            "eval_period" => self.set_eval_period(parse_usize(name, value)?),
            "n_best" => self.set_n_best(parse_usize(name, value)?),
            "cache_size" => self.set_cache_size(parse_usize(name, value)?),
            "seed" => {
                self.set_seed(
                    value
                        .parse()
                        .map_err(|_| invalid(&format!("invalid value for {}: {}", name, value)))?,
                );
                Ok(())
            }
            _ => Err(Error::UnknownParameter(name.to_string())),
        }
    }

    /// Check cross-option consistency. Called before any training work.
    pub fn validate(&self) -> Result<()> {
        if self.orders.is_empty() {
            return Err(Error::Config("order list is empty".to_string()));
        }
        if self.default_label.is_empty() {
            return Err(Error::Config("default label is empty".to_string()));
        }
        if self.feature_induction && self.threads > 1 {
            return Err(Error::InductionWithThreads {
                threads: self.threads,
            });
        }
        Ok(())
    }
}

fn parse_f64(name: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| invalid(&format!("invalid value for {}: {}", name, value)))
}

fn parse_usize(name: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| invalid(&format!("invalid value for {}: {}", name, value)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(&format!("invalid value for {}: {}", name, value))),
    }
}
