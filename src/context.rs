use bitflags::bitflags;
use ndarray::Array2;

use crate::dataset::Instance;
use crate::lattice::Lattice;
use crate::weights::WeightStore;

bitflags! {
    /// Functionality flags for contexts
    pub struct Flag: u32 {
        const VITERBI = 0x01;
        const MARGINALS = 0x02;
    }
}

const NO_EDGE: u32 = u32::MAX;

/// Log-sum-exp trick for numerical stability.
///
/// Computes log(sum(exp(values))) in a numerically stable way.
/// Returns NEG_INFINITY for empty arrays or arrays where all values are NEG_INFINITY.
pub fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum.ln()
}

/// Context maintains the dynamic-programming tables for one instance.
///
/// Positions run from `0` (before the first token) to `T` (after the last).
/// Token `t` is consumed by a transition from position `t` to `t + 1`.
#[derive(Debug, Clone)]
pub struct Context {
    /// Flag specifying the functionality
    flag: Flag,
    num_states: usize,
    num_edges: usize,
    /// The number of items in the instance
    num_items: usize,
    /// Rows currently allocated for items
    cap_items: usize,
    /// Logarithm of the normalization factor for the instance.
    ///
    /// This is equivalent to the total scores of all paths in the lattice.
    log_norm: f64,
    /// Transition scores
    ///
    /// This is a `[T][E]` matrix whose element `[t][e]` is the score of
    /// taking transition #e on token #t.
    edge_score: Array2<f64>,
    /// Alpha score matrix
    ///
    /// This is a `[T+1][S]` matrix whose element `[t][s]` presents the total
    /// score of paths starting at the start state and arriving at (t, s).
    alpha: Array2<f64>,
    /// Beta score matrix
    ///
    /// This is a `[T+1][S]` matrix whose element `[t][s]` presents the total
    /// score of paths starting at (t, s) and reaching the end.
    /// Available only with the `MARGINALS` flag.
    beta: Array2<f64>,
    /// Best path scores, `[T+1][S]`. Available only with the `VITERBI` flag.
    delta: Array2<f64>,
    /// Backward edges
    ///
    /// This is a `[T+1][S]` matrix whose element `[t][s]` is the transition
    /// that yields the maximum score to arrive at (t, s).
    /// Available only with the `VITERBI` flag.
    backward_edge: Array2<u32>,
    /// Per-group scores of the current item (work space)
    groups: Vec<f64>,
    /// Row vector (work space)
    row: Vec<f64>,
}

impl Context {
    pub fn new(flag: Flag, lattice: &Lattice, store: &WeightStore) -> Self {
        let mut ctx = Self {
            flag,
            num_states: lattice.num_states(),
            num_edges: lattice.num_edges(),
            num_items: 0,
            cap_items: 0,
            log_norm: f64::NEG_INFINITY,
            edge_score: Array2::zeros((0, 0)),
            alpha: Array2::zeros((0, 0)),
            beta: Array2::zeros((0, 0)),
            delta: Array2::zeros((0, 0)),
            backward_edge: Array2::zeros((0, 0)),
            groups: vec![0.0; store.num_groups()],
            row: Vec::new(),
        };
        ctx.set_num_items(0);
        ctx
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Score of transition `edge` on token `t`.
    #[inline]
    pub fn edge_score(&self, t: usize, edge: u32) -> f64 {
        self.edge_score[[t, edge as usize]]
    }

    fn set_num_items(&mut self, t: usize) {
        self.num_items = t;
        if self.cap_items < t || self.alpha.nrows() == 0 {
            let s = self.num_states;
            self.edge_score = Array2::zeros((t, self.num_edges));
            self.alpha = Array2::zeros((t + 1, s));
            if self.flag.contains(Flag::MARGINALS) {
                self.beta = Array2::zeros((t + 1, s));
            }
            if self.flag.contains(Flag::VITERBI) {
                self.delta = Array2::zeros((t + 1, s));
                self.backward_edge = Array2::zeros((t + 1, s));
            }
            self.cap_items = t;
        }
    }

    /// Compute transition scores for every token of `inst` under `weights`,
    /// a parameter vector laid out like `store`.
    pub fn compute_scores(
        &mut self,
        lattice: &Lattice,
        store: &WeightStore,
        weights: &[f64],
        inst: &Instance,
    ) {
        self.set_num_items(inst.len());
        if self.groups.len() != store.num_groups() {
            self.groups.resize(store.num_groups(), 0.0);
        }
        for (t, item) in inst.items.iter().enumerate() {
            store.group_scores(weights, item, &mut self.groups);
            for e in 0..lattice.num_edges() {
                let score: f64 = store
                    .edge_groups(e as u32)
                    .iter()
                    .map(|&g| self.groups[g as usize])
                    .sum();
                self.edge_score[[t, e]] = score;
            }
        }
    }

    /// Forward algorithm in log space. Returns the log partition function.
    pub fn forward(&mut self, lattice: &Lattice) -> f64 {
        let t_len = self.num_items;
        for (s, state) in lattice.states().iter().enumerate() {
            self.alpha[[0, s]] = state.initial;
        }
        for t in 1..=t_len {
            for s in 0..self.num_states {
                self.row.clear();
                for &e in lattice.incoming(s as u32) {
                    let src = lattice.edge(e).src as usize;
                    self.row
                        .push(self.alpha[[t - 1, src]] + self.edge_score[[t - 1, e as usize]]);
                }
                self.alpha[[t, s]] = logsumexp(&self.row);
            }
        }
        self.row.clear();
        for (s, state) in lattice.states().iter().enumerate() {
            self.row.push(self.alpha[[t_len, s]] + state.final_weight);
        }
        self.log_norm = logsumexp(&self.row);
        self.log_norm
    }

    /// Backward algorithm in log space. Returns the log partition function
    /// as seen from the start of the sequence.
    ///
    /// # Panics
    ///
    /// Panics if the context was created without the `MARGINALS` flag.
    pub fn backward(&mut self, lattice: &Lattice) -> f64 {
        assert!(self.flag.contains(Flag::MARGINALS));
        let t_len = self.num_items;
        for (s, state) in lattice.states().iter().enumerate() {
            self.beta[[t_len, s]] = state.final_weight;
        }
        for t in (0..t_len).rev() {
            for s in 0..self.num_states {
                self.row.clear();
                for &e in lattice.outgoing(s as u32) {
                    let dst = lattice.edge(e).dst as usize;
                    self.row
                        .push(self.edge_score[[t, e as usize]] + self.beta[[t + 1, dst]]);
                }
                self.beta[[t, s]] = logsumexp(&self.row);
            }
        }
        self.row.clear();
        for (s, state) in lattice.states().iter().enumerate() {
            self.row.push(state.initial + self.beta[[0, s]]);
        }
        logsumexp(&self.row)
    }

    /// Probability of taking transition `edge` on token `t`.
    ///
    /// Valid after [`forward`](Self::forward) and [`backward`](Self::backward).
    #[inline]
    pub fn edge_marginal(&self, lattice: &Lattice, t: usize, edge: u32) -> f64 {
        let e = lattice.edge(edge);
        (self.alpha[[t, e.src as usize]] + self.edge_score[[t, edge as usize]]
            + self.beta[[t + 1, e.dst as usize]]
            - self.log_norm)
            .exp()
    }

    /// Probability of being in `state` at position `t`.
    pub fn state_marginal(&self, t: usize, state: u32) -> f64 {
        (self.alpha[[t, state as usize]] + self.beta[[t, state as usize]] - self.log_norm).exp()
    }

    /// Total score of a path given as one transition per token.
    pub fn path_score(&self, lattice: &Lattice, path: &[u32]) -> f64 {
        let mut score = match path.first() {
            Some(&e) => lattice.state(lattice.edge(e).src).initial,
            None => return f64::NEG_INFINITY,
        };
        for (t, &e) in path.iter().enumerate() {
            score += self.edge_score[[t, e as usize]];
        }
        let last = lattice.edge(path[path.len() - 1]).dst;
        score + lattice.state(last).final_weight
    }

    /// Find the best path. Returns one transition per token and the path
    /// score, or `None` when no admissible path exists.
    ///
    /// # Panics
    ///
    /// Panics if the context was created without the `VITERBI` flag.
    pub fn viterbi(&mut self, lattice: &Lattice) -> Option<(Vec<u32>, f64)> {
        assert!(self.flag.contains(Flag::VITERBI));
        let t_len = self.num_items;
        if t_len == 0 {
            return None;
        }
        for (s, state) in lattice.states().iter().enumerate() {
            self.delta[[0, s]] = state.initial;
        }
        for t in 1..=t_len {
            for s in 0..self.num_states {
                let mut max_score = f64::NEG_INFINITY;
                let mut argmax = NO_EDGE;
                for &e in lattice.incoming(s as u32) {
                    let src = lattice.edge(e).src as usize;
                    let score = self.delta[[t - 1, src]] + self.edge_score[[t - 1, e as usize]];
                    // Store this path if it has the maximum score
                    if score > max_score {
                        max_score = score;
                        argmax = e;
                    }
                }
                self.delta[[t, s]] = max_score;
                self.backward_edge[[t, s]] = argmax;
            }
        }

        // Find the state that ends the sequence with the maximum score
        let mut max_score = f64::NEG_INFINITY;
        let mut last = NO_EDGE;
        for (s, state) in lattice.states().iter().enumerate() {
            let score = self.delta[[t_len, s]] + state.final_weight;
            if score > max_score {
                max_score = score;
                last = s as u32;
            }
        }
        if last == NO_EDGE || !max_score.is_finite() {
            return None;
        }

        // Tag labels by tracing the backward links
        let mut path = vec![0u32; t_len];
        let mut state = last;
        for t in (1..=t_len).rev() {
            let e = self.backward_edge[[t, state as usize]];
            if e == NO_EDGE {
                return None;
            }
            path[t - 1] = e;
            state = lattice.edge(e).src;
        }
        Some((path, max_score))
    }
}
