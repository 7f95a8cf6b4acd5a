//! Label-history state machine shared by training and decoding.
//!
//! A state stands for the last `k` labels (`k` being the main Markov order),
//! a transition emits the next label and moves to the state whose history is
//! shifted by one. Each transition also carries one weight name per
//! configured order, the n-gram made of the last `o` history labels and the
//! emitted label. Transitions sharing a weight name share weights, which is
//! how lower (backoff) orders pool statistics across histories.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::alphabet::Alphabet;
use crate::config::{Config, TransitionFilter};
use crate::error::{Error, InstanceError, Result};

const NO_EDGE: u32 = u32::MAX;

/// A node of the state machine: one label history.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Comma-joined history, e.g. `O,GENE`
    pub name: String,
    /// Label ids of the history, oldest first
    pub history: Vec<u32>,
    /// Score of starting a sequence here, `-inf` unless this is the start state
    pub initial: f64,
    /// Score of ending a sequence here
    pub final_weight: f64,
}

/// A labeled edge between two states.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub src: u32,
    pub dst: u32,
    /// Label emitted when taking this transition
    pub label: u32,
    /// One n-gram weight name per order, lowest order first
    pub weight_names: Vec<String>,
}

/// The state machine over label histories.
#[derive(Debug, Clone)]
pub struct Lattice {
    num_labels: usize,
    orders: Vec<usize>,
    states: Vec<State>,
    edges: Vec<Transition>,
    start: u32,
    outgoing: Vec<Vec<u32>>,
    incoming: Vec<Vec<u32>>,
    /// `[state * num_labels + label]` -> edge id
    successor: Vec<u32>,
    by_name: HashMap<String, u32>,
}

impl Lattice {
    /// Assemble a lattice from its parts, checking that ids line up.
    ///
    /// This is the entry point for persistence layers that stored
    /// [`Lattice::states`] and [`Lattice::edges`].
    pub fn from_parts(
        num_labels: usize,
        orders: Vec<usize>,
        states: Vec<State>,
        edges: Vec<Transition>,
        start: u32,
    ) -> Result<Self> {
        let num_states = states.len();
        if start as usize >= num_states {
            return Err(Error::InvalidInput(format!(
                "start state {} out of range",
                start
            )));
        }
        for (sid, state) in states.iter().enumerate() {
            let is_start = sid as u32 == start;
            if state.initial.is_finite() != is_start {
                return Err(Error::InvalidInput(format!(
                    "state `{}` has initial weight {}, only the start state may be finite",
                    state.name, state.initial
                )));
            }
        }
        let mut outgoing = vec![Vec::new(); num_states];
        let mut incoming = vec![Vec::new(); num_states];
        let mut successor = vec![NO_EDGE; num_states * num_labels];
        for (eid, edge) in edges.iter().enumerate() {
            let (src, dst, label) = (edge.src as usize, edge.dst as usize, edge.label as usize);
            if src >= num_states || dst >= num_states || label >= num_labels {
                return Err(Error::InvalidInput(format!(
                    "transition {} refers to an unknown state or label",
                    eid
                )));
            }
            let slot = &mut successor[src * num_labels + label];
            if *slot != NO_EDGE {
                return Err(Error::InvalidInput(format!(
                    "state `{}` has two transitions emitting label {}",
                    states[src].name, label
                )));
            }
            *slot = eid as u32;
            outgoing[src].push(eid as u32);
            incoming[dst].push(eid as u32);
        }
        let by_name = states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i as u32))
            .collect();
        Ok(Self {
            num_labels,
            orders,
            states,
            edges,
            start,
            outgoing,
            incoming,
            successor,
            by_name,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Orders the lattice was built for, ascending.
    pub fn orders(&self) -> &[usize] {
        &self.orders
    }

    /// The main Markov order.
    pub fn order(&self) -> usize {
        self.orders.last().copied().unwrap_or(0)
    }

    /// Id of the designated start state.
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn edges(&self) -> &[Transition] {
        &self.edges
    }

    pub fn state(&self, id: u32) -> &State {
        &self.states[id as usize]
    }

    pub fn edge(&self, id: u32) -> &Transition {
        &self.edges[id as usize]
    }

    pub fn state_by_name(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn outgoing(&self, state: u32) -> &[u32] {
        &self.outgoing[state as usize]
    }

    pub fn incoming(&self, state: u32) -> &[u32] {
        &self.incoming[state as usize]
    }

    /// The transition leaving `state` that emits `label`, if admissible.
    pub fn successor(&self, state: u32, label: u32) -> Option<u32> {
        if label as usize >= self.num_labels {
            return None;
        }
        match self.successor[state as usize * self.num_labels + label as usize] {
            NO_EDGE => None,
            eid => Some(eid),
        }
    }

    /// Follow an observed label sequence from the start state.
    ///
    /// Returns the edge taken at every position, or the first position
    /// where no admissible transition emits the observed label. `names`
    /// spells the offending label in the error.
    pub fn gold_path(
        &self,
        labels: &[u32],
        names: &Alphabet,
    ) -> std::result::Result<Vec<u32>, InstanceError> {
        let inadmissible = |position: usize| InstanceError::Inadmissible {
            position,
            label: names
                .name(labels[position])
                .map_or_else(|| labels[position].to_string(), str::to_string),
        };
        let mut path = Vec::with_capacity(labels.len());
        let mut state = self.start;
        for (t, &label) in labels.iter().enumerate() {
            let eid = self.successor(state, label).ok_or_else(|| inadmissible(t))?;
            path.push(eid);
            state = self.edges[eid as usize].dst;
        }
        if !labels.is_empty() && self.states[state as usize].final_weight == f64::NEG_INFINITY {
            return Err(inadmissible(labels.len() - 1));
        }
        Ok(path)
    }
}

/// Expands Markov orders and transition constraints into a [`Lattice`].
pub struct LatticeBuilder<'a> {
    labels: &'a Alphabet,
    orders: Vec<usize>,
    default_label: &'a str,
    filter: &'a TransitionFilter,
    connections: Option<HashSet<(u32, u32)>>,
}

impl<'a> LatticeBuilder<'a> {
    pub fn new(labels: &'a Alphabet, config: &'a Config) -> Self {
        Self {
            labels,
            orders: config.sorted_orders(),
            default_label: config.default_label(),
            filter: config.filter(),
            connections: None,
        }
    }

    /// Restrict transitions to label bigrams observed in training data.
    pub fn connections(mut self, observed: HashSet<(u32, u32)>) -> Self {
        self.connections = Some(observed);
        self
    }

    fn admits(&self, names: &[&str], prev: u32, next: u32) -> bool {
        self.filter.admits(names[prev as usize], names[next as usize])
    }

    fn connected(&self, prev: u32, next: u32) -> bool {
        match &self.connections {
            Some(observed) => observed.contains(&(prev, next)),
            None => true,
        }
    }

    pub fn build(self) -> Result<Lattice> {
        let num_labels = self.labels.len();
        if num_labels == 0 {
            return Err(Error::Config("label alphabet is empty".to_string()));
        }
        if self.orders.is_empty() {
            return Err(Error::Config("order list is empty".to_string()));
        }
        if self.orders.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Config("orders must be distinct".to_string()));
        }
        let default_id = self.labels.get(self.default_label).ok_or_else(|| {
            Error::Config(format!(
                "default label `{}` is not a known label",
                self.default_label
            ))
        })?;
        let names: Vec<&str> = self.labels.iter().map(|(s, _)| s).collect();
        let order = *self.orders.last().unwrap_or(&0);

        let (states, edges, start) = if order == 0 {
            self.order_zero(&names, default_id)
        } else {
            self.order_n(&names, order, default_id)?
        };
        let (states, edges, start) = prune_unreachable(states, edges, start);

        debug!(
            states = states.len(),
            transitions = edges.len(),
            order,
            "built state lattice"
        );
        let lattice = Lattice::from_parts(num_labels, self.orders, states, edges, start)?;
        if lattice.outgoing(lattice.start()).is_empty() {
            return Err(Error::Config(format!(
                "start state `{}` has no admissible transition",
                lattice.state(lattice.start()).name
            )));
        }
        Ok(lattice)
    }

    fn order_zero(&self, names: &[&str], default_id: u32) -> (Vec<State>, Vec<Transition>, u32) {
        let num_labels = names.len() as u32;
        let states = (0..num_labels)
            .map(|l| State {
                name: names[l as usize].to_string(),
                history: vec![l],
                initial: f64::NEG_INFINITY,
                final_weight: 0.0,
            })
            .collect();
        let mut edges = Vec::new();
        for src in 0..num_labels {
            for next in 0..num_labels {
                edges.push(Transition {
                    src,
                    dst: next,
                    label: next,
                    weight_names: vec![names[next as usize].to_string()],
                });
            }
        }
        (states, edges, default_id)
    }

    fn order_n(
        &self,
        names: &[&str],
        order: usize,
        default_id: u32,
    ) -> Result<(Vec<State>, Vec<Transition>, u32)> {
        let num_labels = names.len() as u32;
        let mut states = Vec::new();
        let mut ids: HashMap<Vec<u32>, u32> = HashMap::new();

        // Enumerate label histories with a mixed-radix counter.
        let mut history = vec![0u32; order];
        loop {
            let allowed = history
                .windows(2)
                .all(|pair| self.admits(names, pair[0], pair[1]));
            if allowed {
                ids.insert(history.clone(), states.len() as u32);
                states.push(State {
                    name: join(names, &history),
                    history: history.clone(),
                    initial: f64::NEG_INFINITY,
                    final_weight: 0.0,
                });
            }
            if !advance(&mut history, num_labels) {
                break;
            }
        }

        let mut edges = Vec::new();
        for (sid, state) in states.iter().enumerate() {
            let last = state.history[order - 1];
            for next in 0..num_labels {
                if !self.admits(names, last, next) || !self.connected(last, next) {
                    continue;
                }
                let mut dest = state.history[1..].to_vec();
                dest.push(next);
                let dst = match ids.get(&dest) {
                    Some(&dst) => dst,
                    None => continue,
                };
                let weight_names = self
                    .orders
                    .iter()
                    .map(|&o| {
                        let mut gram = state.history[order - o..].to_vec();
                        gram.push(next);
                        join(names, &gram)
                    })
                    .collect();
                edges.push(Transition {
                    src: sid as u32,
                    dst,
                    label: next,
                    weight_names,
                });
            }
        }

        let start_history = vec![default_id; order];
        let start = ids.get(&start_history).copied().ok_or_else(|| {
            Error::Config(format!(
                "start state `{}` is not admissible",
                join(names, &start_history)
            ))
        })?;
        Ok((states, edges, start))
    }
}

/// Step a mixed-radix counter; `false` once every combination was visited.
fn advance(digits: &mut [u32], radix: u32) -> bool {
    for digit in digits.iter_mut().rev() {
        *digit += 1;
        if *digit < radix {
            return true;
        }
        *digit = 0;
    }
    false
}

fn join(names: &[&str], ids: &[u32]) -> String {
    ids.iter()
        .map(|&id| names[id as usize])
        .collect::<Vec<_>>()
        .join(",")
}

/// Drop states the start state cannot reach and renumber the rest.
fn prune_unreachable(
    mut states: Vec<State>,
    edges: Vec<Transition>,
    start: u32,
) -> (Vec<State>, Vec<Transition>, u32) {
    let mut outgoing = vec![Vec::new(); states.len()];
    for edge in &edges {
        outgoing[edge.src as usize].push(edge.dst);
    }
    let mut reachable = vec![false; states.len()];
    let mut queue = VecDeque::from([start]);
    reachable[start as usize] = true;
    while let Some(s) = queue.pop_front() {
        for &d in &outgoing[s as usize] {
            if !reachable[d as usize] {
                reachable[d as usize] = true;
                queue.push_back(d);
            }
        }
    }

    let mut remap = vec![NO_EDGE; states.len()];
    let mut kept = Vec::new();
    for (old, state) in states.drain(..).enumerate() {
        if reachable[old] {
            remap[old] = kept.len() as u32;
            kept.push(state);
        }
    }
    let start = remap[start as usize];
    for (id, state) in kept.iter_mut().enumerate() {
        state.initial = if id as u32 == start {
            0.0
        } else {
            f64::NEG_INFINITY
        };
    }
    let edges = edges
        .into_iter()
        .filter(|e| reachable[e.src as usize])
        .map(|mut e| {
            e.src = remap[e.src as usize];
            e.dst = remap[e.dst as usize];
            e
        })
        .collect();
    (kept, edges, start)
}
