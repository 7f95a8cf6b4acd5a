use std::ops::Range;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::context::{Context, Flag};
use crate::dataset::Instance;
use crate::error::{Error, Result};
use crate::lattice::Lattice;
use crate::weights::WeightStore;

/// A training instance that has an admissible gold path.
#[derive(Debug, Clone)]
pub(crate) struct Sample {
    /// Index into the trainer's instance list
    pub index: usize,
    /// Transition taken at every position
    pub gold: Vec<u32>,
}

/// Loss and failures of one objective evaluation. The gradient is written
/// into the caller's buffer.
#[derive(Debug, Clone, Default)]
pub(crate) struct Evaluation {
    /// Negative penalized log-likelihood
    pub loss: f64,
    /// Instances whose partition function or gold score was not finite
    pub failed: Vec<usize>,
}

/// Computes loss and gradient over one contiguous partition of samples.
struct Worker {
    range: Range<usize>,
    ctx: Context,
    gradient: Vec<f64>,
    /// Per-group marginal mass of the current token (work space)
    group_mass: Vec<f64>,
}

impl Worker {
    fn new(range: Range<usize>, lattice: &Lattice, store: &WeightStore) -> Self {
        Self {
            range,
            ctx: Context::new(Flag::MARGINALS, lattice, store),
            gradient: vec![0.0; store.num_parameters()],
            group_mass: vec![0.0; store.num_groups()],
        }
    }

    /// Accumulate `expected - observed` counts and the negative
    /// log-likelihood of this worker's samples.
    fn run(
        &mut self,
        lattice: &Lattice,
        store: &WeightStore,
        weights: &[f64],
        instances: &[Instance],
        samples: &[Sample],
    ) -> (f64, Vec<usize>) {
        self.gradient.fill(0.0);
        let mut loss = 0.0;
        let mut failed = Vec::new();

        for sample in &samples[self.range.clone()] {
            let inst = &instances[sample.index];
            let inst_weight = inst.weight;

            self.ctx.compute_scores(lattice, store, weights, inst);
            let log_z = self.ctx.forward(lattice);
            let gold_score = self.ctx.path_score(lattice, &sample.gold);
            if !log_z.is_finite() || !gold_score.is_finite() {
                failed.push(sample.index);
                continue;
            }
            self.ctx.backward(lattice);
            loss -= (gold_score - log_z) * inst_weight;

            for (t, item) in inst.items.iter().enumerate() {
                // Model expectations, pooled per weight group
                self.group_mass.fill(0.0);
                for e in 0..lattice.num_edges() as u32 {
                    let p = self.ctx.edge_marginal(lattice, t, e);
                    if p > 0.0 {
                        for &g in store.edge_groups(e) {
                            self.group_mass[g as usize] += p;
                        }
                    }
                }
                for (g, &mass) in self.group_mass.iter().enumerate() {
                    if mass > 0.0 {
                        store.accumulate(&mut self.gradient, g as u32, item, mass * inst_weight);
                    }
                }

                // Empirical counts along the gold path
                for &g in store.edge_groups(sample.gold[t]) {
                    store.accumulate(&mut self.gradient, g, item, -inst_weight);
                }
            }
        }
        (loss, failed)
    }
}

/// The penalized negative log-likelihood over a training set, evaluated by
/// one worker per partition.
///
/// With more than one thread, partitions run on a dedicated thread pool
/// against the same read-only weights; their losses and gradients are
/// summed in partition order once all of them have finished.
pub(crate) struct Objective<'a> {
    lattice: &'a Lattice,
    store: &'a WeightStore,
    instances: &'a [Instance],
    samples: &'a [Sample],
    variance: f64,
    workers: Vec<Worker>,
    pool: Option<ThreadPool>,
}

impl<'a> Objective<'a> {
    pub fn new(
        lattice: &'a Lattice,
        store: &'a WeightStore,
        instances: &'a [Instance],
        samples: &'a [Sample],
        variance: f64,
        threads: usize,
    ) -> Result<Self> {
        let threads = threads.max(1).min(samples.len().max(1));
        let chunk = samples.len().div_ceil(threads).max(1);
        let workers = (0..threads)
            .map(|i| {
                let start = (i * chunk).min(samples.len());
                let end = ((i + 1) * chunk).min(samples.len());
                Worker::new(start..end, lattice, store)
            })
            .collect();
        let pool = if threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| Error::Optimizer(format!("failed to start workers: {}", e)))?,
            )
        } else {
            None
        };
        Ok(Self {
            lattice,
            store,
            instances,
            samples,
            variance,
            workers,
            pool,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Evaluate the loss at `weights`, writing its gradient into `gradient`.
    pub fn evaluate(&mut self, weights: &[f64], gradient: &mut [f64]) -> Evaluation {
        let (lattice, store, instances, samples) =
            (self.lattice, self.store, self.instances, self.samples);

        let partials: Vec<(f64, Vec<usize>)> = match &self.pool {
            Some(pool) => {
                let workers = &mut self.workers;
                pool.install(|| {
                    workers
                        .par_iter_mut()
                        .map(|w| w.run(lattice, store, weights, instances, samples))
                        .collect()
                })
            }
            None => self
                .workers
                .iter_mut()
                .map(|w| w.run(lattice, store, weights, instances, samples))
                .collect(),
        };

        let mut eval = Evaluation::default();
        gradient.fill(0.0);
        for (worker, (loss, failed)) in self.workers.iter().zip(partials) {
            eval.loss += loss;
            eval.failed.extend(failed);
            for (g, &w) in gradient.iter_mut().zip(&worker.gradient) {
                *g += w;
            }
        }

        // Gaussian prior, added once per evaluation
        let inv_var = 1.0 / self.variance;
        for (g, &w) in gradient.iter_mut().zip(weights) {
            *g += w * inv_var;
            eval.loss += 0.5 * w * w * inv_var;
        }
        eval
    }
}
