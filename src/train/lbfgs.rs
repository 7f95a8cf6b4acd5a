use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::evaluator::{Evaluator, Snapshot};
use super::objective::Objective;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::Model;

/// Why an optimization run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The gradient or objective delta test was met
    Converged,
    /// The iteration budget ran out
    IterationLimit,
    /// The caller raised the abort flag
    Aborted,
    /// The line search could not make progress; the best weights seen are kept
    Stalled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Converged => "converged",
            Self::IterationLimit => "iteration limit",
            Self::Aborted => "aborted",
            Self::Stalled => "stalled",
        })
    }
}

/// Shared flag that stops training at the next iteration boundary.
///
/// Clones refer to the same flag, so a handle can be moved to another
/// thread and raised while [`Trainer::train`](super::Trainer::train) runs.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lower the flag so the next training run can proceed.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Callbacks run by the driver at iteration boundaries.
pub(crate) struct Hooks<'h> {
    pub evaluators: &'h mut [Box<dyn Evaluator>],
    pub eval_period: usize,
    pub abort: &'h AbortHandle,
    /// Builds a model from a parameter vector, for evaluator snapshots
    pub snapshot: &'h dyn Fn(&[f64]) -> Model,
    /// Iterations completed by earlier runs (induction rounds)
    pub iteration_offset: usize,
}

impl Hooks<'_> {
    fn run_evaluators(&mut self, iteration: usize, loss: f64, gnorm: f64, weights: &[f64]) {
        if self.evaluators.is_empty() || iteration % self.eval_period != 0 {
            return;
        }
        let model = (self.snapshot)(weights);
        let snapshot = Snapshot {
            iteration,
            log_likelihood: -loss,
            gradient_norm: gnorm,
            model: &model,
        };
        for evaluator in self.evaluators.iter_mut() {
            for (name, value) in evaluator.evaluate(&snapshot) {
                info!(iteration, metric = %name, value, "evaluation");
            }
        }
    }
}

/// Result of one driver run.
#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    pub iterations: usize,
    /// Lowest loss evaluated
    pub loss: f64,
    pub stop: StopReason,
    /// Instances whose partition function was not finite at the kept weights
    pub failed: BTreeSet<usize>,
}

/// Minimize `objective` with L-BFGS starting from `weights`, for at most
/// `max_iterations` iterations.
///
/// On return `weights` holds the lowest-loss point evaluated, whatever the
/// reason the run stopped.
pub(crate) fn optimize(
    objective: &mut Objective<'_>,
    weights: &mut [f64],
    config: &Config,
    max_iterations: usize,
    hooks: &mut Hooks<'_>,
) -> Result<Outcome> {
    if hooks.abort.is_aborted() {
        let mut gradient = vec![0.0; weights.len()];
        let eval = objective.evaluate(weights, &mut gradient);
        return Ok(Outcome {
            iterations: 0,
            loss: eval.loss,
            stop: StopReason::Aborted,
            failed: eval.failed.into_iter().collect(),
        });
    }

    // Lowest loss seen, its weights and the instances that failed there
    let best: RefCell<Option<(f64, Vec<f64>, Vec<usize>)>> = RefCell::new(None);
    let latest = RefCell::new(weights.to_vec());
    let iterations = Cell::new(0usize);
    let abort = hooks.abort.clone();

    // Objective function: negative penalized log-likelihood
    let evaluate = |x: &[f64], gx: &mut [f64]| -> std::result::Result<f64, anyhow::Error> {
        let eval = objective.evaluate(x, gx);
        if !eval.loss.is_finite() {
            anyhow::bail!("objective is not finite");
        }
        let mut best = best.borrow_mut();
        if best.as_ref().map_or(true, |(loss, _, _)| eval.loss < *loss) {
            *best = Some((eval.loss, x.to_vec(), eval.failed));
        }
        latest.borrow_mut().copy_from_slice(x);
        Ok(eval.loss)
    };

    // Progress callback
    let progress = |prgr: &liblbfgs::Progress| -> bool {
        // One call per completed iteration; `prgr.niter` starts at zero
        let niter = iterations.get() + 1;
        iterations.set(niter);
        let iteration = hooks.iteration_offset + niter;
        info!(
            iteration,
            loss = prgr.fx,
            xnorm = prgr.xnorm,
            gnorm = prgr.gnorm,
            "L-BFGS iteration"
        );
        hooks.run_evaluators(iteration, prgr.fx, prgr.gnorm, &latest.borrow());
        // Returning true cancels the minimization
        abort.is_aborted()
    };

    let result = liblbfgs::lbfgs()
        .with_max_iterations(max_iterations)
        .with_epsilon(config.epsilon())
        .with_fx_delta(config.delta(), config.period())
        .with_max_linesearch(config.max_linesearch())
        .with_linesearch_algorithm(config.linesearch().to_liblbfgs_str())
        .minimize(weights, evaluate, progress);

    let iterations = iterations.get();
    let aborted = hooks.abort.is_aborted();
    let best = best.into_inner();
    let stop = match result {
        _ if aborted => StopReason::Aborted,
        _ if iterations >= max_iterations => StopReason::IterationLimit,
        Ok(_) => StopReason::Converged,
        Err(e) => {
            if best.is_none() {
                return Err(Error::Optimizer(e.to_string()));
            }
            warn!(error = %e, iterations, "L-BFGS stopped early, keeping the best weights");
            StopReason::Stalled
        }
    };

    let (loss, failed) = match best {
        Some((loss, x, failed)) => {
            weights.copy_from_slice(&x);
            (loss, failed.into_iter().collect())
        }
        None => (f64::INFINITY, BTreeSet::new()),
    };
    info!(iterations, loss, stop = %stop, "optimization finished");
    Ok(Outcome {
        iterations,
        loss,
        stop,
        failed,
    })
}
