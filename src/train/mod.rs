//! Training module for CRF models
//!
//! This module contains the components needed to train a CRF: the
//! objective and its gradient, the L-BFGS driver, feature induction,
//! periodic evaluation, and the [`Trainer`] that ties them together.

mod evaluator;
mod induction;
mod lbfgs;
mod objective;
mod trainer;

// Re-export public types
pub use self::evaluator::{Evaluator, Metrics, SegmentAccuracy, Snapshot, TokenAccuracy};
pub use self::induction::{Candidate, ConjunctionInducer, FeatureInducer};
pub use self::lbfgs::{AbortHandle, StopReason};
pub use self::trainer::{Trained, Trainer, TrainingReport};
