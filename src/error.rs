use std::fmt;

use thiserror::Error;

/// Errors raised while configuring, training or applying a CRF.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is inconsistent. Raised before any work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A parameter value is out of range or could not be parsed.
    #[error("{0}")]
    InvalidParameter(String),

    /// A parameter name passed to `set` is not recognized.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// A forbidden or allowed transition pattern failed to compile.
    #[error("invalid transition pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Feature induction was requested together with multi-threaded training.
    #[error("feature induction is not supported with {threads} training threads")]
    InductionWithThreads { threads: usize },

    /// A training or decoding input is malformed.
    #[error("{0}")]
    InvalidInput(String),

    /// A label was looked up in a frozen alphabet and is unknown.
    #[error("alphabet is frozen, unknown entry `{0}`")]
    FrozenAlphabet(String),

    /// Training was requested without any instance.
    #[error("no training data")]
    NoData,

    /// Every training instance was rejected.
    #[error("no usable training instance, {} skipped", .skipped.len())]
    NoUsableInstances { skipped: Vec<SkippedInstance> },

    /// The optimizer failed before producing usable weights.
    #[error("L-BFGS error: {0}")]
    Optimizer(String),

    /// No admissible label sequence exists for the input.
    #[error("no admissible path through the lattice")]
    NoPath,

    /// A decoded sequence does not line up with its input.
    #[error("decoded {actual} labels for an input of length {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single instance could not take part in training.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceError {
    /// The observed labels leave the lattice at `position`.
    Inadmissible { position: usize, label: String },
    /// The partition function or the gold score is not finite.
    NonFinite,
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceError::Inadmissible { position, label } => write!(
                f,
                "label `{}` at position {} has no admissible transition",
                label, position
            ),
            InstanceError::NonFinite => f.write_str("partition function is not finite"),
        }
    }
}

/// A training instance that was left out, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedInstance {
    /// Index of the instance in append order
    pub index: usize,
    pub reason: InstanceError,
}

impl fmt::Display for SkippedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {}: {}", self.index, self.reason)
    }
}
