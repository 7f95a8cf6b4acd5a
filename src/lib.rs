//! Linear-chain Conditional Random Fields (CRF) over Markov-order state lattices
//!
//! This library trains linear-chain CRFs with L-BFGS, optionally on several
//! threads and with feature induction, and applies them with Viterbi or
//! n-best decoding. Label histories of any order are compiled into a state
//! lattice, with backoff orders tying weights and regex or closure filters
//! removing transitions.
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use seqcrf::{Attribute, Trainer};
//!
//! let mut trainer = Trainer::new();
//! trainer.set("orders", "1")?;
//! trainer.set("forbidden", "O,I-.*")?;
//!
//! let xseq = vec![
//!     vec![Attribute::new("walk", 1.0)],
//!     vec![Attribute::new("shop", 1.0)],
//! ];
//! let yseq = vec!["O", "B-PLACE"];
//! trainer.append(&xseq, &yseq)?;
//!
//! trainer.set("variance", "1.0")?;
//! let trained = trainer.train()?;
//! println!("{} iterations", trained.report.iterations);
//! # Ok::<(), seqcrf::Error>(())
//! ```
//!
//! ## Prediction
//!
//! ```no_run
//! # fn model() -> seqcrf::Model { unimplemented!() }
//! use seqcrf::Attribute;
//!
//! let model = model();
//! let tagger = model.tagger();
//!
//! let xseq = vec![
//!     vec![Attribute::new("walk", 1.0)],
//!     vec![Attribute::new("shop", 1.0)],
//! ];
//! let labels = tagger.tag(&xseq)?;
//! for answer in tagger.tag_nbest(&xseq, 3)? {
//!     println!("{:?} {}", answer.labels, answer.score);
//! }
//! # Ok::<(), seqcrf::Error>(())
//! ```

mod alphabet;
mod attribute;
mod config;
mod context;
pub mod dataset;
mod error;
mod lattice;
mod model;
mod nbest;
mod tagger;
mod weights;

/// Training module containing all components for training CRF models
pub mod train;

// Re-export main types
pub use self::alphabet::Alphabet;
pub use self::attribute::{token, Attribute};
pub use self::config::{Config, LineSearchAlgorithm, TransitionFilter};
pub use self::error::{Error, InstanceError, Result, SkippedInstance};
pub use self::lattice::{Lattice, LatticeBuilder, State, Transition};
pub use self::model::{Conjunction, Model};
pub use self::tagger::{Labeling, Tagger};
pub use self::weights::{support_counts, WeightPolicy, WeightStore};

// Re-export training types for convenience
pub use self::train::{Trained, Trainer, TrainingReport};
