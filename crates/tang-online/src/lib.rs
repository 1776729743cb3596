//! tang-online — online learning over hashed sparse features.
//!
//! A single [`Learner`] owns a flat weight table and consumes a stream of
//! examples one at a time: predict, score with a [`Loss`], compute the
//! update norm, apply the update. Optional per-feature adaptive rates,
//! normalized updates, lazy L1/L2 regularization and quadratic namespace
//! interactions all share one term traversal.
//!
//! # Architecture
//!
//! ```text
//! Example ──→ Predictor ──→ Loss ──→ Normalizer ──→ Updater
//!                │                      │              │
//!                └──────── WeightStore ─┴──────────────┘
//!                                 │
//!          pass boundary ──→ sync (AllReduce) ──→ Regularizer::materialize
//! ```
//!
//! # Quick start
//!
//! ```
//! use tang_online::{Config, Example, Learner};
//!
//! let mut learner = Learner::new(Config::default().with_bits(10)).unwrap();
//! let mut ex = Example::labeled(1.0).feature(b'a', 42, 1.0).with_constant();
//! learner.learn(&mut ex).unwrap();
//! assert!(learner.predict_only(&ex) > 0.0);
//! ```

pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod error;
pub mod example;
pub mod fastmath;
pub mod learner;
pub mod loss;
pub mod norm;
pub mod pass;
pub mod predict;
pub mod reduce;
pub mod regularizer;
pub mod stats;
pub mod update;
pub mod weights;

// Re-exports
pub use audit::{AuditEntry, AuditReport};
pub use checkpoint::{Checkpoint, FileCheckpoint, ModelState, MODEL_VERSION};
pub use config::{Config, KernelParams};
pub use driver::{drive, ExampleSource, Replay, RunSummary};
pub use error::LearnerError;
pub use example::{AuditName, Example, Feature, Item, Namespace, Origin, Term};
pub use learner::Learner;
pub use loss::{HingeLoss, LogisticLoss, Loss, LossKind, QuantileLoss, SquaredLoss};
pub use norm::Normalizer;
pub use pass::{PassBoundary, PassController};
pub use predict::{Predictor, Rescale};
pub use reduce::AllReduce;
pub use regularizer::{trunc_weight, Regularizer, REG_LAZY, REG_TRUNCATE};
pub use stats::{LabelRange, SharedData};
pub use weights::{Addressing, WeightStore};
