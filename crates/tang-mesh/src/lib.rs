//! tang-mesh — Data-parallel runs of tang-online learners.
//!
//! Each worker owns a [`Learner`](tang_online::Learner) and a shard of the
//! data. Workers that share a `span_server` endpoint join one reduction
//! group and average their weight tables at every pass boundary, so they
//! all leave each boundary with the same model.
//!
//! # Architecture
//!
//! ```text
//! Workers (threads)                  Coordinator (tokio task)
//! ┌────────────────┐   Contribute    ┌──────────────────┐
//! │ Learner        │ ──────────────→ │ gather `size`    │
//! │  └ GroupMember │ ←────────────── │ sum in rank      │
//! └────────────────┘     summed      │ order, reply     │
//!         ⋮                          └──────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use tang_mesh::DataParallel;
//! use tang_online::{Config, Example};
//!
//! let config = Config::default().with_adaptive(true).with_span_server("local");
//! let shards = vec![
//!     vec![Example::labeled(1.0).feature(b'a', 1, 1.0)],
//!     vec![Example::labeled(0.0).feature(b'a', 2, 1.0)],
//! ];
//! let reports = DataParallel::new(config).with_passes(3).fit(shards)?;
//! assert_eq!(reports[0].state.weights, reports[1].state.weights);
//! # Ok::<(), tang_mesh::MeshError>(())
//! ```

pub mod allreduce;
pub mod distributed;
pub mod error;
pub mod feed;
pub mod mesh;

// Re-exports
pub use allreduce::{AllReduceGroup, GroupMember};
pub use distributed::{DataParallel, WorkerReport};
pub use error::MeshError;
pub use feed::Feed;
pub use mesh::NodeId;
