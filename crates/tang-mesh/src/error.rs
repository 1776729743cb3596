//! Error types for tang-mesh.

use std::fmt;

use tang_online::LearnerError;

use crate::mesh::NodeId;

/// Errors that can occur while reducing across workers or running them.
#[derive(Debug)]
pub enum MeshError {
    /// A member left the group, so the pending round can never complete.
    GroupClosed,
    /// No workers available.
    NoWorkers,
    /// Contributions to one round disagree in length.
    SizeMismatch { expected: usize, got: usize },
    /// A worker thread panicked.
    WorkerPanicked(NodeId),
    /// A worker was handed no examples.
    EmptyShard(NodeId),
    /// The async runtime could not be started.
    Runtime(String),
    /// The learner itself failed.
    Learner(LearnerError),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupClosed => write!(f, "reduction group closed"),
            Self::NoWorkers => write!(f, "no workers available"),
            Self::SizeMismatch { expected, got } => {
                write!(f, "buffer size mismatch: expected {expected}, got {got}")
            }
            Self::WorkerPanicked(id) => write!(f, "{id} panicked"),
            Self::EmptyShard(id) => write!(f, "{id} has an empty shard"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::Learner(e) => write!(f, "learner error: {e}"),
        }
    }
}

impl std::error::Error for MeshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Learner(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LearnerError> for MeshError {
    fn from(e: LearnerError) -> Self {
        Self::Learner(e)
    }
}

impl From<MeshError> for LearnerError {
    fn from(e: MeshError) -> Self {
        match e {
            MeshError::Learner(e) => e,
            other => LearnerError::Reduce(other.to_string()),
        }
    }
}
