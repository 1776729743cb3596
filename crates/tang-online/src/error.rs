//! Error types for tang-online.

use std::fmt;

/// Errors raised at the learner's boundaries.
///
/// Numerical faults inside the kernel (NaN predictions, degenerate
/// derivatives, zero gradients) are recovered locally and never show up here.
#[derive(Debug)]
pub enum LearnerError {
    /// Invalid or inconsistent configuration.
    Config(String),
    /// Cross-worker reduction failed.
    Reduce(String),
    /// A checkpoint could not be written or read back.
    Checkpoint(String),
    /// Filesystem error.
    Io(std::io::Error),
    /// Serialization/deserialization error.
    Serde(String),
    /// A buffer or model state did not have the expected length.
    ShapeMismatch { expected: usize, got: usize },
}

impl fmt::Display for LearnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Reduce(msg) => write!(f, "reduction failed: {msg}"),
            Self::Checkpoint(msg) => write!(f, "checkpoint failed: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Serde(msg) => write!(f, "serialization error: {msg}"),
            Self::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {expected} cells, got {got}")
            }
        }
    }
}

impl std::error::Error for LearnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LearnerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<postcard::Error> for LearnerError {
    fn from(e: postcard::Error) -> Self {
        Self::Serde(e.to_string())
    }
}
