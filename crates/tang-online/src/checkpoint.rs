//! Model persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LearnerError;

/// Bumped whenever [`ModelState`]'s layout changes.
pub const MODEL_VERSION: u32 = 1;

/// A self-describing snapshot of the weight table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub version: u32,
    pub num_bits: u32,
    pub stride: u32,
    pub eta: f32,
    pub pass: u64,
    /// Every cell of the table, with pending regularization applied.
    pub weights: Vec<f32>,
}

/// Whether `name` can be used as a checkpoint file name: non-empty, no path
/// separators, not `.` or `..`.
pub fn valid_name(name: &str) -> bool {
    !(name.is_empty() || name.contains(['/', '\\']) || name == "." || name == "..")
}

/// Destination for model snapshots.
///
/// `pass` is set for per-pass checkpoints and `None` for on-demand and final
/// ones.
pub trait Checkpoint: Send {
    fn save(&mut self, state: &ModelState, name: &str, pass: Option<u64>) -> Result<(), LearnerError>;
}

/// Writes postcard-encoded snapshots under a directory.
///
/// `name` lands at `<dir>/<name>`, a per-pass save at `<dir>/<name>.<pass>`.
#[derive(Clone, Debug)]
pub struct FileCheckpoint {
    dir: PathBuf,
}

impl FileCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str, pass: Option<u64>) -> Result<PathBuf, LearnerError> {
        if !valid_name(name) {
            return Err(LearnerError::Checkpoint(format!(
                "invalid checkpoint name {name:?}"
            )));
        }
        Ok(match pass {
            Some(pass) => self.dir.join(format!("{name}.{pass}")),
            None => self.dir.join(name),
        })
    }

    pub fn load(&self, name: &str, pass: Option<u64>) -> Result<ModelState, LearnerError> {
        let path = self.path(name, pass)?;
        let bytes = fs::read(&path)?;
        let state: ModelState = postcard::from_bytes(&bytes)?;
        if state.version != MODEL_VERSION {
            return Err(LearnerError::Checkpoint(format!(
                "{} has version {}, expected {MODEL_VERSION}",
                path.display(),
                state.version
            )));
        }
        Ok(state)
    }
}

impl Checkpoint for FileCheckpoint {
    fn save(&mut self, state: &ModelState, name: &str, pass: Option<u64>) -> Result<(), LearnerError> {
        let path = self.path(name, pass)?;
        fs::create_dir_all(&self.dir)?;
        let bytes = postcard::to_allocvec(state)?;
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), cells = state.weights.len(), "checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ModelState {
        ModelState {
            version: MODEL_VERSION,
            num_bits: 2,
            stride: 1,
            eta: 0.25,
            pass: 3,
            weights: vec![0.5, -1.0, 0.0, 2.0],
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = FileCheckpoint::new(dir.path());
        ckpt.save(&state(), "model", None).unwrap();
        assert!(dir.path().join("model").exists());
        assert_eq!(ckpt.load("model", None).unwrap(), state());
    }

    #[test]
    fn per_pass_saves_get_a_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = FileCheckpoint::new(dir.path());
        ckpt.save(&state(), "model", Some(2)).unwrap();
        assert!(dir.path().join("model.2").exists());
        assert!(!dir.path().join("model").exists());
    }

    #[test]
    fn rejects_path_like_names() {
        let ckpt = FileCheckpoint::new("/tmp");
        assert!(ckpt.path("../escape", None).is_err());
        assert!(ckpt.path("", None).is_err());
        assert!(ckpt.path("ok", None).is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = FileCheckpoint::new(dir.path());
        assert!(matches!(ckpt.load("absent", None), Err(LearnerError::Io(_))));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = FileCheckpoint::new(dir.path());
        let old = ModelState {
            version: MODEL_VERSION + 1,
            ..state()
        };
        ckpt.save(&old, "old", None).unwrap();
        assert!(matches!(ckpt.load("old", None), Err(LearnerError::Checkpoint(_))));
    }
}
