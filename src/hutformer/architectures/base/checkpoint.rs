//! Checkpoint files and partial restore bookkeeping.

use std::fmt;
use std::path::Path;

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder};

use crate::error::{HutformerError, Result};

/// File format for every checkpoint the model reads or writes.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

pub fn recorder() -> CheckpointRecorder {
    CheckpointRecorder::new()
}

/// Load a record of any module type from `path`.
pub fn load_record<B: Backend, R: Record<B>>(path: &Path, device: &B::Device) -> Result<R> {
    recorder()
        .load(path.to_path_buf(), device)
        .map_err(|err| HutformerError::Checkpoint {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Outcome of restoring a subset of components from a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Components whose parameters were taken from the checkpoint
    pub restored: Vec<String>,
    /// Components the model has but the restore did not cover; they keep
    /// their fresh initialization
    pub missing: Vec<String>,
    /// Components present in the checkpoint that the restore skipped
    pub ignored: Vec<String>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "restored {} component(s), {} missing [{}], {} ignored [{}]",
            self.restored.len(),
            self.missing.len(),
            self.missing.join(", "),
            self.ignored.len(),
            self.ignored.join(", ")
        )
    }
}
