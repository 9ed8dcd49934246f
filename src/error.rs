//! Error type for model construction and checkpoint handling.
//!
//! Forward passes do not return errors: a tensor with the wrong shape is a
//! programming error and panics with a `SHAPE ERROR:` message instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HutformerError {
    /// The configuration violates a divisibility or size constraint.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The mode string is neither `encoder` nor `decoder`.
    #[error("invalid mode `{0}`, expected `encoder` or `decoder`")]
    InvalidMode(String),

    /// A checkpoint could not be read or decoded.
    #[error("failed to load checkpoint {path:?}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, HutformerError>;
