//! hut-former-rs: HUTformer (hierarchical U-net transformer) for long-horizon
//! spatio-temporal forecasting over sensor graphs, built on burn.

pub mod error;
pub mod hutformer;

pub use error::{HutformerError, Result};
pub use hutformer::settings::{settings, Settings};
pub use hutformer::{HUTformer, HutformerConfig, Mode, ParameterGroup, RestoreReport};

/// Test utilities for building deterministic input tensors
pub mod test_utils;
