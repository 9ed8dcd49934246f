use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{HutformerError, Result};

/// Which half of the network runs at forward time.
///
/// `Decoder` is a strict superset of `Encoder`: the encoder stages always run
/// first and the decoder refines their prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Encoder,
    Decoder,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Encoder
    }
}

impl FromStr for Mode {
    type Err = HutformerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "encoder" => Ok(Mode::Encoder),
            "decoder" => Ok(Mode::Decoder),
            _ => Err(HutformerError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Encoder => write!(f, "encoder"),
            Mode::Decoder => write!(f, "decoder"),
        }
    }
}

/// Configuration for the HUTformer model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HutformerConfig {
    /// Number of spatial nodes (sensors) in the graph
    #[serde(default = "default_num_nodes")]
    pub num_nodes: usize,

    /// Number of historical time steps fed to the encoder
    #[serde(default = "default_len_hist")]
    pub len_hist: usize,

    /// Number of future time steps to predict
    #[serde(default = "default_len_pred")]
    pub len_pred: usize,

    /// Number of time steps per patch
    #[serde(default = "default_len_patch")]
    pub len_patch: usize,

    #[serde(default)]
    pub mode: Mode,

    /// Attention heads used by every window and cross attention block
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,

    /// Per-patch embedding width at the first resolution level
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,

    /// Width of the learned per-node spatial embedding
    #[serde(default = "default_dim_se")]
    pub dim_se: usize,

    #[serde(default = "default_dropout")]
    pub dropout: f64,

    /// Auxiliary covariate channels following the target channel
    /// (e.g. time of day, day of week)
    #[serde(default = "default_num_covariates")]
    pub num_covariates: usize,

    /// Hidden width of the continuous relative position bias MLP
    #[serde(default = "default_cpb_hidden")]
    pub cpb_hidden: usize,

    /// Encoder checkpoint restored before the decoder is attached
    #[serde(default)]
    pub pretrained_checkpoint: Option<PathBuf>,

    /// Seed for deterministic parameter initialization
    #[serde(default)]
    pub seed: u64,
}

// Default value functions
fn default_num_nodes() -> usize { 207 }
fn default_len_hist() -> usize { 288 }
fn default_len_pred() -> usize { 288 }
fn default_len_patch() -> usize { 12 }
fn default_num_heads() -> usize { 8 }
fn default_embed_dim() -> usize { 64 }
fn default_dim_se() -> usize { 16 }
fn default_dropout() -> f64 { 0.1 }
fn default_num_covariates() -> usize { 2 }
fn default_cpb_hidden() -> usize { 512 }

impl Default for HutformerConfig {
    fn default() -> Self {
        Self {
            num_nodes: default_num_nodes(),
            len_hist: default_len_hist(),
            len_pred: default_len_pred(),
            len_patch: default_len_patch(),
            mode: Mode::default(),
            num_heads: default_num_heads(),
            embed_dim: default_embed_dim(),
            dim_se: default_dim_se(),
            dropout: default_dropout(),
            num_covariates: default_num_covariates(),
            cpb_hidden: default_cpb_hidden(),
            pretrained_checkpoint: None,
            seed: 0,
        }
    }
}

impl HutformerConfig {
    pub fn new(num_nodes: usize, len_hist: usize, len_pred: usize, len_patch: usize, mode: Mode) -> Self {
        Self {
            num_nodes,
            len_hist,
            len_pred,
            len_patch,
            mode,
            ..Default::default()
        }
    }

    pub fn with_pretrained_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.pretrained_checkpoint = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of patches the history window is cut into.
    pub fn num_patch(&self) -> usize {
        self.len_hist / self.len_patch
    }

    /// Width of the fused spatio-temporal representation (`num_patch * embed_dim`).
    pub fn dim_u(&self) -> usize {
        self.num_patch() * self.embed_dim
    }

    /// Input width of the STPE projection: patch embeddings, spatial embedding
    /// and the latest covariates.
    pub fn stpe_input_dim(&self) -> usize {
        self.dim_u() + self.dim_se + self.num_covariates
    }

    /// Channels expected on the last axis of history/future tensors.
    pub fn num_channels(&self) -> usize {
        self.num_covariates + 1
    }

    /// Validate consistency of configuration
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("num_nodes", self.num_nodes),
            ("len_hist", self.len_hist),
            ("len_pred", self.len_pred),
            ("len_patch", self.len_patch),
            ("num_heads", self.num_heads),
            ("embed_dim", self.embed_dim),
            ("dim_se", self.dim_se),
            ("cpb_hidden", self.cpb_hidden),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(HutformerError::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        if self.len_hist % self.len_patch != 0 {
            return Err(HutformerError::InvalidConfig(format!(
                "len_hist {} is not a multiple of len_patch {}",
                self.len_hist, self.len_patch
            )));
        }
        if self.len_pred % self.len_patch != 0 {
            return Err(HutformerError::InvalidConfig(format!(
                "len_pred {} is not a multiple of len_patch {}",
                self.len_pred, self.len_patch
            )));
        }

        // Two merges plus a (2, num_patch / 8) window at the coarsest level.
        let num_patch = self.num_patch();
        if num_patch % 8 != 0 {
            return Err(HutformerError::InvalidConfig(format!(
                "num_patch {} must be divisible by 8 to support three resolution levels",
                num_patch
            )));
        }

        for width in [self.embed_dim, 2 * self.embed_dim, 4 * self.embed_dim] {
            if width % self.num_heads != 0 {
                return Err(HutformerError::InvalidConfig(format!(
                    "stage width {} is not divisible by num_heads {}",
                    width, self.num_heads
                )));
            }
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(HutformerError::InvalidConfig(format!(
                "dropout {} must lie in [0, 1)",
                self.dropout
            )));
        }

        if self.mode == Mode::Decoder && self.len_pred != self.len_hist {
            return Err(HutformerError::InvalidConfig(format!(
                "decoder mode re-patches the prediction with the history geometry, \
                 so len_pred ({}) must equal len_hist ({})",
                self.len_pred, self.len_hist
            )));
        }

        Ok(())
    }
}
