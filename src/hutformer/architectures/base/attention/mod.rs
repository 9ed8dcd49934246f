pub mod attention_layer;
pub mod full_attention;
pub mod window_attention;

pub use attention_layer::AttentionLayer;
pub use full_attention::FullAttention;
pub use window_attention::{WindowAttention, WindowAttentionConfig};

use burn::prelude::*;

/// Divide by the L2 norm along `dim`; the norm is floored at 1e-12.
pub(crate) fn l2_normalize<B: Backend, const D: usize>(x: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let norm = (x.clone() * x.clone()).sum_dim(dim).sqrt().clamp_min(1e-12);
    x / norm
}
