use burn::module::Module;
use burn::nn::LayerNorm;
use burn::prelude::*;

use super::init::DeterministicRngContext;

/// Halve the sequence length by concatenating adjacent pairs of tokens
/// ([B, 2p, d] -> [B, p, 2d]), then LayerNorm over the doubled width.
#[derive(Module, Debug)]
pub struct SegmentMerging<B: Backend> {
    dim: usize,
    norm: LayerNorm<B>,
}

impl<B: Backend> SegmentMerging<B> {
    pub fn new(dim: usize, rng_ctx: &DeterministicRngContext<B>) -> Self {
        Self {
            dim,
            norm: rng_ctx.layer_norm(2 * dim),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, len, dim] = x.dims();
        assert!(
            dim == self.dim && len % 2 == 0,
            "SHAPE ERROR: segment merging expects [*, even length, {}], got {:?}",
            self.dim,
            [batch, len, dim]
        );
        self.norm.forward(x.reshape([batch, len / 2, 2 * dim]))
    }
}
