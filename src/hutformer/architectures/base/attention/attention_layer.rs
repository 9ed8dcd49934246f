use burn::module::Module;
use burn::nn::LayerNorm;
use burn::prelude::*;

use super::FullAttention;
use crate::hutformer::architectures::base::init::{DeterministicLinear, DeterministicRngContext};

/// Multi-head cross attention block used by the decoder.
///
/// Queries, keys and values pass through one shared LayerNorm (applied to
/// each separately), are projected and split into heads, attended with
/// [`FullAttention`], and merged back. The merged result goes through a
/// post-norm projection with a residual: `out_projection(norm_1(out)) + out`.
#[derive(Module, Debug)]
pub struct AttentionLayer<B: Backend> {
    inner_attention: FullAttention,
    query_projection: DeterministicLinear<B>,
    key_projection: DeterministicLinear<B>,
    value_projection: DeterministicLinear<B>,
    out_projection: DeterministicLinear<B>,
    norm: LayerNorm<B>,
    norm_1: LayerNorm<B>,
    n_heads: usize,
    /// Merge heads from [H, L, D] order (true), interleaving heads across
    /// tokens, or keep each token's heads as contiguous [L, H, D] blocks (false)
    mix: bool,
}

impl<B: Backend> AttentionLayer<B> {
    /// `d_keys`/`d_values` default to `d_model / n_heads`.
    pub fn new(
        d_model: usize,
        n_heads: usize,
        d_keys: Option<usize>,
        d_values: Option<usize>,
        mix: bool,
        dropout: f64,
        rng_ctx: &DeterministicRngContext<B>,
    ) -> Self {
        assert!(n_heads > 0, "n_heads must be positive");
        let d_keys = d_keys.unwrap_or(d_model / n_heads);
        let d_values = d_values.unwrap_or(d_model / n_heads);
        // Both residual paths add tensors of these widths.
        assert_eq!(
            d_values * n_heads,
            d_model,
            "d_values * n_heads ({} * {}) must equal d_model {}",
            d_values,
            n_heads,
            d_model
        );
        assert_eq!(d_keys, d_values, "d_keys {} must equal d_values {}", d_keys, d_values);

        Self {
            inner_attention: FullAttention::new(None, dropout, rng_ctx),
            query_projection: rng_ctx.linear(d_model, d_keys * n_heads, true, 1),
            key_projection: rng_ctx.linear(d_model, d_keys * n_heads, true, 2),
            value_projection: rng_ctx.linear(d_model, d_values * n_heads, true, 3),
            out_projection: rng_ctx.linear(d_values * n_heads, d_model, true, 4),
            norm: rng_ctx.layer_norm(d_model),
            norm_1: rng_ctx.layer_norm(d_model),
            n_heads,
            mix,
        }
    }

    pub fn d_model(&self) -> usize {
        self.query_projection.input_dim()
    }

    /// `queries` is [B, L, d_model]; `keys` and `values` are [B, S, d_model].
    /// Returns [B, L, d_model].
    pub fn forward(&self, queries: Tensor<B, 3>, keys: Tensor<B, 3>, values: Tensor<B, 3>, train: bool) -> Tensor<B, 3> {
        let [batch, len_q, d_q] = queries.dims();
        let [k_batch, len_k, d_k] = keys.dims();
        let [v_batch, len_v, d_v] = values.dims();
        let d_model = self.d_model();
        assert!(
            d_q == d_model && d_k == d_model && d_v == d_model,
            "SHAPE ERROR: attention layer expects width {}, got queries {:?} keys {:?} values {:?}",
            d_model,
            [batch, len_q, d_q],
            [k_batch, len_k, d_k],
            [v_batch, len_v, d_v]
        );
        assert!(
            k_batch == batch && v_batch == batch && len_v == len_k,
            "SHAPE ERROR: attention layer batch/length mismatch, queries {:?} keys {:?} values {:?}",
            [batch, len_q, d_q],
            [k_batch, len_k, d_k],
            [v_batch, len_v, d_v]
        );

        let heads = self.n_heads;
        let queries = self.norm.forward(queries);
        let keys = self.norm.forward(keys);
        let values = self.norm.forward(values);

        let queries = self
            .query_projection
            .forward(queries)
            .reshape([batch, len_q, heads, self.query_projection.output_dim() / heads]);
        let keys = self
            .key_projection
            .forward(keys)
            .reshape([batch, len_k, heads, self.key_projection.output_dim() / heads]);
        let values = self
            .value_projection
            .forward(values)
            .reshape([batch, len_k, heads, self.value_projection.output_dim() / heads]);

        let out = merge_heads(self.inner_attention.forward(queries, keys, values, train), self.mix);

        self.out_projection.forward(self.norm_1.forward(out.clone())) + out
    }
}

/// Flattens [B, L, H, D] attention output to [B, L, H * D].
fn merge_heads<B: Backend>(out: Tensor<B, 4>, mix: bool) -> Tensor<B, 3> {
    let [batch, len, heads, dim] = out.dims();
    let out = if mix { out.swap_dims(1, 2) } else { out };
    out.reshape([batch, len, heads * dim])
}
