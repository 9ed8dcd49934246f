use burn::module::Module;
use burn::nn::Dropout;
use burn::prelude::*;
use burn::tensor::activation;

use crate::hutformer::architectures::base::init::DeterministicRngContext;

/// Scaled dot-product attention over per-head tensors, with a residual
/// connection back to the queries.
///
/// Inputs are laid out as [batch, length, heads, head_dim]; the output keeps
/// the query layout.
#[derive(Module, Clone, Debug)]
pub struct FullAttention {
    /// Explicit score scale; `None` means 1/sqrt(head_dim)
    scale: Option<f64>,
    dropout: Dropout,
}

impl FullAttention {
    pub fn new<B: Backend>(scale: Option<f64>, attention_dropout: f64, rng_ctx: &DeterministicRngContext<B>) -> Self {
        Self {
            scale,
            dropout: rng_ctx.dropout(attention_dropout),
        }
    }

    pub fn forward<B: Backend>(
        &self,
        queries: Tensor<B, 4>,
        keys: Tensor<B, 4>,
        values: Tensor<B, 4>,
        train: bool,
    ) -> Tensor<B, 4> {
        let [batch, len_q, heads, e] = queries.dims();
        let [k_batch, len_k, k_heads, k_e] = keys.dims();
        let [v_batch, len_v, v_heads, d] = values.dims();
        assert!(
            k_batch == batch && v_batch == batch && k_heads == heads && v_heads == heads,
            "SHAPE ERROR: attention batch/heads mismatch, queries {:?} keys {:?} values {:?}",
            [batch, len_q, heads, e],
            [k_batch, len_k, k_heads, k_e],
            [v_batch, len_v, v_heads, d]
        );
        assert!(
            k_e == e && len_v == len_k,
            "SHAPE ERROR: keys must match query width and value length, queries {:?} keys {:?} values {:?}",
            [batch, len_q, heads, e],
            [k_batch, len_k, k_heads, k_e],
            [v_batch, len_v, v_heads, d]
        );
        assert_eq!(
            d, e,
            "SHAPE ERROR: residual connection needs value width {} to equal query width {}",
            d, e
        );

        let scale = self.scale.unwrap_or(1.0 / (e as f64).sqrt());

        // [B, H, L, E] x [B, H, E, S] -> [B, H, L, S]
        let q = queries.clone().swap_dims(1, 2);
        let k = keys.swap_dims(1, 2);
        let scores = q.matmul(k.swap_dims(2, 3)) * scale;

        let attn = activation::softmax(scores, 3);
        let attn = if train { self.dropout.forward(attn) } else { attn };

        // [B, H, L, S] x [B, H, S, D] -> [B, L, H, D]
        let weighted = attn.matmul(values.swap_dims(1, 2)).swap_dims(1, 2);
        weighted + queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_output_keeps_query_layout() {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(0, device);
        let attention = FullAttention::new(None, 0.1, &ctx);

        let q = Tensor::<TestBackend, 4>::ones([2, 6, 4, 8], ctx.device());
        let kv = Tensor::<TestBackend, 4>::ones([2, 10, 4, 8], ctx.device());
        let out = attention.forward(q, kv.clone(), kv, false);
        assert_eq!(out.dims(), [2, 6, 4, 8]);
    }

    #[test]
    fn test_uniform_keys_average_values() {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(0, device);
        let attention = FullAttention::new(None, 0.0, &ctx);

        // Identical keys give uniform weights, so the output is mean(values) + queries.
        let q = Tensor::<TestBackend, 4>::zeros([1, 1, 1, 2], ctx.device());
        let k = Tensor::<TestBackend, 4>::ones([1, 2, 1, 2], ctx.device());
        let v = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0, 4.0], ctx.device()).reshape([1, 2, 1, 2]);

        let out: Vec<f32> = attention.forward(q, k, v, false).into_data().to_vec().unwrap();
        assert!((out[0] - 2.0).abs() < 1e-6);
        assert!((out[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_explicit_scale_sharpens_weights() {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(0, device);
        let soft = FullAttention::new(Some(0.01), 0.0, &ctx);
        let sharp = FullAttention::new(Some(100.0), 0.0, &ctx);

        let q = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0], ctx.device()).reshape([1, 1, 1, 2]);
        let k = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 0.0, 0.0], ctx.device()).reshape([1, 2, 1, 2]);
        let v = Tensor::<TestBackend, 1>::from_floats([10.0, 0.0, 0.0, 0.0], ctx.device()).reshape([1, 2, 1, 2]);

        let soft_out: Vec<f32> = soft.forward(q.clone(), k.clone(), v.clone(), false).into_data().to_vec().unwrap();
        let sharp_out: Vec<f32> = sharp.forward(q, k, v, false).into_data().to_vec().unwrap();
        // Sharp weights pick the first value almost exclusively: 10 + 1 from the residual.
        assert!((sharp_out[0] - 11.0).abs() < 1e-3);
        assert!(soft_out[0] < sharp_out[0]);
    }

    #[test]
    #[should_panic(expected = "SHAPE ERROR: residual connection")]
    fn test_rejects_mismatched_value_width() {
        let device = Default::default();
        let ctx = DeterministicRngContext::<TestBackend>::new(0, device);
        let attention = FullAttention::new(None, 0.0, &ctx);

        let q = Tensor::<TestBackend, 4>::ones([1, 3, 2, 4], ctx.device());
        let k = Tensor::<TestBackend, 4>::ones([1, 5, 2, 4], ctx.device());
        let v = Tensor::<TestBackend, 4>::ones([1, 5, 2, 6], ctx.device());
        attention.forward(q, k, v, false);
    }
}
