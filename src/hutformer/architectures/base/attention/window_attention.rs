//! Window multi-head self attention with a continuous relative position bias.
//!
//! Attention scores are cosine similarities scaled by a learned per-head
//! temperature. The position bias is not a lookup table of free parameters:
//! a small MLP maps log-spaced relative coordinates to one bias per head, so
//! a module trained on one window size can be reused with another.

use burn::module::{Module, Param};
use burn::nn::Dropout;
use burn::prelude::*;
use burn::tensor::activation;

use super::l2_normalize;
use crate::hutformer::architectures::base::init::{DeterministicLinear, DeterministicRngContext};

/// Upper bound applied to the learned logit scale before exponentiation, `ln(1 / 0.01)`.
pub const LOGIT_SCALE_MAX: f64 = 4.605170185988092;

/// Construction parameters for [`WindowAttention`].
#[derive(Debug, Clone)]
pub struct WindowAttentionConfig {
    /// Number of input channels
    pub dim: usize,
    /// Height and width of the window; tokens per window is their product
    pub window_size: [usize; 2],
    pub num_heads: usize,
    /// Learn a bias for queries and values (keys never get one)
    pub qkv_bias: bool,
    pub attn_drop: f64,
    pub proj_drop: f64,
    /// Window size used in pre-training; `[0, 0]` means "same as `window_size`"
    pub pretrained_window_size: [usize; 2],
    /// Hidden width of the position bias MLP
    pub cpb_hidden: usize,
}

impl WindowAttentionConfig {
    pub fn new(dim: usize, window_size: [usize; 2], num_heads: usize) -> Self {
        Self {
            dim,
            window_size,
            num_heads,
            qkv_bias: true,
            attn_drop: 0.0,
            proj_drop: 0.0,
            pretrained_window_size: [0, 0],
            cpb_hidden: 512,
        }
    }

    pub fn with_qkv_bias(mut self, qkv_bias: bool) -> Self {
        self.qkv_bias = qkv_bias;
        self
    }

    pub fn with_dropout(mut self, attn_drop: f64, proj_drop: f64) -> Self {
        self.attn_drop = attn_drop;
        self.proj_drop = proj_drop;
        self
    }

    pub fn with_pretrained_window_size(mut self, pretrained_window_size: [usize; 2]) -> Self {
        self.pretrained_window_size = pretrained_window_size;
        self
    }

    pub fn with_cpb_hidden(mut self, cpb_hidden: usize) -> Self {
        self.cpb_hidden = cpb_hidden;
        self
    }

    pub fn init<B: Backend>(&self, rng_ctx: &DeterministicRngContext<B>) -> WindowAttention<B> {
        WindowAttention::new(self, rng_ctx)
    }
}

/// Log-spaced relative coordinates for every offset inside a window.
///
/// Returns `(2h-1) * (2w-1)` rows of `[dy, dx]`, row-major over `dy`. Offsets
/// are normalized by the (pretrained or live) window extent minus one,
/// stretched to `[-8, 8]` and compressed with `sign(x) * log2(|x| + 1) / log2(8)`.
pub fn relative_coords_table(window_size: [usize; 2], pretrained_window_size: [usize; 2]) -> Vec<f32> {
    let [wh, ww] = window_size;
    let extent = if pretrained_window_size[0] > 0 {
        pretrained_window_size
    } else {
        window_size
    };
    // An extent of one only has the zero offset; keep it finite.
    let norm_h = extent[0].saturating_sub(1).max(1) as f64;
    let norm_w = extent[1].saturating_sub(1).max(1) as f64;

    let compress = |x: f64| x.signum() * (x.abs() + 1.0).log2() / 8f64.log2();

    let mut table = Vec::with_capacity((2 * wh - 1) * (2 * ww - 1) * 2);
    for dy in -(wh as i64 - 1)..=(wh as i64 - 1) {
        for dx in -(ww as i64 - 1)..=(ww as i64 - 1) {
            table.push(compress(dy as f64 / norm_h * 8.0) as f32);
            table.push(compress(dx as f64 / norm_w * 8.0) as f32);
        }
    }
    table
}

/// Row of the bias table for every (query, key) pair inside a window,
/// flattened to `(h*w) * (h*w)` entries.
pub fn relative_position_index(window_size: [usize; 2]) -> Vec<i64> {
    let [wh, ww] = window_size;
    let tokens = wh * ww;
    let mut index = Vec::with_capacity(tokens * tokens);
    for query in 0..tokens {
        let (qy, qx) = ((query / ww) as i64, (query % ww) as i64);
        for key in 0..tokens {
            let (ky, kx) = ((key / ww) as i64, (key % ww) as i64);
            let dy = qy - ky + (wh as i64 - 1);
            let dx = qx - kx + (ww as i64 - 1);
            index.push(dy * (2 * ww as i64 - 1) + dx);
        }
    }
    index
}

/// Window based multi-head self attention (W-MSA).
#[derive(Module, Debug)]
pub struct WindowAttention<B: Backend> {
    dim: usize,
    window_height: usize,
    window_width: usize,
    pretrained_height: usize,
    pretrained_width: usize,
    num_heads: usize,

    /// Per-head log temperature, shape [num_heads, 1, 1]
    logit_scale: Param<Tensor<B, 3>>,
    cpb_fc1: DeterministicLinear<B>,
    cpb_fc2: DeterministicLinear<B>,

    // Fixed for the module's lifetime.
    relative_coords_table: Tensor<B, 2>,
    /// Bias table row per (query, key) pair, shape [N, N]
    relative_position_index: Tensor<B, 2, Int>,

    qkv: DeterministicLinear<B>,
    q_bias: Option<Param<Tensor<B, 1>>>,
    v_bias: Option<Param<Tensor<B, 1>>>,
    attn_drop: Dropout,
    proj: DeterministicLinear<B>,
    proj_drop: Dropout,
}

impl<B: Backend> WindowAttention<B> {
    pub fn new(config: &WindowAttentionConfig, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let [wh, ww] = config.window_size;
        assert!(wh > 0 && ww > 0, "window size must be non-empty, got {:?}", config.window_size);
        assert_eq!(
            config.dim % config.num_heads,
            0,
            "dim {} must be divisible by num_heads {}",
            config.dim,
            config.num_heads
        );

        let device = rng_ctx.device();
        let dim = config.dim;
        let num_heads = config.num_heads;

        let logit_scale = Tensor::full([num_heads, 1, 1], 10f64.ln(), device);

        let cpb_fc1 = rng_ctx.linear(2, config.cpb_hidden, true, 1);
        let cpb_fc2 = rng_ctx.linear(config.cpb_hidden, num_heads, false, 2);

        let coords = relative_coords_table(config.window_size, config.pretrained_window_size);
        let rows = coords.len() / 2;
        let relative_coords_table =
            Tensor::<B, 1>::from_data(TensorData::new(coords, [rows * 2]), device).reshape([rows, 2]);

        let index = relative_position_index(config.window_size);
        let tokens = wh * ww;
        let relative_position_index =
            Tensor::<B, 1, Int>::from_data(TensorData::new(index, [tokens * tokens]), device).reshape([tokens, tokens]);

        let qkv = rng_ctx.linear(dim, dim * 3, false, 3);
        let (q_bias, v_bias) = if config.qkv_bias {
            (
                Some(Param::from_tensor(Tensor::zeros([dim], device))),
                Some(Param::from_tensor(Tensor::zeros([dim], device))),
            )
        } else {
            (None, None)
        };
        let proj = rng_ctx.linear(dim, dim, true, 4);

        Self {
            dim,
            window_height: wh,
            window_width: ww,
            pretrained_height: config.pretrained_window_size[0],
            pretrained_width: config.pretrained_window_size[1],
            num_heads,
            logit_scale: Param::from_tensor(logit_scale),
            cpb_fc1,
            cpb_fc2,
            relative_coords_table,
            relative_position_index,
            qkv,
            q_bias,
            v_bias,
            attn_drop: rng_ctx.dropout(config.attn_drop),
            proj,
            proj_drop: rng_ctx.dropout(config.proj_drop),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn window_size(&self) -> [usize; 2] {
        [self.window_height, self.window_width]
    }

    pub fn pretrained_window_size(&self) -> [usize; 2] {
        [self.pretrained_height, self.pretrained_width]
    }

    /// Tokens per window.
    pub fn tokens(&self) -> usize {
        self.window_height * self.window_width
    }

    pub fn relative_coords_table(&self) -> Tensor<B, 2> {
        self.relative_coords_table.clone()
    }

    pub fn relative_position_index(&self) -> Tensor<B, 2, Int> {
        self.relative_position_index.clone()
    }

    /// Raw MLP output: one bias per head for every relative offset,
    /// shape [(2h-1)(2w-1), num_heads].
    pub fn relative_position_bias_table(&self) -> Tensor<B, 2> {
        let hidden = activation::relu(self.cpb_fc1.forward(self.relative_coords_table.clone()));
        self.cpb_fc2.forward(hidden)
    }

    /// Bias added to the attention logits, bounded to (0, 16), shape [num_heads, N, N].
    pub fn relative_position_bias(&self) -> Tensor<B, 3> {
        let tokens = self.tokens();
        let bias = self
            .relative_position_bias_table()
            .select(0, self.relative_position_index.clone().reshape([tokens * tokens]))
            .reshape([tokens, tokens, self.num_heads])
            .swap_dims(0, 2)
            .swap_dims(1, 2);
        activation::sigmoid(bias) * 16.0
    }

    /// Attend within each window.
    ///
    /// `x` is [batch * windows, tokens, dim]. `mask`, if given, is an additive
    /// (0 / -inf) mask of shape [windows, tokens, tokens]; the leading axis of
    /// `x` must be a multiple of the number of windows.
    pub fn forward(&self, x: Tensor<B, 3>, mask: Option<Tensor<B, 3>>, train: bool) -> Tensor<B, 3> {
        let [batch_windows, tokens, channels] = x.dims();
        assert!(
            tokens == self.tokens() && channels == self.dim,
            "SHAPE ERROR: window attention expects [*, {}, {}], got {:?}",
            self.tokens(),
            self.dim,
            [batch_windows, tokens, channels]
        );

        let heads = self.num_heads;
        let head_dim = channels / heads;
        let device = x.device();

        let qkv = self.qkv.forward(x);
        let qkv = match (&self.q_bias, &self.v_bias) {
            (Some(q_bias), Some(v_bias)) => {
                let bias = Tensor::cat(
                    vec![q_bias.val(), Tensor::zeros([channels], &device), v_bias.val()],
                    0,
                );
                qkv + bias.unsqueeze::<3>()
            }
            _ => qkv,
        };

        // [B_, N, 3C] -> three [B_, H, N, hd]
        let split = |part: usize| {
            qkv.clone()
                .slice([0..batch_windows, 0..tokens, part * channels..(part + 1) * channels])
                .reshape([batch_windows, tokens, heads, head_dim])
                .swap_dims(1, 2)
        };
        let (q, k, v) = (split(0), split(1), split(2));

        // cosine attention
        let attn = l2_normalize(q, 3).matmul(l2_normalize(k, 3).swap_dims(2, 3));
        let logit_scale = self.logit_scale.val().clamp_max(LOGIT_SCALE_MAX).exp();
        let attn = attn * logit_scale.unsqueeze::<4>();
        let attn = attn + self.relative_position_bias().unsqueeze::<4>();

        let attn = match mask {
            Some(mask) => Self::apply_mask(attn, mask),
            None => attn,
        };
        let attn = activation::softmax(attn, 3);
        let attn = if train { self.attn_drop.forward(attn) } else { attn };

        let out = attn
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch_windows, tokens, channels]);
        let out = self.proj.forward(out);
        if train {
            self.proj_drop.forward(out)
        } else {
            out
        }
    }

    fn apply_mask(attn: Tensor<B, 4>, mask: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch_windows, heads, tokens, _] = attn.dims();
        let [num_windows, mask_q, mask_k] = mask.dims();
        assert!(
            mask_q == tokens && mask_k == tokens,
            "SHAPE ERROR: attention mask must be [windows, {}, {}], got {:?}",
            tokens,
            tokens,
            [num_windows, mask_q, mask_k]
        );
        assert!(
            num_windows > 0 && batch_windows % num_windows == 0,
            "SHAPE ERROR: {} window batches are not a multiple of {} mask windows",
            batch_windows,
            num_windows
        );

        let mask = mask.unsqueeze_dim::<4>(1).unsqueeze::<5>();
        let attn = attn.reshape([batch_windows / num_windows, num_windows, heads, tokens, tokens]) + mask;
        attn.reshape([batch_windows, heads, tokens, tokens])
    }

    /// Multiply-accumulate count for one window of `n` tokens.
    pub fn flops(&self, n: usize) -> usize {
        let head_dim = self.dim / self.num_heads;
        let qkv = n * self.dim * 3 * self.dim;
        let scores = self.num_heads * n * head_dim * n;
        let weighted = self.num_heads * n * n * head_dim;
        let proj = n * self.dim * self.dim;
        qkv + scores + weighted + proj
    }
}
