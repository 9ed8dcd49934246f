//! Encoder half of HUTformer: patch embedding, spatio-temporal positional
//! embedding (STPE) and three hierarchical window attention stages.

use burn::module::{Module, Param};
use burn::prelude::*;

use super::attention::{WindowAttention, WindowAttentionConfig};
use super::config::HutformerConfig;
use super::init::{DeterministicLinear, DeterministicRngContext};
use super::segment_merging::SegmentMerging;

/// Standard deviation of the truncated-normal init for the spatial and patch embeddings.
pub const EMBEDDING_INIT_STD: f64 = 0.02;

/// Downsampling stage: merge adjacent tokens, then window attention at the
/// halved resolution.
#[derive(Module, Debug)]
pub struct MergeStage<B: Backend> {
    merge: SegmentMerging<B>,
    attention: WindowAttention<B>,
}

impl<B: Backend> MergeStage<B> {
    /// `dim` is the input width; the stage outputs `2 * dim` channels over
    /// half as many tokens, attended in a `(2, tokens / 4)` window.
    fn new(dim: usize, input_tokens: usize, config: &HutformerConfig, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let window = [2, input_tokens / 4];
        Self {
            merge: SegmentMerging::new(dim, rng_ctx),
            attention: WindowAttentionConfig::new(2 * dim, window, config.num_heads)
                .with_dropout(config.dropout, config.dropout)
                .with_cpb_hidden(config.cpb_hidden)
                .init(rng_ctx),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, train: bool) -> Tensor<B, 3> {
        self.attention.forward(self.merge.forward(x), None, train)
    }

    pub fn attention(&self) -> &WindowAttention<B> {
        &self.attention
    }
}

/// Everything the encoder produces in one pass. The stage features feed the
/// decoder's skip connections.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// [batch, nodes, len_pred]
    pub prediction: Tensor<B, 3>,
    /// [batch * nodes, num_patch, embed_dim]
    pub h1: Tensor<B, 3>,
    /// [batch * nodes, num_patch / 2, 2 * embed_dim]
    pub h2: Tensor<B, 3>,
    /// [batch * nodes, num_patch / 4, 4 * embed_dim]
    pub h3: Tensor<B, 3>,
}

#[derive(Module, Debug)]
pub struct HutEncoder<B: Backend> {
    /// Per-node spatial embedding, shape [num_nodes, dim_se]
    spatial_embedding: Param<Tensor<B, 2>>,
    /// Shared patch embedding, len_patch -> embed_dim
    embedding: DeterministicLinear<B>,
    /// Fused spatio-temporal positional embedding, stpe_input_dim -> dim_u
    stpe: DeterministicLinear<B>,
    encoder_1: WindowAttention<B>,
    encoder_2: MergeStage<B>,
    encoder_3: MergeStage<B>,
    encoder_project: DeterministicLinear<B>,

    num_nodes: usize,
    len_patch: usize,
    num_patch: usize,
    embed_dim: usize,
    num_covariates: usize,
}

impl<B: Backend> HutEncoder<B> {
    /// Build every encoder-side component. Expects a validated config.
    pub fn new(config: &HutformerConfig, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let num_patch = config.num_patch();
        let embed_dim = config.embed_dim;

        let mut se_rng = rng_ctx.next_std_rng(100);
        let spatial_embedding =
            rng_ctx.trunc_normal_tensor([config.num_nodes, config.dim_se], EMBEDDING_INIT_STD, &mut se_rng);

        let embedding = rng_ctx.trunc_normal_linear(config.len_patch, embed_dim, EMBEDDING_INIT_STD, 101);
        let stpe = rng_ctx.linear(config.stpe_input_dim(), config.dim_u(), true, 102);

        let encoder_1 = WindowAttentionConfig::new(embed_dim, [2, num_patch / 2], config.num_heads)
            .with_dropout(config.dropout, config.dropout)
            .with_cpb_hidden(config.cpb_hidden)
            .init(&rng_ctx.fork(200));
        let encoder_2 = MergeStage::new(embed_dim, num_patch, config, &rng_ctx.fork(210));
        let encoder_3 = MergeStage::new(2 * embed_dim, num_patch / 2, config, &rng_ctx.fork(220));
        let encoder_project = rng_ctx.linear(config.dim_u(), config.len_pred, true, 230);

        Self {
            spatial_embedding: Param::from_tensor(spatial_embedding),
            embedding,
            stpe,
            encoder_1,
            encoder_2,
            encoder_3,
            encoder_project,
            num_nodes: config.num_nodes,
            len_patch: config.len_patch,
            num_patch,
            embed_dim,
            num_covariates: config.num_covariates,
        }
    }

    pub fn spatial_embedding(&self) -> Tensor<B, 2> {
        self.spatial_embedding.val()
    }

    pub fn stage_attentions(&self) -> [&WindowAttention<B>; 3] {
        [&self.encoder_1, self.encoder_2.attention(), self.encoder_3.attention()]
    }

    /// Embed a target series and fuse it with node identity and covariates.
    ///
    /// `series` is [batch, nodes, num_patch * len_patch]; `covariates` is the
    /// latest timestep's auxiliary channels, [batch, nodes, num_covariates],
    /// or `None` when the model has no covariates.
    /// Returns one token sequence per node, [batch * nodes, num_patch, embed_dim].
    pub fn embed(&self, series: Tensor<B, 3>, covariates: Option<Tensor<B, 3>>) -> Tensor<B, 3> {
        let [batch, nodes, steps] = series.dims();
        assert!(
            nodes == self.num_nodes && steps == self.num_patch * self.len_patch,
            "SHAPE ERROR: embedding expects [*, {}, {}], got {:?}",
            self.num_nodes,
            self.num_patch * self.len_patch,
            [batch, nodes, steps]
        );

        let patches = series.reshape([batch, nodes, self.num_patch, self.len_patch]);
        let embedded: Tensor<B, 3> = self
            .embedding
            .forward(patches)
            .reshape([batch, nodes, self.num_patch * self.embed_dim]);

        let se = self
            .spatial_embedding
            .val()
            .unsqueeze::<3>()
            .repeat_dim(0, batch);

        let mut parts = vec![embedded, se];
        if let Some(covariates) = covariates {
            parts.push(covariates);
        }

        self.stpe
            .forward(Tensor::cat(parts, 2))
            .reshape([batch * nodes, self.num_patch, self.embed_dim])
    }

    /// Auxiliary channels of the last timestep: `data[:, -1, :, 1:]`.
    pub fn latest_covariates(&self, data: Tensor<B, 4>) -> Option<Tensor<B, 3>> {
        let [batch, steps, nodes, channels] = data.dims();
        if channels < 2 {
            return None;
        }
        let latest = data
            .slice([0..batch, steps - 1..steps, 0..nodes, 1..channels])
            .reshape([batch, nodes, channels - 1]);
        Some(latest)
    }

    /// `history` is [batch, len_hist, nodes, 1 + num_covariates].
    pub fn forward(&self, history: Tensor<B, 4>, train: bool) -> EncoderOutput<B> {
        let [batch, steps, nodes, channels] = history.dims();
        assert!(
            steps == self.num_patch * self.len_patch && nodes == self.num_nodes && channels == self.num_covariates + 1,
            "SHAPE ERROR: history must be [batch, {}, {}, {}], got {:?}",
            self.num_patch * self.len_patch,
            self.num_nodes,
            self.num_covariates + 1,
            [batch, steps, nodes, channels]
        );

        let target = history
            .clone()
            .slice([0..batch, 0..steps, 0..nodes, 0..1])
            .reshape([batch, steps, nodes])
            .swap_dims(1, 2);
        let covariates = self.latest_covariates(history);

        let u = self.embed(target, covariates);
        let h1 = self.encoder_1.forward(u, None, train);
        let h2 = self.encoder_2.forward(h1.clone(), train);
        let h3 = self.encoder_3.forward(h2.clone(), train);

        let flat: Tensor<B, 3> = h3.clone().reshape([batch, nodes, self.num_patch * self.embed_dim]);
        let prediction = self.encoder_project.forward(flat);

        EncoderOutput { prediction, h1, h2, h3 }
    }

    /// Parameter count per named component, in construction order.
    pub fn component_params(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("spatial_embedding", self.spatial_embedding.num_params()),
            ("embedding", self.embedding.num_params()),
            ("stpe", self.stpe.num_params()),
            ("encoder_1", self.encoder_1.num_params()),
            ("encoder_2", self.encoder_2.num_params()),
            ("encoder_3", self.encoder_3.num_params()),
            ("encoder_project", self.encoder_project.num_params()),
        ]
    }
}
