//! Decoder half of HUTformer: refines the encoder prediction with cross
//! attention onto the encoder's stage features.

use burn::module::Module;
use burn::prelude::*;

use super::attention::{AttentionLayer, WindowAttention, WindowAttentionConfig};
use super::config::HutformerConfig;
use super::encoder::{EncoderOutput, HutEncoder};
use super::init::{DeterministicLinear, DeterministicRngContext};

/// Cross attention onto a skip connection followed by window self attention.
#[derive(Module, Debug)]
pub struct CrossStage<B: Backend> {
    cross: AttentionLayer<B>,
    attention: WindowAttention<B>,
}

impl<B: Backend> CrossStage<B> {
    fn new(config: &HutformerConfig, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let embed_dim = config.embed_dim;
        Self {
            cross: AttentionLayer::new(embed_dim, config.num_heads, None, None, true, config.dropout, rng_ctx),
            attention: window_attention(config, &rng_ctx.fork(5)),
        }
    }

    /// `queries` come from the skip connection; keys and values are both `context`.
    pub fn forward(&self, queries: Tensor<B, 3>, context: Tensor<B, 3>, train: bool) -> Tensor<B, 3> {
        let mixed = self.cross.forward(queries, context.clone(), context, train);
        self.attention.forward(mixed, None, train)
    }
}

fn window_attention<B: Backend>(config: &HutformerConfig, rng_ctx: &DeterministicRngContext<B>) -> WindowAttention<B> {
    WindowAttentionConfig::new(config.embed_dim, [2, config.num_patch() / 2], config.num_heads)
        .with_dropout(config.dropout, config.dropout)
        .with_cpb_hidden(config.cpb_hidden)
        .init(rng_ctx)
}

#[derive(Module, Debug)]
pub struct HutDecoder<B: Backend> {
    decoder_1: WindowAttention<B>,
    /// Projects encoder stage-2 features (2 * embed_dim) down to embed_dim
    decoder_project_0: DeterministicLinear<B>,
    decoder_2: CrossStage<B>,
    decoder_3: CrossStage<B>,
    /// embed_dim -> len_patch
    decoder_project: DeterministicLinear<B>,
}

impl<B: Backend> HutDecoder<B> {
    pub fn new(config: &HutformerConfig, rng_ctx: &DeterministicRngContext<B>) -> Self {
        let embed_dim = config.embed_dim;
        Self {
            decoder_1: window_attention(config, &rng_ctx.fork(300)),
            decoder_project_0: rng_ctx.linear(2 * embed_dim, embed_dim, true, 310),
            decoder_2: CrossStage::new(config, &rng_ctx.fork(320)),
            decoder_3: CrossStage::new(config, &rng_ctx.fork(330)),
            decoder_project: rng_ctx.linear(embed_dim, config.len_patch, true, 340),
        }
    }

    /// Refine the encoder prediction.
    ///
    /// The prediction is re-embedded through the encoder's (shared) patch
    /// embedding and STPE together with the covariates of `future`'s last
    /// step. Returns [batch, nodes, num_patch * len_patch].
    pub fn forward(
        &self,
        encoder: &HutEncoder<B>,
        encoded: &EncoderOutput<B>,
        future: Tensor<B, 4>,
        train: bool,
    ) -> Tensor<B, 3> {
        let [batch, nodes, _] = encoded.prediction.dims();

        let u = encoder.embed(encoded.prediction.clone(), encoder.latest_covariates(future));
        let d1 = self.decoder_1.forward(u, None, train);

        // Stage-2 skip has half the tokens; tile it back to full length.
        let skip = self.decoder_project_0.forward(encoded.h2.clone()).repeat_dim(1, 2);
        let d2 = self.decoder_2.forward(skip, d1, train);
        let d3 = self.decoder_3.forward(encoded.h1.clone(), d2, train);

        let out = self.decoder_project.forward(d3);
        let [_, num_patch, len_patch] = out.dims();
        out.reshape([batch, nodes, num_patch * len_patch])
    }

    pub fn component_names() -> [&'static str; 5] {
        ["decoder_1", "decoder_project_0", "decoder_2", "decoder_3", "decoder_project"]
    }

    pub fn component_params(&self) -> Vec<(&'static str, usize)> {
        let counts = [
            self.decoder_1.num_params(),
            self.decoder_project_0.num_params(),
            self.decoder_2.num_params(),
            self.decoder_3.num_params(),
            self.decoder_project.num_params(),
        ];
        Self::component_names().into_iter().zip(counts).collect()
    }
}
