//! HUTformer: hierarchical U-net transformer for long-horizon
//! spatio-temporal forecasting.
//!
//! The encoder always runs. In [`Mode::Decoder`] a decoder refines the
//! encoder prediction through cross attention onto the encoder stage
//! features; the encoder is then frozen and may be restored from a
//! pre-trained checkpoint at construction.

use std::path::Path;

use burn::module::{Ignored, Module};
use burn::prelude::*;

use super::checkpoint::{self, RestoreReport};
use super::config::{HutformerConfig, Mode};
use super::decoder::HutDecoder;
use super::encoder::{EncoderOutput, HutEncoder};
use super::init::DeterministicRngContext;
use crate::error::{HutformerError, Result};

/// Parameter count and trainability of one named component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterGroup {
    pub component: String,
    pub num_params: usize,
    pub trainable: bool,
}

#[derive(Module, Debug)]
pub struct HUTformer<B: Backend> {
    encoder: HutEncoder<B>,
    decoder: Option<HutDecoder<B>>,

    config: Ignored<HutformerConfig>,
    /// Encoder-side parameters (embeddings, STPE, encoder stages) receive no gradient
    encoder_frozen: Ignored<bool>,
    restore_report: Ignored<Option<RestoreReport>>,
}

impl<B: Backend> HUTformer<B> {
    /// Build a model for `config`.
    ///
    /// In decoder mode the encoder is restored from `config.pretrained_checkpoint`
    /// when one is given, and frozen either way.
    pub fn new(config: HutformerConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;

        let rng_ctx = DeterministicRngContext::<B>::new(config.seed, device.clone());
        let mut encoder = HutEncoder::new(&config, &rng_ctx);

        if config.mode == Mode::Encoder {
            if let Some(path) = &config.pretrained_checkpoint {
                log::warn!(
                    "encoder mode ignores pretrained checkpoint {}",
                    path.display()
                );
            }
            let model = Self {
                encoder,
                decoder: None,
                config: Ignored(config),
                encoder_frozen: Ignored(false),
                restore_report: Ignored(None),
            };
            model.log_parameter_report();
            return Ok(model);
        }

        let mut restore_report = None;
        if let Some(path) = config.pretrained_checkpoint.clone() {
            let (restored, report) = Self::restore_encoder(encoder, &path, device)?;
            log::info!("loaded encoder weights from {}: {}", path.display(), report);
            encoder = restored;
            restore_report = Some(report);
        }

        let decoder = HutDecoder::new(&config, &rng_ctx);
        let encoder = encoder.no_grad();
        log::info!("froze encoder parameters");

        let model = Self {
            encoder,
            decoder: Some(decoder),
            config: Ignored(config),
            encoder_frozen: Ignored(true),
            restore_report: Ignored(restore_report),
        };
        model.log_parameter_report();
        Ok(model)
    }

    /// Non-strict load: take the encoder-side components from a checkpoint of
    /// either mode and report everything else.
    fn restore_encoder(encoder: HutEncoder<B>, path: &Path, device: &B::Device) -> Result<(HutEncoder<B>, RestoreReport)> {
        let record: HUTformerRecord<B> = checkpoint::load_record(path, device)?;

        let expected = encoder.component_params();
        let encoder = encoder.load_record(record.encoder);
        check_components(path, &expected, &encoder.component_params())?;

        let decoder_names: Vec<String> = HutDecoder::<B>::component_names().iter().map(|n| n.to_string()).collect();
        let report = RestoreReport {
            restored: expected.iter().map(|(name, _)| name.to_string()).collect(),
            missing: decoder_names.clone(),
            ignored: if record.decoder.is_some() { decoder_names } else { Vec::new() },
        };
        Ok((encoder, report))
    }

    pub fn config(&self) -> &HutformerConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn encoder_frozen(&self) -> bool {
        *self.encoder_frozen
    }

    /// What the construction-time checkpoint restore did, if one ran.
    pub fn restore_report(&self) -> Option<&RestoreReport> {
        (*self.restore_report).as_ref()
    }

    pub fn encoder(&self) -> &HutEncoder<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> Option<&HutDecoder<B>> {
        self.decoder.as_ref()
    }

    /// Run only the encoder; the prediction is [batch, nodes, len_pred].
    pub fn forward_encoder(&self, history: Tensor<B, 4>, train: bool) -> EncoderOutput<B> {
        self.encoder.forward(history, train)
    }

    /// Forecast `len_pred` steps for every node.
    ///
    /// `history` is [batch, len_hist, nodes, channels] and `future` is
    /// [batch, len_pred, nodes, channels]; channel 0 is the target series and
    /// the rest are covariates. Only the covariates of `future`'s last step
    /// are read, and only in decoder mode. `batch_seen` and `epoch` are
    /// accepted for training-loop compatibility and unused. Returns
    /// [batch, len_pred, nodes, 1].
    pub fn forward(
        &self,
        history: Tensor<B, 4>,
        future: Tensor<B, 4>,
        _batch_seen: usize,
        _epoch: usize,
        train: bool,
    ) -> Tensor<B, 4> {
        let [batch, _, nodes, channels] = history.dims();
        let encoded = self.encoder.forward(history, train);

        let prediction = match &self.decoder {
            None => encoded.prediction,
            Some(decoder) => {
                let future_dims = future.dims();
                assert!(
                    future_dims == [batch, self.config.len_pred, nodes, channels],
                    "SHAPE ERROR: future must be [{}, {}, {}, {}], got {:?}",
                    batch,
                    self.config.len_pred,
                    nodes,
                    channels,
                    future_dims
                );
                decoder.forward(&self.encoder, &encoded, future, train)
            }
        };

        // [B, N, L] -> [B, L, N, 1]
        prediction.swap_dims(1, 2).unsqueeze_dim(3)
    }

    /// One entry per named component, encoder side first.
    pub fn parameter_report(&self) -> Vec<ParameterGroup> {
        let encoder_trainable = !*self.encoder_frozen;
        let encoder = self
            .encoder
            .component_params()
            .into_iter()
            .map(|(name, num_params)| ParameterGroup {
                component: name.to_string(),
                num_params,
                trainable: encoder_trainable,
            });
        let decoder = self
            .decoder
            .iter()
            .flat_map(|decoder| decoder.component_params())
            .map(|(name, num_params)| ParameterGroup {
                component: name.to_string(),
                num_params,
                trainable: true,
            });
        encoder.chain(decoder).collect()
    }

    fn log_parameter_report(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        for group in self.parameter_report() {
            log::debug!(
                "{:<20} {:>10} params  requires_grad={}",
                group.component,
                group.num_params,
                group.trainable
            );
        }
    }

    /// Write every parameter to `path` (the recorder sets the `.mpk` extension).
    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.clone()
            .save_file(path.to_path_buf(), &checkpoint::recorder())
            .map_err(|err| HutformerError::Checkpoint {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
    }

    /// Strict load of a checkpoint saved by a model with the same configuration and mode.
    pub fn load_checkpoint(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let device = self.encoder.spatial_embedding().device();
        let record: HUTformerRecord<B> = checkpoint::load_record(path, &device)?;

        if record.decoder.is_some() != self.decoder.is_some() {
            let saved = if record.decoder.is_some() { Mode::Decoder } else { Mode::Encoder };
            return Err(HutformerError::Checkpoint {
                path: path.to_path_buf(),
                reason: format!("checkpoint was saved in {} mode, model is in {} mode", saved, self.mode()),
            });
        }

        let expected = self.parameter_report();
        let mut model = self.load_record(record);
        let loaded = model.parameter_report();
        check_components(
            path,
            &expected.iter().map(|g| (g.component.as_str(), g.num_params)).collect::<Vec<_>>(),
            &loaded.iter().map(|g| (g.component.as_str(), g.num_params)).collect::<Vec<_>>(),
        )?;

        if *model.encoder_frozen {
            model.encoder = model.encoder.no_grad();
        }
        Ok(model)
    }
}

/// Fail if any component's parameter count changed while loading, which means
/// the checkpoint was written for a different configuration.
fn check_components(path: &Path, expected: &[(&str, usize)], loaded: &[(&str, usize)]) -> Result<()> {
    for ((name, want), (_, got)) in expected.iter().zip(loaded) {
        if want != got {
            return Err(HutformerError::Checkpoint {
                path: path.to_path_buf(),
                reason: format!("component {} has {} parameters in the checkpoint, expected {}", name, got, want),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_config(mode: Mode) -> HutformerConfig {
        let mut config = HutformerConfig::new(3, 96, 96, 12, mode);
        config.embed_dim = 16;
        config.num_heads = 4;
        config.dim_se = 4;
        config.cpb_hidden = 16;
        config
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let device = Default::default();
        let config = HutformerConfig::new(3, 100, 96, 12, Mode::Encoder);
        let result = HUTformer::<TestBackend>::new(config, &device);
        assert!(matches!(result, Err(HutformerError::InvalidConfig(_))));
    }

    #[test]
    fn test_encoder_mode_has_no_decoder() {
        let device = Default::default();
        let model = HUTformer::<TestBackend>::new(small_config(Mode::Encoder), &device).unwrap();
        assert!(model.decoder().is_none());
        assert!(!model.encoder_frozen());
        assert!(model.restore_report().is_none());

        let report = model.parameter_report();
        assert_eq!(report.len(), 7);
        assert!(report.iter().all(|g| g.trainable));
    }

    #[test]
    fn test_decoder_mode_freezes_encoder_side() {
        let device = Default::default();
        let model = HUTformer::<TestBackend>::new(small_config(Mode::Decoder), &device).unwrap();
        assert!(model.encoder_frozen());

        let report = model.parameter_report();
        assert_eq!(report.len(), 12);
        for group in &report {
            assert_eq!(
                group.trainable,
                group.component.starts_with("decoder"),
                "unexpected trainability for {}",
                group.component
            );
        }
        let total: usize = report.iter().map(|g| g.num_params).sum();
        assert_eq!(total, model.num_params());
    }

    #[test]
    fn test_forward_shapes_both_modes() {
        let device = Default::default();
        for mode in [Mode::Encoder, Mode::Decoder] {
            let model = HUTformer::<TestBackend>::new(small_config(mode), &device).unwrap();
            let history = Tensor::<TestBackend, 4>::ones([2, 96, 3, 3], &device);
            let future = Tensor::<TestBackend, 4>::ones([2, 96, 3, 3], &device);
            let out = model.forward(history, future, 0, 0, false);
            assert_eq!(out.dims(), [2, 96, 3, 1], "mode {}", mode);
        }
    }

    #[test]
    fn test_encoder_only_horizon_may_differ() {
        let device = Default::default();
        let mut config = small_config(Mode::Encoder);
        config.len_pred = 48;
        let model = HUTformer::<TestBackend>::new(config, &device).unwrap();
        let history = Tensor::<TestBackend, 4>::ones([1, 96, 3, 3], &device);
        let future = Tensor::<TestBackend, 4>::ones([1, 48, 3, 3], &device);
        assert_eq!(model.forward(history, future, 0, 0, false).dims(), [1, 48, 3, 1]);
    }

    #[test]
    #[should_panic(expected = "SHAPE ERROR: future must be")]
    fn test_decoder_rejects_short_future() {
        let device = Default::default();
        let model = HUTformer::<TestBackend>::new(small_config(Mode::Decoder), &device).unwrap();
        let history = Tensor::<TestBackend, 4>::ones([1, 96, 3, 3], &device);
        let future = Tensor::<TestBackend, 4>::ones([1, 48, 3, 3], &device);
        model.forward(history, future, 0, 0, false);
    }

    #[test]
    fn test_missing_pretrained_checkpoint_is_an_error() {
        let device = Default::default();
        let config = small_config(Mode::Decoder).with_pretrained_checkpoint("/nonexistent/hutformer/encoder");
        let result = HUTformer::<TestBackend>::new(config, &device);
        assert!(matches!(result, Err(HutformerError::Checkpoint { .. })));
    }
}
