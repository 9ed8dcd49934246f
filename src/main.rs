use burn::prelude::*;
use burn_ndarray::NdArray;

use hut_former_rs::{settings, HUTformer, HutformerConfig, Mode};

type Cpu = NdArray<f32>;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = settings();
    let device = Default::default();

    let mut config = HutformerConfig::new(207, 288, 288, 12, Mode::Encoder).with_seed(settings.runtime.seed);
    // A saved encoder switches the run to decoder training on top of it.
    let encoder_checkpoint = settings.checkpoint_path("encoder");
    if let Some(path) = &encoder_checkpoint {
        if path.with_extension("mpk").exists() {
            config.mode = Mode::Decoder;
            config = config.with_pretrained_checkpoint(path);
        }
    }

    log::info!("building HUTformer in {} mode", config.mode);
    let model = HUTformer::<Cpu>::new(config.clone(), &device)?;
    if settings.runtime.log_parameter_report {
        for group in model.parameter_report() {
            log::info!(
                "{:<20} {:>10} params  trainable={}",
                group.component,
                group.num_params,
                group.trainable
            );
        }
    }

    let channels = config.num_channels();
    let history = Tensor::<Cpu, 4>::zeros([1, config.len_hist, config.num_nodes, channels], &device);
    let future = Tensor::<Cpu, 4>::zeros([1, config.len_pred, config.num_nodes, channels], &device);
    let prediction = model.forward(history, future, 0, 0, false);
    log::info!("prediction shape {:?}", prediction.dims());

    if let (Mode::Encoder, Some(path)) = (config.mode, encoder_checkpoint) {
        model.save_checkpoint(&path)?;
        log::info!("saved encoder checkpoint to {}", path.display());
    }
    Ok(())
}
