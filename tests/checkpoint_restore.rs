// tests/checkpoint_restore.rs - Saving, partial restore and strict reload of checkpoints
use std::fs;

use burn::tensor::backend::Backend;
use burn_ndarray::NdArray;
use tempfile::TempDir;

use hut_former_rs::test_utils::{max_abs_diff, to_host, traffic_input};
use hut_former_rs::{HUTformer, HutformerConfig, HutformerError, Mode};

type TestBackend = NdArray<f32>;

const ENCODER_COMPONENTS: [&str; 7] = [
    "spatial_embedding",
    "embedding",
    "stpe",
    "encoder_1",
    "encoder_2",
    "encoder_3",
    "encoder_project",
];
const DECODER_COMPONENTS: [&str; 5] = ["decoder_1", "decoder_project_0", "decoder_2", "decoder_3", "decoder_project"];

fn small_config(mode: Mode) -> HutformerConfig {
    let mut config = HutformerConfig::new(3, 96, 96, 12, mode);
    config.embed_dim = 16;
    config.num_heads = 4;
    config.dim_se = 4;
    config.cpb_hidden = 16;
    config
}

fn names(components: &[&str]) -> Vec<String> {
    components.iter().map(|name| name.to_string()).collect()
}

#[test]
fn test_decoder_restores_pretrained_encoder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("encoder");
    let device = <TestBackend as Backend>::Device::default();

    let pretrained = HUTformer::<TestBackend>::new(small_config(Mode::Encoder).with_seed(1), &device).unwrap();
    pretrained.save_checkpoint(&path).unwrap();
    assert!(path.with_extension("mpk").exists());

    // Different seed: everything restored must come from the file.
    let config = small_config(Mode::Decoder).with_seed(99).with_pretrained_checkpoint(&path);
    let model = HUTformer::<TestBackend>::new(config, &device).unwrap();

    let report = model.restore_report().expect("restore report");
    assert_eq!(report.restored, names(&ENCODER_COMPONENTS));
    assert_eq!(report.missing, names(&DECODER_COMPONENTS));
    assert!(report.ignored.is_empty());
    assert!(model.encoder_frozen());

    assert_eq!(
        to_host(pretrained.encoder().spatial_embedding()),
        to_host(model.encoder().spatial_embedding())
    );
    let history = traffic_input::<TestBackend>(2, 96, 3, 3, &device);
    let expected = pretrained.forward_encoder(history.clone(), false).prediction;
    let restored = model.forward_encoder(history, false).prediction;
    assert_eq!(max_abs_diff(expected, restored), 0.0);
}

#[test]
fn test_decoder_checkpoint_components_are_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("full");
    let device = <TestBackend as Backend>::Device::default();

    let trained = HUTformer::<TestBackend>::new(small_config(Mode::Decoder).with_seed(4), &device).unwrap();
    trained.save_checkpoint(&path).unwrap();

    let config = small_config(Mode::Decoder).with_seed(5).with_pretrained_checkpoint(&path);
    let model = HUTformer::<TestBackend>::new(config, &device).unwrap();
    let report = model.restore_report().unwrap();
    assert_eq!(report.restored, names(&ENCODER_COMPONENTS));
    assert_eq!(report.ignored, names(&DECODER_COMPONENTS));

    // Decoder weights stay freshly initialized, so the refined outputs differ.
    let history = traffic_input::<TestBackend>(1, 96, 3, 3, &device);
    let future = traffic_input::<TestBackend>(1, 96, 3, 3, &device);
    let a = trained.forward(history.clone(), future.clone(), 0, 0, false);
    let b = model.forward(history, future, 0, 0, false);
    assert!(max_abs_diff(a, b) > 0.0);
}

#[test]
fn test_strict_reload_reproduces_outputs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("decoder");
    let device = <TestBackend as Backend>::Device::default();

    let trained = HUTformer::<TestBackend>::new(small_config(Mode::Decoder).with_seed(4), &device).unwrap();
    trained.save_checkpoint(&path).unwrap();

    let fresh = HUTformer::<TestBackend>::new(small_config(Mode::Decoder).with_seed(8), &device).unwrap();
    let reloaded = fresh.load_checkpoint(&path).unwrap();
    assert!(reloaded.encoder_frozen());

    let history = traffic_input::<TestBackend>(2, 96, 3, 3, &device);
    let future = traffic_input::<TestBackend>(2, 96, 3, 3, &device);
    let a = trained.forward(history.clone(), future.clone(), 0, 0, false);
    let b = reloaded.forward(history, future, 0, 0, false);
    assert_eq!(max_abs_diff(a, b), 0.0);
}

#[test]
fn test_strict_reload_rejects_other_mode() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("decoder");
    let device = <TestBackend as Backend>::Device::default();

    HUTformer::<TestBackend>::new(small_config(Mode::Decoder), &device)
        .unwrap()
        .save_checkpoint(&path)
        .unwrap();

    let encoder_model = HUTformer::<TestBackend>::new(small_config(Mode::Encoder), &device).unwrap();
    match encoder_model.load_checkpoint(&path) {
        Err(HutformerError::Checkpoint { reason, .. }) => assert!(reason.contains("decoder mode"), "{}", reason),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("loading a decoder checkpoint into an encoder model succeeded"),
    }
}

#[test]
fn test_unreadable_checkpoint_is_fatal() {
    let dir = TempDir::new().unwrap();
    let device = <TestBackend as Backend>::Device::default();

    let missing = small_config(Mode::Decoder).with_pretrained_checkpoint(dir.path().join("absent"));
    assert!(matches!(
        HUTformer::<TestBackend>::new(missing, &device),
        Err(HutformerError::Checkpoint { .. })
    ));

    let garbage = dir.path().join("garbage");
    fs::write(garbage.with_extension("mpk"), b"not a checkpoint").unwrap();
    let config = small_config(Mode::Decoder).with_pretrained_checkpoint(&garbage);
    match HUTformer::<TestBackend>::new(config, &device) {
        Err(HutformerError::Checkpoint { path, .. }) => assert_eq!(path, garbage),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("garbage checkpoint was accepted"),
    }
}
