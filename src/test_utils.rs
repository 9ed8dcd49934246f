// Test utilities for building deterministic input tensors.
//
// Helpers here construct tensors from host data through `TensorData`, so the
// same inputs can be rebuilt bit-for-bit on any backend.

use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Create f32 tensor from data slice with specified shape
pub fn tensor_from_f32_vec<B: Backend, const D: usize>(data: &[f32], shape: [usize; D], device: &B::Device) -> Tensor<B, D> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );
    Tensor::<B, 1>::from_data(TensorData::new(data.to_vec(), [expected_size]), device).reshape(shape)
}

/// Traffic-like input of shape [batch, steps, nodes, channels].
///
/// Channel 0 is a per-node daily wave, channel 1 is time of day in [0, 1)
/// and channel 2 is day of week in [0, 1); further channels repeat the
/// time of day.
pub fn traffic_input<B: Backend>(
    batch: usize,
    steps: usize,
    nodes: usize,
    channels: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    const STEPS_PER_DAY: usize = 288;
    let mut data = Vec::with_capacity(batch * steps * nodes * channels);
    for b in 0..batch {
        for t in 0..steps {
            let step = b * 7 + t;
            let time_of_day = (step % STEPS_PER_DAY) as f32 / STEPS_PER_DAY as f32;
            let day_of_week = ((step / STEPS_PER_DAY) % 7) as f32 / 7.0;
            for n in 0..nodes {
                for c in 0..channels {
                    let value = match c {
                        0 => {
                            let phase = 2.0 * std::f32::consts::PI * time_of_day + n as f32 * 0.1;
                            0.5 + 0.4 * phase.sin()
                        }
                        2 => day_of_week,
                        _ => time_of_day,
                    };
                    data.push(value);
                }
            }
        }
    }
    tensor_from_f32_vec(&data, [batch, steps, nodes, channels], device)
}

/// Largest absolute element-wise difference between two tensors.
pub fn max_abs_diff<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> f32 {
    let values: Vec<f32> = (a - b)
        .abs()
        .into_data()
        .convert::<f32>()
        .to_vec()
        .unwrap_or_default();
    values.into_iter().fold(0.0, f32::max)
}

/// Copy a tensor to host memory as f32.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().convert::<f32>().to_vec().unwrap_or_default()
}
