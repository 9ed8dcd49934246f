//! Deterministic parameter initialization.
//!
//! Every learned tensor in the model is sampled on the host from a seeded
//! `StdRng` and then uploaded to the backend device. Components draw from
//! `seed + offset` with fixed offsets, so two models built from the same seed
//! share bit-identical weights for every component they have in common
//! (this is what lets an encoder-mode and a decoder-mode model agree on the
//! encoder prediction).

use burn::{
    module::{Module, Param},
    nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig},
    tensor::{backend::Backend, Tensor, TensorData},
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::function::erf::{erf, erf_inv};

/// Epsilon shared by every LayerNorm in the model.
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Standard normal cumulative distribution function.
fn norm_cdf(x: f64) -> f64 {
    (1.0 + erf(x / std::f64::consts::SQRT_2)) / 2.0
}

/// Draw `count` samples from N(mean, std^2) truncated to `[a, b]`.
///
/// Uses the inverse-CDF method: uniform samples between the CDF values of
/// the bounds are mapped through `erf_inv`, rescaled, and clamped to
/// `[a, b]` so that tail round-off can never escape the interval.
pub fn sample_trunc_normal(
    count: usize,
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
    rng: &mut StdRng,
) -> Vec<f32> {
    assert!(a < b, "truncation bounds must satisfy a < b, got [{}, {}]", a, b);
    assert!(std > 0.0, "standard deviation must be positive, got {}", std);

    if mean < a - 2.0 * std || mean > b + 2.0 * std {
        log::warn!(
            "mean {} is more than 2 std from [{}, {}] in trunc_normal; \
             the distribution of values may be incorrect",
            mean,
            a,
            b
        );
    }

    let l = norm_cdf((a - mean) / std);
    let u = norm_cdf((b - mean) / std);
    let (low, high) = (2.0 * l - 1.0, 2.0 * u - 1.0);

    (0..count)
        .map(|_| {
            let p = rng.random_range(low..=high);
            let value = erf_inv(p) * std * std::f64::consts::SQRT_2 + mean;
            value.clamp(a, b) as f32
        })
        .collect()
}

/// Fill `tensor` with truncated-normal samples and return it.
///
/// Only the shape and device of the input are used; burn tensors are values,
/// so "in place" means the returned tensor replaces the argument.
pub fn trunc_normal<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
    rng: &mut StdRng,
) -> Tensor<B, D> {
    let dims = tensor.dims();
    let device = tensor.device();
    let count: usize = dims.iter().product();
    let data = sample_trunc_normal(count, mean, std, a, b, rng);
    Tensor::<B, 1>::from_data(TensorData::new(data, [count]), &device).reshape(dims)
}

/// Linear layer with host-initialized weights stored in `[out, in]` layout.
#[derive(Module, Debug)]
pub struct DeterministicLinear<B: Backend> {
    /// Weight matrix of shape [output_dim, input_dim]
    pub weight: Param<Tensor<B, 2>>,
    /// Optional bias vector of shape [output_dim]
    pub bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> DeterministicLinear<B> {
    pub fn new(weight: Tensor<B, 2>, bias: Option<Tensor<B, 1>>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            bias: bias.map(Param::from_tensor),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Apply the projection to the last axis of a tensor of any rank.
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let mut dims = input.dims();
        let input_dim = dims[D - 1];
        assert_eq!(
            input_dim,
            self.input_dim(),
            "SHAPE ERROR: linear expects last dimension {}, got {:?}",
            self.input_dim(),
            dims
        );

        let rows: usize = dims[..D - 1].iter().product();
        let output = input
            .reshape([rows, input_dim])
            .matmul(self.weight.val().transpose());
        let output = match &self.bias {
            Some(bias) => output + bias.val().unsqueeze::<2>(),
            None => output,
        };

        dims[D - 1] = self.output_dim();
        output.reshape(dims)
    }
}

/// Seeded factory for every parameterized building block of the model.
///
/// SEED OFFSET POLICY:
/// - +100 series: shared embeddings (spatial embedding, patch embedding, STPE)
/// - +200 series: encoder stages and encoder projection
/// - +300 series: decoder stages and decoder projections
///
/// Inside a composite component, sub-layers fork the component context with
/// small offsets (+1, +2, ...) so that adding a decoder never shifts the
/// encoder's draws.
#[derive(Debug, Clone)]
pub struct DeterministicRngContext<B: Backend> {
    pub seed: u64,
    device: B::Device,
}

impl<B: Backend> DeterministicRngContext<B> {
    pub fn new(seed: u64, device: B::Device) -> Self {
        Self { seed, device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// New context with seed = seed + offset.
    pub fn fork(&self, offset: u64) -> Self {
        Self::new(self.seed.wrapping_add(offset), self.device.clone())
    }

    pub fn next_std_rng(&self, offset: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(offset))
    }

    /// Uniform samples in `[-bound, bound]`.
    pub fn uniform_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        bound: f64,
        rng: &mut StdRng,
    ) -> Tensor<B, D> {
        let count: usize = shape.iter().product();
        let data: Vec<f32> = (0..count)
            .map(|_| rng.random_range(-bound..=bound) as f32)
            .collect();
        Tensor::<B, 1>::from_data(TensorData::new(data, [count]), &self.device).reshape(shape)
    }

    pub fn trunc_normal_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        std: f64,
        rng: &mut StdRng,
    ) -> Tensor<B, D> {
        trunc_normal(Tensor::zeros(shape, &self.device), 0.0, std, -2.0, 2.0, rng)
    }

    /// Linear layer with the usual fan-in uniform init:
    /// weight and bias ~ U(-1/sqrt(in), 1/sqrt(in)).
    pub fn linear(&self, input_dim: usize, output_dim: usize, bias: bool, offset: u64) -> DeterministicLinear<B> {
        let mut rng = self.next_std_rng(offset);
        let bound = 1.0 / (input_dim as f64).sqrt();
        let weight = self.uniform_tensor([output_dim, input_dim], bound, &mut rng);
        let bias = bias.then(|| self.uniform_tensor([output_dim], bound, &mut rng));
        DeterministicLinear::new(weight, bias)
    }

    /// Linear layer whose weight is drawn from a truncated normal
    /// (bias keeps the fan-in uniform init).
    pub fn trunc_normal_linear(
        &self,
        input_dim: usize,
        output_dim: usize,
        std: f64,
        offset: u64,
    ) -> DeterministicLinear<B> {
        let mut rng = self.next_std_rng(offset);
        let weight = self.trunc_normal_tensor([output_dim, input_dim], std, &mut rng);
        let bound = 1.0 / (input_dim as f64).sqrt();
        let bias = self.uniform_tensor([output_dim], bound, &mut rng);
        DeterministicLinear::new(weight, Some(bias))
    }

    /// LayerNorm has no random state: weight starts at 1 and bias at 0.
    pub fn layer_norm(&self, d_model: usize) -> LayerNorm<B> {
        LayerNormConfig::new(d_model)
            .with_epsilon(LAYER_NORM_EPS)
            .init(&self.device)
    }

    pub fn dropout(&self, prob: f64) -> Dropout {
        DropoutConfig::new(prob).init()
    }
}
