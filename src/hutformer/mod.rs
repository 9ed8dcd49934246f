pub mod architectures;
pub mod settings;

pub use architectures::base::checkpoint::RestoreReport;
pub use architectures::base::config::{HutformerConfig, Mode};
pub use architectures::base::encoder::EncoderOutput;
pub use architectures::base::transformer::{HUTformer, ParameterGroup};
