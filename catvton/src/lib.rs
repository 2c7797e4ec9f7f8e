pub mod model;
pub mod noise;
pub mod pipeline;
pub mod scheduler;
pub mod utils;

pub use model::{CheckpointVersion, Device, ModelSource, WeightDtype, init_runtime};
pub use pipeline::{CatVtonPipeline, PipelineConfig, TryOnInput};
