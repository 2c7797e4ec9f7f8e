use std::{
    path::{Path, PathBuf},
    str::FromStr,
    thread,
};

use anyhow::{Context, Result, bail};
use hf_hub::api::sync::Api;
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{Session, builder::GraphOptimizationLevel},
};

/// Precision of the UNet export to load (`--mixed-precision`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightDtype {
    F32,
    F16,
    #[default]
    Bf16,
}

impl WeightDtype {
    fn file_suffix(self) -> &'static str {
        match self {
            WeightDtype::F32 => "",
            WeightDtype::F16 => "_fp16",
            WeightDtype::Bf16 => "_bf16",
        }
    }
}

impl FromStr for WeightDtype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no" => Ok(WeightDtype::F32),
            "fp16" => Ok(WeightDtype::F16),
            "bf16" => Ok(WeightDtype::Bf16),
            other => bail!("unknown mixed precision mode: {other} (expected no, fp16 or bf16)"),
        }
    }
}

/// Which trained try-on attention checkpoint to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointVersion {
    #[default]
    Mix,
    VitonHd,
    DressCode,
}

impl CheckpointVersion {
    pub fn subfolder(self) -> &'static str {
        match self {
            CheckpointVersion::Mix => "mix-48k-1024",
            CheckpointVersion::VitonHd => "vitonhd-16k-512",
            CheckpointVersion::DressCode => "dresscode-16k-512",
        }
    }
}

impl FromStr for CheckpointVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mix" => Ok(CheckpointVersion::Mix),
            "vitonhd" => Ok(CheckpointVersion::VitonHd),
            "dresscode" => Ok(CheckpointVersion::DressCode),
            other => bail!("unknown checkpoint version: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cuda,
    Cpu,
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cuda" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            other => bail!("unknown device: {other} (expected cuda or cpu)"),
        }
    }
}

/// Configure the global ONNX Runtime environment before any session is built.
///
/// CUDA is registered with `error_on_failure`, so a missing GPU fails at model
/// load instead of silently running on the CPU.
pub fn init_runtime(device: Device, allow_tf32: bool) -> Result<()> {
    let provider = match device {
        Device::Cuda => CUDAExecutionProvider::default()
            .with_device_id(0)
            .with_tf32(allow_tf32)
            .build()
            .error_on_failure(),
        Device::Cpu => CPUExecutionProvider::default().build(),
    };
    tracing::info!("Initializing ONNX Runtime with {:?} (tf32: {})", device, allow_tf32);

    let configured = ort::init()
        .with_name("catvton")
        .with_execution_providers([provider])
        .commit()
        .context("Failed to initialize ONNX Runtime")?;
    if !configured {
        tracing::warn!("ONNX Runtime was already initialized, keeping the existing environment");
    }
    Ok(())
}

pub const SCHEDULER_CONFIG: &str = "scheduler/scheduler_config.json";
pub const VAE_ENCODER: &str = "vae_encoder/model.onnx";
pub const VAE_DECODER: &str = "vae_decoder/model.onnx";

pub fn unet_file(version: CheckpointVersion, dtype: WeightDtype) -> String {
    format!("{}/unet{}.onnx", version.subfolder(), dtype.file_suffix())
}

/// A local directory or a model repository on the Hugging Face hub.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Local(PathBuf),
    Hub(String),
}

impl ModelSource {
    pub fn new(id: &str) -> Self {
        let path = Path::new(id);
        if path.is_dir() {
            ModelSource::Local(path.to_path_buf())
        } else {
            ModelSource::Hub(id.to_string())
        }
    }

    /// Resolve a file, downloading it into the hub cache if needed.
    pub fn get(&self, file: &str) -> Result<PathBuf> {
        match self {
            ModelSource::Local(dir) => {
                let path = dir.join(file);
                if !path.exists() {
                    bail!("Missing {file} in {:?}", dir);
                }
                Ok(path)
            }
            ModelSource::Hub(repo) => {
                let api = Api::new()?;
                let repo_api = api.model(repo.clone());
                repo_api
                    .get(file)
                    .with_context(|| format!("Failed to fetch {file} from {repo}"))
            }
        }
    }
}

/// Build an ONNX session; execution providers come from the global `ort::init`.
pub fn load_session(path: &Path) -> Result<Session> {
    tracing::info!("Loading ONNX model {:?}", path);
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(thread::available_parallelism()?.get())?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load ONNX model {:?}", path))?;

    for input in &session.inputs {
        tracing::debug!("  input {}: {:?}", input.name, input.input_type);
    }
    for output in &session.outputs {
        tracing::debug!("  output {}: {:?}", output.name, output.output_type);
    }

    Ok(session)
}
