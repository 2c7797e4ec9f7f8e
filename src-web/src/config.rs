use std::path::PathBuf;

use anyhow::{Result, bail};
use catvton::{Device, WeightDtype};
use clap::Parser;

/// Command-line flags of the try-on demo server.
#[derive(Parser, Debug, Clone)]
#[command(name = "vton", about = "Virtual try-on demo server")]
pub struct Args {
    /// Base inpainting model: a local directory or a model identifier on the hub.
    #[arg(long, default_value = "booksforcharlie/stable-diffusion-inpainting")]
    pub base_model_path: String,

    /// Checkpoint of the trained try-on model (also holds DensePose and SCHP).
    #[arg(long, default_value = "zhengchong/CatVTON")]
    pub resume_path: String,

    /// Where result grids are written.
    #[arg(long, default_value = "resource/demo/output")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 768)]
    pub width: u32,

    #[arg(long, default_value_t = 1024)]
    pub height: u32,

    /// Repaint the result with the original background.
    #[arg(long, default_value_t = false)]
    pub repaint: bool,

    /// Allow TF32 math on Ampere and newer GPUs.
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    pub allow_tf32: bool,

    /// UNet precision: no, fp16 or bf16.
    #[arg(long, default_value = "bf16")]
    pub mixed_precision: WeightDtype,

    #[arg(long, default_value = "cuda")]
    pub device: Device,

    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub local_rank: i32,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 7860)]
    pub port: u16,
}

impl Args {
    /// Parse flags and apply the `LOCAL_RANK` environment override.
    pub fn load() -> Result<Self> {
        let mut args = Self::parse();
        args.apply_local_rank(std::env::var("LOCAL_RANK").ok().as_deref());
        args.validate()?;
        Ok(args)
    }

    pub fn apply_local_rank(&mut self, env_local_rank: Option<&str>) {
        let env_local_rank = env_local_rank
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(-1);
        if env_local_rank != -1 && env_local_rank != self.local_rank {
            self.local_rank = env_local_rank;
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 8 != 0 {
                bail!("--{name} must be a positive multiple of 8, got {value}");
            }
        }
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
