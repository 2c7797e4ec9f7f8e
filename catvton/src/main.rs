use catvton::{
    CatVtonPipeline, CheckpointVersion, PipelineConfig, TryOnInput, WeightDtype,
    model::{Device, init_runtime},
    utils,
};
use clap::Parser;

#[derive(Parser)]
struct Cli {
    #[arg(long)]
    person: String,

    #[arg(long)]
    cloth: String,

    /// White marks the region to repaint.
    #[arg(long)]
    mask: String,

    #[arg(long, default_value = "output.png")]
    output: String,

    #[arg(long, default_value = "booksforcharlie/stable-diffusion-inpainting")]
    base_model_path: String,

    #[arg(long, default_value = "zhengchong/CatVTON")]
    resume_path: String,

    #[arg(long, default_value = "mix")]
    version: CheckpointVersion,

    #[arg(long, default_value = "bf16")]
    mixed_precision: WeightDtype,

    #[arg(long, default_value_t = 768)]
    width: u32,

    #[arg(long, default_value_t = 1024)]
    height: u32,

    #[arg(long, default_value_t = 50)]
    steps: usize,

    #[arg(long, default_value_t = 2.5)]
    guidance_scale: f32,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = false)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let device = if cli.cpu { Device::Cpu } else { Device::Cuda };
    init_runtime(device, true)?;

    let mut pipeline = CatVtonPipeline::new(&PipelineConfig {
        base_model: cli.base_model_path,
        attn_ckpt: cli.resume_path,
        attn_ckpt_version: cli.version,
        weight_dtype: cli.mixed_precision,
    })?;

    let size = (cli.width, cli.height);
    let person = image::open(&cli.person)
        .map_err(|e| anyhow::anyhow!("Failed to open person image: {e}"))?
        .to_rgb8();
    let cloth = image::open(&cli.cloth)
        .map_err(|e| anyhow::anyhow!("Failed to open cloth image: {e}"))?
        .to_rgb8();
    let mask = image::open(&cli.mask)
        .map_err(|e| anyhow::anyhow!("Failed to open mask: {e}"))?
        .to_luma8();

    let person = utils::resize_and_crop(&person, size);
    let cloth = utils::resize_and_padding(&cloth, size);
    let mask = utils::resize_and_crop(&mask, size);

    let start = std::time::Instant::now();
    let result = pipeline.generate(&TryOnInput {
        image: &person,
        condition_image: &cloth,
        mask: &mask,
        num_inference_steps: cli.steps,
        guidance_scale: cli.guidance_scale,
        seed: cli.seed,
        size,
    })?;
    println!("Inference took: {:?}", start.elapsed());

    result
        .save(&cli.output)
        .map_err(|e| anyhow::anyhow!("Failed to save output image: {e}"))?;

    println!("Successfully processed and saved image to {}", cli.output);

    Ok(())
}
