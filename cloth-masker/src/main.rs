use clap::Parser;
use cloth_masker::{AutoMasker, ClothType, vis_mask};

#[derive(Parser)]
struct Args {
    #[arg(long)]
    image: String,

    #[arg(long, default_value = "upper")]
    cloth_type: ClothType,

    #[arg(long, default_value = "zhengchong/CatVTON")]
    checkpoint: String,

    #[arg(long, default_value = "mask.png")]
    output: String,

    /// Also save the person with the mask blanked out.
    #[arg(long)]
    preview: Option<String>,

    #[arg(long, default_value_t = false)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let device = if args.cpu {
        catvton::Device::Cpu
    } else {
        catvton::Device::Cuda
    };
    catvton::init_runtime(device, true)?;

    let mut masker = AutoMasker::new(&args.checkpoint)?;
    let image = image::open(&args.image)
        .map_err(|e| anyhow::anyhow!("Failed to open image: {e}"))?
        .to_rgb8();

    let output = masker.mask(&image, args.cloth_type)?;
    output
        .mask
        .save(&args.output)
        .map_err(|e| anyhow::anyhow!("Failed to save mask: {e}"))?;

    if let Some(preview) = &args.preview {
        vis_mask(&image, &output.mask)
            .save(preview)
            .map_err(|e| anyhow::anyhow!("Failed to save preview: {e}"))?;
    }

    println!("Saved {} mask to {}", args.cloth_type, args.output);

    Ok(())
}
