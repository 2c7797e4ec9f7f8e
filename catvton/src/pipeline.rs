use anyhow::{Context, Result, bail};
use image::{GrayImage, RgbImage};
use ndarray::{Array1, Array4, Axis, Ix4, concatenate, s};
use ort::{
    session::Session,
    tensor::TensorElementType,
    value::{Tensor, ValueType},
};

use crate::{
    model::{
        self, CheckpointVersion, ModelSource, SCHEDULER_CONFIG, VAE_DECODER, VAE_ENCODER,
        WeightDtype,
    },
    noise,
    scheduler::{DdimScheduler, SchedulerConfig},
    utils,
};

const VAE_SCALING_FACTOR: f32 = 0.18215;
const LATENT_CHANNELS: usize = 4;
const VAE_SCALE: u32 = 8;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_model: String,
    pub attn_ckpt: String,
    pub attn_ckpt_version: CheckpointVersion,
    pub weight_dtype: WeightDtype,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_model: "booksforcharlie/stable-diffusion-inpainting".to_string(),
            attn_ckpt: "zhengchong/CatVTON".to_string(),
            attn_ckpt_version: CheckpointVersion::Mix,
            weight_dtype: WeightDtype::Bf16,
        }
    }
}

/// Inputs of one try-on generation.
#[derive(Debug, Clone)]
pub struct TryOnInput<'a> {
    pub image: &'a RgbImage,
    pub condition_image: &'a RgbImage,
    pub mask: &'a GrayImage,
    pub num_inference_steps: usize,
    pub guidance_scale: f32,
    pub seed: Option<u64>,
    /// Working resolution; inputs of another size are normalized to it.
    pub size: (u32, u32),
}

/// Try-on by concatenation: the garment latent is stacked under the person
/// latent and the UNet repaints the masked region of the person.
#[derive(Debug)]
pub struct CatVtonPipeline {
    vae_encoder: Session,
    vae_decoder: Session,
    unet: Session,
    scheduler_config: SchedulerConfig,
    timestep_i64: bool,
}

impl CatVtonPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let base = ModelSource::new(&config.base_model);
        let ckpt = ModelSource::new(&config.attn_ckpt);

        let scheduler_config = SchedulerConfig::from_file(&base.get(SCHEDULER_CONFIG)?)?;
        // validate early, the scheduler itself is rebuilt per request
        DdimScheduler::new(scheduler_config.clone())?;

        let vae_encoder = model::load_session(&base.get(VAE_ENCODER)?)?;
        let vae_decoder = model::load_session(&base.get(VAE_DECODER)?)?;
        let unet_file = model::unet_file(config.attn_ckpt_version, config.weight_dtype);
        let unet = model::load_session(&ckpt.get(&unet_file)?)?;

        let timestep_i64 = unet.inputs.iter().any(|input| {
            input.name == "timestep"
                && matches!(
                    input.input_type,
                    ValueType::Tensor {
                        ty: TensorElementType::Int64,
                        ..
                    }
                )
        });

        tracing::info!(
            "CatVTON pipeline ready (checkpoint {}, dtype {:?})",
            unet_file,
            config.weight_dtype
        );

        Ok(Self {
            vae_encoder,
            vae_decoder,
            unet,
            scheduler_config,
            timestep_i64,
        })
    }

    pub fn generate(&mut self, input: &TryOnInput<'_>) -> Result<RgbImage> {
        let (width, height) = input.size;
        if width == 0 || height == 0 || width % VAE_SCALE != 0 || height % VAE_SCALE != 0 {
            bail!("width and height must be positive multiples of {VAE_SCALE}, got {width}x{height}");
        }

        let (image, condition_image, mask) = check_inputs(input);

        let image = utils::image_to_tensor(&image);
        let condition = utils::image_to_tensor(&condition_image);
        let mask = utils::mask_to_tensor(&mask);

        // keep only the unmasked part of the person
        let masked_image = &image * &mask.mapv(|m| if m < 0.5 { 1.0 } else { 0.0 });

        let masked_latent = self.encode(masked_image)?;
        let condition_latent = self.encode(condition)?;
        let (_, _, latent_h, latent_w) = masked_latent.dim();
        let mask_latent = downsample_nearest(&mask, latent_h, latent_w);

        // stack person over garment along the height axis
        let height_axis = Axis(2);
        let masked_latent_concat =
            concatenate(height_axis, &[masked_latent.view(), condition_latent.view()])?;
        let mask_latent_concat = concatenate(
            height_axis,
            &[mask_latent.view(), Array4::zeros(mask_latent.dim()).view()],
        )?;

        let mut scheduler = DdimScheduler::new(self.scheduler_config.clone())?;
        scheduler.set_timesteps(input.num_inference_steps)?;

        let mut latents = noise::randn(masked_latent_concat.dim(), input.seed)
            * scheduler.init_noise_sigma() as f32;

        let do_cfg = input.guidance_scale > 1.0;
        let (masked_latent_concat, mask_latent_concat) = if do_cfg {
            let uncond = concatenate(
                height_axis,
                &[
                    masked_latent.view(),
                    Array4::zeros(condition_latent.dim()).view(),
                ],
            )?;
            (
                concatenate(Axis(0), &[uncond.view(), masked_latent_concat.view()])?,
                concatenate(Axis(0), &[mask_latent_concat.view(), mask_latent_concat.view()])?,
            )
        } else {
            (masked_latent_concat, mask_latent_concat)
        };

        let timesteps = scheduler.timesteps().to_vec();
        for (i, &t) in timesteps.iter().enumerate() {
            let model_input = if do_cfg {
                concatenate(Axis(0), &[latents.view(), latents.view()])?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, t);
            let model_input = concatenate(
                Axis(1),
                &[
                    model_input.view(),
                    mask_latent_concat.view(),
                    masked_latent_concat.view(),
                ],
            )?;

            let noise_pred = self.denoise(model_input, t)?;
            let noise_pred = if do_cfg {
                let uncond = noise_pred.slice(s![0..1, .., .., ..]);
                let cond = noise_pred.slice(s![1..2, .., .., ..]);
                &uncond + &((&cond - &uncond) * input.guidance_scale)
            } else {
                noise_pred
            };

            latents = scheduler.step(&noise_pred, t, &latents)?;
            tracing::debug!("denoise step {}/{} (t = {t})", i + 1, timesteps.len());
        }

        // drop the garment half
        let latents = latents
            .slice(s![.., .., 0..latent_h, ..])
            .mapv(|v| v / VAE_SCALING_FACTOR);
        let decoded = self.decode(latents)?;
        utils::tensor_to_image(&decoded)
    }

    fn encode(&mut self, image: Array4<f32>) -> Result<Array4<f32>> {
        let outputs = self
            .vae_encoder
            .run(ort::inputs!["sample" => Tensor::from_array(image)?])
            .context("VAE encoder failed")?;
        let latent = outputs[0]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix4>()?;

        // exports that return the distribution parameters carry mean and logvar
        let latent = match latent.dim().1 {
            LATENT_CHANNELS => latent,
            c if c == 2 * LATENT_CHANNELS => latent.slice(s![.., 0..LATENT_CHANNELS, .., ..]).to_owned(),
            c => bail!("unexpected VAE latent channels: {c}"),
        };

        Ok(latent * VAE_SCALING_FACTOR)
    }

    fn decode(&mut self, latents: Array4<f32>) -> Result<Array4<f32>> {
        let outputs = self
            .vae_decoder
            .run(ort::inputs!["latent_sample" => Tensor::from_array(latents)?])
            .context("VAE decoder failed")?;
        Ok(outputs[0]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix4>()?)
    }

    fn denoise(&mut self, sample: Array4<f32>, timestep: usize) -> Result<Array4<f32>> {
        let batch = sample.dim().0;
        let outputs = if self.timestep_i64 {
            let timestep = Array1::from_elem(batch, timestep as i64);
            self.unet.run(ort::inputs![
                "sample" => Tensor::from_array(sample)?,
                "timestep" => Tensor::from_array(timestep)?,
            ])
        } else {
            let timestep = Array1::from_elem(batch, timestep as f32);
            self.unet.run(ort::inputs![
                "sample" => Tensor::from_array(sample)?,
                "timestep" => Tensor::from_array(timestep)?,
            ])
        }
        .context("UNet failed")?;

        Ok(outputs[0]
            .try_extract_array::<f32>()?
            .to_owned()
            .into_dimensionality::<Ix4>()?)
    }
}

/// Bring person, garment and mask to the working resolution.
fn check_inputs(input: &TryOnInput<'_>) -> (RgbImage, RgbImage, GrayImage) {
    let size = input.size;
    let image = if input.image.dimensions() == size {
        input.image.clone()
    } else {
        utils::resize_and_crop(input.image, size)
    };
    let condition = if input.condition_image.dimensions() == size {
        input.condition_image.clone()
    } else {
        utils::resize_and_padding(input.condition_image, size)
    };
    let mask = if input.mask.dimensions() == size {
        input.mask.clone()
    } else {
        utils::resize_and_crop(input.mask, size)
    };
    (image, condition, mask)
}

/// Nearest-neighbour downsampling of a `(1, 1, h, w)` mask tensor.
fn downsample_nearest(mask: &Array4<f32>, height: usize, width: usize) -> Array4<f32> {
    let (_, _, h, w) = mask.dim();
    Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
        let sy = (y * h / height).min(h - 1);
        let sx = (x * w / width).min(w - 1);
        mask[[0, 0, sy, sx]]
    })
}
