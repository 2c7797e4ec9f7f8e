use std::path::Path;

use anyhow::{Context, Result, bail};
use image::{
    GrayImage, Luma, RgbImage,
    imageops::{self, FilterType},
};
use ndarray::{Array4, ArrayView4, Ix4};
use ort::{session::Session, value::Tensor};

// ImageNet statistics, applied in BGR order
const MEAN_BGR: [f32; 3] = [0.406, 0.456, 0.485];
const STD_BGR: [f32; 3] = [0.225, 0.224, 0.229];

/// A per-pixel classifier producing a label map (SCHP parsers, DensePose parts).
#[derive(Debug)]
pub struct ParsingModel {
    name: &'static str,
    model: Session,
    input_size: (u32, u32),
}

impl ParsingModel {
    pub fn new(name: &'static str, path: &Path, input_size: (u32, u32)) -> Result<Self> {
        let model = catvton::model::load_session(path)
            .with_context(|| format!("Failed to load {name} model"))?;
        Ok(Self {
            name,
            model,
            input_size,
        })
    }

    /// Label map with the same size as `image`.
    pub fn parse(&mut self, image: &RgbImage) -> Result<GrayImage> {
        let (width, height) = image.dimensions();
        let tensor = preprocess(image, self.input_size);

        let outputs = self
            .model
            .run(ort::inputs!["input" => Tensor::from_array(tensor)?])
            .with_context(|| format!("{} inference failed", self.name))?;
        let logits = outputs[0]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?;

        let labels = argmax_labels(logits)?;
        tracing::debug!(
            "{} produced a {}x{} label map",
            self.name,
            labels.width(),
            labels.height()
        );

        Ok(imageops::resize(&labels, width, height, FilterType::Nearest))
    }
}

fn preprocess(image: &RgbImage, (width, height): (u32, u32)) -> Array4<f32> {
    let image = imageops::resize(image, width, height, FilterType::Triangle);

    let mut tensor = Array4::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;

        // Channel order: BGR
        for (c, value) in [pixel[2], pixel[1], pixel[0]].into_iter().enumerate() {
            tensor[[0, c, y, x]] = (value as f32 / 255.0 - MEAN_BGR[c]) / STD_BGR[c];
        }
    }
    tensor
}

/// Class with the highest logit at every pixel of a `(1, classes, h, w)` output.
pub fn argmax_labels(logits: ArrayView4<f32>) -> Result<GrayImage> {
    let (_, classes, height, width) = logits.dim();
    if classes == 0 || classes > u8::MAX as usize + 1 {
        bail!("unsupported number of parsing classes: {classes}");
    }

    Ok(GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let mut best = 0;
        for c in 1..classes {
            if logits[[0, c, y, x]] > logits[[0, best, y, x]] {
                best = c;
            }
        }
        Luma([best as u8])
    }))
}
