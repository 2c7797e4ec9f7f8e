pub mod labels;
pub mod mask;
pub mod parsing;

use std::{fmt, str::FromStr};

use anyhow::{Result, bail};
use catvton::ModelSource;
use image::{GrayImage, RgbImage, imageops};
use serde::{Deserialize, Serialize};

pub use mask::cloth_agnostic_mask;
use parsing::ParsingModel;

pub const DENSEPOSE_MODEL: &str = "DensePose/densepose.onnx";
pub const SCHP_ATR_MODEL: &str = "SCHP/exp-schp-201908301523-atr.onnx";
pub const SCHP_LIP_MODEL: &str = "SCHP/exp-schp-201908261155-lip.onnx";

/// Which body region the new garment replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClothType {
    #[default]
    Upper,
    Lower,
    Overall,
}

impl FromStr for ClothType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upper" => Ok(ClothType::Upper),
            "lower" => Ok(ClothType::Lower),
            "overall" => Ok(ClothType::Overall),
            other => bail!("unknown cloth type: {other} (expected upper, lower or overall)"),
        }
    }
}

impl fmt::Display for ClothType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClothType::Upper => "upper",
            ClothType::Lower => "lower",
            ClothType::Overall => "overall",
        };
        f.write_str(name)
    }
}

/// The generated mask together with the label maps it was derived from.
#[derive(Debug, Clone)]
pub struct MaskOutput {
    pub mask: GrayImage,
    pub densepose: GrayImage,
    pub schp_atr: GrayImage,
    pub schp_lip: GrayImage,
}

#[derive(Debug)]
pub struct AutoMasker {
    densepose: ParsingModel,
    schp_atr: ParsingModel,
    schp_lip: ParsingModel,
}

impl AutoMasker {
    /// Load the parsing models from a checkpoint directory or hub repository.
    pub fn new(checkpoint: &str) -> Result<Self> {
        let source = ModelSource::new(checkpoint);

        let densepose = ParsingModel::new("DensePose", &source.get(DENSEPOSE_MODEL)?, (512, 512))?;
        let schp_atr = ParsingModel::new("SCHP-ATR", &source.get(SCHP_ATR_MODEL)?, (512, 512))?;
        let schp_lip = ParsingModel::new("SCHP-LIP", &source.get(SCHP_LIP_MODEL)?, (473, 473))?;

        tracing::info!("AutoMasker ready");

        Ok(Self {
            densepose,
            schp_atr,
            schp_lip,
        })
    }

    pub fn mask(&mut self, image: &RgbImage, cloth_type: ClothType) -> Result<MaskOutput> {
        let densepose = self.densepose.parse(image)?;
        let schp_atr = self.schp_atr.parse(image)?;
        let schp_lip = self.schp_lip.parse(image)?;

        let mask = cloth_agnostic_mask(&densepose, &schp_lip, &schp_atr, cloth_type)?;
        tracing::info!(
            "Generated {} mask covering {:.1}% of the image",
            cloth_type,
            coverage(&mask) * 100.0
        );

        Ok(MaskOutput {
            mask,
            densepose,
            schp_atr,
            schp_lip,
        })
    }
}

fn coverage(mask: &GrayImage) -> f32 {
    let total = (mask.width() * mask.height()).max(1) as f32;
    mask.pixels().filter(|p| p[0] > 0).count() as f32 / total
}

/// Black out the masked region of a person image.
pub fn vis_mask(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mask = if mask.dimensions() == image.dimensions() {
        mask.clone()
    } else {
        imageops::resize(
            mask,
            image.width(),
            image.height(),
            imageops::FilterType::Nearest,
        )
    };

    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] > 127 {
            pixel.0 = [0, 0, 0];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_cloth_type_parse_and_display() {
        for name in ["upper", "lower", "overall"] {
            let cloth_type: ClothType = name.parse().unwrap();
            assert_eq!(cloth_type.to_string(), name);
        }
        assert!("shoes".parse::<ClothType>().is_err());
    }

    #[test]
    fn test_cloth_type_serde() {
        let cloth_type: ClothType = serde_json::from_str("\"overall\"").unwrap();
        assert_eq!(cloth_type, ClothType::Overall);
        assert_eq!(serde_json::to_string(&ClothType::Lower).unwrap(), "\"lower\"");
    }

    #[test]
    fn test_vis_mask_blanks_masked_pixels() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 100, 50]));
        let mask = GrayImage::from_fn(4, 4, |x, _| Luma([if x < 2 { 255 } else { 127 }]));
        let out = vis_mask(&image, &mask);
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 3), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(2, 0), &Rgb([200, 100, 50]));
    }

    #[test]
    fn test_coverage() {
        let mask = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 3 { 255 } else { 0 }]));
        assert!((coverage(&mask) - 0.3).abs() < 1e-6);
    }

    #[test]
    #[ignore] // Requires model weights
    fn test_auto_masker_output_size() {
        let mut masker = AutoMasker::new("zhengchong/CatVTON").unwrap();
        let image = RgbImage::from_pixel(384, 512, Rgb([128, 128, 128]));
        let output = masker.mask(&image, ClothType::Upper).unwrap();
        assert_eq!(output.mask.dimensions(), (384, 512));
        assert_eq!(output.densepose.dimensions(), (384, 512));
    }
}
