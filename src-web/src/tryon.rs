use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, bail};
use catvton::{CatVtonPipeline, TryOnInput, utils};
use chrono::NaiveDateTime;
use cloth_masker::{AutoMasker, ClothType, vis_mask};
use image::{
    GrayImage, RgbImage,
    imageops::{self, FilterType},
};
use serde::{Deserialize, Serialize};

use crate::output;

const MASK_BLUR_FACTOR: f32 = 9.0;
const VIEW_GAP: u32 = 5;

pub const STEPS_RANGE: std::ops::RangeInclusive<usize> = 10..=100;
pub const GUIDANCE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=7.5;
pub const SEED_RANGE: std::ops::RangeInclusive<i64> = -1..=10000;

/// The diffusion model behind the try-on.
pub trait Inpainter: Send {
    fn generate(&mut self, input: &TryOnInput<'_>) -> Result<RgbImage>;
}

impl Inpainter for CatVtonPipeline {
    fn generate(&mut self, input: &TryOnInput<'_>) -> Result<RgbImage> {
        CatVtonPipeline::generate(self, input)
    }
}

/// Produces a mask of the region to repaint when the user drew none.
pub trait Masker: Send {
    fn mask(&mut self, person: &RgbImage, cloth_type: ClothType) -> Result<GrayImage>;
}

impl Masker for AutoMasker {
    fn mask(&mut self, person: &RgbImage, cloth_type: ClothType) -> Result<GrayImage> {
        Ok(AutoMasker::mask(self, person, cloth_type)?.mask)
    }
}

/// What the page shows next to the generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShowType {
    #[serde(rename = "result only")]
    ResultOnly,
    #[serde(rename = "input & result")]
    InputResult,
    #[default]
    #[serde(rename = "input & mask & result")]
    InputMaskResult,
}

impl ShowType {
    pub fn label(self) -> &'static str {
        match self {
            ShowType::ResultOnly => "result only",
            ShowType::InputResult => "input & result",
            ShowType::InputMaskResult => "input & mask & result",
        }
    }
}

impl FromStr for ShowType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            ShowType::ResultOnly,
            ShowType::InputResult,
            ShowType::InputMaskResult,
        ]
        .into_iter()
        .find(|show_type| show_type.label() == s)
        .with_context(|| format!("unknown show type: {s}"))
    }
}

impl fmt::Display for ShowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct TryOnRequest {
    pub person: RgbImage,
    /// Layer drawn over the person; white marks the region to replace.
    pub mask: Option<GrayImage>,
    pub cloth: RgbImage,
    pub cloth_type: ClothType,
    pub num_inference_steps: usize,
    pub guidance_scale: f32,
    /// `-1` picks a random seed.
    pub seed: i64,
    pub show_type: ShowType,
}

impl TryOnRequest {
    pub fn validate(&self) -> Result<()> {
        if !STEPS_RANGE.contains(&self.num_inference_steps) {
            bail!(
                "steps must be within {}..={}, got {}",
                STEPS_RANGE.start(),
                STEPS_RANGE.end(),
                self.num_inference_steps
            );
        }
        if !GUIDANCE_RANGE.contains(&self.guidance_scale) {
            bail!(
                "guidance scale must be within {}..={}, got {}",
                GUIDANCE_RANGE.start(),
                GUIDANCE_RANGE.end(),
                self.guidance_scale
            );
        }
        if !SEED_RANGE.contains(&self.seed) {
            bail!(
                "seed must be within {}..={}, got {}",
                SEED_RANGE.start(),
                SEED_RANGE.end(),
                self.seed
            );
        }
        if self.person.width() == 0 || self.person.height() == 0 {
            bail!("person image is empty");
        }
        if self.cloth.width() == 0 || self.cloth.height() == 0 {
            bail!("cloth image is empty");
        }
        Ok(())
    }

    fn generator_seed(&self) -> Option<u64> {
        u64::try_from(self.seed).ok()
    }
}

#[derive(Debug, Clone)]
pub struct TryOnSettings {
    pub size: (u32, u32),
    pub output_dir: PathBuf,
    pub repaint: bool,
}

#[derive(Debug)]
pub struct TryOnOutput {
    pub image: RgbImage,
    /// The 1x4 grid written to disk.
    pub saved_path: PathBuf,
}

/// The loaded models and the settings they run with.
#[derive(Debug)]
pub struct TryOnEngine<I, M> {
    pub inpainter: I,
    pub masker: M,
    pub settings: TryOnSettings,
}

impl<I: Inpainter, M: Masker> TryOnEngine<I, M> {
    pub fn new(inpainter: I, masker: M, settings: TryOnSettings) -> Self {
        Self {
            inpainter,
            masker,
            settings,
        }
    }

    pub fn submit(&mut self, request: &TryOnRequest, now: NaiveDateTime) -> Result<TryOnOutput> {
        request.validate()?;
        let size = self.settings.size;

        let person = utils::resize_and_crop(&request.person, size);
        let cloth = utils::resize_and_padding(&request.cloth, size);

        let mask = match request.mask.as_ref().filter(|mask| !is_blank(mask)) {
            Some(mask) => utils::resize_and_crop(&utils::binarize(mask), size),
            None => {
                tracing::info!("No mask drawn, generating a {} mask", request.cloth_type);
                let mask = self.masker.mask(&person, request.cloth_type)?;
                if mask.dimensions() == size {
                    mask
                } else {
                    imageops::resize(&mask, size.0, size.1, FilterType::Nearest)
                }
            }
        };
        let mask = utils::blur_mask(&mask, MASK_BLUR_FACTOR);

        let seed = request.generator_seed();
        tracing::info!(
            "Generating {}x{} try-on: {} steps, guidance {}, seed {:?}",
            size.0,
            size.1,
            request.num_inference_steps,
            request.guidance_scale,
            seed
        );

        let result = self.inpainter.generate(&TryOnInput {
            image: &person,
            condition_image: &cloth,
            mask: &mask,
            num_inference_steps: request.num_inference_steps,
            guidance_scale: request.guidance_scale,
            seed,
            size,
        })?;
        let result = if self.settings.repaint {
            utils::repaint(&person, &mask, &result)?
        } else {
            result
        };

        let masked_person = vis_mask(&person, &mask);
        let grid = utils::image_grid(
            &[person.clone(), masked_person.clone(), cloth.clone(), result.clone()],
            1,
            4,
        )?;
        let saved_path = output::prepare_result_path(&self.settings.output_dir, now)?;
        grid.save(&saved_path)
            .with_context(|| format!("Failed to save result to {}", saved_path.display()))?;
        tracing::info!("Saved result grid to {}", saved_path.display());

        let image = compose_view(request.show_type, &person, &masked_person, &cloth, &result)?;

        Ok(TryOnOutput { image, saved_path })
    }
}

/// A mask layer with a single pixel value carries no drawing.
pub fn is_blank(mask: &GrayImage) -> bool {
    let mut pixels = mask.pixels();
    match pixels.next() {
        Some(first) => pixels.all(|p| p == first),
        None => true,
    }
}

/// Place the input conditions, stacked vertically, to the left of the result.
pub fn compose_view(
    show_type: ShowType,
    person: &RgbImage,
    masked_person: &RgbImage,
    cloth: &RgbImage,
    result: &RgbImage,
) -> Result<RgbImage> {
    let (width, height) = result.dimensions();
    let (conditions, cond_width) = match show_type {
        ShowType::ResultOnly => return Ok(result.clone()),
        ShowType::InputResult => (
            utils::image_grid(&[person.clone(), cloth.clone()], 2, 1)?,
            width / 2,
        ),
        ShowType::InputMaskResult => (
            utils::image_grid(&[person.clone(), masked_person.clone(), cloth.clone()], 3, 1)?,
            width / 3,
        ),
    };
    let conditions = imageops::resize(&conditions, cond_width, height, FilterType::Nearest);

    let mut canvas = RgbImage::new(width + cond_width + VIEW_GAP, height);
    imageops::replace(&mut canvas, &conditions, 0, 0);
    imageops::replace(&mut canvas, result, (cond_width + VIEW_GAP) as i64, 0);
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{Luma, Rgb};

    const RESULT_COLOR: Rgb<u8> = Rgb([10, 200, 30]);

    #[derive(Default)]
    struct FakeInpainter {
        calls: Vec<(usize, Option<u64>, (u32, u32))>,
        last_mask: Option<GrayImage>,
    }

    impl Inpainter for FakeInpainter {
        fn generate(&mut self, input: &TryOnInput<'_>) -> Result<RgbImage> {
            self.calls
                .push((input.num_inference_steps, input.seed, input.mask.dimensions()));
            self.last_mask = Some(input.mask.clone());
            Ok(RgbImage::from_pixel(input.size.0, input.size.1, RESULT_COLOR))
        }
    }

    #[derive(Default)]
    struct FakeMasker {
        calls: Vec<ClothType>,
    }

    impl Masker for FakeMasker {
        fn mask(&mut self, person: &RgbImage, cloth_type: ClothType) -> Result<GrayImage> {
            self.calls.push(cloth_type);
            Ok(GrayImage::from_fn(person.width(), person.height(), |x, _| {
                Luma([if x < person.width() / 2 { 255 } else { 0 }])
            }))
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 11, 2)
            .unwrap()
            .and_hms_opt(13, 45, 9)
            .unwrap()
    }

    fn engine(dir: &std::path::Path) -> TryOnEngine<FakeInpainter, FakeMasker> {
        TryOnEngine::new(
            FakeInpainter::default(),
            FakeMasker::default(),
            TryOnSettings {
                size: (48, 64),
                output_dir: dir.to_path_buf(),
                repaint: false,
            },
        )
    }

    fn request() -> TryOnRequest {
        TryOnRequest {
            person: RgbImage::from_pixel(90, 120, Rgb([120, 120, 120])),
            mask: None,
            cloth: RgbImage::from_pixel(60, 60, Rgb([200, 0, 0])),
            cloth_type: ClothType::Upper,
            num_inference_steps: 50,
            guidance_scale: 2.5,
            seed: 42,
            show_type: ShowType::ResultOnly,
        }
    }

    #[test]
    fn test_show_type_labels() {
        for show_type in [
            ShowType::ResultOnly,
            ShowType::InputResult,
            ShowType::InputMaskResult,
        ] {
            assert_eq!(show_type.label().parse::<ShowType>().unwrap(), show_type);
            let json = serde_json::to_string(&show_type).unwrap();
            assert_eq!(json, format!("\"{}\"", show_type.label()));
        }
        assert!("everything".parse::<ShowType>().is_err());
        assert_eq!(ShowType::default(), ShowType::InputMaskResult);
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(&GrayImage::new(4, 4)));
        assert!(is_blank(&GrayImage::from_pixel(4, 4, Luma([255]))));
        let mut drawn = GrayImage::new(4, 4);
        drawn.put_pixel(2, 1, Luma([255]));
        assert!(!is_blank(&drawn));
    }

    #[test]
    fn test_validate_limits() {
        assert!(request().validate().is_ok());

        let mut r = request();
        r.num_inference_steps = 5;
        assert!(r.validate().is_err());
        r.num_inference_steps = 101;
        assert!(r.validate().is_err());

        let mut r = request();
        r.guidance_scale = 7.6;
        assert!(r.validate().is_err());

        let mut r = request();
        r.seed = -2;
        assert!(r.validate().is_err());
        r.seed = 10001;
        assert!(r.validate().is_err());
        r.seed = -1;
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_blank_mask_triggers_auto_masking() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let mut r = request();
        r.cloth_type = ClothType::Lower;
        r.mask = Some(GrayImage::new(90, 120));
        engine.submit(&r, now()).unwrap();

        assert_eq!(engine.masker.calls, vec![ClothType::Lower]);
        assert_eq!(engine.inpainter.calls, vec![(50, Some(42), (48, 64))]);
    }

    #[test]
    fn test_drawn_mask_skips_auto_masking() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let mut r = request();
        let mut mask = GrayImage::new(90, 120);
        for y in 0..120 {
            for x in 30..90 {
                mask.put_pixel(x, y, Luma([40]));
            }
        }
        r.mask = Some(mask);
        engine.submit(&r, now()).unwrap();

        assert!(engine.masker.calls.is_empty());
        let used = engine.inpainter.last_mask.as_ref().unwrap();
        assert_eq!(used.dimensions(), (48, 64));
        // binarized before blurring, so the faint stroke still dominates
        assert!(used.get_pixel(40, 32)[0] > 127);
        assert!(used.get_pixel(0, 32)[0] < 40);
    }

    #[test]
    fn test_random_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());
        let mut r = request();
        r.seed = -1;
        engine.submit(&r, now()).unwrap();
        assert_eq!(engine.inpainter.calls[0].1, None);
    }

    #[test]
    fn test_submit_saves_grid() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());

        let output = engine.submit(&request(), now()).unwrap();
        assert_eq!(output.saved_path, dir.path().join("20241102").join("134509.png"));

        let grid = image::open(&output.saved_path).unwrap().to_rgb8();
        assert_eq!(grid.dimensions(), (48 * 4, 64));
        // last panel is the result
        assert_eq!(grid.get_pixel(48 * 3 + 10, 10), &RESULT_COLOR);
        // result only
        assert_eq!(output.image.dimensions(), (48, 64));
    }

    #[test]
    fn test_invalid_request_is_rejected_before_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());
        let mut r = request();
        r.guidance_scale = -1.0;
        assert!(engine.submit(&r, now()).is_err());
        assert!(engine.inpainter.calls.is_empty());
    }

    #[test]
    fn test_repaint_keeps_unmasked_person() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());
        engine.settings.repaint = true;

        let output = engine.submit(&request(), now()).unwrap();
        // the fake mask covers the left half only
        let kept = output.image.get_pixel(47, 32);
        assert!(kept.0.iter().all(|&c| c.abs_diff(120) <= 3));
        assert!(output.image.get_pixel(0, 32)[1] > 140);
    }

    #[test]
    fn test_compose_view_layouts() {
        let person = RgbImage::from_pixel(60, 80, Rgb([1, 1, 1]));
        let masked = RgbImage::from_pixel(60, 80, Rgb([2, 2, 2]));
        let cloth = RgbImage::from_pixel(60, 80, Rgb([3, 3, 3]));
        let result = RgbImage::from_pixel(60, 80, RESULT_COLOR);

        let view = compose_view(ShowType::ResultOnly, &person, &masked, &cloth, &result).unwrap();
        assert_eq!(view, result);

        let view = compose_view(ShowType::InputResult, &person, &masked, &cloth, &result).unwrap();
        assert_eq!(view.dimensions(), (60 + 30 + 5, 80));
        assert_eq!(view.get_pixel(10, 10), &Rgb([1, 1, 1]));
        assert_eq!(view.get_pixel(10, 70), &Rgb([3, 3, 3]));
        // gap stays black
        assert_eq!(view.get_pixel(32, 40), &Rgb([0, 0, 0]));
        assert_eq!(view.get_pixel(35, 40), &RESULT_COLOR);

        let view =
            compose_view(ShowType::InputMaskResult, &person, &masked, &cloth, &result).unwrap();
        assert_eq!(view.dimensions(), (60 + 20 + 5, 80));
        assert_eq!(view.get_pixel(5, 40), &Rgb([2, 2, 2]));
        assert_eq!(view.get_pixel(5, 75), &Rgb([3, 3, 3]));
        assert_eq!(view.get_pixel(84, 79), &RESULT_COLOR);
    }
}
