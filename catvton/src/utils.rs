use anyhow::{Result, bail};
use image::{
    GenericImageView, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage,
    imageops::{self, FilterType},
};
use ndarray::Array4;

/// Tile same-sized images row-major into a `rows x cols` montage.
pub fn image_grid(images: &[RgbImage], rows: u32, cols: u32) -> Result<RgbImage> {
    if images.len() != (rows * cols) as usize {
        bail!(
            "image grid expects {} images ({rows}x{cols}), got {}",
            rows * cols,
            images.len()
        );
    }
    let Some(first) = images.first() else {
        bail!("image grid needs at least one image");
    };

    let (w, h) = first.dimensions();
    let mut grid = RgbImage::new(cols * w, rows * h);
    for (i, image) in images.iter().enumerate() {
        let i = i as u32;
        let x = (i % cols * w) as i64;
        let y = (i / cols * h) as i64;
        imageops::replace(&mut grid, image, x, y);
    }

    Ok(grid)
}

/// Center-crop to the target aspect ratio, then resize to exactly `size`.
pub fn resize_and_crop<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    size: (u32, u32),
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (w, h) = image.dimensions();
    let (target_w, target_h) = size;

    // compare w/h < W/H without floating point
    let (new_w, new_h) = if (w as u64) * (target_h as u64) < (target_w as u64) * (h as u64) {
        (w, (w as u64 * target_h as u64 / target_w as u64) as u32)
    } else {
        ((h as u64 * target_w as u64 / target_h as u64) as u32, h)
    };
    let (new_w, new_h) = (new_w.clamp(1, w), new_h.clamp(1, h));

    let cropped = image.view((w - new_w) / 2, (h - new_h) / 2, new_w, new_h).to_image();
    imageops::resize(&cropped, target_w, target_h, FilterType::Lanczos3)
}

/// Resize to fit inside `size` keeping the aspect ratio and letterbox on white.
pub fn resize_and_padding(image: &RgbImage, size: (u32, u32)) -> RgbImage {
    let (w, h) = image.dimensions();
    let (target_w, target_h) = size;

    let (new_w, new_h) = if (w as u64) * (target_h as u64) < (target_w as u64) * (h as u64) {
        ((w as u64 * target_h as u64 / h as u64) as u32, target_h)
    } else {
        (target_w, (h as u64 * target_w as u64 / w as u64) as u32)
    };
    let (new_w, new_h) = (new_w.clamp(1, target_w), new_h.clamp(1, target_h));

    let resized = imageops::resize(image, new_w, new_h, FilterType::Lanczos3);
    let mut padding = RgbImage::from_pixel(target_w, target_h, Rgb([255, 255, 255]));
    imageops::replace(
        &mut padding,
        &resized,
        ((target_w - new_w) / 2) as i64,
        ((target_h - new_h) / 2) as i64,
    );
    padding
}

/// Gaussian blur of a mask, `radius` plays the role of the blur factor.
pub fn blur_mask(mask: &GrayImage, radius: f32) -> GrayImage {
    if radius <= 0.0 {
        return mask.clone();
    }
    imageops::blur(mask, radius)
}

/// Paste the original person back outside a softened mask.
pub fn repaint(person: &RgbImage, mask: &GrayImage, result: &RgbImage) -> Result<RgbImage> {
    if person.dimensions() != result.dimensions() || mask.dimensions() != result.dimensions() {
        bail!(
            "repaint needs matching sizes: person {:?}, mask {:?}, result {:?}",
            person.dimensions(),
            mask.dimensions(),
            result.dimensions()
        );
    }

    let (_, h) = result.dimensions();
    let mut kernel_size = h / 50;
    if kernel_size % 2 == 0 {
        kernel_size += 1;
    }
    let mask = imageops::blur(mask, kernel_size as f32);

    let mut out = RgbImage::new(result.width(), result.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let m = mask.get_pixel(x, y)[0] as f32 / 255.0;
        let p = person.get_pixel(x, y);
        let r = result.get_pixel(x, y);
        for c in 0..3 {
            let v = p[c] as f32 * (1.0 - m) + r[c] as f32 * m;
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Set every non-zero pixel to 255.
pub fn binarize(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// RGB image to a `(1, 3, h, w)` tensor in `[-1, 1]`.
pub fn image_to_tensor(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;

        // Normalize from [0, 255] to [-1, 1]
        tensor[[0, 0, y, x]] = (pixel[0] as f32 / 255.0 - 0.5) / 0.5;
        tensor[[0, 1, y, x]] = (pixel[1] as f32 / 255.0 - 0.5) / 0.5;
        tensor[[0, 2, y, x]] = (pixel[2] as f32 / 255.0 - 0.5) / 0.5;
    }
    tensor
}

/// Grayscale mask to a binary `(1, 1, h, w)` tensor, 1 marks the area to repaint.
pub fn mask_to_tensor(mask: &GrayImage) -> Array4<f32> {
    let (w, h) = mask.dimensions();
    let mut tensor = Array4::zeros((1, 1, h as usize, w as usize));
    for (x, y, pixel) in mask.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] =
            if pixel[0] as f32 / 255.0 >= 0.5 { 1.0 } else { 0.0 };
    }
    tensor
}

/// First batch entry of a `[-1, 1]` NCHW tensor back to an RGB image.
pub fn tensor_to_image(tensor: &Array4<f32>) -> Result<RgbImage> {
    let (_, channels, height, width) = tensor.dim();
    if channels != 3 {
        bail!("expected 3 channels in decoded image, got {channels}");
    }

    let mut output = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let (xu, yu) = (x as usize, y as usize);
        for c in 0..3 {
            let v = (tensor[[0, c, yu, xu]] / 2.0 + 0.5).clamp(0.0, 1.0);
            pixel[c] = (v * 255.0).round() as u8;
        }
    }
    Ok(output)
}
