use anyhow::{Result, bail};
use image::{
    GrayImage, Luma,
    imageops::{self, FilterType},
};
use imageproc::{
    contours::{BorderType, find_contours},
    distance_transform::Norm,
    drawing::{draw_line_segment_mut, draw_polygon_mut},
    filter::gaussian_blur_f32,
    geometry::convex_hull,
    morphology::dilate,
    point::Point,
};

use crate::{
    ClothType,
    labels::{self, ATR, LIP},
};

const ON: u8 = 255;

/// Pixels whose label is one of `ids`.
pub fn part_mask(labels: &GrayImage, ids: &[u8]) -> GrayImage {
    GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
        if ids.contains(&labels.get_pixel(x, y)[0]) {
            Luma([ON])
        } else {
            Luma([0])
        }
    })
}

fn combine(a: &GrayImage, b: &GrayImage, f: impl Fn(bool, bool) -> bool) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let on = f(a.get_pixel(x, y)[0] > 0, b.get_pixel(x, y)[0] > 0);
        Luma([if on { ON } else { 0 }])
    })
}

fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |a, b| a || b)
}

fn intersect(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |a, b| a && b)
}

fn subtract(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |a, b| a && !b)
}

/// Square dilation with an odd kernel `size`.
fn dilate_square(mask: &GrayImage, size: u32) -> GrayImage {
    let radius = (size / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return mask.clone();
    }
    dilate(mask, Norm::LInf, radius)
}

fn odd(value: u32) -> u32 {
    if value % 2 == 1 { value } else { value + 1 }
}

/// Fill the convex hull of every outer contour.
pub fn hull_mask(mask: &GrayImage) -> GrayImage {
    let mut out = GrayImage::new(mask.width(), mask.height());
    for contour in find_contours::<i32>(mask) {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        let hull = convex_hull(&contour.points[..]);
        fill_polygon(&mut out, &hull);
    }
    out
}

fn fill_polygon(canvas: &mut GrayImage, points: &[Point<i32>]) {
    match points {
        [] => {}
        [p] => canvas.put_pixel(p.x as u32, p.y as u32, Luma([ON])),
        [a, b] => draw_line_segment_mut(
            canvas,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            Luma([ON]),
        ),
        _ => draw_polygon_mut(canvas, points, Luma([ON])),
    }
}

/// Region of the person to repaint for a garment type, as a 0/255 mask.
///
/// `densepose`, `schp_lip` and `schp_atr` are label maps of the same size.
/// Hands, face and accessories are protected, the target garment and the
/// body area under it are repainted, and the result is expanded to the
/// convex hull so loose garments of a different cut fit in.
pub fn cloth_agnostic_mask(
    densepose: &GrayImage,
    schp_lip: &GrayImage,
    schp_atr: &GrayImage,
    part: ClothType,
) -> Result<GrayImage> {
    let (w, h) = densepose.dimensions();
    if schp_lip.dimensions() != (w, h) || schp_atr.dimensions() != (w, h) {
        bail!(
            "label maps differ in size: densepose {:?}, lip {:?}, atr {:?}",
            densepose.dimensions(),
            schp_lip.dimensions(),
            schp_atr.dimensions()
        );
    }

    let dilate_kernel = odd(w.max(h) / 250);
    let blur_kernel = odd(w.max(h) / 25);

    let lip = |names: &[&str]| part_mask(schp_lip, &labels::parsing_ids(LIP, names));
    let atr = |names: &[&str]| part_mask(schp_atr, &labels::parsing_ids(ATR, names));
    let dense = |names: &[&str]| part_mask(densepose, &labels::densepose_ids(names));
    let both = |names: &[&str]| union(&lip(names), &atr(names));

    // strong protect: hands and feet on skin, plus the face
    let hands = dilate_square(&dense(&["hands", "feet"]), dilate_kernel);
    let hands = intersect(&hands, &both(labels::LIMBS));
    let strong_protect = union(&hands, &lip(&["Face"]));

    // weak protect: hair, other garments, accessories and uncovered body parts
    let body = both(labels::protect_body_parts(part));
    let hair = both(&["Hair"]);
    let (atr_cloth, lip_cloth) = labels::protect_cloth_parts(part);
    let cloth = union(&lip(lip_cloth), &atr(atr_cloth));
    let accessory = both(labels::ACCESSORIES);
    let weak_protect = [&cloth, &hair, &strong_protect, &accessory]
        .into_iter()
        .fold(body, |acc, m| union(&acc, m));

    let strong_mask = both(labels::mask_cloth_parts(part));
    let background = intersect(&lip(&["Background"]), &atr(&["Background"]));

    // body area under the garment, dilated at quarter resolution
    let dense_area = dense(labels::mask_dense_parts(part));
    let (qw, qh) = ((w / 4).max(1), (h / 4).max(1));
    let mut dense_area = imageops::resize(&dense_area, qw, qh, FilterType::Nearest);
    for _ in 0..2 {
        dense_area = dilate_square(&dense_area, dilate_kernel);
    }
    let dense_area = imageops::resize(&dense_area, w, h, FilterType::Nearest);

    let foreground = GrayImage::from_fn(w, h, |x, y| {
        let protected = weak_protect.get_pixel(x, y)[0] > 0 || background.get_pixel(x, y)[0] > 0;
        Luma([if protected { 0 } else { ON }])
    });
    let mask = union(&foreground, &dense_area);
    let mask = hull_mask(&mask);
    let mask = subtract(&mask, &weak_protect);

    let sigma = 0.3 * ((blur_kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let blurred = gaussian_blur_f32(&mask, sigma);
    let mask = GrayImage::from_fn(w, h, |x, y| {
        Luma([if blurred.get_pixel(x, y)[0] >= 25 { ON } else { 0 }])
    });

    let mask = subtract(&union(&mask, &strong_mask), &strong_protect);
    Ok(dilate_square(&mask, dilate_kernel))
}
