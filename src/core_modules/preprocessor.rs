// THEORY:
// The `FramePreprocessor` turns a raw colour frame into the single-channel image the
// later stages reason about. It is a pure function: identical pixels and flags always
// produce bit-identical output, and the output keeps the input's dimensions.
//
// Steps, in order:
// 1.  **Grayscale**: colour carries no information about a dark fish on a light tank.
// 2.  **Normalization**: stretch the observed intensity range to the full 0..=255 scale
//     so the contrast factor means the same thing on dim and bright videos.
// 3.  **Contrast**: a single multiplicative factor, constant for a whole run.
// 4.  **Denoise** (optional): a small Gaussian followed by a wide median filter to
//     remove speckle without rounding the body outline too much.
// 5.  **Binarize** (optional): automatic (Otsu) threshold, inverted so the fish blob is
//     white, then dilate and close with a small elliptical element to fill gaps.

use image::{GrayImage, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::morphology::{dilate, erode};

/// Sigma matching a 3x3 Gaussian kernel.
const GAUSSIAN_SIGMA: f32 = 0.8;
/// Median window radius (9x9 window).
const MEDIAN_RADIUS: u32 = 4;
/// Iterations of each morphological operation.
const MORPH_ITERATIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessFlags {
    pub blur: bool,
    pub threshold: bool,
}

impl PreprocessFlags {
    /// Denoise only, used while learning the background.
    pub const BLUR_ONLY: Self = Self { blur: true, threshold: false };
    /// Full segmentation, used on every frame of the second pass.
    pub const SEGMENT: Self = Self { blur: true, threshold: true };
}

pub fn preprocess(frame: &RgbImage, contrast: f64, flags: PreprocessFlags) -> GrayImage {
    let mut gray = image::imageops::grayscale(frame);
    normalize_in_place(&mut gray);
    apply_contrast_in_place(&mut gray, contrast);

    if flags.blur {
        gray = gaussian_blur_f32(&gray, GAUSSIAN_SIGMA);
        gray = median_filter(&gray, MEDIAN_RADIUS, MEDIAN_RADIUS);
    }

    if flags.threshold {
        let level = otsu_level(&gray);
        threshold_inverted_in_place(&mut gray, level);
        gray = consolidate_blob(&gray);
    }

    gray
}

/// Stretches the observed [min, max] range to [0, 255]. Flat frames are left untouched.
fn normalize_in_place(gray: &mut GrayImage) {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max <= min {
        return;
    }
    let span = (max - min) as f32;
    for p in gray.pixels_mut() {
        let v = (p.0[0] - min) as f32 * 255.0 / span;
        p.0[0] = v.round() as u8;
    }
}

fn apply_contrast_in_place(gray: &mut GrayImage, contrast: f64) {
    if (contrast - 1.0).abs() < f64::EPSILON {
        return;
    }
    for p in gray.pixels_mut() {
        p.0[0] = (p.0[0] as f64 * contrast).round().clamp(0.0, 255.0) as u8;
    }
}

/// Pixels at or below `level` become foreground (255), the rest background.
fn threshold_inverted_in_place(gray: &mut GrayImage, level: u8) {
    for p in gray.pixels_mut() {
        p.0[0] = if p.0[0] <= level { 255 } else { 0 };
    }
}

/// Dilate, then close (dilate + erode), each `MORPH_ITERATIONS` times with a 3x3 cross.
fn consolidate_blob(binary: &GrayImage) -> GrayImage {
    let mut out = binary.clone();
    for _ in 0..MORPH_ITERATIONS * 2 {
        out = dilate(&out, Norm::L1, 1);
    }
    for _ in 0..MORPH_ITERATIONS {
        out = erode(&out, Norm::L1, 1);
    }
    out
}
