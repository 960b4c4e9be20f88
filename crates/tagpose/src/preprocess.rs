//! Frame conditioning ahead of marker detection.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// 3x3 sharpening kernel: center 5, every neighbour -0.5.
pub const SHARPEN_KERNEL: [f32; 9] = [-0.5, -0.5, -0.5, -0.5, 5.0, -0.5, -0.5, -0.5, -0.5];

/// Pre-processing applied to every captured frame, in this order:
/// rotate 180°, crop the top rows, downscale, sharpen, grayscale and
/// binarize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    /// The camera is mounted upside down.
    pub rotate_180: bool,
    /// Rows removed from the top of the (rotated) frame.
    pub crop_top: u32,
    /// Uniform downscale factor in `(0, 1]`.
    pub scale: f32,
    pub sharpen: bool,
    /// Pixels strictly above this become 255, the rest 0.
    pub threshold: u8,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            rotate_180: true,
            crop_top: 150,
            scale: 0.5,
            sharpen: true,
            threshold: 110,
        }
    }
}

impl PreprocessParams {
    /// Size of the processed image for a `width` x `height` capture.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        let cropped_h = height.saturating_sub(self.crop_top).max(1);
        if self.scale >= 1.0 || self.scale <= 0.0 {
            return (width, cropped_h);
        }
        let scaled = |v: u32| ((v as f32 * self.scale).round() as u32).max(1);
        (scaled(width), scaled(cropped_h))
    }
}

/// Run the full chain and return the binarized frame.
pub fn preprocess(frame: &RgbaImage, params: &PreprocessParams) -> GrayImage {
    let mut rgb: RgbImage = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
    if params.rotate_180 {
        imageops::rotate180_in_place(&mut rgb);
    }

    let (w, h) = rgb.dimensions();
    let crop_top = params.crop_top.min(h.saturating_sub(1));
    let mut rgb = imageops::crop_imm(&rgb, 0, crop_top, w, h - crop_top).to_image();

    let (out_w, out_h) = params.output_size(w, h);
    if (out_w, out_h) != rgb.dimensions() {
        rgb = imageops::resize(&rgb, out_w, out_h, FilterType::Triangle);
    }

    if params.sharpen {
        rgb = imageops::filter3x3(&rgb, &SHARPEN_KERNEL);
    }

    let mut gray = DynamicImage::ImageRgb8(rgb).into_luma8();
    binarize_in_place(&mut gray, params.threshold);
    gray
}

/// Fixed binary threshold: `v > t` maps to 255, everything else to 0.
pub fn binarize_in_place(gray: &mut GrayImage, threshold: u8) {
    for p in gray.pixels_mut() {
        p.0[0] = if p.0[0] > threshold { 255 } else { 0 };
    }
}
