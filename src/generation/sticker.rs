//! Sticker canvas fitting
//!
//! Telegram static stickers are PNGs whose longest side is exactly 512px.
//! The cut-out image is trimmed to its visible pixels and scaled to fit.

use std::io::Cursor;

use anyhow::{bail, Context};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};

/// Longest side of a static sticker
pub const STICKER_SIZE: u32 = 512;

/// Pixels at or below this alpha count as background
const ALPHA_CUTOFF: u8 = 10;

/// Bounding box `(x, y, width, height)` of the visible pixels
fn visible_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] > ALPHA_CUTOFF {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x == u32::MAX {
        None
    } else {
        Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }
}

/// Scale `(width, height)` so the longest side is `STICKER_SIZE`
fn sticker_dimensions(width: u32, height: u32) -> (u32, u32) {
    let scale = |short: u32, long: u32| {
        let scaled = (short as u64 * STICKER_SIZE as u64 + long as u64 / 2) / long as u64;
        (scaled as u32).max(1)
    };

    if width >= height {
        (STICKER_SIZE, scale(height, width))
    } else {
        (scale(width, height), STICKER_SIZE)
    }
}

/// Trim a background-free image to its subject and fit it to the sticker canvas
pub fn fit_to_sticker(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let image = image::load_from_memory(bytes)
        .context("Failed to decode processed image")?
        .to_rgba8();

    let Some((x, y, width, height)) = visible_bounds(&image) else {
        bail!("processed image is fully transparent");
    };

    let cropped = imageops::crop_imm(&image, x, y, width, height).to_image();
    let (target_w, target_h) = sticker_dimensions(width, height);
    let resized = imageops::resize(&cropped, target_w, target_h, FilterType::Lanczos3);

    let mut png = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to encode sticker PNG")?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn encode(image: &RgbaImage) -> Vec<u8> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        png
    }

    fn decode(png: &[u8]) -> RgbaImage {
        image::load_from_memory(png).unwrap().to_rgba8()
    }

    #[test]
    fn test_trims_and_scales_subject() {
        // 400x200 opaque subject on a transparent 1024 canvas
        let mut canvas = RgbaImage::from_pixel(1024, 1024, Rgba([0, 0, 0, 0]));
        for x in 100..500 {
            for y in 300..500 {
                canvas.put_pixel(x, y, Rgba([200, 30, 30, 255]));
            }
        }

        let sticker = decode(&fit_to_sticker(&encode(&canvas)).unwrap());
        assert_eq!(sticker.dimensions(), (512, 256));
        assert_eq!(sticker.get_pixel(256, 128).0[3], 255);
    }

    #[test]
    fn test_opaque_square_becomes_512() {
        let canvas = RgbaImage::from_pixel(1024, 1024, Rgba([10, 10, 10, 255]));
        let sticker = decode(&fit_to_sticker(&encode(&canvas)).unwrap());
        assert_eq!(sticker.dimensions(), (512, 512));
    }

    #[test]
    fn test_small_tall_subject_is_upscaled() {
        let canvas = RgbaImage::from_pixel(50, 100, Rgba([10, 10, 10, 255]));
        let sticker = decode(&fit_to_sticker(&encode(&canvas)).unwrap());
        assert_eq!(sticker.dimensions(), (256, 512));
    }

    #[test]
    fn test_fully_transparent_is_rejected() {
        let canvas = RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 0]));
        assert!(fit_to_sticker(&encode(&canvas)).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(fit_to_sticker(b"not an image").is_err());
    }
}
