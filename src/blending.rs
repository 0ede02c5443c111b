//! Alpha blending math for watermark removal.
//!
//! Gemini applies watermarks via forward alpha blending of a white logo:
//! `watermarked = alpha * 255 + (1 - alpha) * original`
//!
//! This module provides the reverse operation to recover original pixels. The
//! same inversion feeds the detector's darkening score, so both stay in sync.

use image::RgbaImage;

use crate::detection::WatermarkPosition;

/// Alpha threshold: ignore pixels with negligible watermark effect (noise).
pub const ALPHA_THRESHOLD: f32 = 0.002;

/// Maximum alpha: clamp to avoid division by near-zero in reverse blending.
pub const MAX_ALPHA: f32 = 0.99;

/// The logo color value (white).
pub const LOGO_VALUE: f32 = 255.0;

/// Alpha to use when inverting a pixel, or `None` if the pixel is unaffected.
#[must_use]
pub fn effective_alpha(alpha: f32) -> Option<f32> {
    if alpha < ALPHA_THRESHOLD {
        None
    } else {
        Some(alpha.min(MAX_ALPHA))
    }
}

/// Invert the blend for one channel value.
///
/// `alpha` must already be clamped (see [`effective_alpha`]). The result is
/// clamped to `[0, 255]` but not rounded.
#[must_use]
pub fn unblend(watermarked: f32, alpha: f32) -> f32 {
    ((watermarked - alpha * LOGO_VALUE) / (1.0 - alpha)).clamp(0.0, 255.0)
}

/// Remove the watermark at `position` using reverse alpha blending.
///
/// `alpha_map` is the dense `width * height` map of the logo region. The region
/// is clipped to the image bounds and to the length of `alpha_map`. Pixels with
/// alpha below the threshold are left unchanged, and the alpha channel is never
/// touched.
pub fn remove_watermark_pixels(
    image: &mut RgbaImage,
    alpha_map: &[f32],
    position: &WatermarkPosition,
) {
    let img_w = image.width();
    let img_h = image.height();

    // Clip to image bounds
    let x2 = position.x.saturating_add(position.width).min(img_w);
    let y2 = position.y.saturating_add(position.height).min(img_h);

    if position.x >= x2 || position.y >= y2 {
        return;
    }

    for dy in 0..(y2 - position.y) {
        for dx in 0..(x2 - position.x) {
            let alpha_idx = dy as usize * position.width as usize + dx as usize;
            let Some(alpha) = alpha_map.get(alpha_idx).copied().and_then(effective_alpha) else {
                continue;
            };

            let px = image.get_pixel_mut(position.x + dx, position.y + dy);
            for ch in 0..3 {
                let original = unblend(f32::from(px[ch]), alpha);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    px[ch] = original.round() as u8;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn position(x: u32, y: u32, size: u32) -> WatermarkPosition {
        WatermarkPosition {
            x,
            y,
            width: size,
            height: size,
            correlation: 1.0,
            darkening: 10.0,
        }
    }

    #[test]
    fn effective_alpha_skips_noise_and_clamps_opaque() {
        assert_eq!(effective_alpha(0.001), None);
        assert_eq!(effective_alpha(0.5), Some(0.5));
        assert_eq!(effective_alpha(1.0), Some(MAX_ALPHA));
    }

    #[test]
    fn unblend_inverts_forward_blend_within_one_level() {
        for step in 0..=99u8 {
            let alpha = f32::from(step) / 100.0;
            for original in (0..=255u8).step_by(5) {
                let orig = f32::from(original);
                let watermarked = alpha * LOGO_VALUE + (1.0 - alpha) * orig;
                let recovered = unblend(watermarked, alpha).round();
                assert!(
                    (recovered - orig).abs() <= 1.0,
                    "alpha {alpha} original {original} recovered {recovered}"
                );
            }
        }
    }

    #[test]
    fn unblend_clamps_out_of_range_results() {
        // A pixel darker than the logo contribution alone cannot be inverted.
        assert!(unblend(10.0, 0.5).abs() < f32::EPSILON);
        assert!((unblend(255.0, 0.3) - 255.0).abs() < 1e-3);
    }

    #[test]
    fn reverse_blend_recovers_original_within_tolerance() {
        let mut image = RgbaImage::from_pixel(100, 100, Rgba([128, 64, 200, 255]));
        let original_copy = image.clone();

        let size = 10u32;
        #[allow(clippy::cast_precision_loss)]
        let alpha_map: Vec<f32> = (0..size * size)
            .map(|i| (i as f32) / (size * size) as f32 * 0.5)
            .collect();

        let pos = position(50, 50, size);

        // Apply forward blend
        for dy in 0..size {
            for dx in 0..size {
                let alpha = alpha_map[(dy * size + dx) as usize];
                if alpha < ALPHA_THRESHOLD {
                    continue;
                }
                let px = image.get_pixel_mut(pos.x + dx, pos.y + dy);
                for ch in 0..3 {
                    let orig = f32::from(px[ch]);
                    let result = alpha * LOGO_VALUE + (1.0 - alpha) * orig;
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    {
                        px[ch] = result.round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }

        remove_watermark_pixels(&mut image, &alpha_map, &pos);

        // Double u8 rounding with alpha <= 0.5 stays within one level
        for dy in 0..size {
            for dx in 0..size {
                let restored = image.get_pixel(pos.x + dx, pos.y + dy);
                let orig = original_copy.get_pixel(pos.x + dx, pos.y + dy);
                for ch in 0..3 {
                    let diff = (i32::from(restored[ch]) - i32::from(orig[ch])).abs();
                    assert!(
                        diff <= 1,
                        "Pixel ({dx},{dy}) ch {ch} diff {diff} (restored={}, orig={})",
                        restored[ch],
                        orig[ch]
                    );
                }
                assert_eq!(restored[3], 255, "alpha channel must be untouched");
            }
        }
    }

    #[test]
    fn short_alpha_map_only_restores_covered_pixels() {
        let mut image = RgbaImage::from_pixel(8, 8, Rgba([191, 191, 191, 255]));
        // Covers the first row of a 4x4 region only.
        let alpha_map = vec![0.5; 4];
        remove_watermark_pixels(&mut image, &alpha_map, &position(2, 2, 4));

        for dx in 2..6 {
            assert_eq!(image.get_pixel(dx, 2).0, [127, 127, 127, 255]);
        }
        assert_eq!(image.get_pixel(2, 3).0, [191, 191, 191, 255]);
        assert_eq!(image.get_pixel(5, 5).0, [191, 191, 191, 255]);
    }

    #[test]
    fn region_at_coordinate_limit_does_not_overflow() {
        let mut image = RgbaImage::from_pixel(4, 4, Rgba([191, 191, 191, 255]));
        let alpha_map = vec![0.5; 16];
        remove_watermark_pixels(&mut image, &alpha_map, &position(u32::MAX - 1, 0, 4));
        assert!(image.pixels().all(|p| p.0 == [191, 191, 191, 255]));
    }

    #[test]
    fn pixels_below_threshold_are_untouched() {
        let mut image = RgbaImage::from_pixel(8, 8, Rgba([200, 200, 200, 255]));
        let alpha_map = vec![0.001; 16];
        remove_watermark_pixels(&mut image, &alpha_map, &position(2, 2, 4));
        assert!(image.pixels().all(|p| p.0 == [200, 200, 200, 255]));
    }

    #[test]
    fn region_is_clipped_to_image_bounds() {
        let mut image = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 128]));
        let alpha_map = vec![0.5; 8 * 8];
        // Logo hangs 4 pixels past the right and bottom edges.
        remove_watermark_pixels(&mut image, &alpha_map, &position(6, 6, 8));

        assert_eq!(image.get_pixel(9, 9).0, [255, 255, 255, 128]);
        assert_eq!(image.get_pixel(5, 5).0, [255, 255, 255, 128]);

        let mut grey = RgbaImage::from_pixel(10, 10, Rgba([191, 191, 191, 255]));
        remove_watermark_pixels(&mut grey, &alpha_map, &position(6, 6, 8));
        // (191 - 127.5) / 0.5 = 127
        assert_eq!(grey.get_pixel(9, 9).0, [127, 127, 127, 255]);
        assert_eq!(grey.get_pixel(5, 9).0, [191, 191, 191, 255]);
    }

    #[test]
    fn position_outside_image_is_a_no_op() {
        let mut image = RgbaImage::from_pixel(10, 10, Rgba([90, 90, 90, 255]));
        let before = image.clone();
        remove_watermark_pixels(&mut image, &[0.5; 16], &position(20, 20, 4));
        assert_eq!(image, before);
    }
}
