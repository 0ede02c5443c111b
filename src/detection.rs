//! Watermark localisation by template search.
//!
//! The logo's top-left corner is searched over a window near the bottom-right
//! corner. Each candidate is scored by normalized cross-correlation between the
//! image luminance at the template's active pixels and the template's z-scored
//! alpha. The winner is then checked with a second, independent signal: how
//! much the watermark darkens the region once the blend is inverted.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::blending::{effective_alpha, unblend};
use crate::config::WatermarkConfig;
use crate::template::AlphaTemplate;

/// Below this pixel variance a candidate region is considered flat.
const MIN_PIXEL_VARIANCE: f64 = 1e-6;

/// Best-matching logo region in an image.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkPosition {
    /// X coordinate of the region's top-left corner.
    pub x: u32,
    /// Y coordinate of the region's top-left corner.
    pub y: u32,
    /// Region width (the logo size).
    pub width: u32,
    /// Region height (the logo size).
    pub height: u32,
    /// Normalized correlation score; higher is better, may be negative.
    pub correlation: f64,
    /// Mean luminance reduction attributable to the watermark.
    pub darkening: f64,
}

impl WatermarkPosition {
    /// Diagnostics snapshot of this position.
    #[must_use]
    pub fn detection(&self) -> Detection {
        Detection {
            score: self.correlation,
            darkening: self.darkening,
            x: self.x,
            y: self.y,
            size: self.width,
        }
    }
}

/// Serializable detection diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Correlation score of the match.
    pub score: f64,
    /// Mean darkening at the match.
    pub darkening: f64,
    /// X coordinate of the match.
    pub x: u32,
    /// Y coordinate of the match.
    pub y: u32,
    /// Logo size.
    pub size: u32,
}

/// ITU-R BT.709 luma of an RGB triple.
#[must_use]
pub fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

/// Per-pixel luminance of the whole image, row-major.
#[must_use]
pub fn luminance_map(image: &RgbaImage) -> Vec<f32> {
    image
        .pixels()
        .map(|px| luminance(f32::from(px[0]), f32::from(px[1]), f32::from(px[2])))
        .collect()
}

/// Inclusive range of top-left coordinates along one axis.
///
/// Returns `None` when the image is too small for the margins.
#[must_use]
pub fn search_axis_bounds(
    length: u32,
    size: u32,
    min_margin: u32,
    max_margin: u32,
) -> Option<(u32, u32)> {
    let end = length.checked_sub(size)?.checked_sub(min_margin)?;
    let start = length.saturating_sub(max_margin.saturating_add(size));
    (start <= end).then_some((start, end))
}

/// Normalized correlation between the template and the image at `(x, y)`.
///
/// Returns `f64::NEG_INFINITY` for an empty template, a flat region, or a
/// position where the template does not fit inside the luminance map.
#[must_use]
pub fn correlation_score(
    luminance: &[f32],
    image_width: u32,
    x: u32,
    y: u32,
    template: &AlphaTemplate,
) -> f64 {
    if template.is_empty() || image_width == 0 {
        return f64::NEG_INFINITY;
    }
    let rows = luminance.len() / image_width as usize;
    let size = template.size as usize;
    if x as usize + size > image_width as usize || y as usize + size > rows {
        return f64::NEG_INFINITY;
    }

    let mut sum_pixel = 0.0_f64;
    let mut sum_pixel_sq = 0.0_f64;
    let mut sum_pixel_alpha = 0.0_f64;

    let active = template
        .x
        .iter()
        .zip(&template.y)
        .zip(&template.normalized_alpha);
    for ((&ax, &ay), &na) in active {
        let idx = (y + ay) as usize * image_width as usize + (x + ax) as usize;
        let pixel = f64::from(luminance[idx]);
        sum_pixel += pixel;
        sum_pixel_sq += pixel * pixel;
        sum_pixel_alpha += pixel * f64::from(na);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = template.active_count() as f64;
    let pixel_mean = sum_pixel / n;
    let pixel_variance = sum_pixel_sq / n - pixel_mean * pixel_mean;
    if pixel_variance <= MIN_PIXEL_VARIANCE {
        return f64::NEG_INFINITY;
    }

    let numerator = sum_pixel_alpha - pixel_mean * template.normalized_alpha_sum;
    numerator / (pixel_variance.sqrt() * n)
}

/// Mean luminance drop removed by inverting the blend at `(x, y)`.
///
/// Uses the same clamped inversion as the restorer. Active pixels outside the
/// image are skipped. Returns `f64::NEG_INFINITY` if no active pixel inside the
/// image has a usable alpha.
#[must_use]
pub fn mean_darkening(image: &RgbaImage, x: u32, y: u32, template: &AlphaTemplate) -> f64 {
    let mut darkening = 0.0_f64;
    let mut used = 0_u32;

    let active = template.x.iter().zip(&template.y).zip(&template.alpha);
    for ((&ax, &ay), &raw_alpha) in active {
        let Some(alpha) = effective_alpha(raw_alpha) else {
            continue;
        };

        let Some(px) = x
            .checked_add(ax)
            .zip(y.checked_add(ay))
            .and_then(|(px, py)| image.get_pixel_checked(px, py))
        else {
            continue;
        };
        let [r, g, b] = [px[0], px[1], px[2]].map(f32::from);
        let before = luminance(r, g, b);
        let after = luminance(unblend(r, alpha), unblend(g, alpha), unblend(b, alpha));

        darkening += f64::from(before - after);
        used += 1;
    }

    if used == 0 {
        return f64::NEG_INFINITY;
    }
    darkening / f64::from(used)
}

/// Find the best watermark position within the configured search window.
///
/// Candidates are scanned row-major; the strictly highest finite correlation
/// wins, so ties keep the first candidate. Returns `None` if the window is
/// empty or no candidate scores finitely.
#[must_use]
pub fn locate_watermark_position(
    image: &RgbaImage,
    config: &WatermarkConfig,
    template: &AlphaTemplate,
) -> Option<WatermarkPosition> {
    let (width, height) = image.dimensions();
    let size = config.logo_size;

    let (x_start, x_end) =
        search_axis_bounds(width, size, config.min_margin_right, config.max_margin_right)?;
    let (y_start, y_end) =
        search_axis_bounds(height, size, config.min_margin_bottom, config.max_margin_bottom)?;

    let luminance = luminance_map(image);
    let mut best: Option<(u32, u32, f64)> = None;

    for y in y_start..=y_end {
        for x in x_start..=x_end {
            let correlation = correlation_score(&luminance, width, x, y, template);
            if !correlation.is_finite() {
                continue;
            }
            if best.is_none_or(|(_, _, score)| correlation > score) {
                best = Some((x, y, correlation));
            }
        }
    }

    let Some((x, y, correlation)) = best else {
        log::debug!(
            "no finite correlation in search window x={x_start}..={x_end}, y={y_start}..={y_end}"
        );
        return None;
    };
    let darkening = mean_darkening(image, x, y, template);
    log::debug!(
        "best {size}x{size} candidate at ({x}, {y}): correlation={correlation:.3}, darkening={darkening:.2}"
    );

    Some(WatermarkPosition {
        x,
        y,
        width: size,
        height: size,
        correlation,
        darkening,
    })
}
