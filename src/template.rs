//! Reference alpha maps and the sparse correlation template built from them.

use std::path::PathBuf;

use image::imageops::FilterType;
use once_cell::sync::OnceCell;

use crate::alpha_maps;
use crate::blending::ALPHA_THRESHOLD;
use crate::config::WatermarkSize;
use crate::error::{Error, Result};

/// Floor for the alpha standard deviation of a uniform logo.
const MIN_ALPHA_STDDEV: f64 = 1e-6;

/// Where the reference logo captures are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AssetSource {
    /// PNGs compiled into the binary.
    #[default]
    Embedded,
    /// A directory holding `bg_48.png` and `bg_96.png`.
    Directory(PathBuf),
}

impl AssetSource {
    fn read(&self, size: WatermarkSize) -> Result<Vec<u8>> {
        let name = match size {
            WatermarkSize::Small => "bg_48.png",
            WatermarkSize::Large => "bg_96.png",
        };
        match self {
            AssetSource::Embedded => Ok(match size {
                WatermarkSize::Small => alpha_maps::BG_48_PNG.to_vec(),
                WatermarkSize::Large => alpha_maps::BG_96_PNG.to_vec(),
            }),
            AssetSource::Directory(dir) => {
                std::fs::read(dir.join(name)).map_err(|e| Error::AssetLoad {
                    size: size.pixels(),
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Calculate a dense alpha map from a reference capture.
///
/// The capture is resampled to `size x size` if needed. The alpha at each pixel
/// is derived as `max(R, G, B) / 255`; the PNG's own alpha channel is ignored.
///
/// # Errors
///
/// Returns [`Error::AssetLoad`] if the bytes cannot be decoded.
pub fn calculate_alpha_map(png_bytes: &[u8], size: u32) -> Result<Vec<f32>> {
    let mut img = image::load_from_memory(png_bytes)
        .map_err(|e| Error::AssetLoad {
            size,
            source: Box::new(e),
        })?
        .to_rgb8();

    if img.width() != size || img.height() != size {
        img = image::imageops::resize(&img, size, size, FilterType::Triangle);
    }

    Ok(img
        .pixels()
        .map(|px| f32::from(px[0].max(px[1]).max(px[2])) / 255.0)
        .collect())
}

/// Sparse statistical template of the logo.
///
/// Only "active" pixels (alpha at or above the detection threshold) are kept,
/// as parallel arrays indexed `0..active_count()`.
#[derive(Debug, Clone)]
pub struct AlphaTemplate {
    /// Side length of the square logo region.
    pub size: u32,
    /// Dense `size * size` alpha map, used for restoration.
    pub alpha_map: Vec<f32>,
    /// Local x coordinate of each active pixel.
    pub x: Vec<u32>,
    /// Local y coordinate of each active pixel.
    pub y: Vec<u32>,
    /// Raw alpha of each active pixel.
    pub alpha: Vec<f32>,
    /// Z-score normalized alpha of each active pixel.
    pub normalized_alpha: Vec<f32>,
    /// Sum of `normalized_alpha`.
    pub normalized_alpha_sum: f64,
}

impl AlphaTemplate {
    /// Build a template from a dense `size * size` alpha map.
    ///
    /// A map with no active pixels yields an empty template, which never
    /// produces a finite correlation score.
    #[must_use]
    pub fn from_alpha_map(alpha_map: Vec<f32>, size: u32) -> Self {
        debug_assert_eq!(alpha_map.len(), (size * size) as usize);

        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut alpha = Vec::new();
        for (idx, &a) in (0u32..).zip(alpha_map.iter()) {
            if a < ALPHA_THRESHOLD {
                continue;
            }
            x.push(idx % size);
            y.push(idx / size);
            alpha.push(a);
        }

        if alpha.is_empty() {
            return Self {
                size,
                alpha_map,
                x,
                y,
                alpha,
                normalized_alpha: Vec::new(),
                normalized_alpha_sum: 0.0,
            };
        }

        #[allow(clippy::cast_precision_loss)]
        let n = alpha.len() as f64;
        let mean = alpha.iter().map(|&a| f64::from(a)).sum::<f64>() / n;
        let variance = alpha
            .iter()
            .map(|&a| (f64::from(a) - mean).powi(2))
            .sum::<f64>()
            / n;
        let stddev = variance.sqrt().max(MIN_ALPHA_STDDEV);

        #[allow(clippy::cast_possible_truncation)]
        let normalized_alpha: Vec<f32> = alpha
            .iter()
            .map(|&a| ((f64::from(a) - mean) / stddev) as f32)
            .collect();
        let normalized_alpha_sum = normalized_alpha.iter().map(|&v| f64::from(v)).sum();

        Self {
            size,
            alpha_map,
            x,
            y,
            alpha,
            normalized_alpha,
            normalized_alpha_sum,
        }
    }

    /// Number of active pixels.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.alpha.len()
    }

    /// Whether the template has no active pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alpha.is_empty()
    }
}

/// Read, decode and reduce the reference capture for one logo size.
///
/// # Errors
///
/// Returns [`Error::AssetLoad`] if the asset cannot be read or decoded.
pub fn load_alpha_template(source: &AssetSource, size: WatermarkSize) -> Result<AlphaTemplate> {
    let bytes = source.read(size)?;
    let alpha_map = calculate_alpha_map(&bytes, size.pixels())?;
    let template = AlphaTemplate::from_alpha_map(alpha_map, size.pixels());
    log::debug!(
        "built {0}x{0} alpha template with {1} active pixels",
        template.size,
        template.active_count()
    );
    Ok(template)
}

/// Lazily populated templates, one slot per logo size.
///
/// Each slot is filled at most once. Concurrent first requests for the same
/// size block on a single loader; a failed load leaves the slot empty.
#[derive(Debug, Default)]
pub struct TemplateCache {
    source: AssetSource,
    small: OnceCell<AlphaTemplate>,
    large: OnceCell<AlphaTemplate>,
}

impl TemplateCache {
    /// Create an empty cache reading from `source`.
    #[must_use]
    pub fn new(source: AssetSource) -> Self {
        Self {
            source,
            small: OnceCell::new(),
            large: OnceCell::new(),
        }
    }

    /// Get the template for `size`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetLoad`] if the asset cannot be read or decoded.
    pub fn get(&self, size: WatermarkSize) -> Result<&AlphaTemplate> {
        self.get_or_load(size, || load_alpha_template(&self.source, size))
    }

    fn get_or_load<F>(&self, size: WatermarkSize, load: F) -> Result<&AlphaTemplate>
    where
        F: FnOnce() -> Result<AlphaTemplate>,
    {
        let cell = match size {
            WatermarkSize::Small => &self.small,
            WatermarkSize::Large => &self.large,
        };
        cell.get_or_try_init(load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn alpha_map_48_loads_with_correct_dimensions() {
        let map = calculate_alpha_map(alpha_maps::BG_48_PNG, 48).unwrap();
        assert_eq!(map.len(), 48 * 48);
        for &a in &map {
            assert!((0.0..=1.0).contains(&a));
        }
    }

    #[test]
    fn alpha_map_96_loads_with_correct_dimensions() {
        let map = calculate_alpha_map(alpha_maps::BG_96_PNG, 96).unwrap();
        assert_eq!(map.len(), 96 * 96);
    }

    #[test]
    fn alpha_is_brightest_channel() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, Rgb([51, 10, 0]));
        img.put_pixel(1, 1, Rgb([0, 0, 255]));
        let map = calculate_alpha_map(&png_bytes(&img), 2).unwrap();
        assert!((map[0] - 0.2).abs() < 1e-6);
        assert!(map[1].abs() < 1e-6);
        assert!((map[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_asset_is_resampled_to_logo_size() {
        let img = RgbImage::from_pixel(24, 24, Rgb([128, 128, 128]));
        let map = calculate_alpha_map(&png_bytes(&img), 48).unwrap();
        assert_eq!(map.len(), 48 * 48);
        assert!(map.iter().all(|&a| (a - 128.0 / 255.0).abs() < 0.01));
    }

    #[test]
    fn undecodable_asset_is_an_asset_error() {
        let err = calculate_alpha_map(b"not a png", 48).unwrap_err();
        assert!(matches!(err, Error::AssetLoad { size: 48, .. }));
    }

    #[test]
    fn template_keeps_only_active_pixels() {
        let mut map = vec![0.0; 4 * 4];
        map[1] = 0.2; // (1, 0)
        map[6] = 0.4; // (2, 1)
        map[15] = 0.6; // (3, 3)
        map[8] = 0.001; // below threshold

        let template = AlphaTemplate::from_alpha_map(map, 4);
        assert_eq!(template.active_count(), 3);
        assert_eq!(template.x, vec![1, 2, 3]);
        assert_eq!(template.y, vec![0, 1, 3]);
        assert_eq!(template.normalized_alpha.len(), 3);

        // z-scores of an evenly spaced triple
        let expected = 1.5_f32.sqrt();
        assert!((template.normalized_alpha[0] + expected).abs() < 1e-4);
        assert!(template.normalized_alpha[1].abs() < 1e-4);
        assert!((template.normalized_alpha[2] - expected).abs() < 1e-4);
        assert!(template.normalized_alpha_sum.abs() < 1e-4);
    }

    #[test]
    fn uniform_logo_gets_floored_stddev() {
        let template = AlphaTemplate::from_alpha_map(vec![0.3; 9], 3);
        assert_eq!(template.active_count(), 9);
        assert!(template.normalized_alpha.iter().all(|v| v.is_finite()));
        assert!(template.normalized_alpha.iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn blank_logo_yields_empty_template() {
        let template = AlphaTemplate::from_alpha_map(vec![0.0; 48 * 48], 48);
        assert!(template.is_empty());
        assert_eq!(template.active_count(), 0);
        assert!(template.x.is_empty() && template.y.is_empty());
        assert_eq!(template.alpha_map.len(), 48 * 48);
    }

    #[test]
    fn embedded_templates_are_sparse_and_normalized() {
        for size in [WatermarkSize::Small, WatermarkSize::Large] {
            let template = load_alpha_template(&AssetSource::Embedded, size).unwrap();
            let total = (size.pixels() * size.pixels()) as usize;
            assert_eq!(template.size, size.pixels());
            assert!(template.active_count() > 0);
            assert!(template.active_count() < total);
            #[allow(clippy::cast_precision_loss)]
            let mean = template.normalized_alpha_sum / template.active_count() as f64;
            assert!(mean.abs() < 1e-3, "normalized alpha should be centred, got {mean}");
        }
    }

    #[test]
    fn cache_loads_each_size_once() {
        let cache = TemplateCache::new(AssetSource::Embedded);
        let first = cache.get(WatermarkSize::Small).unwrap() as *const AlphaTemplate;
        let second = cache.get(WatermarkSize::Small).unwrap() as *const AlphaTemplate;
        assert_eq!(first, second);
        assert_eq!(cache.get(WatermarkSize::Large).unwrap().size, 96);
    }

    #[test]
    fn concurrent_first_use_runs_one_loader() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Barrier;
        use std::time::Duration;

        const THREADS: usize = 8;
        let cache = &TemplateCache::new(AssetSource::Embedded);
        let loads = &AtomicUsize::new(0);
        let barrier = &Barrier::new(THREADS);

        let pointers: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        let template = cache
                            .get_or_load(WatermarkSize::Small, || {
                                loads.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(50));
                                load_alpha_template(&AssetSource::Embedded, WatermarkSize::Small)
                            })
                            .unwrap();
                        template as *const AlphaTemplate as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(pointers.iter().all(|&p| p == pointers[0]));
        assert_eq!(
            cache.get(WatermarkSize::Small).unwrap() as *const AlphaTemplate as usize,
            pointers[0]
        );
    }

    #[test]
    fn concurrent_directory_loads_read_the_asset_once() {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("bg_48.png");
        let img = RgbImage::from_pixel(48, 48, Rgb([100, 100, 100]));
        std::fs::write(&asset, png_bytes(&img)).unwrap();
        let cache = &TemplateCache::new(AssetSource::Directory(dir.path().to_path_buf()));

        let counts: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || cache.get(WatermarkSize::Small).unwrap().active_count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(counts.iter().all(|&c| c == 48 * 48));

        // The template stays cached after the asset disappears.
        std::fs::remove_file(&asset).unwrap();
        assert_eq!(cache.get(WatermarkSize::Small).unwrap().active_count(), 48 * 48);
    }

    #[test]
    fn missing_directory_asset_fails_and_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new(AssetSource::Directory(dir.path().to_path_buf()));
        assert!(matches!(
            cache.get(WatermarkSize::Small),
            Err(Error::AssetLoad { size: 48, .. })
        ));

        let img = RgbImage::from_pixel(48, 48, Rgb([100, 100, 100]));
        std::fs::write(dir.path().join("bg_48.png"), png_bytes(&img)).unwrap();
        assert_eq!(
            cache.get(WatermarkSize::Small).unwrap().active_count(),
            48 * 48
        );
    }
}
