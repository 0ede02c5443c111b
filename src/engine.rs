//! Core watermark removal engine.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, GenericImageView, ImageEncoder, RgbImage, RgbaImage};
use once_cell::sync::Lazy;

use crate::blending;
use crate::config::{Tuning, WatermarkConfig, WatermarkSize};
use crate::detection::{self, Detection, WatermarkPosition};
use crate::error::{Error, Result};
use crate::template::{AlphaTemplate, AssetSource, TemplateCache};

/// Encoded output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// Lossless PNG.
    #[default]
    Png,
    /// JPEG; the alpha channel is dropped.
    Jpeg,
    /// Lossless WebP.
    WebP,
}

/// (format, mime type, extension)
static FORMATS: [(OutputFormat, &str, &str); 3] = [
    (OutputFormat::Png, "image/png", "png"),
    (OutputFormat::Jpeg, "image/jpeg", "jpg"),
    (OutputFormat::WebP, "image/webp", "webp"),
];

impl OutputFormat {
    fn entry(self) -> &'static (OutputFormat, &'static str, &'static str) {
        FORMATS
            .iter()
            .find(|(format, _, _)| *format == self)
            .unwrap_or(&FORMATS[0])
    }

    /// MIME type, e.g. `image/png`.
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        self.entry().1
    }

    /// Canonical file extension without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        self.entry().2
    }

    /// Look up a format by MIME type.
    #[must_use]
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        FORMATS
            .iter()
            .find(|(_, m, _)| m.eq_ignore_ascii_case(mime.trim()))
            .map(|(format, _, _)| *format)
    }

    /// Look up a format by file extension (`jpeg` is accepted for JPEG).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("jpeg") {
            return Some(OutputFormat::Jpeg);
        }
        FORMATS
            .iter()
            .find(|(_, _, e)| e.eq_ignore_ascii_case(ext))
            .map(|(format, _, _)| *format)
    }

    /// Infer the format from a path's extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for missing or unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(ext)
            .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s)
            .or_else(|| Self::from_mime_type(s))
            .ok_or_else(|| Error::UnsupportedFormat(s.to_string()))
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Options controlling watermark processing behavior.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Output encoding. `None` means PNG for in-memory processing and the
    /// output path's extension for file processing.
    pub output_format: Option<OutputFormat>,
    /// Encode quality in `0.0..=1.0` (JPEG only).
    pub output_quality: f32,
    /// Force a specific watermark size instead of auto-detecting.
    pub force_size: Option<WatermarkSize>,
    /// Remove at the best position even if it fails the confidence gate.
    pub force: bool,
    /// Copy the unmodified input to the output when no watermark is found.
    pub fallback_original: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            output_format: None,
            output_quality: 1.0,
            force_size: None,
            force: false,
            fallback_original: false,
        }
    }
}

/// A cleaned, re-encoded image.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Encoded image bytes.
    pub data: Vec<u8>,
    /// Width in pixels (unchanged from the input).
    pub width: u32,
    /// Height in pixels (unchanged from the input).
    pub height: u32,
    /// Encoding of `data`.
    pub format: OutputFormat,
    /// File extension matching `format`.
    pub extension: &'static str,
    /// Where the watermark was found and how confidently.
    pub detection: Detection,
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the file was skipped (no confident watermark).
    pub skipped: bool,
    /// Whether the unmodified input was written to the output instead.
    pub fallback: bool,
    /// Detection diagnostics when a watermark was removed.
    pub detection: Option<Detection>,
    /// Human-readable status message.
    pub message: String,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            skipped: false,
            fallback: false,
            detection: None,
            message: String::new(),
        }
    }
}

/// The watermark engine: tuning plus lazily loaded alpha templates.
///
/// Create once and reuse for multiple images. Templates are loaded on first
/// use and cached for the engine's lifetime.
#[derive(Debug, Default)]
pub struct WatermarkEngine {
    tuning: Tuning,
    templates: TemplateCache,
}

impl WatermarkEngine {
    /// Create an engine using the embedded reference assets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine reading reference assets from `source`.
    #[must_use]
    pub fn with_assets(source: AssetSource) -> Self {
        Self {
            tuning: Tuning::default(),
            templates: TemplateCache::new(source),
        }
    }

    /// Replace the tuning constants.
    #[must_use]
    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Current tuning constants.
    #[must_use]
    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Determine watermark size based on image dimensions.
    #[must_use]
    pub fn watermark_size_for(&self, width: u32, height: u32) -> WatermarkSize {
        self.tuning.watermark_size_for(width, height)
    }

    /// Search geometry for an image of the given dimensions.
    #[must_use]
    pub fn config_for(
        &self,
        width: u32,
        height: u32,
        force_size: Option<WatermarkSize>,
    ) -> WatermarkConfig {
        self.tuning.config_for(width, height, force_size)
    }

    /// The alpha template for `size`, loaded on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetLoad`] if the reference asset cannot be loaded.
    pub fn template(&self, size: WatermarkSize) -> Result<&AlphaTemplate> {
        self.templates.get(size)
    }

    /// Locate the most likely watermark position without applying the
    /// confidence gate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetLoad`] if the reference asset cannot be loaded.
    pub fn detect(
        &self,
        image: &RgbaImage,
        force_size: Option<WatermarkSize>,
    ) -> Result<Option<WatermarkPosition>> {
        let config = self.config_for(image.width(), image.height(), force_size);
        let template = self.template(config.size)?;
        Ok(detection::locate_watermark_position(image, &config, template))
    }

    /// Locate, validate and remove the watermark from a decoded image in-place.
    ///
    /// The image is only modified on success.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidImage`] for a zero-sized image
    /// - [`Error::AssetLoad`] if the reference asset cannot be loaded
    /// - [`Error::WatermarkNotFound`] if no candidate position scores finitely
    /// - [`Error::LowConfidence`] if the best candidate fails the gate and
    ///   `opts.force` is not set
    pub fn remove(&self, image: &mut RgbaImage, opts: &ProcessOptions) -> Result<Detection> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage(format!("invalid dimensions {width}x{height}")));
        }

        let config = self.config_for(width, height, opts.force_size);
        let template = self.template(config.size)?;
        let position = detection::locate_watermark_position(image, &config, template)
            .ok_or(Error::WatermarkNotFound {
                size: config.logo_size,
            })?;

        if !self.tuning.accepts(position.correlation, position.darkening) {
            if !opts.force {
                return Err(Error::LowConfidence {
                    correlation: position.correlation,
                    darkening: position.darkening,
                });
            }
            log::warn!(
                "forcing removal despite low confidence (correlation={:.3}, darkening={:.2})",
                position.correlation,
                position.darkening
            );
        }

        blending::remove_watermark_pixels(image, &template.alpha_map, &position);
        Ok(position.detection())
    }

    /// Decode an encoded image, remove the watermark and re-encode it.
    ///
    /// One call is one attempt; callers decide whether to fall back to the
    /// original bytes on failure.
    ///
    /// # Errors
    ///
    /// Everything [`WatermarkEngine::remove`] returns, plus
    /// [`Error::ImageDecode`] if `input` cannot be decoded and
    /// [`Error::Encode`] if re-encoding fails.
    pub fn remove_visible_watermark(
        &self,
        input: &[u8],
        opts: &ProcessOptions,
    ) -> Result<ProcessedImage> {
        let decoded = image::load_from_memory(input).map_err(Error::ImageDecode)?;
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage(format!("invalid dimensions {width}x{height}")));
        }
        let mut rgba = decoded.into_rgba8();

        let detection = self.remove(&mut rgba, opts)?;

        let format = opts.output_format.unwrap_or_default();
        let data = encode(&rgba, format, opts.output_quality)?;
        log::info!(
            "removed {0}x{0} watermark at ({1}, {2}), correlation={3:.3}, darkening={4:.2}",
            detection.size,
            detection.x,
            detection.y,
            detection.score,
            detection.darkening
        );

        Ok(ProcessedImage {
            data,
            width,
            height,
            format,
            extension: format.extension(),
            detection,
        })
    }

    /// Process a single image file: load, detect, remove, save.
    ///
    /// Without an explicit output format the output path's extension decides.
    /// Returns a [`ProcessResult`] indicating success, skip, or failure.
    #[must_use]
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        opts: &ProcessOptions,
    ) -> ProcessResult {
        let mut result = ProcessResult::new(input);

        let format = match opts.output_format {
            Some(format) => format,
            None => match OutputFormat::from_path(output) {
                Ok(format) => format,
                Err(e) => {
                    result.message = e.to_string();
                    return result;
                }
            },
        };

        let bytes = match std::fs::read(input) {
            Ok(bytes) => bytes,
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };

        let file_opts = ProcessOptions {
            output_format: Some(format),
            ..opts.clone()
        };

        let (data, message) = match self.remove_visible_watermark(&bytes, &file_opts) {
            Ok(processed) => {
                result.detection = Some(processed.detection);
                (processed.data, "Watermark removed".to_string())
            }
            Err(e) if e.is_detection_failure() => {
                log::warn!("{}: {e}", input.display());
                result.skipped = true;
                result.success = true;
                result.message = e.to_string();
                if !opts.fallback_original {
                    return result;
                }
                result.fallback = true;
                (bytes, format!("{e}; original copied"))
            }
            Err(e) => {
                result.message = e.to_string();
                return result;
            }
        };

        // Save output
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    result.success = false;
                    result.message = format!("Failed to create output directory: {e}");
                    return result;
                }
            }
        }

        match std::fs::write(output, data) {
            Ok(()) => {
                result.success = true;
                result.message = message;
            }
            Err(e) => {
                result.success = false;
                result.message = format!("Failed to save: {e}");
            }
        }

        result
    }

    /// Process all supported images in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon);
    /// the template cache makes concurrent first use safe. Outputs keep their
    /// file names; the extension changes when `opts.output_format` is set or
    /// the input format cannot be written. Inputs that would share an output
    /// name keep their source extension in the stem (`a.bmp` becomes
    /// `a.bmp.png` next to `a.png`); any clash left after that is reported
    /// as a failure instead of being written.
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> Vec<ProcessResult> {
        let inputs: Vec<PathBuf> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .collect(),
            Err(e) => {
                let mut result = ProcessResult::new(input_dir);
                result.message = format!("Failed to read directory: {e}");
                return vec![result];
            }
        };

        // Create output directory
        if !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                let mut result = ProcessResult::new(output_dir);
                result.message = format!("Failed to create output directory: {e}");
                return vec![result];
            }
        }

        let jobs = plan_directory_outputs(inputs, output_dir, opts.output_format);

        let process = |(input_path, output_path): &(PathBuf, Option<PathBuf>)| match output_path {
            Some(output_path) => self.process_file(input_path, output_path, opts),
            None => {
                let mut result = ProcessResult::new(input_path);
                result.message = "Output path collides with another input".to_string();
                result
            }
        };

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            jobs.par_iter().map(process).collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            jobs.iter().map(process).collect()
        }
    }
}

/// The process-wide engine over the embedded assets.
///
/// Its templates are loaded on first use and kept for the process lifetime.
#[must_use]
pub fn default_engine() -> &'static WatermarkEngine {
    static ENGINE: Lazy<WatermarkEngine> = Lazy::new(WatermarkEngine::new);
    &ENGINE
}

/// Remove the watermark from an encoded image using the process-wide engine.
///
/// # Errors
///
/// See [`WatermarkEngine::remove_visible_watermark`].
pub fn remove_visible_watermark_from_blob(
    input: &[u8],
    opts: &ProcessOptions,
) -> Result<ProcessedImage> {
    default_engine().remove_visible_watermark(input, opts)
}

/// Map `0.0..=1.0` to JPEG quality `1..=100`; non-finite means best quality.
fn jpeg_quality(quality: f32) -> u8 {
    let quality = if quality.is_finite() { quality } else { 1.0 };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8
    }
}

/// Encode an RGBA buffer in the requested format.
fn encode(image: &RgbaImage, format: OutputFormat, quality: f32) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut data = Vec::new();

    match format {
        OutputFormat::Png => PngEncoder::new(&mut data).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        OutputFormat::Jpeg => {
            let rgb: RgbImage = image.convert();
            JpegEncoder::new_with_quality(&mut data, jpeg_quality(quality)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
        OutputFormat::WebP => WebPEncoder::new_lossless(&mut data).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
    }
    .map_err(Error::Encode)?;

    Ok(data)
}

fn directory_output_path(
    input: &Path,
    output_dir: &Path,
    format: Option<OutputFormat>,
) -> PathBuf {
    let output = output_dir.join(input.file_name().unwrap_or_default());
    match format {
        Some(format) => output.with_extension(format.extension()),
        None if OutputFormat::from_path(&output).is_err() => {
            output.with_extension(OutputFormat::Png.extension())
        }
        None => output,
    }
}

/// Pair each input with its output path, or `None` if it cannot get a unique one.
fn plan_directory_outputs(
    mut inputs: Vec<PathBuf>,
    output_dir: &Path,
    format: Option<OutputFormat>,
) -> Vec<(PathBuf, Option<PathBuf>)> {
    inputs.sort();
    let mut outputs: Vec<PathBuf> = inputs
        .iter()
        .map(|input| directory_output_path(input, output_dir, format))
        .collect();

    let counts = count_paths(&outputs);
    for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
        if counts[&*output] > 1 && input.file_name() != output.file_name() {
            let name = input.file_name().unwrap_or_default().to_string_lossy();
            let ext = output.extension().unwrap_or_default().to_string_lossy();
            *output = output_dir.join(format!("{name}.{ext}"));
        }
    }

    let counts = count_paths(&outputs);
    inputs
        .into_iter()
        .zip(outputs)
        .map(|(input, output)| {
            if counts[&output] > 1 {
                log::warn!(
                    "{}: output {} collides with another input",
                    input.display(),
                    output.display()
                );
                (input, None)
            } else {
                (input, Some(output))
            }
        })
        .collect()
}

fn count_paths(paths: &[PathBuf]) -> HashMap<PathBuf, usize> {
    let mut counts = HashMap::new();
    for path in paths {
        *counts.entry(path.clone()).or_insert(0) += 1;
    }
    counts
}

/// Output path for a single file.
///
/// An explicit `output` is used as given unless `format` disagrees with its
/// extension, in which case the extension is replaced. Without `output` the
/// input gets a `_cleaned` suffix (see [`default_output_path`]).
#[must_use]
pub fn resolve_output_path(
    input: &Path,
    output: Option<&Path>,
    format: Option<OutputFormat>,
) -> PathBuf {
    let path = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
    match format {
        Some(format) if OutputFormat::from_path(&path).ok() != Some(format) => {
            path.with_extension(format.extension())
        }
        _ => path,
    }
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_cleaned.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_cleaned.{ext}"))
}
