//! Locate and remove visible Gemini AI watermarks via reverse alpha blending.
//!
//! Gemini AI overlays a semi-transparent white sparkle logo near the
//! bottom-right corner of generated images. This crate searches a small window
//! for the logo with a sparse normalized-correlation template, checks the match
//! with an independent darkening score, and reverses the alpha-blending
//! equation to recover the original pixels.
//!
//! The 48x48 and 96x96 alpha masks embedded in the binary are rendered
//! approximations of the sparkle logo, not captures taken from Gemini output.
//! Real images may score below the confidence gate with them. Point
//! [`AssetSource::Directory`] (or the CLI's `--assets`) at a directory holding
//! captured `bg_48.png` and `bg_96.png` masks to detect the real watermark
//! reliably.
//!
//! # Quick Start
//!
//! ```no_run
//! use gemini_watermark_removal::{remove_visible_watermark_from_blob, OutputFormat, ProcessOptions};
//!
//! let input = std::fs::read("photo.png").unwrap();
//! let opts = ProcessOptions {
//!     output_format: Some(OutputFormat::Png),
//!     ..ProcessOptions::default()
//! };
//! match remove_visible_watermark_from_blob(&input, &opts) {
//!     Ok(cleaned) => std::fs::write("cleaned.png", &cleaned.data).unwrap(),
//!     // Not confidently watermarked: keep the original.
//!     Err(e) if e.is_detection_failure() => std::fs::write("cleaned.png", &input).unwrap(),
//!     Err(e) => panic!("{e}"),
//! }
//! ```
//!
//! # Decoded images
//!
//! ```no_run
//! use gemini_watermark_removal::{ProcessOptions, WatermarkEngine};
//!
//! let engine = WatermarkEngine::new();
//! let mut img = image::open("photo.png").unwrap().to_rgba8();
//! if let Some(position) = engine.detect(&img, None).unwrap() {
//!     println!("best match at ({}, {}), correlation {:.3}", position.x, position.y, position.correlation);
//! }
//! let detection = engine.remove(&mut img, &ProcessOptions::default()).unwrap();
//! println!("darkening {:.1}", detection.darkening);
//! ```

#![deny(missing_docs)]

mod alpha_maps;
pub mod blending;
pub mod config;
pub mod detection;
mod engine;
pub mod error;
pub mod template;

pub use config::{MarginRange, Tuning, WatermarkConfig, WatermarkSize};
pub use detection::{Detection, WatermarkPosition};
pub use engine::{
    default_engine, default_output_path, is_supported_image, remove_visible_watermark_from_blob,
    resolve_output_path, OutputFormat, ProcessOptions, ProcessResult, ProcessedImage,
    WatermarkEngine,
};
pub use error::{Error, Result};
pub use template::{AlphaTemplate, AssetSource, TemplateCache};
