//! Error types for the gemini-watermark-removal crate.

/// Errors that can occur while locating and removing a watermark.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reference alpha asset could not be read or decoded.
    #[error("failed to load {size}x{size} alpha asset: {source}")]
    AssetLoad {
        /// Logo size the asset was requested for.
        size: u32,
        /// Underlying read or decode failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The input has zero width or height.
    #[error("invalid input image: {0}")]
    InvalidImage(String),

    /// The input bytes could not be decoded as an image.
    #[error("invalid input image: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// The search window was empty or no candidate produced a finite score.
    #[error("unable to locate {size}x{size} watermark region")]
    WatermarkNotFound {
        /// Logo size that was searched for.
        size: u32,
    },

    /// A candidate was found but failed the correlation/darkening gate.
    #[error("low watermark confidence (correlation={correlation:.3}, darkening={darkening:.2})")]
    LowConfidence {
        /// Normalized correlation of the best candidate.
        correlation: f64,
        /// Mean luminance reduction at the best candidate.
        darkening: f64,
    },

    /// Re-encoding the cleaned image failed.
    #[error("failed to encode output image: {0}")]
    Encode(image::ImageError),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested output format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// A tuning file could not be parsed.
    #[error("invalid tuning configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means "no confident watermark here".
    ///
    /// Callers use this to fall back to the unprocessed original instead of
    /// treating the image as failed.
    #[must_use]
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            Error::WatermarkNotFound { .. } | Error::LowConfidence { .. }
        )
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
