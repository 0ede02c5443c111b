//! Rendered sparkle-logo alpha masks compiled into the binary.
//!
//! Each PNG depicts the white sparkle logo on a black background; opacity is
//! encoded as brightness, so `alpha = max(R, G, B) / 255`.

/// 48x48 mask used for images where either dimension is <= 1024.
pub(crate) const BG_48_PNG: &[u8] = include_bytes!("../assets/bg_48.png");

/// 96x96 mask used for images where both dimensions are > 1024.
pub(crate) const BG_96_PNG: &[u8] = include_bytes!("../assets/bg_96.png");
