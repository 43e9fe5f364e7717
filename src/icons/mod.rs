//! Process Icons
//!
//! Custom overrides first, then the cache, then extraction from the
//! executable. Failures fall back to a generated placeholder.

pub mod cache;
pub mod extract;
pub mod overrides;

pub use cache::{cache_key, IconResolver};
pub use extract::{IconExtractor, SystemIconExtractor};
pub use overrides::IconOverrides;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tracing::error;

/// Placeholder edge length in pixels
pub const PLACEHOLDER_SIZE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconSource {
    CustomOverride,
    Extracted,
    Default,
}

/// Encoded image bytes plus where they came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub bytes: Arc<[u8]>,
    pub source: IconSource,
}

impl Icon {
    pub fn new(bytes: impl Into<Arc<[u8]>>, source: IconSource) -> Self {
        Self {
            bytes: bytes.into(),
            source,
        }
    }

    /// Shared default icon
    pub fn placeholder() -> Self {
        Self {
            bytes: PLACEHOLDER.clone(),
            source: IconSource::Default,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.source == IconSource::Default
    }
}

lazy_static::lazy_static! {
    static ref PLACEHOLDER: Arc<[u8]> = Arc::from(render_placeholder());
}

/// Grey disc with a white centre dot
fn render_placeholder() -> Vec<u8> {
    let center = (PLACEHOLDER_SIZE as f32 - 1.0) / 2.0;
    let img = RgbaImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, y| {
        let dx = x as f32 - center;
        let dy = y as f32 - center;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance <= 4.0 {
            Rgba([255, 255, 255, 255])
        } else if distance <= 13.0 {
            Rgba([128, 128, 128, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });

    encode_png(img).unwrap_or_else(|e| {
        error!("Could not render placeholder icon: {}", e);
        Vec::new()
    })
}

/// Encodes RGBA pixels as PNG
pub fn encode_png(img: RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
