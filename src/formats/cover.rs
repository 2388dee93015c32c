//! Cover image validation.

use image::ImageFormat;
use std::path::Path;

/// Image types accepted as book covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// JPEG image.
    Jpeg,
    /// PNG image.
    Png,
    /// GIF image.
    Gif,
    /// WebP image.
    WebP,
}

impl ImageKind {
    /// All accepted image types.
    pub const ALL: [ImageKind; 4] = [
        ImageKind::Jpeg,
        ImageKind::Png,
        ImageKind::Gif,
        ImageKind::WebP,
    ];

    /// Detect the image type from its magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        // Anything this short is not a usable image even if the magic matches
        if data.len() < 8 {
            return None;
        }

        match image::guess_format(data).ok()? {
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Gif => Some(ImageKind::Gif),
            ImageFormat::WebP => Some(ImageKind::WebP),
            _ => None,
        }
    }

    /// File extension (without the dot) for a stored cover.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::WebP => "webp",
        }
    }
}

/// Check whether data is a supported image.
pub fn is_image(data: &[u8]) -> bool {
    ImageKind::detect(data).is_some()
}

/// Content type for a stored cover file, based on its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}
