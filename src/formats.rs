//! Supported book formats and format-specific metadata extraction.

mod cbz;
pub mod cover;
mod epub;
mod fb2;
mod pdf;

pub use cbz::CbzHandler;
pub use epub::EpubHandler;
pub use fb2::Fb2Handler;
pub use pdf::PdfHandler;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// EPUB format (Electronic Publication).
    Epub,
    /// PDF format (Portable Document Format).
    Pdf,
    /// MOBI format (Mobipocket eBook).
    Mobi,
    /// AZW3 format (Kindle Format 8).
    Azw3,
    /// FB2 format (FictionBook).
    Fb2,
    /// CBZ format (Comic Book ZIP archive).
    Cbz,
}

/// Formats rendered by the Foliate reader path of the web client.
pub const FOLIATE_FORMATS: &[BookFormat] = &[
    BookFormat::Epub,
    BookFormat::Mobi,
    BookFormat::Azw3,
    BookFormat::Fb2,
    BookFormat::Cbz,
];

/// Reflowable formats (as opposed to fixed-layout ones).
pub const TEXT_FORMATS: &[BookFormat] = &[
    BookFormat::Epub,
    BookFormat::Mobi,
    BookFormat::Azw3,
    BookFormat::Fb2,
];

/// File extensions accepted for upload and picked up by the scanner.
/// PDF is rendered by a separate client path, hence absent from [`FOLIATE_FORMATS`].
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".epub", ".pdf", ".mobi", ".azw3", ".fb2", ".cbz"];

/// Value for a file input's `accept` attribute.
pub static FILE_ACCEPT: LazyLock<String> = LazyLock::new(|| SUPPORTED_EXTENSIONS.join(","));

impl BookFormat {
    /// All formats, in [`SUPPORTED_EXTENSIONS`] order.
    pub const ALL: [BookFormat; 6] = [
        BookFormat::Epub,
        BookFormat::Pdf,
        BookFormat::Mobi,
        BookFormat::Azw3,
        BookFormat::Fb2,
        BookFormat::Cbz,
    ];

    /// Lowercase name, as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
            BookFormat::Mobi => "mobi",
            BookFormat::Azw3 => "azw3",
            BookFormat::Fb2 => "fb2",
            BookFormat::Cbz => "cbz",
        }
    }

    /// File extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            BookFormat::Epub => ".epub",
            BookFormat::Pdf => ".pdf",
            BookFormat::Mobi => ".mobi",
            BookFormat::Azw3 => ".azw3",
            BookFormat::Fb2 => ".fb2",
            BookFormat::Cbz => ".cbz",
        }
    }

    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            BookFormat::Epub => "application/epub+zip",
            BookFormat::Pdf => "application/pdf",
            BookFormat::Mobi => "application/x-mobipocket-ebook",
            BookFormat::Azw3 => "application/vnd.amazon.ebook",
            BookFormat::Fb2 => "application/x-fictionbook+xml",
            BookFormat::Cbz => "application/vnd.comicbook+zip",
        }
    }

    /// Detect format from a file extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.strip_prefix('.').unwrap_or(ext).to_lowercase();
        BookFormat::ALL.into_iter().find(|f| f.as_str() == ext)
    }

    /// Detect format from a file name or path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the web client renders this format with Foliate.
    pub fn is_foliate(&self) -> bool {
        FOLIATE_FORMATS.contains(self)
    }

    /// Whether this format is reflowable text.
    pub fn is_text(&self) -> bool {
        TEXT_FORMATS.contains(self)
    }
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata read from a book file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Book title.
    pub title: String,
    /// Primary author (empty if unknown).
    pub author: String,
}

impl Metadata {
    /// Metadata consisting only of a title taken from the file name.
    pub fn fallback(title: &str) -> Self {
        Self {
            title: title.to_string(),
            author: String::new(),
        }
    }
}

/// Trait for format-specific book handlers.
pub trait FormatHandler: Send + Sync {
    /// Extract title and author, starting from `fallback_title`.
    fn extract_metadata(&self, path: &Path, fallback_title: &str) -> Result<Metadata>;

    /// Extract the cover image bytes, validated as a known image type.
    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// Get the appropriate handler for a book format.
pub fn get_handler(format: BookFormat) -> Box<dyn FormatHandler> {
    match format {
        BookFormat::Epub => Box::new(EpubHandler),
        BookFormat::Pdf => Box::new(PdfHandler),
        BookFormat::Cbz => Box::new(CbzHandler),
        BookFormat::Fb2 => Box::new(Fb2Handler),
        // Mobipocket containers are passed through to the client untouched
        BookFormat::Mobi | BookFormat::Azw3 => Box::new(MinimalHandler),
    }
}

/// Minimal handler for formats without server-side metadata support.
struct MinimalHandler;

impl FormatHandler for MinimalHandler {
    fn extract_metadata(&self, _path: &Path, fallback_title: &str) -> Result<Metadata> {
        Ok(Metadata::fallback(fallback_title))
    }

    fn extract_cover(&self, _path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
