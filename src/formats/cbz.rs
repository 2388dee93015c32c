//! CBZ (Comic Book ZIP) format handler.

use crate::error::Result;
use crate::formats::{FormatHandler, Metadata, cover};
use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// Handler for CBZ files.
pub struct CbzHandler;

impl CbzHandler {
    /// Check if a filename is a page image.
    fn is_image_file(name: &str) -> bool {
        let lower = name.to_lowercase();
        [".jpg", ".jpeg", ".png", ".webp"]
            .iter()
            .any(|ext| lower.ends_with(ext))
    }

    /// Get sorted list of page images in the archive.
    fn get_image_files(archive: &ZipArchive<File>) -> Vec<String> {
        let mut images: Vec<String> = archive
            .file_names()
            .filter(|name| Self::is_image_file(name))
            .filter(|name| !name.contains("__MACOSX"))
            .map(String::from)
            .collect();

        // page2 before page10
        images.sort_by(|a, b| natord_compare(a, b));

        images
    }
}

impl FormatHandler for CbzHandler {
    fn extract_metadata(&self, _path: &Path, fallback_title: &str) -> Result<Metadata> {
        Ok(Metadata::fallback(fallback_title))
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        for name in Self::get_image_files(&archive) {
            let mut data = Vec::new();
            archive.by_name(&name)?.read_to_end(&mut data)?;

            if cover::is_image(&data) {
                return Ok(Some(data));
            }
            tracing::debug!(path = %path.display(), entry = %name, "Page is not a valid image");
        }

        Ok(None)
    }
}

/// Natural string comparison for sorting.
fn natord_compare(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ac), Some(bc)) if ac.is_ascii_digit() && bc.is_ascii_digit() => {
                let a_num = take_number(&mut a_chars);
                let b_num = take_number(&mut b_chars);

                match a_num.cmp(&b_num) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            (Some(ac), Some(bc)) => {
                a_chars.next();
                b_chars.next();

                match ac.to_lowercase().cmp(bc.to_lowercase()) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
}

/// Consume a run of ASCII digits.
fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> u64 {
    let mut value: u64 = 0;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        value = value.saturating_mul(10).saturating_add(u64::from(digit));
        chars.next();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natord_compare() {
        assert_eq!(natord_compare("page1", "page2"), Ordering::Less);
        assert_eq!(natord_compare("page2", "page10"), Ordering::Less);
        assert_eq!(natord_compare("page10", "page2"), Ordering::Greater);
        assert_eq!(natord_compare("Page3", "page3"), Ordering::Equal);
    }

    #[test]
    fn test_is_image_file() {
        assert!(CbzHandler::is_image_file("001.JPG"));
        assert!(CbzHandler::is_image_file("ch1/p.webp"));
        assert!(!CbzHandler::is_image_file("ComicInfo.xml"));
    }
}
