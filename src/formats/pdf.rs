use crate::error::{AppError, Result};
use crate::formats::{FormatHandler, Metadata, cover};
use lopdf::{Dictionary, Document, Object};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// How much of the file the raw metadata scan looks at.
const RAW_SCAN_BYTES: u64 = 50_000;

/// Longest title or author string accepted from a PDF.
const MAX_FIELD_LEN: usize = 200;

/// Handler for PDF files.
pub struct PdfHandler;

impl PdfHandler {
    /// Extract text content from a PDF info dictionary value.
    fn extract_text(obj: &Object) -> Option<String> {
        match obj {
            Object::String(bytes, _) => {
                // UTF-16BE with BOM
                if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
                    let utf16: Vec<u16> = rest
                        .chunks(2)
                        .map(|chunk| u16::from_be_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)]))
                        .collect();
                    String::from_utf16(&utf16).ok()
                } else {
                    // UTF-8, else Latin-1
                    Some(
                        String::from_utf8(bytes.clone())
                            .unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect()),
                    )
                }
            }
            Object::Name(name) => String::from_utf8(name.clone()).ok(),
            _ => None,
        }
    }

    fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
        match obj {
            Object::Reference(r) => doc.get_dictionary(*r).ok(),
            Object::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    fn info_field(doc: &Document, info: &Dictionary, key: &[u8]) -> Option<String> {
        let value = match info.get(key).ok()? {
            Object::Reference(r) => doc.get_object(*r).ok()?,
            other => other,
        };
        Self::extract_text(value)
    }

    /// Read title and author from the document information dictionary.
    fn metadata_from_document(doc: &Document) -> (Option<String>, Option<String>) {
        let Some(info) = doc
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|obj| Self::resolve_dict(doc, obj))
        else {
            return (None, None);
        };

        (
            Self::info_field(doc, info, b"Title"),
            Self::info_field(doc, info, b"Author"),
        )
    }

    /// Scan the start of an unparseable file for `/Title (...)` and `/Author (...)`.
    fn metadata_from_raw(path: &Path) -> Result<(Option<String>, Option<String>)> {
        let mut buffer = Vec::new();
        File::open(path)?.take(RAW_SCAN_BYTES).read_to_end(&mut buffer)?;
        let content = String::from_utf8_lossy(&buffer);

        Ok((
            raw_string_after(&content, "/Title"),
            raw_string_after(&content, "/Author"),
        ))
    }

    /// Find the first JPEG image drawn on page one.
    fn first_page_jpeg(doc: &Document) -> Option<Vec<u8>> {
        let first_page_id = *doc.get_pages().values().next()?;
        let page = doc.get_dictionary(first_page_id).ok()?;
        let resources = Self::resolve_dict(doc, page.get(b"Resources").ok()?)?;
        let xobjects = Self::resolve_dict(doc, resources.get(b"XObject").ok()?)?;

        for (_name, obj) in xobjects.iter() {
            let Object::Reference(xobj_ref) = obj else {
                continue;
            };
            let Ok(Object::Stream(stream)) = doc.get_object(*xobj_ref) else {
                continue;
            };

            let is_image = matches!(
                stream.dict.get(b"Subtype"),
                Ok(Object::Name(n)) if n == b"Image"
            );
            let is_dct = match stream.dict.get(b"Filter") {
                Ok(Object::Name(n)) => n == b"DCTDecode",
                Ok(Object::Array(arr)) => arr
                    .iter()
                    .any(|item| matches!(item, Object::Name(n) if n == b"DCTDecode")),
                _ => false,
            };
            if !is_image || !is_dct {
                continue;
            }

            if cover::is_image(&stream.content) {
                return Some(stream.content.clone());
            }
        }

        None
    }
}

/// Extract a parenthesised string literal following `key`, unescaping parentheses.
fn raw_string_after(content: &str, key: &str) -> Option<String> {
    let idx = content.find(key)?;
    let start = idx + content[idx..].find('(')? + 1;
    let rest = content[start..].as_bytes();
    let len = (0..rest.len()).find(|&i| rest[i] == b')' && (i == 0 || rest[i - 1] != b'\\'))?;
    if len >= MAX_FIELD_LEN {
        return None;
    }

    Some(
        content[start..start + len]
            .trim()
            .replace("\\(", "(")
            .replace("\\)", ")"),
    )
}

/// Apply extracted fields, rejecting implausible values.
fn apply_fields(metadata: &mut Metadata, title: Option<String>, author: Option<String>) {
    if let Some(title) = title.map(|t| t.trim().to_string())
        && title.len() > 2
        && title.len() < MAX_FIELD_LEN
    {
        metadata.title = title;
    }

    if let Some(author) = author.map(|a| a.trim().to_string())
        && !author.is_empty()
        && author.len() < MAX_FIELD_LEN
    {
        metadata.author = author;
    }
}

impl FormatHandler for PdfHandler {
    fn extract_metadata(&self, path: &Path, fallback_title: &str) -> Result<Metadata> {
        let mut metadata = Metadata::fallback(fallback_title);

        let (title, author) = match Document::load(path) {
            Ok(doc) => Self::metadata_from_document(&doc),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "PDF not parseable, scanning raw bytes");
                (None, None)
            }
        };
        let (title, author) = if title.is_none() && author.is_none() {
            Self::metadata_from_raw(path)?
        } else {
            (title, author)
        };

        apply_fields(&mut metadata, title, author);
        Ok(metadata)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let doc = Document::load(path).map_err(|e| AppError::Pdf(e.to_string()))?;
        Ok(Self::first_page_jpeg(&doc))
    }
}
