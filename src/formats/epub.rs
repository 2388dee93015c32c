//! EPUB format handler.

use crate::error::{AppError, Result};
use crate::formats::{FormatHandler, Metadata, cover};
use roxmltree::{Document, ParsingOptions};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// File names tried when the package document does not declare a cover.
const COMMON_COVER_NAMES: [&str; 3] = ["cover.jpg", "cover.jpeg", "cover.png"];

/// Handler for EPUB files.
pub struct EpubHandler;

impl EpubHandler {
    fn parse_xml(content: &str) -> Result<Document<'_>> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        Ok(Document::parse_with_options(content, options)?)
    }

    fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        archive.by_name(name)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Find the OPF file path from container.xml.
    fn find_opf_path(archive: &mut ZipArchive<File>) -> Result<String> {
        let data = Self::read_entry(archive, "META-INF/container.xml")?;
        let content = String::from_utf8_lossy(&data);
        let doc = Self::parse_xml(&content)?;

        doc.descendants()
            .find(|n| n.has_tag_name("rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(String::from)
            .ok_or_else(|| AppError::BadRequest("No rootfile in container.xml".into()))
    }

    /// Read the package document. HTML entities that XML does not know are
    /// replaced so the document still parses.
    fn read_opf(archive: &mut ZipArchive<File>) -> Result<(String, String)> {
        let opf_path = Self::find_opf_path(archive)?;
        let data = Self::read_entry(archive, &opf_path)?;
        let content = String::from_utf8_lossy(&data).into_owned();

        if let Err(e) = Self::parse_xml(&content) {
            tracing::debug!(opf = %opf_path, error = %e, "Retrying package document without HTML entities");
            return Ok((opf_path, replace_html_entities(&content)));
        }

        Ok((opf_path, content))
    }

    /// Apply title and creator from the package metadata.
    fn parse_metadata(content: &str, metadata: &mut Metadata) -> Result<()> {
        let doc = Self::parse_xml(content)?;

        let first_text = |tag: &str| {
            doc.descendants()
                .filter(|n| n.is_element() && n.tag_name().name() == tag)
                .filter_map(|n| n.text())
                .map(str::trim)
                .find(|t| !t.is_empty())
                .map(String::from)
        };

        if let Some(title) = first_text("title") {
            metadata.title = title;
        }
        if let Some(author) = first_text("creator") {
            metadata.author = author;
        }

        Ok(())
    }

    /// Find the manifest href of the cover image, if the package declares one.
    fn find_cover_href(content: &str) -> Result<Option<String>> {
        let doc = Self::parse_xml(content)?;
        let items: Vec<_> = doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "item")
            .collect();

        // EPUB 3
        let declared = items.iter().find(|n| {
            n.attribute("properties")
                .is_some_and(|p| p.split_whitespace().any(|p| p == "cover-image"))
        });
        if let Some(href) = declared.and_then(|n| n.attribute("href")) {
            return Ok(Some(href.to_string()));
        }

        // EPUB 2
        let cover_id = doc
            .descendants()
            .find(|n| n.tag_name().name() == "meta" && n.attribute("name") == Some("cover"))
            .and_then(|n| n.attribute("content"));

        if let Some(cover_id) = cover_id {
            let href = items
                .iter()
                .find(|n| {
                    n.attribute("id") == Some(cover_id)
                        && n.attribute("media-type")
                            .is_some_and(|m| m.starts_with("image/"))
                })
                .and_then(|n| n.attribute("href"));
            if let Some(href) = href {
                return Ok(Some(href.to_string()));
            }
        }

        Ok(None)
    }

    /// Look for an archive entry with a conventional cover file name.
    fn find_common_cover(archive: &ZipArchive<File>) -> Option<String> {
        archive
            .file_names()
            .find(|name| {
                let base = name.rsplit('/').next().unwrap_or(name).to_lowercase();
                COMMON_COVER_NAMES.contains(&base.as_str())
            })
            .map(String::from)
    }
}

/// Resolve a manifest href against the directory of the package document.
pub(crate) fn resolve_href(opf_dir: &str, href: &str) -> String {
    let decoded = urlencoding::decode(href)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| href.to_string());

    let mut segments: Vec<&str> = opf_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Character for an HTML named entity commonly found in package metadata.
fn html_entity(name: &str) -> Option<char> {
    Some(match name {
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "eacute" => '\u{e9}',
        "egrave" => '\u{e8}',
        "agrave" => '\u{e0}',
        "ccedil" => '\u{e7}',
        "uuml" => '\u{fc}',
        "ouml" => '\u{f6}',
        "auml" => '\u{e4}',
        "szlig" => '\u{df}',
        _ => return None,
    })
}

/// Replace HTML named entities with their characters. XML entities and
/// character references are kept, unknown names are dropped and a bare `&`
/// is escaped.
fn replace_html_entities(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let end = after.find(';').filter(|&end| {
            end > 0
                && end <= 32
                && after[..end]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '#')
        });

        let Some(end) = end else {
            out.push_str("&amp;");
            rest = after;
            continue;
        };

        let name = &after[..end];
        match name {
            "amp" | "lt" | "gt" | "quot" | "apos" => {
                out.push('&');
                out.push_str(name);
                out.push(';');
            }
            _ if name.starts_with('#') => {
                out.push('&');
                out.push_str(name);
                out.push(';');
            }
            _ => {
                if let Some(c) = html_entity(name) {
                    out.push(c);
                }
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl FormatHandler for EpubHandler {
    fn extract_metadata(&self, path: &Path, fallback_title: &str) -> Result<Metadata> {
        let mut metadata = Metadata::fallback(fallback_title);

        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let (_, opf) = Self::read_opf(&mut archive)?;

        Self::parse_metadata(&opf, &mut metadata)?;
        Ok(metadata)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let declared = match Self::read_opf(&mut archive) {
            Ok((opf_path, opf)) => {
                let opf_dir = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
                match Self::find_cover_href(&opf) {
                    Ok(href) => href.map(|href| resolve_href(opf_dir, &href)),
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Unparseable package document");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No readable package document");
                None
            }
        };

        let Some(entry) = declared.or_else(|| Self::find_common_cover(&archive)) else {
            return Ok(None);
        };

        let data = Self::read_entry(&mut archive, &entry)?;
        if !cover::is_image(&data) {
            tracing::debug!(path = %path.display(), entry = %entry, "Cover entry is not a valid image");
            return Ok(None);
        }

        Ok(Some(data))
    }
}
