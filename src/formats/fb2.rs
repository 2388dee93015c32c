//! FictionBook 2 format handler.

use crate::error::Result;
use crate::formats::{FormatHandler, Metadata, cover};
use base64::{Engine, engine::general_purpose::STANDARD};
use encoding_rs::Encoding;
use roxmltree::{Document, Node, ParsingOptions};
use std::path::Path;

/// Handler for FB2 files.
pub struct Fb2Handler;

impl Fb2Handler {
    fn read(path: &Path) -> Result<String> {
        let data = std::fs::read(path)?;
        Ok(Self::decode(&data))
    }

    /// Decode with the encoding named in the XML declaration, UTF-8 otherwise.
    /// A byte order mark wins over both.
    fn decode(data: &[u8]) -> String {
        let encoding = declared_encoding(data).unwrap_or(encoding_rs::UTF_8);
        let (text, used, had_errors) = encoding.decode(data);
        if had_errors {
            tracing::debug!(encoding = used.name(), "Malformed bytes in FB2 document");
        }
        text.into_owned()
    }

    fn parse(content: &str) -> Result<Document<'_>> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        Ok(Document::parse_with_options(content, options)?)
    }

    fn title_info<'a, 'input>(doc: &'a Document<'input>) -> Option<Node<'a, 'input>> {
        doc.descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "title-info")
    }

    fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
        node.children()
            .find(|c| c.is_element() && c.tag_name().name() == name)
            .and_then(|c| c.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Author display name: first, middle and last name, or the nickname.
    fn author_name(author: Node<'_, '_>) -> Option<String> {
        let parts: Vec<String> = ["first-name", "middle-name", "last-name"]
            .iter()
            .filter_map(|name| Self::child_text(author, name))
            .collect();

        if parts.is_empty() {
            Self::child_text(author, "nickname")
        } else {
            Some(parts.join(" "))
        }
    }

    fn parse_metadata(content: &str, metadata: &mut Metadata) -> Result<()> {
        let doc = Self::parse(content)?;
        let Some(info) = Self::title_info(&doc) else {
            return Ok(());
        };

        if let Some(title) = Self::child_text(info, "book-title") {
            metadata.title = title;
        }

        let author = info
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "author")
            .find_map(Self::author_name);
        if let Some(author) = author {
            metadata.author = author;
        }

        Ok(())
    }

    /// Decode the binary referenced by the title-info coverpage.
    fn parse_cover(content: &str) -> Result<Option<Vec<u8>>> {
        let doc = Self::parse(content)?;

        let cover_id = Self::title_info(&doc)
            .and_then(|info| {
                info.descendants()
                    .find(|n| n.is_element() && n.tag_name().name() == "coverpage")
            })
            .and_then(|page| {
                page.descendants()
                    .find(|n| n.is_element() && n.tag_name().name() == "image")
            })
            .and_then(|image| {
                image
                    .attributes()
                    .find(|a| a.name() == "href")
                    .map(|a| a.value().trim_start_matches('#').to_string())
            });

        let Some(cover_id) = cover_id else {
            return Ok(None);
        };

        let encoded: String = doc
            .descendants()
            .find(|n| n.tag_name().name() == "binary" && n.attribute("id") == Some(cover_id.as_str()))
            .and_then(|n| n.text())
            .map(|t| t.chars().filter(|c| !c.is_whitespace()).collect())
            .unwrap_or_default();

        if encoded.is_empty() {
            return Ok(None);
        }

        match STANDARD.decode(encoded.as_bytes()) {
            Ok(data) if cover::is_image(&data) => Ok(Some(data)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::debug!(error = %e, cover = %cover_id, "Invalid base64 cover binary");
                Ok(None)
            }
        }
    }
}

/// Encoding label from `<?xml ... encoding="..."?>`.
fn declared_encoding(data: &[u8]) -> Option<&'static Encoding> {
    let head = &data[..data.len().min(256)];
    let end = head.windows(2).position(|w| w == b"?>")?;
    let declaration = std::str::from_utf8(&head[..end]).ok()?;

    let rest = &declaration[declaration.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| matches!(c, '"' | '\''))?;
    let value = &rest[1..];
    let label = &value[..value.find(quote)?];

    Encoding::for_label(label.trim().as_bytes())
}

impl FormatHandler for Fb2Handler {
    fn extract_metadata(&self, path: &Path, fallback_title: &str) -> Result<Metadata> {
        let mut metadata = Metadata::fallback(fallback_title);
        let content = Self::read(path)?;
        Self::parse_metadata(&content, &mut metadata)?;
        Ok(metadata)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let content = Self::read(path)?;
        Self::parse_cover(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0" xmlns:l="http://www.w3.org/1999/xlink">
  <description>
    <title-info>
      <author><first-name>Arkady</first-name><last-name>Strugatsky</last-name></author>
      <author><first-name>Boris</first-name><last-name>Strugatsky</last-name></author>
      <book-title>Roadside Picnic</book-title>
      <coverpage><image l:href="#cover.png"/></coverpage>
    </title-info>
  </description>
  <body><section><p>Text</p></section></body>
  <binary id="cover.png" content-type="image/png">iVBORw0KGgoAAAAA
  AAAA</binary>
</FictionBook>"##;

    #[test]
    fn reads_title_and_first_author() {
        let mut metadata = Metadata::fallback("picnic");
        Fb2Handler::parse_metadata(SAMPLE, &mut metadata).unwrap();
        assert_eq!(metadata.title, "Roadside Picnic");
        assert_eq!(metadata.author, "Arkady Strugatsky");
    }

    #[test]
    fn decodes_cover_binary() {
        let cover = Fb2Handler::parse_cover(SAMPLE).unwrap().unwrap();
        assert!(cover.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn decodes_declared_windows_1251() {
        let mut data = br#"<?xml version="1.0" encoding="windows-1251"?>
<FictionBook><description><title-info>
<author><first-name>"#
            .to_vec();
        // "Лев" and "Война" in cp1251
        data.extend_from_slice(&[0xCB, 0xE5, 0xE2]);
        data.extend_from_slice(b"</first-name></author><book-title>");
        data.extend_from_slice(&[0xC2, 0xEE, 0xE9, 0xED, 0xE0]);
        data.extend_from_slice(b"</book-title></title-info></description></FictionBook>");

        let content = Fb2Handler::decode(&data);
        let mut metadata = Metadata::fallback("voina");
        Fb2Handler::parse_metadata(&content, &mut metadata).unwrap();
        assert_eq!(metadata.title, "Война");
        assert_eq!(metadata.author, "Лев");
    }

    #[test]
    fn undeclared_encoding_is_utf8() {
        assert_eq!(declared_encoding(b"<?xml version=\"1.0\"?><a/>"), None);
        assert_eq!(
            declared_encoding(b"<?xml version='1.0' encoding = 'KOI8-R'?>"),
            Some(encoding_rs::KOI8_R)
        );
        assert_eq!(Fb2Handler::decode("<a>Ё</a>".as_bytes()), "<a>Ё</a>");
    }

    #[test]
    fn missing_title_info_keeps_fallback() {
        let mut metadata = Metadata::fallback("picnic");
        Fb2Handler::parse_metadata("<FictionBook/>", &mut metadata).unwrap();
        assert_eq!(metadata, Metadata::fallback("picnic"));
        assert_eq!(Fb2Handler::parse_cover("<FictionBook/>").unwrap(), None);
    }
}
