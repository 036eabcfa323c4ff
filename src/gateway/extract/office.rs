use std::io::{Cursor, Read as _};

use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::events::Event;

use super::{ExtractError, Extractor};

const DOCUMENT_PART: &str = "word/document.xml";

/// Raw text of a `.docx` body: runs in document order, one line per paragraph.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxExtractor;

#[async_trait]
impl Extractor for DocxExtractor {
    async fn extract(&self, bytes: Bytes) -> Result<String, ExtractError> {
        tokio::task::spawn_blocking(move || docx_text(&bytes))
            .await
            .map_err(|err| ExtractError::Task(err.to_string()))?
    }
}

fn malformed(err: impl std::fmt::Display) -> ExtractError {
    ExtractError::Malformed(err.to_string())
}

fn docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(malformed)?;
    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(malformed)?
        .read_to_string(&mut xml)
        .map_err(malformed)?;
    document_xml_text(&xml)
}

fn document_xml_text(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(tag) if tag.name().as_ref() == b"w:t" => in_text = true,
            Event::End(tag) => match tag.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(tag) => match tag.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(text) if in_text => out.push_str(&text.unescape().map_err(malformed)?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}
