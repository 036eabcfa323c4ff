//! Document text extraction.
//!
//! Each [`DocumentKind`] maps to one [`Extractor`] in an [`ExtractorRegistry`]. Extraction
//! never fails the caller: errors and unsupported types become placeholder text.

mod command;
mod office;
mod ocr;
mod pdf;
mod spreadsheet;
mod text;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::config::ExtractionConfig;
use crate::utils::params::truncate_chars;

pub use office::DocxExtractor;
pub use ocr::OcrExtractor;
pub use pdf::PdfExtractor;
pub use spreadsheet::SpreadsheetExtractor;
pub use text::PlainTextExtractor;

pub const FAILED_PLACEHOLDER: &str = "[Failed to extract text]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    PlainText,
    Pdf,
    Image,
    WordProcessor,
    Spreadsheet,
}

impl DocumentKind {
    /// Maps a declared mimetype (parameters ignored) to the extraction category.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/pdf" {
            return Some(Self::Pdf);
        }
        if essence.starts_with("image/") {
            return Some(Self::Image);
        }
        if essence.starts_with("text/")
            || matches!(
                essence.as_str(),
                "application/json" | "application/xml" | "application/x-yaml"
            )
        {
            return Some(Self::PlainText);
        }
        match essence.as_str() {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::WordProcessor)
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel"
            | "application/vnd.oasis.opendocument.spreadsheet" => Some(Self::Spreadsheet),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("extraction task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, bytes: Bytes) -> Result<String, ExtractError>;
}

/// Result of one extraction. `failed` is set when the text is a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub truncated: bool,
    pub failed: bool,
}

impl Extraction {
    fn placeholder(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
            failed: true,
        }
    }
}

#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<DocumentKind, Arc<dyn Extractor>>,
    max_chars: usize,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("kinds", &self.extractors.keys().collect::<Vec<_>>())
            .field("max_chars", &self.max_chars)
            .finish()
    }
}

impl ExtractorRegistry {
    pub fn empty(max_chars: usize) -> Self {
        Self {
            extractors: HashMap::new(),
            max_chars,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let mut registry = Self::empty(config.max_chars);
        registry.register(DocumentKind::PlainText, Arc::new(PlainTextExtractor));
        registry.register(
            DocumentKind::Pdf,
            Arc::new(PdfExtractor::new(&config.pdftotext_bin, timeout)),
        );
        registry.register(
            DocumentKind::Image,
            Arc::new(OcrExtractor::new(
                &config.tesseract_bin,
                &config.ocr_language,
                timeout,
            )),
        );
        registry.register(DocumentKind::WordProcessor, Arc::new(DocxExtractor));
        registry.register(DocumentKind::Spreadsheet, Arc::new(SpreadsheetExtractor));
        registry
    }

    pub fn register(&mut self, kind: DocumentKind, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(kind, extractor);
    }

    pub fn supports(&self, mime: &str) -> bool {
        DocumentKind::from_mime(mime).is_some_and(|kind| self.extractors.contains_key(&kind))
    }

    /// Extracts at most `max_chars` characters of text from `bytes`.
    pub async fn extract(&self, bytes: Bytes, mime: &str) -> Extraction {
        let Some(kind) = DocumentKind::from_mime(mime) else {
            return Extraction::placeholder(format!("[Unsupported file type: {mime}]"));
        };
        let Some(extractor) = self.extractors.get(&kind) else {
            return Extraction::placeholder(format!("[Unsupported file type: {mime}]"));
        };

        match extractor.extract(bytes).await {
            Ok(text) => {
                let (text, truncated) = truncate_chars(text.trim(), self.max_chars);
                Extraction {
                    text,
                    truncated,
                    failed: false,
                }
            }
            Err(err) => {
                tracing::warn!(?kind, error = %err, "text extraction failed");
                Extraction::placeholder(FAILED_PLACEHOLDER)
            }
        }
    }
}
