use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::command::run_with_stdin;
use super::{ExtractError, Extractor};

/// Structured PDF text via poppler's `pdftotext`, reading the document from stdin.
#[derive(Debug, Clone)]
pub struct PdfExtractor {
    program: String,
    timeout: Duration,
}

impl PdfExtractor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Extractor for PdfExtractor {
    async fn extract(&self, bytes: Bytes) -> Result<String, ExtractError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(ExtractError::Malformed("missing %PDF header".to_string()));
        }
        run_with_stdin(
            &self.program,
            &["-layout", "-enc", "UTF-8", "-", "-"],
            &bytes,
            self.timeout,
        )
        .await
    }
}
